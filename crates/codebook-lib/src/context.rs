//! Per-run clustering context
//!
//! A [`ClusteringContext`] is built once per run and passed by reference to
//! every clustering and codebook operation. It owns the alphabet, the shared
//! distance cache, the validated configuration, the rayon pool used for
//! parallel passes, and the class-label interner.

use crate::alphabet::Alphabet;
use crate::config::ClusterConfig;
use crate::distance_cache::{Distance, DistanceCache};
use crate::hasher::SymbolHasher;
use crate::kmer::{Kmer, KmerId};
use crate::kmer_index::KmerIndex;
use crate::matrix::SymbolDistance;
use crate::sequence::EncodedSequence;
use crate::{Error, Result};
use ahash::AHashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Interns class labels to dense integer ids
#[derive(Debug, Default)]
pub struct LabelInterner {
    ids: AHashMap<String, usize>,
    names: Vec<String>,
}

impl LabelInterner {
    /// Id of `label`, assigning the next free id on first sight
    pub fn intern(&mut self, label: &str) -> usize {
        if let Some(&id) = self.ids.get(label) {
            return id;
        }
        let id = self.names.len();
        self.names.push(label.to_string());
        self.ids.insert(label.to_string(), id);
        id
    }

    /// Label with this id
    pub fn name(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Number of distinct labels seen
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no label has been interned
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Class label carried by a sequence id: the text after the last `|`,
    /// or the whole id when there is none
    pub fn label_of(sequence_id: &str) -> &str {
        sequence_id
            .rsplit_once('|')
            .map_or(sequence_id, |(_, label)| label)
    }
}

/// Everything a clustering run shares
pub struct ClusteringContext {
    alphabet: Alphabet,
    cache: Arc<DistanceCache>,
    config: ClusterConfig,
    pool: rayon::ThreadPool,
    labels: Mutex<LabelInterner>,
}

impl ClusteringContext {
    /// Validate `config`, build the distance cache for `metric` and the pool
    pub fn new(alphabet: Alphabet, metric: &SymbolDistance, config: ClusterConfig) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(DistanceCache::from_metric(&alphabet, metric)?);
        Self::with_cache(alphabet, cache, config)
    }

    /// Reuse an existing distance cache
    ///
    /// # Errors
    /// Returns a configuration error if the cache was built for a different
    /// alphabet size or the configuration is invalid.
    pub fn with_cache(alphabet: Alphabet, cache: Arc<DistanceCache>, config: ClusterConfig) -> Result<Self> {
        config.validate()?;
        if cache.alphabet_size() != alphabet.size() {
            return Err(Error::config(format!(
                "distance cache built for {} symbols, alphabet has {}",
                cache.alphabet_size(),
                alphabet.size()
            )));
        }
        // num_threads == 0 means "all cores" (rayon default)
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build()
            .map_err(|e| Error::config(format!("failed to build thread pool: {e}")))?;
        info!(
            "Clustering context ready: alphabet size {}, {} worker threads",
            alphabet.size(),
            pool.current_num_threads()
        );
        Ok(Self {
            alphabet,
            cache,
            config,
            pool,
            labels: Mutex::new(LabelInterner::default()),
        })
    }

    /// Alphabet
    #[inline]
    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// Distance oracle
    #[inline]
    pub fn cache(&self) -> &DistanceCache {
        &self.cache
    }

    /// Shared handle to the distance oracle
    pub fn shared_cache(&self) -> Arc<DistanceCache> {
        Arc::clone(&self.cache)
    }

    /// Validated configuration
    #[inline]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// K-mer length
    #[inline]
    pub fn k(&self) -> usize {
        self.config.k
    }

    /// Assignment threshold
    #[inline]
    pub fn threshold(&self) -> Distance {
        self.config.threshold
    }

    /// Distance between two k-mers
    #[inline]
    pub fn distance(&self, a: &Kmer<'_>, b: &Kmer<'_>) -> Distance {
        self.cache
            .distance(a.packed_encoding(), b.packed_encoding(), self.config.k)
    }

    /// Distance between two k-mers if it is at most `bound`
    #[inline]
    pub fn within(&self, a: &Kmer<'_>, b: &Kmer<'_>, bound: Distance) -> Option<Distance> {
        self.cache
            .within(a.packed_encoding(), b.packed_encoding(), self.config.k, bound)
    }

    /// Nearest of `prototypes` to k-mer `id` within the threshold, as
    /// (position in `prototypes`, distance); the lowest position wins ties
    pub fn nearest_prototype(
        &self,
        kmers: &[Kmer<'_>],
        id: KmerId,
        prototypes: &[KmerId],
    ) -> Option<(usize, Distance)> {
        let mut best: Option<(usize, Distance)> = None;
        let mut bound = self.config.threshold;
        for (p, &proto) in prototypes.iter().enumerate() {
            if let Some(d) = self.within(&kmers[id], &kmers[proto], bound) {
                if best.is_none_or(|(_, b)| d < b) {
                    best = Some((p, d));
                    bound = d;
                    if d == 0 {
                        break;
                    }
                }
            }
        }
        best
    }

    /// Run `op` inside the context's thread pool
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Evaluate `f` for every index in `0..n`, in parallel unless the
    /// configuration asks for a single thread; output order is index order
    pub fn map_indices<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        if self.config.is_parallel() {
            self.pool.install(|| (0..n).into_par_iter().map(&f).collect())
        } else {
            (0..n).map(f).collect()
        }
    }

    /// Apply `f` to every element of `items` with its index, in parallel
    /// unless the configuration asks for a single thread
    pub fn for_each_mut<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        if self.config.is_parallel() {
            self.pool.install(|| {
                items
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(i, item)| f(i, item))
            });
        } else {
            items.iter_mut().enumerate().for_each(|(i, item)| f(i, item));
        }
    }

    /// Random generator for one stream of the run
    ///
    /// Streams are identified by a path of integers (for example trial,
    /// iteration, cluster); equal paths give equal generators.
    pub fn rng(&self, stream: &[u64]) -> StdRng {
        StdRng::seed_from_u64(derive_seed(self.config.seed, stream))
    }

    /// Content hasher for k-mer substrings
    ///
    /// Alphabet-aware when `A^k` fits in 64 bits, seeded otherwise.
    pub fn symbol_hasher(&self) -> SymbolHasher {
        let a = self.alphabet.size() as u128;
        let fits = u32::try_from(self.config.k)
            .ok()
            .and_then(|k| a.checked_pow(k))
            .is_some_and(|space| space <= u64::MAX as u128);
        if fits {
            SymbolHasher::for_alphabet(self.alphabet.size())
        } else {
            SymbolHasher::seeded(self.config.seed)
        }
    }

    /// Encode `(id, text)` records with this context's alphabet and k
    pub fn encode<I, S>(&self, records: I) -> Result<Vec<EncodedSequence>>
    where
        I: IntoIterator<Item = (S, Vec<u8>)>,
        S: Into<String>,
    {
        crate::sequence::encode_all(records, &self.alphabet, self.config.k)
    }

    /// Build the k-mer index of `sequences` with this context's hasher
    pub fn build_index<'a>(&self, sequences: &'a [EncodedSequence]) -> Result<KmerIndex<'a>> {
        KmerIndex::build_with_hasher(sequences, self.config.k, self.symbol_hasher())
    }

    /// Exclusive access to the label interner
    pub fn labels(&self) -> MutexGuard<'_, LabelInterner> {
        // a poisoned interner is still consistent: interning never leaves it half-updated
        self.labels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ClusteringContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusteringContext")
            .field("alphabet", &self.alphabet)
            .field("cache", &self.cache)
            .field("config", &self.config)
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

fn derive_seed(seed: u64, stream: &[u64]) -> u64 {
    stream
        .iter()
        .fold(splitmix64(seed), |acc, &part| splitmix64(acc ^ splitmix64(part)))
}
