//! Deduplicating k-mer index
//!
//! Scans every valid offset of every sequence and maps each distinct k-mer
//! content to one [`Kmer`] entity, appending an [`Instance`] for every
//! further occurrence. Entities are stored in an arena in first-occurrence
//! order, so serial numbers are deterministic for a given input order.

use crate::alphabet::Symbol;
use crate::hasher::{BuildPrehashed, SymbolHasher};
use crate::kmer::{Instance, Kmer, KmerId};
use crate::sequence::EncodedSequence;
use crate::substring::Substring;
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, info};

/// Map from distinct k-mer content to k-mer entities
pub struct KmerIndex<'a> {
    k: usize,
    hasher: SymbolHasher,
    map: HashMap<Substring<'a>, KmerId, BuildPrehashed>,
    kmers: Vec<Kmer<'a>>,
    num_instances: usize,
}

impl<'a> KmerIndex<'a> {
    /// Create an empty index for k-mers of length `k`
    pub fn new(k: usize, hasher: SymbolHasher) -> Self {
        Self {
            k,
            hasher,
            map: HashMap::default(),
            kmers: Vec::new(),
            num_instances: 0,
        }
    }

    /// Index every k-mer of `sequences`, hashing raw symbol bytes
    pub fn build(sequences: &'a [EncodedSequence], k: usize) -> Result<Self> {
        Self::build_with_hasher(sequences, k, SymbolHasher::default())
    }

    /// Index every k-mer of `sequences` with the given content hasher
    ///
    /// Sequences shorter than `k` contribute nothing.
    pub fn build_with_hasher(
        sequences: &'a [EncodedSequence],
        k: usize,
        hasher: SymbolHasher,
    ) -> Result<Self> {
        let mut index = Self::new(k, hasher);
        for (i, seq) in sequences.iter().enumerate() {
            index.add_sequence(seq, i)?;
        }
        info!(
            "Indexed {} sequences: {} distinct {}-mers, {} instances",
            sequences.len(),
            index.len(),
            k,
            index.num_instances
        );
        Ok(index)
    }

    /// Add every k-mer of one sequence
    ///
    /// `sequence_index` is the sequence's position in its collection and is
    /// recorded in the instances.
    ///
    /// # Errors
    /// Returns a configuration error if the sequence was packed for a
    /// different k-mer length.
    pub fn add_sequence(&mut self, sequence: &'a EncodedSequence, sequence_index: usize) -> Result<()> {
        let count = sequence.kmer_count(self.k);
        if count == 0 {
            debug!("Skipping sequence {} (length {} < k)", sequence.id(), sequence.len());
            return Ok(());
        }
        if sequence.k() != self.k {
            return Err(Error::config(format!(
                "sequence {} was packed for k={}, index uses k={}",
                sequence.id(),
                sequence.k(),
                self.k
            )));
        }

        for pos in 0..count {
            let key = Substring::new(sequence.symbols(), pos, self.k, &self.hasher);
            match self.map.get(&key) {
                Some(&id) => self.kmers[id].add_instance(Instance::new(sequence_index, pos)),
                None => {
                    let id = self.kmers.len();
                    self.kmers
                        .push(Kmer::new(sequence, sequence_index, pos, id, &self.hasher));
                    self.map.insert(key, id);
                }
            }
        }
        self.num_instances += count;
        Ok(())
    }

    /// K-mer length
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Snapshot of all entities, ordered by serial number
    #[inline]
    pub fn kmers(&self) -> &[Kmer<'a>] {
        &self.kmers
    }

    /// Entity with the given serial number
    #[inline]
    pub fn get(&self, id: KmerId) -> &Kmer<'a> {
        &self.kmers[id]
    }

    /// Entity whose content equals `symbols`
    pub fn find(&self, symbols: &[Symbol]) -> Option<KmerId> {
        if symbols.len() != self.k {
            return None;
        }
        let key = Substring::new(symbols, 0, self.k, &self.hasher);
        self.map.get(&key).copied()
    }

    /// Entity for the k-mer at `position` of `sequence`
    pub fn kmer_at(&self, sequence: &EncodedSequence, position: usize) -> Option<KmerId> {
        if position + self.k > sequence.len() {
            return None;
        }
        self.find(&sequence.symbols()[position..position + self.k])
    }

    /// Number of distinct k-mers
    #[inline]
    pub fn len(&self) -> usize {
        self.kmers.len()
    }

    /// Whether no k-mer has been indexed
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.kmers.is_empty()
    }

    /// Total number of indexed occurrences
    #[inline]
    pub fn num_instances(&self) -> usize {
        self.num_instances
    }

    /// Give up the arena
    pub fn into_kmers(self) -> Vec<Kmer<'a>> {
        self.kmers
    }
}
