//! Precomputed tuple distances
//!
//! For an alphabet of size `A` and a raw symbol distance `d`, the cache holds
//! three square tables indexed by packed words:
//!
//! ```text
//! T1[A   x A  ]   single symbols
//! T2[A^2 x A^2]   symbol pairs
//! T3[A^3 x A^3]   symbol triples
//! Tn[pack(x)][pack(y)] = Σ d(x_i, y_i)
//! ```
//!
//! A k-mer packed as `⌊k/3⌋` triples plus one remainder word is then compared
//! with `⌈k/3⌉` table reads instead of `k` symbol comparisons.
//!
//! The tables are immutable once built and shared read-only (behind an `Arc`)
//! by every clustering and lookup operation of a run.

use crate::alphabet::{Alphabet, KmerWord, Symbol};
use crate::constants::SYMBOLS_PER_WORD;
use crate::matrix::SymbolDistance;
use crate::{Error, Result};
use rayon::prelude::*;
use tracing::{debug, info};

/// Distance between two k-mers (or symbols, or tuples)
pub type Distance = u32;

type Entry = u16;

/// Tables of precomputed distances between 1-, 2- and 3-symbol tuples
pub struct DistanceCache {
    alphabet_size: usize,
    /// Number of distinct words per tuple length: A, A^2, A^3
    dims: [usize; SYMBOLS_PER_WORD],
    tables: [Vec<Entry>; SYMBOLS_PER_WORD],
    max_symbol_distance: Distance,
}

impl DistanceCache {
    /// Build the tables for a raw distance given as a closure
    ///
    /// # Errors
    /// Returns a configuration error if a tuple distance would not fit the
    /// table entry type.
    pub fn new<F>(alphabet_size: usize, raw: F) -> Result<Self>
    where
        F: Fn(Symbol, Symbol) -> Distance,
    {
        let a = alphabet_size;
        let dims = [a, a * a, a * a * a];

        let mut t1 = vec![0 as Entry; a * a];
        let mut max_symbol_distance = 0;
        for x in 0..a {
            for y in 0..a {
                let d = raw(x as Symbol, y as Symbol);
                if d as usize * SYMBOLS_PER_WORD > Entry::MAX as usize {
                    return Err(Error::config(format!(
                        "symbol distance {d} is too large for the distance cache"
                    )));
                }
                max_symbol_distance = max_symbol_distance.max(d);
                t1[x * a + y] = d as Entry;
            }
        }

        let t2 = extend_table(&t1, &t1, a, dims[1]);
        let t3 = extend_table(&t2, &t1, a, dims[2]);

        let cache = Self {
            alphabet_size: a,
            dims,
            tables: [t1, t2, t3],
            max_symbol_distance,
        };
        debug!(
            "Distance cache: alphabet size {}, {} table entries ({:.2} MB)",
            a,
            cache.num_entries(),
            cache.num_bytes() as f64 / (1024.0 * 1024.0)
        );
        Ok(cache)
    }

    /// Build the tables for a raw metric over `alphabet`
    pub fn from_metric(alphabet: &Alphabet, metric: &SymbolDistance) -> Result<Self> {
        metric.validate(alphabet)?;
        info!(
            "Building distance cache ({} metric, alphabet size {})",
            metric.name(),
            alphabet.size()
        );
        Self::new(alphabet.size(), |x, y| metric.evaluate(x, y))
    }

    /// Alphabet size the tables were built for
    #[inline]
    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    /// Largest single-symbol distance
    #[inline]
    pub fn max_symbol_distance(&self) -> Distance {
        self.max_symbol_distance
    }

    /// Distance between two packed tuples of length `n` (1..=3)
    #[inline]
    pub fn tuple_distance(&self, n: usize, x: KmerWord, y: KmerWord) -> Distance {
        self.tables[n - 1][x as usize * self.dims[n - 1] + y as usize] as Distance
    }

    /// Distance between two packed k-mers of length `k`
    ///
    /// `s` and `t` hold `⌊k/3⌋` triple words followed by a remainder word
    /// when `k` is not a multiple of 3.
    #[inline]
    pub fn distance(&self, s: &[KmerWord], t: &[KmerWord], k: usize) -> Distance {
        let full = k / SYMBOLS_PER_WORD;
        let rem = k % SYMBOLS_PER_WORD;
        let t3 = &self.tables[SYMBOLS_PER_WORD - 1];
        let d3 = self.dims[SYMBOLS_PER_WORD - 1];

        let mut sum: Distance = 0;
        for (&x, &y) in s[..full].iter().zip(&t[..full]) {
            sum += t3[x as usize * d3 + y as usize] as Distance;
        }
        if rem > 0 {
            sum += self.tuple_distance(rem, s[full], t[full]);
        }
        sum
    }

    /// Distance between two packed k-mers, or `None` as soon as the partial
    /// sum exceeds `threshold`
    ///
    /// When the result is `Some(d)`, `d` equals [`distance`](Self::distance).
    #[inline]
    pub fn within(
        &self,
        s: &[KmerWord],
        t: &[KmerWord],
        k: usize,
        threshold: Distance,
    ) -> Option<Distance> {
        let full = k / SYMBOLS_PER_WORD;
        let rem = k % SYMBOLS_PER_WORD;
        let t3 = &self.tables[SYMBOLS_PER_WORD - 1];
        let d3 = self.dims[SYMBOLS_PER_WORD - 1];

        let mut sum: Distance = 0;
        for (&x, &y) in s[..full].iter().zip(&t[..full]) {
            sum += t3[x as usize * d3 + y as usize] as Distance;
            if sum > threshold {
                return None;
            }
        }
        if rem > 0 {
            sum += self.tuple_distance(rem, s[full], t[full]);
        }
        (sum <= threshold).then_some(sum)
    }

    /// Whether the distance between two packed k-mers is at most `threshold`
    #[inline]
    pub fn is_within(&self, s: &[KmerWord], t: &[KmerWord], k: usize, threshold: Distance) -> bool {
        self.within(s, t, k, threshold).is_some()
    }

    /// Total number of table entries
    pub fn num_entries(&self) -> usize {
        self.tables.iter().map(Vec::len).sum()
    }

    /// Memory used by the tables, in bytes
    pub fn num_bytes(&self) -> usize {
        self.num_entries() * std::mem::size_of::<Entry>()
    }
}

impl std::fmt::Debug for DistanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistanceCache")
            .field("alphabet_size", &self.alphabet_size)
            .field("entries", &self.num_entries())
            .finish()
    }
}

/// Build the table for tuples one symbol longer than `prev`
///
/// With Horner packing, a word `x` of length n splits into the prefix
/// `x / A` (length n-1) and the last symbol `x % A`.
fn extend_table(prev: &[Entry], t1: &[Entry], a: usize, dim: usize) -> Vec<Entry> {
    let prev_dim = dim / a;
    let mut table = vec![0 as Entry; dim * dim];
    table.par_chunks_mut(dim).enumerate().for_each(|(x, row)| {
        let (xp, xl) = (x / a, x % a);
        let prev_row = &prev[xp * prev_dim..(xp + 1) * prev_dim];
        let t1_row = &t1[xl * a..(xl + 1) * a];
        for (y, slot) in row.iter_mut().enumerate() {
            *slot = prev_row[y / a] + t1_row[y % a];
        }
    });
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::{pack, unpack};

    fn hamming_dna() -> DistanceCache {
        DistanceCache::from_metric(&Alphabet::dna(), &SymbolDistance::Hamming).unwrap()
    }

    fn pack_kmer(symbols: &[Symbol], a: usize) -> Vec<KmerWord> {
        symbols.chunks(SYMBOLS_PER_WORD).map(|c| pack(c, a)).collect()
    }

    #[test]
    fn test_table_sizes() {
        let cache = hamming_dna();
        assert_eq!(cache.num_entries(), 16 + 256 + 4096);
        assert_eq!(cache.max_symbol_distance(), 1);
    }

    #[test]
    fn test_tables_match_naive_sum() {
        let a = 3;
        let raw = |x: Symbol, y: Symbol| (x as Distance * 2 + y as Distance) % 5;
        let cache = DistanceCache::new(a, raw).unwrap();
        let mut xs = [0u8; 3];
        let mut ys = [0u8; 3];
        for n in 1..=3 {
            let dim = a.pow(n as u32);
            for x in 0..dim {
                for y in 0..dim {
                    unpack(x as KmerWord, a, &mut xs[..n]);
                    unpack(y as KmerWord, a, &mut ys[..n]);
                    let naive: Distance = (0..n).map(|i| raw(xs[i], ys[i])).sum();
                    assert_eq!(cache.tuple_distance(n, x as KmerWord, y as KmerWord), naive);
                }
            }
        }
    }

    #[test]
    fn test_distance_with_remainders() {
        let cache = hamming_dna();
        let dna = Alphabet::dna();
        let s = dna.encode_sequence(b"ACGTACGTAC").unwrap();
        let t = dna.encode_sequence(b"ACGAACGTTT").unwrap();
        for k in 1..=10 {
            let naive = s[..k].iter().zip(&t[..k]).filter(|(x, y)| x != y).count() as Distance;
            let ps = pack_kmer(&s[..k], 4);
            let pt = pack_kmer(&t[..k], 4);
            assert_eq!(cache.distance(&ps, &pt, k), naive, "k={k}");
        }
    }

    #[test]
    fn test_within_short_circuits_and_agrees() {
        let cache = hamming_dna();
        let dna = Alphabet::dna();
        let s = pack_kmer(&dna.encode_sequence(b"AAAAAAAA").unwrap(), 4);
        let t = pack_kmer(&dna.encode_sequence(b"AAAATTTT").unwrap(), 4);
        assert_eq!(cache.distance(&s, &t, 8), 4);
        assert_eq!(cache.within(&s, &t, 8, 4), Some(4));
        assert_eq!(cache.within(&s, &t, 8, 3), None);
        assert!(cache.is_within(&s, &s, 8, 0));
    }

    #[test]
    fn test_rejects_oversized_symbol_distance() {
        let err = DistanceCache::new(2, |_, _| 30_000).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_blosum_tables_build() {
        use crate::matrix::SimilarityMatrix;
        let protein = Alphabet::protein();
        let metric = SymbolDistance::BlosumDifference(SimilarityMatrix::blosum62());
        let cache = DistanceCache::from_metric(&protein, &metric).unwrap();
        let w = protein.encode(b'W').unwrap();
        let a = protein.encode(b'A').unwrap();
        let www = pack(&[w, w, w], 24);
        let aaa = pack(&[a, a, a], 24);
        assert_eq!(cache.tuple_distance(3, www, www), 0);
        assert_eq!(cache.tuple_distance(3, aaa, aaa), 21);
        assert_eq!(cache.tuple_distance(3, aaa, www), 3 * (11 + 3));
    }
}
