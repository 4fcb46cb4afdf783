//! Constants and configuration defaults
//!
//! This module defines the fixed parameters of the clustering algorithms
//! and the defaults used by [`ClusterConfig`](crate::config::ClusterConfig).

/// Library version (major, minor, patch)
pub const VERSION: (u8, u8, u8) = (0, 1, 0);

/// Number of symbols packed into one full [`KmerWord`](crate::alphabet::KmerWord)
pub const SYMBOLS_PER_WORD: usize = 3;

/// Largest alphabet for which a 3-symbol word fits in 16 bits (40^3 = 64000)
pub const MAX_ALPHABET_SIZE: usize = 40;

/// Confidence parameter of the MEDDIT bandit (fixed by the algorithm)
pub const MEDDIT_DELTA: f64 = 1e-2;

/// Default seed for shuffling and sampling
pub const DEFAULT_SEED: u64 = 1;

/// Default number of medoid trials
pub const DEFAULT_TRIALS: usize = 1;

/// Default number of assign/refine iterations per trial
pub const DEFAULT_ITERATIONS: usize = 4;

/// Default number of seeds drawn per round of incremental clustering
pub const DEFAULT_INCREMENT: usize = 100;

/// Clusters at least this large use MEDDIT instead of brute force in `Auto` mode
pub const DEFAULT_MIN_MEDDIT_SIZE: usize = 200;

/// Read buffer capacity used when streaming codebook files
pub const CODEBOOK_BUFFER_SIZE: usize = 1 << 20;

/// Number of unmatched k-mers handed to one discovery chunk during reassignment
pub const DISCOVERY_CHUNK_SIZE: usize = 4096;

/// Tag of the codebook header line
pub const HEADER_TAG: &str = "KmerLength";

/// Tag that starts every cluster record
pub const CLUSTER_TAG: &str = "Cluster";

/// Key of the optional distance prefix on member lines
pub const DISTANCE_KEY: &str = "distance";

/// Number of words needed to pack a k-mer of length `k`
#[inline]
pub const fn words_per_kmer(k: usize) -> usize {
    k.div_ceil(SYMBOLS_PER_WORD)
}
