// Codebook: clustering of k-mers under cached tuple distances
//
// Deduplicating k-mer index, per-tuple distance cache, k-medoids (with
// MEDDIT medoid search), incremental greedy clustering, reassignment against
// existing prototypes, and a persisted codebook with nearest-cluster lookup.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod alphabet;
pub mod cluster;
pub mod codebook;
pub mod config;
pub mod constants;
pub mod context;
pub mod distance_cache;
pub mod error;
pub mod hasher;
pub mod incremental;
pub mod kmer;
pub mod kmer_index;
pub mod matrix;
pub mod medoids;
pub mod observers;
pub mod parse;
pub mod reassign;
pub mod sequence;
pub mod substring;

// Re-export common types at crate root
pub use alphabet::{Alphabet, EncodingError, KmerWord, Symbol};
pub use cluster::{Cluster, RunningStats};
pub use codebook::{Codebook, CodebookWriter};
pub use config::{AssignPolicy, ClusterConfig, MedoidMode};
pub use context::{ClusteringContext, LabelInterner};
pub use distance_cache::{Distance, DistanceCache};
pub use error::{Error, Result};
pub use hasher::SymbolHasher;
pub use incremental::{IncrementalClusterer, IncrementalClustering};
pub use kmer::{Instance, Kmer, KmerId};
pub use kmer_index::KmerIndex;
pub use matrix::{SimilarityMatrix, SymbolDistance};
pub use medoids::{KMedoids, MedoidClustering};
pub use observers::{ClassPurity, ClusterObserver, CodebookSink, DistanceSummary};
pub use reassign::{ReassignStrategy, Reassigner, Reassignment};
pub use sequence::{EncodedSequence, SequenceIndex};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let (major, minor, patch) = version();
        assert_eq!(major, 0);
        assert_eq!(minor, 1);
        assert_eq!(patch, 0);
    }
}
