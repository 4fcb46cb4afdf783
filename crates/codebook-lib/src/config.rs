//! Clustering configuration
//!
//! Parameters for index construction, medoid search, incremental clustering
//! and codebook loading, validated up front before any data is touched.

use crate::constants::{
    DEFAULT_INCREMENT, DEFAULT_ITERATIONS, DEFAULT_MIN_MEDDIT_SIZE, DEFAULT_SEED, DEFAULT_TRIALS,
};
use crate::distance_cache::Distance;
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// How cluster medoids are estimated during refinement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MedoidMode {
    /// Brute force below `min_meddit_size` members, MEDDIT at or above it
    Auto,
    /// Always compare every pair of members
    BruteForce,
    /// Always use the MEDDIT bandit
    Meddit,
}

/// Which prototypes a k-mer joins when several are within the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignPolicy {
    /// The first in-threshold prototype, in prototype order
    First,
    /// The closest prototype; ties keep the lowest index
    Nearest,
    /// Every in-threshold prototype
    All,
}

/// Configuration parameters for clustering and codebook construction
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// K-mer length
    pub k: usize,

    /// Largest distance at which a k-mer may join a prototype
    pub threshold: Distance,

    /// Seed for shuffling and sampling
    pub seed: u64,

    /// Number of independent medoid trials; the best scoring one is kept
    pub trials: usize,

    /// Assign/refine rounds per medoid trial
    pub iterations: usize,

    /// Seeds drawn per round of incremental clustering
    pub increment: usize,

    /// Smallest cluster refined with MEDDIT in `Auto` mode
    pub min_meddit_size: usize,

    /// Number of threads for parallel passes (0 = all available cores, 1 = sequential)
    pub num_threads: usize,

    /// Medoid estimator
    pub medoid_mode: MedoidMode,

    /// Reassignment policy
    pub assign_policy: AssignPolicy,

    /// Loaded clusters declaring more members than this are split (0 = never)
    pub split_cluster_threshold: usize,

    /// Shuffle candidates before seeding; otherwise keep index order
    pub shuffle: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            k: 30,
            threshold: 0,
            seed: DEFAULT_SEED,
            trials: DEFAULT_TRIALS,
            iterations: DEFAULT_ITERATIONS,
            increment: DEFAULT_INCREMENT,
            min_meddit_size: DEFAULT_MIN_MEDDIT_SIZE,
            num_threads: 0,
            medoid_mode: MedoidMode::Auto,
            assign_policy: AssignPolicy::Nearest,
            split_cluster_threshold: 0,
            shuffle: true,
        }
    }
}

impl ClusterConfig {
    /// Create a configuration with the given k-mer length and threshold
    pub fn new(k: usize, threshold: Distance) -> Result<Self> {
        let config = Self {
            k,
            threshold,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::config("k must be positive"));
        }
        if self.trials == 0 {
            return Err(Error::config("trials must be at least 1"));
        }
        if self.iterations == 0 {
            return Err(Error::config("iterations must be at least 1"));
        }
        if self.increment == 0 {
            return Err(Error::config("increment must be at least 1"));
        }
        if self.min_meddit_size < 2 {
            return Err(Error::config(format!(
                "min_meddit_size must be at least 2, got {}",
                self.min_meddit_size
            )));
        }
        Ok(())
    }

    /// Whether parallel passes should use the thread pool
    #[inline]
    pub fn is_parallel(&self) -> bool {
        self.num_threads != 1
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Cluster Configuration:");
        tracing::info!("  k = {}", self.k);
        tracing::info!("  threshold = {}", self.threshold);
        tracing::debug!("  seed = {}", self.seed);
        tracing::debug!("  trials = {}", self.trials);
        tracing::debug!("  iterations = {}", self.iterations);
        tracing::debug!("  increment = {}", self.increment);
        tracing::debug!("  min_meddit_size = {}", self.min_meddit_size);
        if self.num_threads == 0 {
            tracing::info!("  num_threads = all available cores");
        } else {
            tracing::info!("  num_threads = {}", self.num_threads);
        }
        tracing::info!("  medoid_mode = {}", self.medoid_mode);
        tracing::debug!("  assign_policy = {}", self.assign_policy);
        tracing::debug!("  split_cluster_threshold = {}", self.split_cluster_threshold);
        tracing::debug!("  shuffle = {}", self.shuffle);
    }
}

impl fmt::Display for MedoidMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MedoidMode::Auto => "auto",
            MedoidMode::BruteForce => "brute-force",
            MedoidMode::Meddit => "meddit",
        })
    }
}

impl FromStr for MedoidMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(MedoidMode::Auto),
            "brute-force" | "brute" => Ok(MedoidMode::BruteForce),
            "meddit" => Ok(MedoidMode::Meddit),
            other => Err(Error::config(format!("unknown medoid mode '{other}'"))),
        }
    }
}

impl fmt::Display for AssignPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssignPolicy::First => "first",
            AssignPolicy::Nearest => "nearest",
            AssignPolicy::All => "all",
        })
    }
}

impl FromStr for AssignPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(AssignPolicy::First),
            "nearest" => Ok(AssignPolicy::Nearest),
            "all" => Ok(AssignPolicy::All),
            other => Err(Error::config(format!("unknown assignment policy '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::default();
        assert_eq!(config.k, 30);
        assert!(config.validate().is_ok());
        assert!(config.is_parallel());
    }

    #[test]
    fn test_new_config() {
        let config = ClusterConfig::new(12, 3).unwrap();
        assert_eq!(config.k, 12);
        assert_eq!(config.threshold, 3);
    }

    #[test]
    fn test_validate_zero_k() {
        assert!(ClusterConfig::new(0, 1).is_err());
    }

    #[test]
    fn test_validate_counts() {
        let config = ClusterConfig { trials: 0, ..ClusterConfig::default() };
        assert!(config.validate().is_err());

        let config = ClusterConfig { iterations: 0, ..ClusterConfig::default() };
        assert!(config.validate().is_err());

        let config = ClusterConfig { increment: 0, ..ClusterConfig::default() };
        assert!(config.validate().is_err());

        let config = ClusterConfig { min_meddit_size: 1, ..ClusterConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_single_thread_is_sequential() {
        let config = ClusterConfig { num_threads: 1, ..ClusterConfig::default() };
        assert!(!config.is_parallel());
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("meddit".parse::<MedoidMode>().unwrap(), MedoidMode::Meddit);
        assert_eq!("Brute-Force".parse::<MedoidMode>().unwrap(), MedoidMode::BruteForce);
        assert!("fast".parse::<MedoidMode>().is_err());
        assert_eq!("all".parse::<AssignPolicy>().unwrap(), AssignPolicy::All);
        assert_eq!(AssignPolicy::Nearest.to_string(), "nearest");
    }
}
