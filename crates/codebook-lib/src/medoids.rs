//! Medoid-based clustering (KMedoids)
//!
//! Each trial shuffles the candidate k-mers, seeds the prototypes with the
//! k-mers of one randomly chosen sequence, then alternates an assignment
//! pass (every candidate joins its nearest prototype within the threshold)
//! with a refinement pass (every cluster's prototype becomes its medoid).
//! The trial covering the most k-mer instances wins.
//!
//! Medoids come from one of two estimators:
//! - [`brute_force_medoid`]: exact argmin of summed distances, O(n²).
//! - [`meddit_medoid`]: a bandit that samples distances and stops once one
//!   candidate's upper confidence bound is below every other lower bound.

use crate::cluster::Cluster;
use crate::config::MedoidMode;
use crate::constants::MEDDIT_DELTA;
use crate::context::ClusteringContext;
use crate::distance_cache::{Distance, DistanceCache};
use crate::kmer::{Kmer, KmerId};
use crate::kmer_index::KmerIndex;
use crate::sequence::EncodedSequence;
use crate::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

/// Outcome of medoid clustering
#[derive(Clone, Debug, Default)]
pub struct MedoidClustering {
    /// Prototype of each cluster, in cluster order
    pub prototypes: Vec<KmerId>,
    /// Non-empty clusters
    pub clusters: Vec<Cluster>,
    /// Total k-mer instances covered by the clusters
    pub score: usize,
    /// Candidates that joined no cluster
    pub unassigned: usize,
    /// Trial that produced this result
    pub trial: usize,
}

/// Exact medoid: the candidate with the smallest summed distance to the
/// others; the first such candidate wins ties
///
/// Returns `None` for an empty candidate set.
pub fn brute_force_medoid(
    candidates: &[KmerId],
    kmers: &[Kmer<'_>],
    cache: &DistanceCache,
    k: usize,
) -> Option<KmerId> {
    if candidates.len() <= 1 {
        return candidates.first().copied();
    }
    let mut best: Option<(KmerId, u64)> = None;
    for &c in candidates {
        let enc = kmers[c].packed_encoding();
        let total: u64 = candidates
            .iter()
            .map(|&o| cache.distance(enc, kmers[o].packed_encoding(), k) as u64)
            .sum();
        if best.is_none_or(|(_, b)| total < b) {
            best = Some((c, total));
        }
    }
    best.map(|(c, _)| c)
}

/// One bandit arm: the running mean distance from a candidate to the others
#[derive(Clone, Copy, Debug, Default)]
struct Arm {
    sum: u64,
    count: usize,
    exact: bool,
}

impl Arm {
    #[inline]
    fn mean(&self) -> f64 {
        self.sum as f64 / self.count as f64
    }

    #[inline]
    fn half_width(&self, sigma: f64, log_term: f64) -> f64 {
        if self.exact {
            0.0
        } else {
            sigma * (log_term / self.count as f64).sqrt()
        }
    }
}

/// Sampling state of one MEDDIT run
struct Bandit<'s, 'k> {
    candidates: &'s [KmerId],
    kmers: &'s [Kmer<'k>],
    cache: &'s DistanceCache,
    k: usize,
    arms: Vec<Arm>,
    sigma: f64,
    log_term: f64,
    pulls: usize,
}

impl Bandit<'_, '_> {
    #[inline]
    fn dist(&self, i: usize, j: usize) -> Distance {
        self.cache.distance(
            self.kmers[self.candidates[i]].packed_encoding(),
            self.kmers[self.candidates[j]].packed_encoding(),
            self.k,
        )
    }

    fn pull<R: Rng>(&mut self, i: usize, rng: &mut R) {
        let n = self.candidates.len();
        if self.arms[i].exact {
            return;
        }
        if self.arms[i].count + 1 >= n - 1 {
            self.settle(i);
            return;
        }
        let mut j = rng.random_range(0..n - 1);
        if j >= i {
            j += 1;
        }
        let d = self.dist(i, j) as u64;
        let arm = &mut self.arms[i];
        arm.sum += d;
        arm.count += 1;
        self.pulls += 1;
    }

    /// Replace the estimate by the exact mean over all other candidates
    fn settle(&mut self, i: usize) {
        let n = self.candidates.len();
        let sum: u64 = (0..n).filter(|&j| j != i).map(|j| self.dist(i, j) as u64).sum();
        self.pulls += n - 1;
        self.arms[i] = Arm {
            sum,
            count: n - 1,
            exact: true,
        };
    }

    #[inline]
    fn lcb(&self, i: usize) -> f64 {
        let arm = &self.arms[i];
        arm.mean() - arm.half_width(self.sigma, self.log_term)
    }

    #[inline]
    fn ucb(&self, i: usize) -> f64 {
        let arm = &self.arms[i];
        arm.mean() + arm.half_width(self.sigma, self.log_term)
    }

    /// Arm with the smallest estimated mean; the lowest index wins ties
    fn best(&self) -> usize {
        let mut best = 0;
        for i in 1..self.arms.len() {
            if self.arms[i].mean() < self.arms[best].mean() {
                best = i;
            }
        }
        best
    }
}

/// Approximate medoid by successive elimination
///
/// `sigma` is the spread of the distances in the cluster; a zero or
/// non-finite value falls back to 1. Every candidate starts with one random
/// comparison. Each round, the candidate with the lowest lower confidence
/// bound is sampled again (the current best wins ties); a candidate that has
/// been compared with every other is replaced by its exact mean. The search
/// stops when the best candidate's upper bound is at most every other
/// candidate's lower bound.
///
/// Returns `None` for an empty candidate set and the only candidate of a
/// singleton without sampling.
pub fn meddit_medoid<R: Rng>(
    candidates: &[KmerId],
    kmers: &[Kmer<'_>],
    cache: &DistanceCache,
    k: usize,
    sigma: f64,
    rng: &mut R,
) -> Option<KmerId> {
    let n = candidates.len();
    if n <= 1 {
        return candidates.first().copied();
    }
    let sigma = if sigma.is_finite() && sigma > f64::EPSILON {
        sigma
    } else {
        1.0
    };
    let mut bandit = Bandit {
        candidates,
        kmers,
        cache,
        k,
        arms: vec![Arm::default(); n],
        sigma,
        log_term: 2.0 * (2.0 / MEDDIT_DELTA).ln(),
        pulls: 0,
    };
    for i in 0..n {
        bandit.pull(i, rng);
    }

    loop {
        let best = bandit.best();
        let best_ucb = bandit.ucb(best);

        let mut target = best;
        let mut target_lcb = bandit.lcb(best);
        let mut separated = true;
        for i in 0..n {
            if i == best {
                continue;
            }
            let lcb = bandit.lcb(i);
            if lcb < best_ucb {
                separated = false;
            }
            if lcb < target_lcb {
                target = i;
                target_lcb = lcb;
            }
        }
        if separated {
            debug!("MEDDIT settled on {} candidates after {} pulls", n, bandit.pulls);
            return Some(candidates[best]);
        }

        if bandit.arms[target].exact {
            if bandit.arms[best].exact {
                return Some(candidates[best]);
            }
            bandit.settle(best);
        } else {
            bandit.pull(target, rng);
        }
    }
}

/// Estimate the medoid of one cluster with the configured estimator
pub fn refine_medoid<R: Rng>(
    cluster: &Cluster,
    kmers: &[Kmer<'_>],
    ctx: &ClusteringContext,
    rng: &mut R,
) -> Option<KmerId> {
    let candidates: Vec<KmerId> = cluster.member_ids().collect();
    let use_meddit = match ctx.config().medoid_mode {
        MedoidMode::BruteForce => false,
        MedoidMode::Meddit => true,
        MedoidMode::Auto => candidates.len() >= ctx.config().min_meddit_size,
    };
    if use_meddit {
        meddit_medoid(&candidates, kmers, ctx.cache(), ctx.k(), cluster.stats().std_dev(), rng)
    } else {
        brute_force_medoid(&candidates, kmers, ctx.cache(), ctx.k())
    }
}

/// KMedoids clustering of the k-mers of an index
pub struct KMedoids<'c, 'i, 'a> {
    ctx: &'c ClusteringContext,
    index: &'i KmerIndex<'a>,
    sequences: &'a [EncodedSequence],
}

impl<'c, 'i, 'a> KMedoids<'c, 'i, 'a> {
    /// Prepare clustering of `index`, which was built over `sequences`
    pub fn new(ctx: &'c ClusteringContext, index: &'i KmerIndex<'a>, sequences: &'a [EncodedSequence]) -> Self {
        Self { ctx, index, sequences }
    }

    /// Run every trial and keep the best one
    pub fn run(&self) -> Result<MedoidClustering> {
        let config = self.ctx.config();
        config.print();
        info!(
            "KMedoids over {} distinct {}-mers ({} trials, {} iterations)",
            self.index.len(),
            self.ctx.k(),
            config.trials,
            config.iterations
        );

        let mut best: Option<MedoidClustering> = None;
        for trial in 0..config.trials {
            let result = self.trial(trial);
            info!(
                "Trial {}: {} clusters, score {}, {} unassigned",
                trial,
                result.clusters.len(),
                result.score,
                result.unassigned
            );
            if best.as_ref().is_none_or(|b| result.score > b.score) {
                best = Some(result);
            }
        }
        Ok(best.unwrap_or_default())
    }

    fn trial(&self, trial: usize) -> MedoidClustering {
        let kmers = self.index.kmers();
        let mut rng = self.ctx.rng(&[trial as u64]);

        let mut candidates: Vec<KmerId> = (0..kmers.len()).collect();
        if self.ctx.config().shuffle {
            candidates.shuffle(&mut rng);
        }

        let mut prototypes = self.seed(&mut rng);
        if prototypes.is_empty() {
            return MedoidClustering {
                unassigned: candidates.len(),
                trial,
                ..MedoidClustering::default()
            };
        }

        for iteration in 0..self.ctx.config().iterations {
            let (mut clusters, _) = self.assign(&candidates, &prototypes);
            self.ctx.for_each_mut(&mut clusters, |c, cluster| {
                let mut rng = self.ctx.rng(&[trial as u64, iteration as u64, c as u64]);
                if let Some(medoid) = refine_medoid(cluster, kmers, self.ctx, &mut rng) {
                    cluster.set_prototype(medoid, kmers, self.ctx.cache(), self.ctx.k());
                }
            });
            prototypes = clusters.iter().map(Cluster::prototype).collect();
            debug!("Trial {} iteration {}: {} prototypes", trial, iteration, prototypes.len());
        }

        let (clusters, unassigned) = self.assign(&candidates, &prototypes);
        let score = clusters.iter().map(|c| c.num_instances(kmers)).sum();
        MedoidClustering {
            prototypes: clusters.iter().map(Cluster::prototype).collect(),
            clusters,
            score,
            unassigned,
            trial,
        }
    }

    /// Distinct k-mers of one random sequence, minus those whose
    /// self-distance exceeds the threshold
    fn seed<R: Rng>(&self, rng: &mut R) -> Vec<KmerId> {
        let k = self.ctx.k();
        let eligible: Vec<&EncodedSequence> = self
            .sequences
            .iter()
            .filter(|s| s.kmer_count(k) > 0)
            .collect();
        if eligible.is_empty() {
            return Vec::new();
        }
        let seq = eligible[rng.random_range(0..eligible.len())];

        let kmers = self.index.kmers();
        let threshold = self.ctx.threshold();
        let mut seen = vec![false; kmers.len()];
        let mut prototypes = Vec::new();
        for pos in 0..seq.kmer_count(k) {
            let Some(id) = self.index.kmer_at(seq, pos) else {
                continue;
            };
            if std::mem::replace(&mut seen[id], true) {
                continue;
            }
            if self.ctx.within(&kmers[id], &kmers[id], threshold).is_some() {
                prototypes.push(id);
            }
        }
        debug!("Seeded {} prototypes from sequence {}", prototypes.len(), seq.id());
        prototypes
    }

    /// Assign every candidate to its nearest prototype within the threshold
    ///
    /// Returns the non-empty clusters (in prototype order) and the number of
    /// unassigned candidates.
    fn assign(&self, candidates: &[KmerId], prototypes: &[KmerId]) -> (Vec<Cluster>, usize) {
        let kmers = self.index.kmers();
        let choices = self
            .ctx
            .map_indices(candidates.len(), |i| self.ctx.nearest_prototype(kmers, candidates[i], prototypes));

        let expected = candidates.len() / prototypes.len().max(1);
        let mut clusters: Vec<Cluster> = prototypes
            .iter()
            .map(|&p| Cluster::new(p, expected))
            .collect();
        let mut unassigned = 0;
        for (&id, choice) in candidates.iter().zip(choices) {
            match choice {
                Some((p, d)) => clusters[p].add(id, d),
                None => unassigned += 1,
            }
        }
        clusters.retain(|c| !c.is_empty());
        (clusters, unassigned)
    }
}
