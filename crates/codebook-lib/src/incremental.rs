//! Exhaustive incremental (greedy) clustering
//!
//! The candidate k-mers live in one working array split by a boundary:
//! everything left of it is settled (a seed, a member, or rejected),
//! everything right of it is still unassigned. Each round draws up to
//! `increment` seeds from the unassigned region, assigns every remaining
//! k-mer within the threshold of a new seed, swaps assigned k-mers across
//! the boundary, and hands the new clusters to the observers. Rounds repeat
//! until the unassigned region is empty.
//!
//! Distances are computed in a parallel pure map; the swaps happen in one
//! sequential pass in array order, so membership does not depend on the
//! number of threads.

use crate::cluster::Cluster;
use crate::context::ClusteringContext;
use crate::kmer::{Kmer, KmerId};
use crate::observers::ClusterObserver;
use crate::Result;
use rand::seq::SliceRandom;
use tracing::{debug, info};

/// Stream id of the shuffle of the working array
const SHUFFLE_STREAM: u64 = 0x1ACE;

/// Outcome of incremental clustering
#[derive(Clone, Debug, Default)]
pub struct IncrementalClustering {
    /// Clusters in creation order
    pub clusters: Vec<Cluster>,
    /// Candidates rejected as seeds because their self-distance exceeds the
    /// threshold
    pub rejected: Vec<KmerId>,
    /// Number of rounds run
    pub rounds: usize,
}

/// Greedy clustering of a k-mer arena
pub struct IncrementalClusterer<'c> {
    ctx: &'c ClusteringContext,
}

impl<'c> IncrementalClusterer<'c> {
    /// Cluster with the threshold and increment of `ctx`
    pub fn new(ctx: &'c ClusteringContext) -> Self {
        Self { ctx }
    }

    /// Cluster every k-mer of `kmers`
    ///
    /// Each finished cluster is passed to `observers` in order before it is
    /// stored. An observer error aborts the run.
    pub fn run(
        &self,
        kmers: &[Kmer<'_>],
        observers: &mut [&mut dyn ClusterObserver],
    ) -> Result<IncrementalClustering> {
        let ctx = self.ctx;
        let increment = ctx.config().increment;
        info!(
            "Incremental clustering of {} k-mers (threshold {}, increment {})",
            kmers.len(),
            ctx.threshold(),
            increment
        );

        let mut work: Vec<KmerId> = (0..kmers.len()).collect();
        if ctx.config().shuffle {
            work.shuffle(&mut ctx.rng(&[SHUFFLE_STREAM]));
        }

        let mut result = IncrementalClustering::default();
        let mut boundary = 0;
        while boundary < work.len() {
            result.rounds += 1;
            let (mut clusters, seeds) = self.draw_seeds(kmers, &work, &mut boundary, &mut result.rejected);
            if clusters.is_empty() {
                continue;
            }

            let start = boundary;
            let pending = &work[start..];
            let choices = ctx.map_indices(pending.len(), |i| ctx.nearest_prototype(kmers, pending[i], &seeds));

            // positions past the current one are untouched by earlier swaps
            for (offset, choice) in choices.into_iter().enumerate() {
                if let Some((s, d)) = choice {
                    let j = start + offset;
                    clusters[s].add(work[j], d);
                    work.swap(j, boundary);
                    boundary += 1;
                }
            }

            debug!(
                "Round {}: {} new clusters, {} k-mers left",
                result.rounds,
                clusters.len(),
                work.len() - boundary
            );
            for mut cluster in clusters {
                for observer in observers.iter_mut() {
                    observer.observe(&mut cluster, kmers, ctx)?;
                }
                result.clusters.push(cluster);
            }
        }

        info!(
            "Incremental clustering done: {} clusters in {} rounds, {} rejected seeds",
            result.clusters.len(),
            result.rounds,
            result.rejected.len()
        );
        Ok(result)
    }

    /// Draw up to `increment` seeds from the unassigned region
    ///
    /// A drawn candidate within the threshold of a seed drawn earlier in the
    /// same round does not become a seed. Once the round is drawn, such
    /// candidates join the nearest of all the round's seeds. Candidates whose
    /// self-distance exceeds the threshold get the same second look and are
    /// rejected if no seed takes them.
    fn draw_seeds(
        &self,
        kmers: &[Kmer<'_>],
        work: &[KmerId],
        boundary: &mut usize,
        rejected: &mut Vec<KmerId>,
    ) -> (Vec<Cluster>, Vec<KmerId>) {
        let ctx = self.ctx;
        let increment = ctx.config().increment;
        let mut clusters: Vec<Cluster> = Vec::with_capacity(increment);
        let mut seeds: Vec<KmerId> = Vec::with_capacity(increment);
        let mut held: Vec<KmerId> = Vec::new();

        while seeds.len() < increment && *boundary < work.len() {
            let id = work[*boundary];
            *boundary += 1;
            let covered = seeds
                .iter()
                .any(|&s| ctx.within(&kmers[id], &kmers[s], ctx.threshold()).is_some());
            if covered {
                held.push(id);
                continue;
            }
            match ctx.within(&kmers[id], &kmers[id], ctx.threshold()) {
                Some(d) => {
                    let mut cluster = Cluster::new(id, 1);
                    cluster.add(id, d);
                    clusters.push(cluster);
                    seeds.push(id);
                }
                None => held.push(id),
            }
        }

        for id in held {
            match ctx.nearest_prototype(kmers, id, &seeds) {
                Some((s, d)) => clusters[s].add(id, d),
                None => rejected.push(id),
            }
        }
        (clusters, seeds)
    }
}
