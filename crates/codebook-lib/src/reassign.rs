//! Reassignment of k-mers against a fixed prototype list
//!
//! Two strategies share the [`AssignPolicy`] semantics:
//!
//! - [`ReassignStrategy::Partitioned`] maps every candidate to its
//!   prototype(s) in parallel. Candidates matching no prototype are split
//!   into fixed chunks; each chunk discovers new clusters greedily on its own
//!   and the chunks are merged in order afterwards. Existing clusters keep
//!   their index; discovered clusters are appended.
//! - [`ReassignStrategy::PerCluster`] scans all candidates once per
//!   prototype, in parallel over prototypes, then resolves candidates claimed
//!   by several clusters according to the policy. Nothing new is discovered.
//!
//! Under [`AssignPolicy::All`] a k-mer may belong to several clusters.

use crate::cluster::Cluster;
use crate::config::AssignPolicy;
use crate::constants::DISCOVERY_CHUNK_SIZE;
use crate::context::ClusteringContext;
use crate::distance_cache::Distance;
use crate::kmer::{Kmer, KmerId};
use crate::Result;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// How reassignment is parallelised
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReassignStrategy {
    /// Per-k-mer map, then per-chunk discovery of new clusters and a merge
    Partitioned,
    /// Independent scan per existing cluster
    PerCluster,
}

impl fmt::Display for ReassignStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReassignStrategy::Partitioned => "partitioned",
            ReassignStrategy::PerCluster => "per-cluster",
        })
    }
}

impl FromStr for ReassignStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "partitioned" => Ok(ReassignStrategy::Partitioned),
            "per-cluster" | "percluster" => Ok(ReassignStrategy::PerCluster),
            other => Err(crate::Error::config(format!("unknown reassignment strategy '{other}'"))),
        }
    }
}

/// Outcome of a reassignment
#[derive(Clone, Debug, Default)]
pub struct Reassignment {
    /// One cluster per input prototype (possibly empty, same order), followed
    /// by discovered clusters
    pub clusters: Vec<Cluster>,
    /// Number of clusters that came from the input prototypes
    pub existing: usize,
    /// Candidates that joined no cluster
    pub unassigned: Vec<KmerId>,
}

impl Reassignment {
    /// Clusters discovered during reassignment
    pub fn discovered(&self) -> &[Cluster] {
        &self.clusters[self.existing..]
    }
}

/// Reassigns candidate k-mers to prototypes of the same arena
pub struct Reassigner<'c> {
    ctx: &'c ClusteringContext,
    policy: AssignPolicy,
    strategy: ReassignStrategy,
}

impl<'c> Reassigner<'c> {
    /// Reassign with an explicit policy and strategy
    pub fn new(ctx: &'c ClusteringContext, policy: AssignPolicy, strategy: ReassignStrategy) -> Self {
        Self { ctx, policy, strategy }
    }

    /// Assign `candidates` to `prototypes`; both index into `kmers`
    pub fn run(&self, kmers: &[Kmer<'_>], candidates: &[KmerId], prototypes: &[KmerId]) -> Reassignment {
        info!(
            "Reassigning {} k-mers to {} prototypes (policy {}, strategy {})",
            candidates.len(),
            prototypes.len(),
            self.policy,
            self.strategy
        );
        let result = match self.strategy {
            ReassignStrategy::Partitioned => self.partitioned(kmers, candidates, prototypes),
            ReassignStrategy::PerCluster => self.per_cluster(kmers, candidates, prototypes),
        };
        info!(
            "Reassignment done: {} existing and {} discovered clusters, {} unassigned",
            result.existing,
            result.clusters.len() - result.existing,
            result.unassigned.len()
        );
        result
    }

    /// Prototype positions `id` joins under the policy
    fn matches(&self, kmers: &[Kmer<'_>], id: KmerId, prototypes: &[KmerId]) -> Vec<(usize, Distance)> {
        let ctx = self.ctx;
        let threshold = ctx.threshold();
        match self.policy {
            AssignPolicy::Nearest => ctx.nearest_prototype(kmers, id, prototypes).into_iter().collect(),
            AssignPolicy::First => prototypes
                .iter()
                .enumerate()
                .find_map(|(p, &proto)| ctx.within(&kmers[id], &kmers[proto], threshold).map(|d| (p, d)))
                .into_iter()
                .collect(),
            AssignPolicy::All => prototypes
                .iter()
                .enumerate()
                .filter_map(|(p, &proto)| ctx.within(&kmers[id], &kmers[proto], threshold).map(|d| (p, d)))
                .collect(),
        }
    }

    fn partitioned(&self, kmers: &[Kmer<'_>], candidates: &[KmerId], prototypes: &[KmerId]) -> Reassignment {
        let ctx = self.ctx;
        let choices = ctx.map_indices(candidates.len(), |i| self.matches(kmers, candidates[i], prototypes));

        let mut clusters: Vec<Cluster> = prototypes.iter().map(|&p| Cluster::new(p, 0)).collect();
        let mut unmatched = Vec::new();
        for (&id, matched) in candidates.iter().zip(choices) {
            if matched.is_empty() {
                unmatched.push(id);
            }
            for (p, d) in matched {
                clusters[p].add(id, d);
            }
        }

        let chunks: Vec<&[KmerId]> = unmatched.chunks(DISCOVERY_CHUNK_SIZE).collect();
        let discovered = ctx.map_indices(chunks.len(), |c| self.discover(kmers, chunks[c]));
        debug!("{} unmatched k-mers in {} discovery chunks", unmatched.len(), chunks.len());

        let existing = clusters.len();
        let mut unassigned = Vec::new();
        let mut found: Vec<Cluster> = Vec::new();
        let mut seeds: Vec<KmerId> = Vec::new();
        for (chunk_clusters, rejected) in discovered {
            unassigned.extend(rejected);
            for cluster in chunk_clusters {
                self.merge(kmers, &mut found, &mut seeds, cluster);
            }
        }
        clusters.extend(found);
        Reassignment {
            clusters,
            existing,
            unassigned,
        }
    }

    /// Greedy discovery inside one chunk of unmatched k-mers
    fn discover(&self, kmers: &[Kmer<'_>], chunk: &[KmerId]) -> (Vec<Cluster>, Vec<KmerId>) {
        let ctx = self.ctx;
        let mut clusters: Vec<Cluster> = Vec::new();
        let mut seeds: Vec<KmerId> = Vec::new();
        let mut rejected = Vec::new();
        for &id in chunk {
            let matched = self.matches(kmers, id, &seeds);
            if !matched.is_empty() {
                for (s, d) in matched {
                    clusters[s].add(id, d);
                }
                continue;
            }
            match ctx.within(&kmers[id], &kmers[id], ctx.threshold()) {
                Some(d) => {
                    let mut cluster = Cluster::new(id, 1);
                    cluster.add(id, d);
                    clusters.push(cluster);
                    seeds.push(id);
                }
                None => rejected.push(id),
            }
        }
        (clusters, rejected)
    }

    /// Merge a chunk-local cluster into the discovered list
    ///
    /// The prototype always stays in its own cluster. Every other member is
    /// placed by the policy over the earlier discovered prototypes followed
    /// by its own prototype, so under `Nearest` it ends up with the closest
    /// one.
    fn merge(&self, kmers: &[Kmer<'_>], found: &mut Vec<Cluster>, seeds: &mut Vec<KmerId>, cluster: Cluster) {
        let proto = cluster.prototype();
        let own = seeds.len();
        seeds.push(proto);
        let mut rest = Cluster::new(proto, cluster.expected_size());
        for &(id, d) in cluster.members() {
            if id == proto {
                rest.add(id, d);
                continue;
            }
            for (t, dt) in self.matches(kmers, id, seeds.as_slice()) {
                if t == own {
                    rest.add(id, dt);
                } else if self.policy != AssignPolicy::All || !found[t].member_ids().any(|m| m == id) {
                    found[t].add(id, dt);
                }
            }
        }
        found.push(rest);
    }

    fn per_cluster(&self, kmers: &[Kmer<'_>], candidates: &[KmerId], prototypes: &[KmerId]) -> Reassignment {
        let ctx = self.ctx;
        let threshold = ctx.threshold();
        let claims: Vec<Vec<(usize, Distance)>> = ctx.map_indices(prototypes.len(), |p| {
            let proto = &kmers[prototypes[p]];
            candidates
                .iter()
                .enumerate()
                .filter_map(|(c, &id)| ctx.within(&kmers[id], proto, threshold).map(|d| (c, d)))
                .collect()
        });

        let mut clusters: Vec<Cluster> = prototypes.iter().map(|&p| Cluster::new(p, 0)).collect();
        let mut claimed = vec![false; candidates.len()];
        match self.policy {
            AssignPolicy::All => {
                for (p, list) in claims.into_iter().enumerate() {
                    for (c, d) in list {
                        claimed[c] = true;
                        clusters[p].add(candidates[c], d);
                    }
                }
            }
            AssignPolicy::First | AssignPolicy::Nearest => {
                let mut owner: Vec<Option<(usize, Distance)>> = vec![None; candidates.len()];
                for (p, list) in claims.into_iter().enumerate() {
                    for (c, d) in list {
                        let replace = match owner[c] {
                            None => true,
                            Some((_, best)) => self.policy == AssignPolicy::Nearest && d < best,
                        };
                        if replace {
                            owner[c] = Some((p, d));
                        }
                    }
                }
                for (c, choice) in owner.into_iter().enumerate() {
                    if let Some((p, d)) = choice {
                        claimed[c] = true;
                        clusters[p].add(candidates[c], d);
                    }
                }
            }
        }

        let unassigned = candidates
            .iter()
            .zip(&claimed)
            .filter(|&(_, taken)| !*taken)
            .map(|(&id, _)| id)
            .collect();
        Reassignment {
            existing: clusters.len(),
            clusters,
            unassigned,
        }
    }
}
