//! Clusters of k-mers around a prototype
//!
//! A [`Cluster`] refers to k-mers by [`KmerId`] in an arena owned elsewhere
//! (a [`KmerIndex`](crate::kmer_index::KmerIndex) or a
//! [`Codebook`](crate::codebook::Codebook)). Each member carries its distance
//! to the prototype; changing the prototype recomputes every member distance.

use crate::distance_cache::{Distance, DistanceCache};
use crate::kmer::{Kmer, KmerId};

/// Running count, sum and sum of squares of a stream of distances
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunningStats {
    count: usize,
    sum: f64,
    sum_sq: f64,
}

impl RunningStats {
    /// Record one value
    #[inline]
    pub fn push(&mut self, value: Distance) {
        let v = value as f64;
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
    }

    /// Number of recorded values
    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean, or 0 when empty
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Population variance, or 0 when empty
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_sq / self.count as f64 - mean * mean).max(0.0)
    }

    /// Population standard deviation
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// A prototype k-mer with its members and optional metadata
#[derive(Clone, Debug)]
pub struct Cluster {
    prototype: KmerId,
    members: Vec<(KmerId, Distance)>,
    metadata: Vec<(String, String)>,
    expected_size: usize,
    declared_size: Option<usize>,
    stats: RunningStats,
}

impl Cluster {
    /// Create an empty cluster; `expected_size` reserves member capacity
    pub fn new(prototype: KmerId, expected_size: usize) -> Self {
        Self {
            prototype,
            members: Vec::with_capacity(expected_size),
            metadata: Vec::new(),
            expected_size,
            declared_size: None,
            stats: RunningStats::default(),
        }
    }

    /// Prototype k-mer
    #[inline]
    pub fn prototype(&self) -> KmerId {
        self.prototype
    }

    /// Members with their distance to the prototype, in insertion order
    #[inline]
    pub fn members(&self) -> &[(KmerId, Distance)] {
        &self.members
    }

    /// Member ids, in insertion order
    pub fn member_ids(&self) -> impl Iterator<Item = KmerId> + '_ {
        self.members.iter().map(|&(id, _)| id)
    }

    /// Number of members
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the cluster has no members
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Size hint given at creation (or read from a codebook)
    #[inline]
    pub fn expected_size(&self) -> usize {
        self.expected_size
    }

    /// Size stated by the codebook record this cluster was read from
    #[inline]
    pub fn declared_size(&self) -> Option<usize> {
        self.declared_size
    }

    /// Record the size stated by a codebook record
    pub fn set_declared_size(&mut self, size: usize) {
        self.declared_size = Some(size);
    }

    /// Statistics of the member distances recorded so far
    #[inline]
    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    /// Append a member whose distance to the prototype is already known
    #[inline]
    pub fn add(&mut self, member: KmerId, distance: Distance) {
        self.members.push((member, distance));
        self.stats.push(distance);
    }

    /// Append all members of `other`, which must share this prototype
    pub fn absorb(&mut self, other: Cluster) {
        debug_assert_eq!(self.prototype, other.prototype);
        for (id, d) in other.members {
            self.add(id, d);
        }
    }

    /// Remove all members, keeping the prototype and metadata
    pub fn clear(&mut self) {
        self.members.clear();
        self.declared_size = None;
        self.stats = RunningStats::default();
    }

    /// Replace the prototype and recompute every member distance
    pub fn set_prototype(&mut self, prototype: KmerId, kmers: &[Kmer<'_>], cache: &DistanceCache, k: usize) {
        self.prototype = prototype;
        self.recompute_distances(kmers, cache, k);
    }

    /// Recompute every member distance against the current prototype
    pub fn recompute_distances(&mut self, kmers: &[Kmer<'_>], cache: &DistanceCache, k: usize) {
        let proto = kmers[self.prototype].packed_encoding();
        self.stats = RunningStats::default();
        for (id, d) in self.members.iter_mut() {
            *d = cache.distance(kmers[*id].packed_encoding(), proto, k);
            self.stats.push(*d);
        }
    }

    /// Total number of k-mer occurrences covered by the members
    pub fn num_instances(&self, kmers: &[Kmer<'_>]) -> usize {
        self.members.iter().map(|&(id, _)| kmers[id].num_instances()).sum()
    }

    /// Metadata entries, in insertion order
    #[inline]
    pub fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }

    /// Look up a metadata value
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a metadata value, replacing an existing entry in place
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.metadata.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.metadata.push((key, value)),
        }
    }

    /// Split a cluster whose size exceeds `max_size` into parts sharing the
    /// prototype
    ///
    /// The size is the declared one when present, otherwise the member
    /// count; it fixes the number of parts. Members are dealt out in order
    /// into parts as equal as possible, and the parts carry no declared size.
    pub fn split(self, max_size: usize) -> Vec<Cluster> {
        let n = self.members.len();
        let size = self.declared_size.unwrap_or(n);
        if max_size == 0 || size <= max_size || n == 0 {
            return vec![self];
        }
        let parts = size.div_ceil(max_size).min(n);
        let base = n / parts;
        let extra = n % parts;

        let mut out = Vec::with_capacity(parts);
        let mut members = self.members.into_iter();
        for p in 0..parts {
            let size = base + usize::from(p < extra);
            let mut part = Cluster::new(self.prototype, size);
            part.metadata = self.metadata.clone();
            for (id, d) in members.by_ref().take(size) {
                part.add(id, d);
            }
            out.push(part);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::kmer_index::KmerIndex;
    use crate::matrix::SymbolDistance;
    use crate::sequence::EncodedSequence;

    #[test]
    fn test_running_stats() {
        let mut s = RunningStats::default();
        for d in [2, 4, 4, 4, 5, 5, 7, 9] {
            s.push(d);
        }
        assert_eq!(s.count(), 8);
        assert!((s.mean() - 5.0).abs() < 1e-12);
        assert!((s.std_dev() - 2.0).abs() < 1e-12);
        assert_eq!(RunningStats::default().variance(), 0.0);
    }

    #[test]
    fn test_set_prototype_recomputes_distances() {
        let dna = Alphabet::dna();
        let seqs = vec![EncodedSequence::encode("s", b"AAAATTTT", &dna, 4).unwrap()];
        let index = KmerIndex::build(&seqs, 4).unwrap();
        let cache = crate::DistanceCache::from_metric(&dna, &SymbolDistance::Hamming).unwrap();
        let kmers = index.kmers();

        let mut cluster = Cluster::new(0, 4);
        for kmer in kmers {
            let d = cache.distance(kmer.packed_encoding(), kmers[0].packed_encoding(), 4);
            cluster.add(kmer.serial(), d);
        }
        // AAAA AAAT AATT ATTT TTTT
        let before: Vec<Distance> = cluster.members().iter().map(|m| m.1).collect();
        assert_eq!(before, vec![0, 1, 2, 3, 4]);

        cluster.set_prototype(4, kmers, &cache, 4);
        let after: Vec<Distance> = cluster.members().iter().map(|m| m.1).collect();
        assert_eq!(after, vec![4, 3, 2, 1, 0]);
        assert_eq!(cluster.prototype(), 4);
        assert!((cluster.stats().mean() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_metadata_replaces_in_place() {
        let mut c = Cluster::new(0, 0);
        c.set_metadata("purity", 0.5);
        c.set_metadata("class", "x");
        c.set_metadata("purity", 1);
        assert_eq!(c.metadata().len(), 2);
        assert_eq!(c.metadata()[0], ("purity".to_string(), "1".to_string()));
        assert_eq!(c.get_metadata("class"), Some("x"));
        assert_eq!(c.get_metadata("missing"), None);
    }

    #[test]
    fn test_split_is_balanced() {
        let mut c = Cluster::new(9, 10);
        for i in 0..10 {
            c.add(i, i as Distance);
        }
        let parts = c.split(4);
        let sizes: Vec<usize> = parts.iter().map(Cluster::len).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert!(parts.iter().all(|p| p.prototype() == 9));
        let ids: Vec<KmerId> = parts.iter().flat_map(|p| p.member_ids()).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_follows_declared_size() {
        let mut c = Cluster::new(0, 3);
        for i in 0..3 {
            c.add(i, 0);
        }
        c.set_declared_size(5);
        let parts = c.clone().split(2);
        let sizes: Vec<usize> = parts.iter().map(Cluster::len).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
        assert!(parts.iter().all(|p| p.declared_size().is_none()));

        c.set_declared_size(2);
        let whole = c.split(2);
        assert_eq!(whole.len(), 1);
        assert_eq!(whole[0].declared_size(), Some(2));
    }

    #[test]
    fn test_split_disabled_or_small() {
        let mut c = Cluster::new(0, 3);
        c.add(1, 0);
        c.add(2, 0);
        assert_eq!(c.clone().split(0).len(), 1);
        assert_eq!(c.split(2).len(), 1);
    }
}
