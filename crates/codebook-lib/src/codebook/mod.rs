//! Codebook: persisted clusters and nearest-cluster lookup
//!
//! # Text format
//!
//! Line oriented ASCII, one record per line, decimal integers:
//!
//! ```text
//! KmerLength,<k>
//! Cluster,<size>,<prototypeId>:<offset>;<key>:<value>;...;
//! distance:<d>;<sequenceId>:<offset>
//! distance:<d>;<sequenceId>:<offset>
//! Cluster,...
//! ```
//!
//! A cluster line is followed by one member line per k-mer occurrence. The
//! `distance:<d>;` prefix caches the member's distance to the prototype; it
//! is optional on input (computed when absent) and always written. The
//! header is optional on input; when present it must match the configured k.
//!
//! Prototype ids resolve against the prototype sequence index, member ids
//! against the sequence index. Any unresolved id aborts the whole load.
//!
//! # Lookup
//!
//! `kmer_data` holds the packed encoding of every cluster's prototype, one
//! row per cluster in cluster order. Every operation that changes a
//! prototype or the cluster list rebuilds it before returning.

pub mod parser;
pub mod writer;

pub use parser::{parse_record, LineReader, Locator, Record};
pub use writer::CodebookWriter;

use crate::alphabet::KmerWord;
use crate::cluster::Cluster;
use crate::constants::{words_per_kmer, CODEBOOK_BUFFER_SIZE};
use crate::context::ClusteringContext;
use crate::distance_cache::{Distance, DistanceCache};
use crate::hasher::SymbolHasher;
use crate::kmer::{Kmer, KmerId};
use crate::medoids::refine_medoid;
use crate::sequence::{EncodedSequence, SequenceIndex};
use crate::{Error, Result};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, info};

/// A finished set of clusters with a dense prototype table
#[derive(Debug)]
pub struct Codebook<'a> {
    k: usize,
    cache: Arc<DistanceCache>,
    sequences: &'a [EncodedSequence],
    prototype_sequences: &'a [EncodedSequence],
    kmers: Vec<Kmer<'a>>,
    clusters: Vec<Cluster>,
    kmer_data: Vec<KmerWord>,
}

impl<'a> Codebook<'a> {
    /// Wrap clusters produced by a clustering pass
    ///
    /// `kmers` is the arena the clusters refer to and `sequences` the
    /// collection its instances point into.
    pub fn from_clusters(
        ctx: &ClusteringContext,
        kmers: Vec<Kmer<'a>>,
        clusters: Vec<Cluster>,
        sequences: &'a [EncodedSequence],
    ) -> Self {
        let mut codebook = Self {
            k: ctx.k(),
            cache: ctx.shared_cache(),
            sequences,
            prototype_sequences: &[],
            kmers,
            clusters,
            kmer_data: Vec::new(),
        };
        codebook.rebuild_kmer_data();
        codebook
    }

    /// Load a codebook from `reader`
    ///
    /// Clusters declaring more than the configured split threshold members
    /// are split into equal parts sharing the prototype. Unsplit clusters
    /// keep their declared size, which [`Codebook::write`] reproduces.
    ///
    /// # Errors
    /// Returns [`Error::Parse`] for malformed lines,
    /// [`Error::UnknownSequence`] / [`Error::UnknownPrototype`] for ids that
    /// do not resolve, and [`Error::Config`] for a header whose k differs
    /// from the configured one.
    pub fn load<R: Read>(
        reader: R,
        sequences: &SequenceIndex<'a>,
        prototypes: &SequenceIndex<'a>,
        ctx: &ClusteringContext,
    ) -> Result<Self> {
        Self::load_with_capacity(reader, CODEBOOK_BUFFER_SIZE, sequences, prototypes, ctx)
    }

    /// [`Codebook::load`] reading through a buffer of `capacity` bytes
    pub fn load_with_capacity<R: Read>(
        reader: R,
        capacity: usize,
        sequences: &SequenceIndex<'a>,
        prototypes: &SequenceIndex<'a>,
        ctx: &ClusteringContext,
    ) -> Result<Self> {
        let mut loader = Loader {
            k: ctx.k(),
            cache: ctx.cache(),
            hasher: ctx.symbol_hasher(),
            sequences,
            prototypes,
            kmers: Vec::new(),
            clusters: Vec::new(),
        };

        let mut lines = LineReader::with_capacity(capacity, reader);
        while let Some((number, line)) = lines.next_line()? {
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_record(line, number)?;
            loader.apply(record, number, line)?;
        }

        let Loader { kmers, clusters, .. } = loader;
        let read = clusters.len();
        let mut codebook = Self {
            k: ctx.k(),
            cache: ctx.shared_cache(),
            sequences: sequences.sequences(),
            prototype_sequences: prototypes.sequences(),
            kmers,
            clusters,
            kmer_data: Vec::new(),
        };
        codebook.split_large_clusters(ctx.config().split_cluster_threshold);
        info!(
            "Loaded codebook: {} clusters read, {} after splitting, {} member k-mers",
            read,
            codebook.len(),
            codebook.num_members()
        );
        Ok(codebook)
    }

    /// K-mer length
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Clusters, in index order
    #[inline]
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Cluster at `index`
    #[inline]
    pub fn cluster(&self, index: usize) -> &Cluster {
        &self.clusters[index]
    }

    /// The k-mer arena the clusters refer to
    #[inline]
    pub fn kmers(&self) -> &[Kmer<'a>] {
        &self.kmers
    }

    /// Number of clusters
    #[inline]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether the codebook has no clusters
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Total number of members over all clusters
    pub fn num_members(&self) -> usize {
        self.clusters.iter().map(Cluster::len).sum()
    }

    /// Packed prototype encoding of cluster `index`
    #[inline]
    pub fn prototype_encoding(&self, index: usize) -> &[KmerWord] {
        let row = words_per_kmer(self.k);
        &self.kmer_data[index * row..(index + 1) * row]
    }

    /// Identifier of the sequence an instance points into
    pub fn sequence_id(&self, sequence: usize) -> &'a str {
        match self.sequences.get(sequence) {
            Some(seq) => seq.id(),
            None => self.prototype_sequences[sequence - self.sequences.len()].id(),
        }
    }

    /// Nearest cluster to a packed k-mer encoding
    ///
    /// Linear scan over the prototype table; the lowest index wins ties.
    /// Returns `None` for an empty codebook.
    pub fn find_nearest_cluster(&self, encoding: &[KmerWord]) -> Option<(usize, Distance)> {
        let row = words_per_kmer(self.k);
        let mut best: Option<(usize, Distance)> = None;
        let mut bound = Distance::MAX;
        for (i, proto) in self.kmer_data.chunks_exact(row).enumerate() {
            if let Some(d) = self.cache.within(encoding, proto, self.k, bound) {
                if best.is_none_or(|(_, b)| d < b) {
                    best = Some((i, d));
                    bound = d;
                    if d == 0 {
                        break;
                    }
                }
            }
        }
        best
    }

    /// Nearest cluster to a k-mer
    pub fn find_nearest(&self, kmer: &Kmer<'_>) -> Option<(usize, Distance)> {
        self.find_nearest_cluster(kmer.packed_encoding())
    }

    /// Split clusters with more than `max_size` members (0 disables)
    pub fn split_large_clusters(&mut self, max_size: usize) {
        if max_size > 0 {
            let before = self.clusters.len();
            self.clusters = std::mem::take(&mut self.clusters)
                .into_iter()
                .flat_map(|c| c.split(max_size))
                .collect();
            debug!(
                "Split clusters above {} members: {} -> {}",
                max_size,
                before,
                self.clusters.len()
            );
        }
        self.rebuild_kmer_data();
    }

    /// Make `prototype` the prototype of cluster `index`
    pub fn set_prototype(&mut self, index: usize, prototype: KmerId) {
        self.clusters[index].set_prototype(prototype, &self.kmers, &self.cache, self.k);
        self.rebuild_kmer_data();
    }

    /// Recompute every cluster's medoid with the configured estimator
    pub fn update_medoids(&mut self, ctx: &ClusteringContext) {
        let kmers = &self.kmers;
        self.clusters.iter_mut().for_each(|c| {
            c.recompute_distances(kmers, ctx.cache(), ctx.k());
        });
        ctx.for_each_mut(&mut self.clusters, |i, cluster| {
            let mut rng = ctx.rng(&[u64::MAX, i as u64]);
            if let Some(medoid) = refine_medoid(cluster, kmers, ctx, &mut rng) {
                cluster.set_prototype(medoid, kmers, ctx.cache(), ctx.k());
            }
        });
        self.rebuild_kmer_data();
    }

    /// Write the codebook in the text format
    pub fn write<W: Write>(&self, out: W) -> Result<W> {
        let mut writer = CodebookWriter::new(out, self.k)?;
        for cluster in &self.clusters {
            writer.write_cluster(cluster, &self.kmers, |s| self.sequence_id(s))?;
        }
        writer.finish()
    }

    fn rebuild_kmer_data(&mut self) {
        let row = words_per_kmer(self.k);
        self.kmer_data.clear();
        self.kmer_data.reserve(self.clusters.len() * row);
        for cluster in &self.clusters {
            self.kmer_data
                .extend_from_slice(self.kmers[cluster.prototype()].packed_encoding());
        }
    }
}

/// Incremental state of one load
struct Loader<'s, 'a> {
    k: usize,
    cache: &'s DistanceCache,
    hasher: SymbolHasher,
    sequences: &'s SequenceIndex<'a>,
    prototypes: &'s SequenceIndex<'a>,
    kmers: Vec<Kmer<'a>>,
    clusters: Vec<Cluster>,
}

impl<'a> Loader<'_, 'a> {
    fn apply(&mut self, record: Record<'_>, number: usize, line: &str) -> Result<()> {
        match record {
            Record::Header { k } => {
                if !self.clusters.is_empty() {
                    return Err(Error::parse(number, line, "header after cluster records"));
                }
                if k != self.k {
                    return Err(Error::config(format!(
                        "codebook has k-mer length {k}, configured k is {}",
                        self.k
                    )));
                }
            }
            Record::Cluster {
                size,
                prototype,
                metadata,
            } => {
                let pos = self
                    .prototypes
                    .position(prototype.id)
                    .ok_or_else(|| Error::UnknownPrototype {
                        id: prototype.id.to_string(),
                        line: number,
                    })?;
                let seq = &self.prototypes.sequences()[pos];
                let origin = self.sequences.sequences().len() + pos;
                let id = self.push_kmer(seq, origin, prototype.offset, number, line)?;
                let mut cluster = Cluster::new(id, size);
                cluster.set_declared_size(size);
                for (key, value) in metadata {
                    cluster.set_metadata(key, value);
                }
                self.clusters.push(cluster);
            }
            Record::Member { distance, locator } => {
                if self.clusters.is_empty() {
                    return Err(Error::parse(number, line, "member record before any cluster"));
                }
                let pos = self
                    .sequences
                    .position(locator.id)
                    .ok_or_else(|| Error::UnknownSequence {
                        id: locator.id.to_string(),
                        line: number,
                    })?;
                let seq = &self.sequences.sequences()[pos];
                let id = self.push_kmer(seq, pos, locator.offset, number, line)?;
                let current = self.clusters.len() - 1;
                let distance = distance.unwrap_or_else(|| {
                    self.cache.distance(
                        self.kmers[id].packed_encoding(),
                        self.kmers[self.clusters[current].prototype()].packed_encoding(),
                        self.k,
                    )
                });
                self.clusters[current].add(id, distance);
            }
        }
        Ok(())
    }

    fn push_kmer(
        &mut self,
        seq: &'a EncodedSequence,
        origin: usize,
        offset: usize,
        number: usize,
        line: &str,
    ) -> Result<KmerId> {
        if seq.k() != self.k {
            return Err(Error::config(format!(
                "sequence {} was packed for k={}, codebook uses k={}",
                seq.id(),
                seq.k(),
                self.k
            )));
        }
        if offset >= seq.kmer_count(self.k) {
            return Err(Error::parse(
                number,
                line,
                format!("offset {offset} out of range for sequence {} (length {})", seq.id(), seq.len()),
            ));
        }
        let id = self.kmers.len();
        self.kmers.push(Kmer::new(seq, origin, offset, id, &self.hasher));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::config::ClusterConfig;
    use crate::matrix::SymbolDistance;
    use std::io::Cursor;

    fn context(k: usize, split: usize) -> ClusteringContext {
        let config = ClusterConfig {
            k,
            threshold: 2,
            num_threads: 1,
            split_cluster_threshold: split,
            ..ClusterConfig::default()
        };
        ClusteringContext::new(Alphabet::dna(), &SymbolDistance::Hamming, config).unwrap()
    }

    const TEXT: &str = "KmerLength,4\n\
                        Cluster,3,p1:0;purity:1.0000;\n\
                        distance:0;s1:0\n\
                        distance:1;s1:1\n\
                        distance:2;s2:2\n\
                        Cluster,1,p2:1;\n\
                        distance:0;s2:0\n";

    fn corpus(ctx: &ClusteringContext) -> (Vec<EncodedSequence>, Vec<EncodedSequence>) {
        let seqs = ctx
            .encode([("s1", b"AAAAT".to_vec()), ("s2", b"GGGGAAAC".to_vec())])
            .unwrap();
        let protos = ctx
            .encode([("p1", b"AAAA".to_vec()), ("p2", b"TGGGG".to_vec())])
            .unwrap();
        (seqs, protos)
    }

    #[test]
    fn test_load_write_round_trip() {
        let ctx = context(4, 0);
        let (seqs, protos) = corpus(&ctx);
        let (si, pi) = (SequenceIndex::new(&seqs), SequenceIndex::new(&protos));

        for capacity in [3, 64, CODEBOOK_BUFFER_SIZE] {
            let codebook =
                Codebook::load_with_capacity(Cursor::new(TEXT), capacity, &si, &pi, &ctx).unwrap();
            assert_eq!(codebook.len(), 2);
            assert_eq!(codebook.cluster(0).len(), 3);
            assert_eq!(codebook.cluster(0).get_metadata("purity"), Some("1.0000"));
            let out = codebook.write(Vec::new()).unwrap();
            assert_eq!(String::from_utf8(out).unwrap(), TEXT);
        }
    }

    #[test]
    fn test_missing_distances_are_computed() {
        let ctx = context(4, 0);
        let (seqs, protos) = corpus(&ctx);
        let (si, pi) = (SequenceIndex::new(&seqs), SequenceIndex::new(&protos));
        let text = "Cluster,2,p1:0;\ns1:1\ns2:4\n";
        let codebook = Codebook::load(Cursor::new(text), &si, &pi, &ctx).unwrap();
        // AAAT and AAAC against AAAA
        let distances: Vec<Distance> = codebook.cluster(0).members().iter().map(|m| m.1).collect();
        assert_eq!(distances, vec![1, 1]);
    }

    #[test]
    fn test_prototype_is_its_own_nearest_cluster() {
        let ctx = context(4, 0);
        let (seqs, protos) = corpus(&ctx);
        let (si, pi) = (SequenceIndex::new(&seqs), SequenceIndex::new(&protos));
        let codebook = Codebook::load(Cursor::new(TEXT), &si, &pi, &ctx).unwrap();
        for (i, cluster) in codebook.clusters().iter().enumerate() {
            let proto = &codebook.kmers()[cluster.prototype()];
            assert_eq!(codebook.find_nearest(proto), Some((i, 0)));
            assert_eq!(codebook.prototype_encoding(i), proto.packed_encoding());
        }
        // AAAT is at distance 1 from AAAA and 3 from GGGG
        assert_eq!(codebook.find_nearest_cluster(seqs[0].encoded_kmer(1)), Some((0, 1)));
    }

    #[test]
    fn test_nearest_ties_keep_first() {
        let ctx = context(4, 0);
        let (seqs, protos) = corpus(&ctx);
        let (si, pi) = (SequenceIndex::new(&seqs), SequenceIndex::new(&protos));
        let text = "Cluster,1,p1:0;\ns1:0\nCluster,1,p1:0;\ns1:0\n";
        let codebook = Codebook::load(Cursor::new(text), &si, &pi, &ctx).unwrap();
        assert_eq!(codebook.find_nearest_cluster(seqs[0].encoded_kmer(0)), Some((0, 0)));

        let empty = Codebook::from_clusters(&ctx, Vec::new(), Vec::new(), &seqs);
        assert_eq!(empty.find_nearest_cluster(seqs[0].encoded_kmer(0)), None);
    }

    #[test]
    fn test_split_on_load() {
        let ctx = context(4, 2);
        let (seqs, protos) = corpus(&ctx);
        let (si, pi) = (SequenceIndex::new(&seqs), SequenceIndex::new(&protos));
        let codebook = Codebook::load(Cursor::new(TEXT), &si, &pi, &ctx).unwrap();
        let sizes: Vec<usize> = codebook.clusters().iter().map(Cluster::len).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
        assert_eq!(codebook.cluster(0).prototype(), codebook.cluster(1).prototype());
        assert_eq!(codebook.cluster(1).get_metadata("purity"), Some("1.0000"));
        for i in 0..codebook.len() {
            let proto = &codebook.kmers()[codebook.cluster(i).prototype()];
            assert_eq!(codebook.prototype_encoding(i), proto.packed_encoding());
        }
    }

    #[test]
    fn test_declared_size_survives_round_trip_and_drives_split() {
        let (seqs, protos) = corpus(&context(4, 0));
        let (si, pi) = (SequenceIndex::new(&seqs), SequenceIndex::new(&protos));
        let text = "KmerLength,4\n\
                    Cluster,7,p1:0;\n\
                    distance:0;s1:0\n\
                    distance:1;s1:1\n\
                    distance:2;s2:2\n";

        let ctx = context(4, 0);
        let codebook = Codebook::load(Cursor::new(text), &si, &pi, &ctx).unwrap();
        assert_eq!(codebook.cluster(0).declared_size(), Some(7));
        let out = codebook.write(Vec::new()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), text);

        // seven declared against a limit of three makes three parts
        let ctx = context(4, 3);
        let codebook = Codebook::load(Cursor::new(text), &si, &pi, &ctx).unwrap();
        let sizes: Vec<usize> = codebook.clusters().iter().map(Cluster::len).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
    }

    #[test]
    fn test_set_prototype_resyncs_table() {
        let ctx = context(4, 0);
        let (seqs, protos) = corpus(&ctx);
        let (si, pi) = (SequenceIndex::new(&seqs), SequenceIndex::new(&protos));
        let mut codebook = Codebook::load(Cursor::new(TEXT), &si, &pi, &ctx).unwrap();
        let member = codebook.cluster(0).members()[1].0;
        codebook.set_prototype(0, member);
        assert_eq!(codebook.prototype_encoding(0), codebook.kmers()[member].packed_encoding());
        let distances: Vec<Distance> = codebook.cluster(0).members().iter().map(|m| m.1).collect();
        // AAAA AAAT GGAA against AAAT
        assert_eq!(distances, vec![1, 0, 3]);
    }

    #[test]
    fn test_update_medoids() {
        let ctx = context(4, 0);
        let (seqs, protos) = corpus(&ctx);
        let (si, pi) = (SequenceIndex::new(&seqs), SequenceIndex::new(&protos));
        // prototype GGGG is far from every member; AAAA is the first of the tied medoids
        let text = "Cluster,3,p2:1;\ns1:0\ns1:1\ns2:4\n";
        let mut codebook = Codebook::load(Cursor::new(text), &si, &pi, &ctx).unwrap();
        codebook.update_medoids(&ctx);
        let proto = &codebook.kmers()[codebook.cluster(0).prototype()];
        assert_eq!(proto.to_string(ctx.alphabet()), "AAAA");
        assert_eq!(codebook.prototype_encoding(0), proto.packed_encoding());
    }

    #[test]
    fn test_unknown_ids_abort_load() {
        let ctx = context(4, 0);
        let (seqs, protos) = corpus(&ctx);
        let (si, pi) = (SequenceIndex::new(&seqs), SequenceIndex::new(&protos));

        let err = Codebook::load(Cursor::new("Cluster,1,nope:0;\ns1:0\n"), &si, &pi, &ctx)
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnknownPrototype { ref id, line: 1 } if id == "nope"));

        let err = Codebook::load(Cursor::new("Cluster,1,p1:0;\ns1:0\nghost:3\n"), &si, &pi, &ctx)
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnknownSequence { ref id, line: 3 } if id == "ghost"));

        // member ids never resolve against the prototype index
        let err = Codebook::load(Cursor::new("Cluster,1,p1:0;\np1:0\n"), &si, &pi, &ctx)
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnknownSequence { .. }));
    }

    #[test]
    fn test_malformed_input() {
        let ctx = context(4, 0);
        let (seqs, protos) = corpus(&ctx);
        let (si, pi) = (SequenceIndex::new(&seqs), SequenceIndex::new(&protos));
        let load = |text: &str| Codebook::load(Cursor::new(text.to_string()), &si, &pi, &ctx).err();

        assert!(matches!(load("KmerLength,5\n"), Some(Error::Config { .. })));
        assert!(matches!(load("s1:0\n"), Some(Error::Parse { line: 1, .. })));
        assert!(matches!(load("Cluster,1,p1:9;\n"), Some(Error::Parse { .. })));
        assert!(matches!(load("Cluster,1,p1:0;\ns1:0\nKmerLength,4\n"), Some(Error::Parse { line: 3, .. })));
    }
}
