//! Per-cluster callbacks run as clusters are finished
//!
//! Incremental clustering hands every finished cluster to a list of
//! [`ClusterObserver`]s in order, so later observers see the metadata written
//! by earlier ones (a [`CodebookSink`] placed last persists it).

use crate::codebook::CodebookWriter;
use crate::cluster::{Cluster, RunningStats};
use crate::context::{ClusteringContext, LabelInterner};
use crate::distance_cache::Distance;
use crate::kmer::Kmer;
use crate::sequence::EncodedSequence;
use crate::Result;
use std::io::Write;

/// Callback invoked once per finished cluster
pub trait ClusterObserver {
    /// Inspect (and possibly annotate) one cluster
    fn observe(&mut self, cluster: &mut Cluster, kmers: &[Kmer<'_>], ctx: &ClusteringContext) -> Result<()>;
}

/// Writes `mean`, `stddev`, `min` and `max` of the member distances into the
/// cluster metadata, and accumulates the same over all clusters
#[derive(Debug, Default)]
pub struct DistanceSummary {
    overall: RunningStats,
    min: Option<Distance>,
    max: Option<Distance>,
}

impl DistanceSummary {
    /// Statistics over every member seen so far
    pub fn overall(&self) -> &RunningStats {
        &self.overall
    }

    /// Smallest member distance seen so far
    pub fn min(&self) -> Option<Distance> {
        self.min
    }

    /// Largest member distance seen so far
    pub fn max(&self) -> Option<Distance> {
        self.max
    }
}

impl ClusterObserver for DistanceSummary {
    fn observe(&mut self, cluster: &mut Cluster, _kmers: &[Kmer<'_>], _ctx: &ClusteringContext) -> Result<()> {
        if cluster.is_empty() {
            return Ok(());
        }
        let mut stats = RunningStats::default();
        let mut min = Distance::MAX;
        let mut max = 0;
        for &(_, d) in cluster.members() {
            stats.push(d);
            self.overall.push(d);
            min = min.min(d);
            max = max.max(d);
        }
        self.min = Some(self.min.map_or(min, |m| m.min(min)));
        self.max = Some(self.max.map_or(max, |m| m.max(max)));

        cluster.set_metadata("mean", format!("{:.4}", stats.mean()));
        cluster.set_metadata("stddev", format!("{:.4}", stats.std_dev()));
        cluster.set_metadata("min", min);
        cluster.set_metadata("max", max);
        Ok(())
    }
}

/// Scores each cluster by the share of its k-mer instances carrying the
/// majority class label
///
/// Labels come from sequence ids (see [`LabelInterner::label_of`]) and are
/// interned in the context. Writes `class` and `purity` metadata.
#[derive(Debug)]
pub struct ClassPurity<'a> {
    sequences: &'a [EncodedSequence],
    counts: Vec<usize>,
    clusters: usize,
    purity_sum: f64,
}

impl<'a> ClassPurity<'a> {
    /// Score clusters over k-mers whose instances point into `sequences`
    pub fn new(sequences: &'a [EncodedSequence]) -> Self {
        Self {
            sequences,
            counts: Vec::new(),
            clusters: 0,
            purity_sum: 0.0,
        }
    }

    /// Mean purity over the clusters scored so far
    pub fn mean_purity(&self) -> f64 {
        if self.clusters == 0 {
            0.0
        } else {
            self.purity_sum / self.clusters as f64
        }
    }
}

impl ClusterObserver for ClassPurity<'_> {
    fn observe(&mut self, cluster: &mut Cluster, kmers: &[Kmer<'_>], ctx: &ClusteringContext) -> Result<()> {
        self.counts.iter_mut().for_each(|c| *c = 0);
        let mut labels = ctx.labels();
        let mut total = 0;
        for id in cluster.member_ids() {
            for inst in kmers[id].instances() {
                let label = labels.intern(&field_safe(LabelInterner::label_of(
                    self.sequences[inst.sequence].id(),
                )));
                if label >= self.counts.len() {
                    self.counts.resize(label + 1, 0);
                }
                self.counts[label] += 1;
                total += 1;
            }
        }
        if total == 0 {
            return Ok(());
        }

        let mut majority = 0;
        for (label, &count) in self.counts.iter().enumerate() {
            if count > self.counts[majority] {
                majority = label;
            }
        }
        let purity = self.counts[majority] as f64 / total as f64;
        self.clusters += 1;
        self.purity_sum += purity;

        if let Some(name) = labels.name(majority) {
            cluster.set_metadata("class", name);
        }
        cluster.set_metadata("purity", format!("{purity:.4}"));
        Ok(())
    }
}

/// Labels end up in codebook metadata, which reserves the record separators
fn field_safe(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if matches!(c, ',' | ';' | ':') || c.is_whitespace() { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Streams every finished cluster to a codebook writer
pub struct CodebookSink<'a, W: Write> {
    writer: CodebookWriter<W>,
    sequences: &'a [EncodedSequence],
}

impl<'a, W: Write> CodebookSink<'a, W> {
    /// Start a codebook on `out` for k-mers over `sequences`
    pub fn new(out: W, k: usize, sequences: &'a [EncodedSequence]) -> Result<Self> {
        Ok(Self {
            writer: CodebookWriter::new(out, k)?,
            sequences,
        })
    }

    /// Number of clusters written
    pub fn clusters_written(&self) -> usize {
        self.writer.clusters_written()
    }

    /// Flush and return the underlying writer
    pub fn finish(self) -> Result<W> {
        self.writer.finish()
    }
}

impl<W: Write> ClusterObserver for CodebookSink<'_, W> {
    fn observe(&mut self, cluster: &mut Cluster, kmers: &[Kmer<'_>], _ctx: &ClusteringContext) -> Result<()> {
        let sequences = self.sequences;
        self.writer
            .write_cluster(cluster, kmers, |s| sequences[s].id())
    }
}
