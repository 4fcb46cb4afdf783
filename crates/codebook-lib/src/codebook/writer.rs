//! Codebook text writer

use crate::cluster::Cluster;
use crate::constants::{CLUSTER_TAG, DISTANCE_KEY, HEADER_TAG};
use crate::kmer::Kmer;
use crate::{Error, Result};
use std::io::Write;

/// Streams clusters to the codebook text format
///
/// The header is written on creation; clusters are appended one at a time,
/// so a writer can sit at the end of a clustering pass without holding the
/// whole codebook in memory.
pub struct CodebookWriter<W: Write> {
    out: W,
    clusters: usize,
    lines: usize,
}

impl<W: Write> CodebookWriter<W> {
    /// Write the header for k-mers of length `k`
    pub fn new(mut out: W, k: usize) -> Result<Self> {
        writeln!(out, "{HEADER_TAG},{k}")?;
        Ok(Self {
            out,
            clusters: 0,
            lines: 1,
        })
    }

    /// Append one cluster
    ///
    /// `sequence_id` maps the sequence number of an [`Instance`] to its
    /// identifier. Every instance of every member becomes one member line.
    /// The size written is the cluster's declared size when it has one,
    /// otherwise its number of instances.
    ///
    /// # Errors
    /// Metadata fields and sequence ids containing a record separator are
    /// rejected before anything is written for the cluster.
    ///
    /// [`Instance`]: crate::kmer::Instance
    pub fn write_cluster<'s, F>(&mut self, cluster: &Cluster, kmers: &[Kmer<'_>], sequence_id: F) -> Result<()>
    where
        F: Fn(usize) -> &'s str,
    {
        for (key, value) in cluster.metadata() {
            check_field(key)?;
            check_field(value)?;
        }

        let proto = kmers[cluster.prototype()].first_instance();
        check_id(sequence_id(proto.sequence))?;
        for &(member, _) in cluster.members() {
            for inst in kmers[member].instances() {
                check_id(sequence_id(inst.sequence))?;
            }
        }

        let size = cluster.declared_size().unwrap_or_else(|| cluster.num_instances(kmers));
        write!(
            self.out,
            "{CLUSTER_TAG},{size},{}:{};",
            sequence_id(proto.sequence),
            proto.position
        )?;
        for (key, value) in cluster.metadata() {
            write!(self.out, "{key}:{value};")?;
        }
        writeln!(self.out)?;
        self.lines += 1;

        for &(member, distance) in cluster.members() {
            for inst in kmers[member].instances() {
                writeln!(
                    self.out,
                    "{DISTANCE_KEY}:{distance};{}:{}",
                    sequence_id(inst.sequence),
                    inst.position
                )?;
                self.lines += 1;
            }
        }
        self.clusters += 1;
        Ok(())
    }

    /// Number of clusters written so far
    pub fn clusters_written(&self) -> usize {
        self.clusters
    }

    /// Flush and return the underlying writer
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        tracing::debug!("Wrote {} clusters in {} lines", self.clusters, self.lines);
        Ok(self.out)
    }
}

fn check_field(text: &str) -> Result<()> {
    if text.is_empty() || text.contains([',', ';', ':', '\n', '\r']) {
        return Err(Error::config(format!(
            "metadata field '{text}' is empty or contains a record separator"
        )));
    }
    Ok(())
}

fn check_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains([',', ';', '\n', '\r']) {
        return Err(Error::config(format!(
            "sequence id '{id}' is empty or contains a record separator"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::kmer_index::KmerIndex;
    use crate::sequence::encode_all;

    #[test]
    fn test_write_cluster_lines() {
        let dna = Alphabet::dna();
        let seqs = encode_all(
            [("s0", b"ACGACG".to_vec()), ("s1", b"ACGT".to_vec())],
            &dna,
            3,
        )
        .unwrap();
        let index = KmerIndex::build(&seqs, 3).unwrap();
        let acg = index.find(&dna.encode_sequence(b"ACG").unwrap()).unwrap();
        let cgt = index.find(&dna.encode_sequence(b"CGT").unwrap()).unwrap();

        let mut cluster = Cluster::new(acg, 2);
        cluster.add(acg, 0);
        cluster.add(cgt, 3);
        cluster.set_metadata("purity", "1.0000");

        let mut writer = CodebookWriter::new(Vec::new(), 3).unwrap();
        writer
            .write_cluster(&cluster, index.kmers(), |s| seqs[s].id())
            .unwrap();
        assert_eq!(writer.clusters_written(), 1);
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert_eq!(
            text,
            "KmerLength,3\n\
             Cluster,4,s0:0;purity:1.0000;\n\
             distance:0;s0:0\n\
             distance:0;s0:3\n\
             distance:0;s1:0\n\
             distance:3;s1:1\n"
        );
    }

    #[test]
    fn test_rejects_separator_in_metadata() {
        let dna = Alphabet::dna();
        let seqs = encode_all([("s0", b"ACG".to_vec())], &dna, 3).unwrap();
        let index = KmerIndex::build(&seqs, 3).unwrap();
        let mut cluster = Cluster::new(0, 1);
        cluster.add(0, 0);
        cluster.set_metadata("class", "a:b");
        let mut writer = CodebookWriter::new(Vec::new(), 3).unwrap();
        assert!(writer.write_cluster(&cluster, index.kmers(), |s| seqs[s].id()).is_err());
    }

    #[test]
    fn test_rejects_separator_in_sequence_id() {
        let dna = Alphabet::dna();
        let seqs = encode_all([("sp;P1", b"ACGT".to_vec()), ("sp|P2:x", b"ACG".to_vec())], &dna, 3).unwrap();
        let index = KmerIndex::build(&seqs, 3).unwrap();
        let acg = index.find(&dna.encode_sequence(b"ACG").unwrap()).unwrap();

        // ACG occurs in both sequences, so the first id taints the cluster
        let mut cluster = Cluster::new(acg, 1);
        cluster.add(acg, 0);
        let mut writer = CodebookWriter::new(Vec::new(), 3).unwrap();
        assert!(writer.write_cluster(&cluster, index.kmers(), |s| seqs[s].id()).is_err());
        assert_eq!(writer.clusters_written(), 0);
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert_eq!(text, "KmerLength,3\n");

        // a colon inside an id is fine: locators split at the last one
        let only_second = |_: usize| seqs[1].id();
        let mut writer = CodebookWriter::new(Vec::new(), 3).unwrap();
        writer.write_cluster(&cluster, index.kmers(), only_second).unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert!(text.contains("Cluster,2,sp|P2:x:0;"));
    }
}
