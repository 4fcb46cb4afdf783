//! Integration tests for the clustering pipeline
//!
//! These tests go from FASTA input through indexing and clustering to a
//! written codebook, and load it back.

use codebook_lib::parse::read_sequences;
use codebook_lib::{
    Alphabet, AssignPolicy, Cluster, ClusterConfig, ClusteringContext, Codebook, CodebookSink, DistanceSummary,
    IncrementalClusterer, KMedoids, KmerId, MedoidMode, ReassignStrategy, Reassigner, SequenceIndex, SymbolDistance,
};
use std::io::Write;
use tempfile::NamedTempFile;

const RECORDS: &[(&str, &str)] = &[
    ("r1|alpha", "ACGTACGTTGCAACGTAGCTAGCTAGGATCCA"),
    ("r2|alpha", "ACGTACGATGCAACGTAGCTAGCTAGGATCCA"),
    ("r3|beta", "TTTTGGGGCCCCAAAATTTTGGGGCCCCAAAA"),
    ("r4|beta", "TTTTGGGGCCCCAAAATTATGGGGCCCCAAAA"),
    ("r5|gamma", "GATTACAGATTACAGATTACA"),
];

fn write_fasta() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for (id, seq) in RECORDS {
        writeln!(file, ">{id} test record").unwrap();
        writeln!(file, "{seq}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn context(config: ClusterConfig) -> ClusteringContext {
    ClusteringContext::new(Alphabet::dna(), &SymbolDistance::Hamming, config).unwrap()
}

#[test]
fn test_incremental_codebook_round_trip() {
    let fasta = write_fasta();
    let ctx = context(ClusterConfig {
        k: 8,
        threshold: 2,
        increment: 4,
        num_threads: 2,
        ..ClusterConfig::default()
    });

    let sequences = read_sequences(fasta.path(), ctx.alphabet(), ctx.k()).unwrap();
    assert_eq!(sequences.len(), RECORDS.len());
    let index = ctx.build_index(&sequences).unwrap();

    let mut summary = DistanceSummary::default();
    let mut sink = CodebookSink::new(Vec::new(), ctx.k(), &sequences).unwrap();
    let result = IncrementalClusterer::new(&ctx)
        .run(index.kmers(), &mut [&mut summary, &mut sink])
        .unwrap();
    assert!(result.rejected.is_empty());
    let settled: usize = result.clusters.iter().map(Cluster::len).sum();
    assert_eq!(settled, index.len());

    let text = sink.finish().unwrap();
    let seq_index = SequenceIndex::new(&sequences);
    let codebook = Codebook::load(text.as_slice(), &seq_index, &seq_index, &ctx).unwrap();

    // one member per k-mer occurrence
    assert_eq!(codebook.len(), result.clusters.len());
    assert_eq!(codebook.num_members(), index.num_instances());

    // every prototype is its own nearest cluster
    for (i, cluster) in codebook.clusters().iter().enumerate() {
        let proto = &codebook.kmers()[cluster.prototype()];
        assert_eq!(codebook.find_nearest(proto), Some((i, 0)));
        assert!(cluster.get_metadata("mean").is_some());
        assert!(cluster.members().iter().all(|&(_, d)| d <= 2));
    }

    // writing the loaded codebook reproduces the stream
    let rewritten = codebook.write(Vec::new()).unwrap();
    assert_eq!(String::from_utf8(rewritten).unwrap(), String::from_utf8(text).unwrap());
}

#[test]
fn test_kmedoids_codebook() {
    let fasta = write_fasta();
    let ctx = context(ClusterConfig {
        k: 6,
        threshold: 2,
        trials: 3,
        iterations: 3,
        medoid_mode: MedoidMode::BruteForce,
        num_threads: 0,
        ..ClusterConfig::default()
    });

    let sequences = read_sequences(fasta.path(), ctx.alphabet(), ctx.k()).unwrap();
    let index = ctx.build_index(&sequences).unwrap();
    let result = KMedoids::new(&ctx, &index, &sequences).run().unwrap();
    assert!(!result.clusters.is_empty());
    assert!(result.trial < 3);

    let instances: usize = result.clusters.iter().map(|c| c.num_instances(index.kmers())).sum();
    assert_eq!(result.score, instances);
    let assigned: usize = result.clusters.iter().map(Cluster::len).sum();
    assert_eq!(assigned + result.unassigned, index.len());

    let codebook = Codebook::from_clusters(&ctx, index.into_kmers(), result.clusters, &sequences);
    let text = codebook.write(Vec::new()).unwrap();

    let seq_index = SequenceIndex::new(&sequences);
    let loaded = Codebook::load(text.as_slice(), &seq_index, &seq_index, &ctx).unwrap();
    assert_eq!(loaded.len(), codebook.len());
    assert_eq!(loaded.num_members(), result.score);
    for i in 0..loaded.len() {
        assert_eq!(loaded.prototype_encoding(i), codebook.prototype_encoding(i));
    }
}

#[test]
fn test_reassign_against_incremental_prototypes() {
    let fasta = write_fasta();
    let ctx = context(ClusterConfig {
        k: 8,
        threshold: 2,
        increment: 3,
        num_threads: 2,
        ..ClusterConfig::default()
    });
    let sequences = read_sequences(fasta.path(), ctx.alphabet(), ctx.k()).unwrap();
    let index = ctx.build_index(&sequences).unwrap();
    let clustering = IncrementalClusterer::new(&ctx).run(index.kmers(), &mut []).unwrap();
    let prototypes: Vec<KmerId> = clustering.clusters.iter().map(Cluster::prototype).collect();
    let candidates: Vec<KmerId> = (0..index.len()).collect();

    for strategy in [ReassignStrategy::Partitioned, ReassignStrategy::PerCluster] {
        let result = Reassigner::new(&ctx, AssignPolicy::Nearest, strategy).run(index.kmers(), &candidates, &prototypes);
        assert_eq!(result.existing, prototypes.len());
        assert!(result.discovered().is_empty());
        assert!(result.unassigned.is_empty());
        let members: usize = result.clusters.iter().map(Cluster::len).sum();
        assert_eq!(members, index.len());
        // prototypes stay with their own cluster
        for (i, &proto) in prototypes.iter().enumerate() {
            assert!(result.clusters[i].members().contains(&(proto, 0)));
        }
    }
}

#[test]
fn test_unknown_sequence_aborts_load() {
    let fasta = write_fasta();
    let ctx = context(ClusterConfig {
        k: 8,
        num_threads: 1,
        ..ClusterConfig::default()
    });
    let sequences = read_sequences(fasta.path(), ctx.alphabet(), ctx.k()).unwrap();
    let seq_index = SequenceIndex::new(&sequences);
    let text = "KmerLength,8\nCluster,2,r1|alpha:0;\ndistance:0;r1|alpha:0\ndistance:1;missing:3\n";
    let err = Codebook::load(text.as_bytes(), &seq_index, &seq_index, &ctx).unwrap_err();
    assert!(matches!(err, codebook_lib::Error::UnknownSequence { line: 4, .. }));
}
