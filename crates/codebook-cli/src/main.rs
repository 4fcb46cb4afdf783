use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use codebook_lib::parse::read_sequences;
use codebook_lib::{
    Alphabet, AssignPolicy, ClassPurity, ClusterConfig, ClusterObserver, ClusteringContext, Codebook,
    CodebookSink, CodebookWriter, DistanceSummary, EncodedSequence, IncrementalClusterer, KMedoids,
    KmerId, MedoidMode, ReassignStrategy, Reassigner, SequenceIndex, SimilarityMatrix, SymbolDistance,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "codebook")]
#[command(version = "0.1.0")]
#[command(about = "Cluster k-mers into codebooks and query them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Parameters shared by every subcommand
#[derive(Args)]
struct CommonArgs {
    /// K-mer length
    #[arg(short, long)]
    k: usize,

    /// Largest distance at which a k-mer joins a prototype
    #[arg(short = 'T', long, default_value = "0")]
    threshold: u32,

    /// Alphabet: "dna", "protein", or the symbols themselves (e.g. "ACGU")
    #[arg(short, long, default_value = "dna")]
    alphabet: String,

    /// Symbol distance: hamming, blosum-difference or halperin
    #[arg(long, default_value = "hamming")]
    metric: String,

    /// Similarity matrix in NCBI format (default: BLOSUM62)
    #[arg(long)]
    matrix: Option<PathBuf>,

    /// Random seed
    #[arg(short, long, default_value = "1")]
    seed: u64,

    /// Number of threads (0 = all available cores)
    #[arg(short = 't', long, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster k-mers with k-medoids and write a codebook
    Medoids {
        #[command(flatten)]
        common: CommonArgs,

        /// Input FASTA/FASTQ file
        #[arg(short, long)]
        input: PathBuf,

        /// Output codebook
        #[arg(short, long)]
        output: PathBuf,

        /// Independent trials; the highest scoring one is kept
        #[arg(long, default_value = "1")]
        trials: usize,

        /// Assign/refine rounds per trial
        #[arg(long, default_value = "4")]
        iterations: usize,

        /// Medoid estimator: auto, brute-force or meddit
        #[arg(long, default_value = "auto")]
        medoid_mode: MedoidMode,

        /// Smallest cluster refined with MEDDIT in auto mode
        #[arg(long, default_value = "200")]
        min_meddit_size: usize,
    },

    /// Exhaustive incremental clustering, streamed to a codebook
    Incremental {
        #[command(flatten)]
        common: CommonArgs,

        /// Input FASTA/FASTQ file
        #[arg(short, long)]
        input: PathBuf,

        /// Output codebook
        #[arg(short, long)]
        output: PathBuf,

        /// Seeds drawn per round
        #[arg(long, default_value = "100")]
        increment: usize,

        /// Annotate clusters with the majority class and its share
        #[arg(long, default_value = "false")]
        purity: bool,
    },

    /// Reassign the k-mers of a corpus to the prototypes of a codebook
    Reassign {
        #[command(flatten)]
        common: CommonArgs,

        /// Existing codebook
        #[arg(short, long)]
        codebook: PathBuf,

        /// Sequences the codebook's members (and the new candidates) come from
        #[arg(short = 'i', long)]
        sequences: PathBuf,

        /// Sequences the codebook's prototypes come from (default: same as --sequences)
        #[arg(short, long)]
        prototypes: Option<PathBuf>,

        /// Output codebook
        #[arg(short, long)]
        output: PathBuf,

        /// Which prototypes a k-mer joins: first, nearest or all
        #[arg(long)]
        policy: AssignPolicy,

        /// Work split: partitioned or per-cluster
        #[arg(long, default_value = "partitioned")]
        strategy: ReassignStrategy,
    },

    /// Report the nearest cluster of every k-mer of a query file
    Nearest {
        #[command(flatten)]
        common: CommonArgs,

        /// Existing codebook
        #[arg(short, long)]
        codebook: PathBuf,

        /// Sequences the codebook's members come from
        #[arg(short = 'i', long)]
        sequences: PathBuf,

        /// Sequences the codebook's prototypes come from (default: same as --sequences)
        #[arg(short, long)]
        prototypes: Option<PathBuf>,

        /// Query FASTA/FASTQ file
        #[arg(short, long)]
        query: PathBuf,

        /// Output TSV (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Split loaded clusters above this many members (0 = never)
        #[arg(long, default_value = "0")]
        split: usize,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Medoids {
            common,
            input,
            output,
            trials,
            iterations,
            medoid_mode,
            min_meddit_size,
        } => {
            let config = ClusterConfig {
                trials,
                iterations,
                medoid_mode,
                min_meddit_size,
                ..common.config()
            };
            medoids_command(&common, config, &input, &output)?;
        }
        Commands::Incremental {
            common,
            input,
            output,
            increment,
            purity,
        } => {
            let config = ClusterConfig {
                increment,
                ..common.config()
            };
            incremental_command(&common, config, &input, &output, purity)?;
        }
        Commands::Reassign {
            common,
            codebook,
            sequences,
            prototypes,
            output,
            policy,
            strategy,
        } => {
            let config = ClusterConfig {
                assign_policy: policy,
                ..common.config()
            };
            reassign_command(&common, config, &codebook, &sequences, prototypes.as_deref(), &output, strategy)?;
        }
        Commands::Nearest {
            common,
            codebook,
            sequences,
            prototypes,
            query,
            output,
            split,
        } => {
            let config = ClusterConfig {
                split_cluster_threshold: split,
                ..common.config()
            };
            nearest_command(&common, config, &codebook, &sequences, prototypes.as_deref(), &query, output.as_deref())?;
        }
    }

    Ok(())
}

impl CommonArgs {
    fn config(&self) -> ClusterConfig {
        ClusterConfig {
            k: self.k,
            threshold: self.threshold,
            seed: self.seed,
            num_threads: self.threads,
            ..ClusterConfig::default()
        }
    }

    fn alphabet(&self) -> anyhow::Result<Alphabet> {
        Ok(match self.alphabet.to_ascii_lowercase().as_str() {
            "dna" => Alphabet::dna(),
            "protein" => Alphabet::protein(),
            _ => Alphabet::new(&self.alphabet)?,
        })
    }

    fn metric(&self) -> anyhow::Result<SymbolDistance> {
        let matrix = || -> anyhow::Result<SimilarityMatrix> {
            match &self.matrix {
                Some(path) => {
                    let text = std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read matrix file: {}", path.display()))?;
                    Ok(SimilarityMatrix::parse(&text)?)
                }
                None => Ok(SimilarityMatrix::blosum62()),
            }
        };
        Ok(match self.metric.as_str() {
            "hamming" => SymbolDistance::Hamming,
            "blosum-difference" => SymbolDistance::BlosumDifference(matrix()?),
            "halperin" => SymbolDistance::Halperin(matrix()?),
            other => bail!("unknown metric '{}'", other),
        })
    }

    /// Validate everything and build the context for a run
    fn context(&self, config: ClusterConfig) -> anyhow::Result<ClusteringContext> {
        config.print();
        let alphabet = self.alphabet()?;
        let metric = self.metric()?;
        info!("  alphabet = {} symbols, metric = {}", alphabet.size(), metric.name());
        Ok(ClusteringContext::new(alphabet, &metric, config)?)
    }
}

fn create_output(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create output file: {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Build a codebook with k-medoids
fn medoids_command(common: &CommonArgs, config: ClusterConfig, input: &Path, output: &Path) -> anyhow::Result<()> {
    info!("Building codebook with k-medoids...");
    let ctx = common.context(config)?;
    let sequences = read_sequences(input, ctx.alphabet(), ctx.k())?;
    let index = ctx.build_index(&sequences)?;
    info!("  {} distinct k-mers, {} instances", index.len(), index.num_instances());

    let start = std::time::Instant::now();
    let result = KMedoids::new(&ctx, &index, &sequences).run()?;
    info!(
        "Trial {} kept: {} clusters covering {} instances ({} k-mers unassigned) in {:.2?}",
        result.trial,
        result.clusters.len(),
        result.score,
        result.unassigned,
        start.elapsed()
    );

    let codebook = Codebook::from_clusters(&ctx, index.into_kmers(), result.clusters, &sequences);
    codebook
        .write(create_output(output)?)?
        .flush()
        .with_context(|| format!("Failed to write codebook: {}", output.display()))?;
    info!("Codebook written to {}", output.display());
    Ok(())
}

/// Cluster every k-mer greedily, streaming clusters to the output
fn incremental_command(
    common: &CommonArgs,
    config: ClusterConfig,
    input: &Path,
    output: &Path,
    purity: bool,
) -> anyhow::Result<()> {
    info!("Building codebook with incremental clustering...");
    let ctx = common.context(config)?;
    let sequences = read_sequences(input, ctx.alphabet(), ctx.k())?;
    let index = ctx.build_index(&sequences)?;
    info!("  {} distinct k-mers, {} instances", index.len(), index.num_instances());

    let mut summary = DistanceSummary::default();
    let mut class_purity = ClassPurity::new(&sequences);
    let mut sink = CodebookSink::new(create_output(output)?, ctx.k(), &sequences)?;
    let result = {
        let mut observers: Vec<&mut dyn ClusterObserver> = Vec::with_capacity(3);
        observers.push(&mut summary);
        if purity {
            observers.push(&mut class_purity);
        }
        observers.push(&mut sink);
        IncrementalClusterer::new(&ctx).run(index.kmers(), &mut observers)?
    };

    let written = sink.clusters_written();
    sink.finish()?
        .flush()
        .with_context(|| format!("Failed to write codebook: {}", output.display()))?;
    info!(
        "{} clusters written to {} ({} rejected seeds)",
        written,
        output.display(),
        result.rejected.len()
    );
    info!(
        "  member distance: mean {:.4}, stddev {:.4}, min {:?}, max {:?}",
        summary.overall().mean(),
        summary.overall().std_dev(),
        summary.min(),
        summary.max()
    );
    if purity {
        info!("  mean class purity: {:.4}", class_purity.mean_purity());
    }
    Ok(())
}

/// Read the corpus and, if separate, the prototype sequences into one
/// collection; returns it with the number of corpus sequences
fn read_corpus(
    ctx: &ClusteringContext,
    sequences: &Path,
    prototypes: Option<&Path>,
) -> anyhow::Result<(Vec<EncodedSequence>, usize)> {
    let mut all = read_sequences(sequences, ctx.alphabet(), ctx.k())?;
    let corpus = all.len();
    if let Some(path) = prototypes {
        all.extend(read_sequences(path, ctx.alphabet(), ctx.k())?);
    }
    Ok((all, corpus))
}

fn load_codebook<'a>(
    ctx: &ClusteringContext,
    path: &Path,
    all: &'a [EncodedSequence],
    corpus: usize,
) -> anyhow::Result<Codebook<'a>> {
    let members = SequenceIndex::new(&all[..corpus]);
    let prototypes = if corpus == all.len() {
        members.clone()
    } else {
        SequenceIndex::new(&all[corpus..])
    };
    let file = File::open(path).with_context(|| format!("Failed to open codebook: {}", path.display()))?;
    Codebook::load(BufReader::new(file), &members, &prototypes, ctx)
        .with_context(|| format!("Failed to load codebook: {}", path.display()))
}

/// Reassign every corpus k-mer to the codebook's prototypes
#[allow(clippy::too_many_arguments)]
fn reassign_command(
    common: &CommonArgs,
    config: ClusterConfig,
    codebook: &Path,
    sequences: &Path,
    prototypes: Option<&Path>,
    output: &Path,
    strategy: ReassignStrategy,
) -> anyhow::Result<()> {
    info!("Reassigning k-mers to an existing codebook...");
    let ctx = common.context(config)?;
    let (all, corpus) = read_corpus(&ctx, sequences, prototypes)?;
    let loaded = load_codebook(&ctx, codebook, &all, corpus)?;

    // one arena over corpus and prototype sequences
    let index = ctx.build_index(&all)?;
    let mut prototype_ids: Vec<KmerId> = Vec::with_capacity(loaded.len());
    for cluster in loaded.clusters() {
        let symbols = loaded.kmers()[cluster.prototype()].symbols();
        match index.find(symbols) {
            Some(id) => prototype_ids.push(id),
            None => bail!("prototype {} missing from the sequence index", ctx.alphabet().decode_string(symbols)),
        }
    }
    let candidates: Vec<KmerId> = index
        .kmers()
        .iter()
        .enumerate()
        .filter(|(_, kmer)| kmer.instances().iter().any(|inst| inst.sequence < corpus))
        .map(|(id, _)| id)
        .collect();
    drop(loaded);

    let result = Reassigner::new(&ctx, ctx.config().assign_policy, strategy).run(
        index.kmers(),
        &candidates,
        &prototype_ids,
    );
    if !result.unassigned.is_empty() {
        warn!("{} k-mers joined no cluster", result.unassigned.len());
    }

    let mut writer = CodebookWriter::new(create_output(output)?, ctx.k())?;
    for cluster in result.clusters.iter().filter(|c| !c.is_empty()) {
        writer.write_cluster(cluster, index.kmers(), |s| all[s].id())?;
    }
    let written = writer.clusters_written();
    writer
        .finish()?
        .flush()
        .with_context(|| format!("Failed to write codebook: {}", output.display()))?;
    info!(
        "{} clusters written to {} ({} discovered)",
        written,
        output.display(),
        result.discovered().len()
    );
    Ok(())
}

/// Print `query_id, position, cluster, distance` for every query k-mer
#[allow(clippy::too_many_arguments)]
fn nearest_command(
    common: &CommonArgs,
    config: ClusterConfig,
    codebook: &Path,
    sequences: &Path,
    prototypes: Option<&Path>,
    query: &Path,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let ctx = common.context(config)?;
    let (all, corpus) = read_corpus(&ctx, sequences, prototypes)?;
    let loaded = load_codebook(&ctx, codebook, &all, corpus)?;
    if loaded.is_empty() {
        bail!("codebook {} has no clusters", codebook.display());
    }
    let queries = read_sequences(query, ctx.alphabet(), ctx.k())?;

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(create_output(path)?),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };
    let start = std::time::Instant::now();
    let mut num_queries = 0usize;
    for seq in &queries {
        let rows: Vec<Option<(usize, u32)>> =
            ctx.map_indices(seq.kmer_count(ctx.k()), |pos| loaded.find_nearest_cluster(seq.encoded_kmer(pos)));
        for (pos, nearest) in rows.into_iter().enumerate() {
            if let Some((cluster, distance)) = nearest {
                writeln!(out, "{}\t{}\t{}\t{}", seq.id(), pos, cluster, distance)?;
            }
            num_queries += 1;
        }
    }
    out.flush()?;
    let elapsed = start.elapsed();
    info!(
        "{} k-mers queried against {} clusters in {:.2?} ({:.1} ns/query)",
        num_queries,
        loaded.len(),
        elapsed,
        elapsed.as_nanos() as f64 / num_queries.max(1) as f64
    );
    Ok(())
}
