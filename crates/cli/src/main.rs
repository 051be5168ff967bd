use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use vecindex_core::{Index, IndexKind, MergePart, MetricType};

#[derive(Parser)]
#[command(name = "vecindex", about = "Build, search and merge vector index files")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an index from a raw little-endian f32 vector file
    Build {
        /// Vector dimension
        #[arg(long)]
        dim: usize,

        /// Factory descriptor, e.g. "Flat", "HNSW32,Flat", "IVF100,Flat"
        #[arg(long, default_value = "Flat")]
        descriptor: String,

        /// Distance metric: l2, ip, l1, linf or lp:<p>
        #[arg(long, default_value = "l2")]
        metric: MetricType,

        /// Vectors to add
        #[arg(long)]
        input: PathBuf,

        /// Training vectors (defaults to the input vectors for indexes that need training)
        #[arg(long)]
        train: Option<PathBuf>,

        /// Output index file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run k-NN queries against an index file
    Search {
        #[arg(long)]
        index: PathBuf,

        /// Query vectors (raw little-endian f32)
        #[arg(long)]
        queries: PathBuf,

        #[arg(short, default_value_t = 10)]
        k: usize,

        /// Inverted lists probed per query (IVF only)
        #[arg(long)]
        nprobe: Option<usize>,

        /// Search beam width (HNSW only)
        #[arg(long)]
        ef_search: Option<usize>,
    },

    /// Print an index file's header and structure
    Info {
        #[arg(long)]
        index: PathBuf,
    },

    /// Merge IVF index files on disk. The first part must be trained.
    Merge {
        /// Output index file
        #[arg(short, long)]
        output: PathBuf,

        /// Output posting data file
        #[arg(long)]
        data: PathBuf,

        /// Input index files
        #[arg(required = true)]
        parts: Vec<PathBuf>,
    },
}

/// Read a raw little-endian f32 file holding `n * dim` values.
fn read_vectors(path: &Path, dim: usize) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    if bytes.len() % 4 != 0 || dim == 0 || (bytes.len() / 4) % dim != 0 {
        return Err(format!(
            "{} holds {} bytes, not a whole number of {dim}-dimensional f32 vectors",
            path.display(),
            bytes.len()
        )
        .into());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn build(
    dim: usize,
    descriptor: &str,
    metric: MetricType,
    input: &Path,
    train: Option<&Path>,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut index = Index::from_factory(dim, descriptor, metric)?;
    let vectors = read_vectors(input, dim)?;

    if !index.is_trained()? || train.is_some() {
        let training = match train {
            Some(path) => read_vectors(path, dim)?,
            None => vectors.clone(),
        };
        let t0 = Instant::now();
        index.train(&training)?;
        tracing::info!(
            "Trained on {} vectors in {:.2}s",
            training.len() / dim,
            t0.elapsed().as_secs_f64()
        );
    }

    let t0 = Instant::now();
    if index.kind()? == IndexKind::IdMap {
        let labels: Vec<i64> = (0..(vectors.len() / dim) as i64).collect();
        index.add_with_ids(&vectors, &labels)?;
    } else {
        index.add(&vectors)?;
    }
    tracing::info!(
        "Added {} vectors in {:.2}s",
        index.ntotal()?,
        t0.elapsed().as_secs_f64()
    );

    index.write(output)?;
    Ok(())
}

fn search(
    path: &Path,
    queries: &Path,
    k: usize,
    nprobe: Option<usize>,
    ef_search: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut index = Index::read(path)?;
    if let Some(nprobe) = nprobe {
        index.set_nprobe(nprobe)?;
    }
    if let Some(ef) = ef_search {
        index.set_ef_search(ef)?;
    }
    let dim = index.dimension()?;
    let queries = read_vectors(queries, dim)?;

    let t0 = Instant::now();
    let result = index.search(&queries, k)?;
    let elapsed = t0.elapsed();

    for q in 0..result.nq() {
        let (distances, labels) = result.row(q);
        let hits: Vec<String> = labels
            .iter()
            .zip(distances)
            .filter(|(label, _)| **label >= 0)
            .map(|(label, distance)| format!("{label}:{distance:.4}"))
            .collect();
        println!("{q}\t{}", hits.join(" "));
    }
    tracing::info!(
        "Searched {} queries in {:.2}ms",
        result.nq(),
        elapsed.as_secs_f64() * 1000.0
    );
    Ok(())
}

fn info(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let index = Index::read(path)?;
    println!("kind:       {}", index.kind()?);
    println!("dimension:  {}", index.dimension()?);
    println!("metric:     {}", index.metric_type()?);
    println!("trained:    {}", index.is_trained()?);
    println!("ntotal:     {}", index.ntotal()?);
    println!("code size:  {} bytes", index.code_size()?);
    if let Ok(ef) = index.ef_search() {
        println!("ef_search:  {ef}");
        println!("ef_constr:  {}", index.ef_construction()?);
    }
    if let Ok(nlist) = index.nlist() {
        let sizes = index.list_sizes()?;
        let largest = sizes.iter().copied().max().unwrap_or(0);
        let empty = sizes.iter().filter(|&&n| n == 0).count();
        println!("nlist:      {nlist}");
        println!("nprobe:     {}", index.nprobe()?);
        println!("lists:      largest {largest}, empty {empty}");
    }
    Ok(())
}

fn merge(output: &Path, data: &Path, parts: Vec<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    if !Index::is_on_disk_supported() {
        return Err("on-disk merge is not supported on this platform".into());
    }
    let mut parts: Vec<MergePart<'_>> = parts.into_iter().map(MergePart::Path).collect();
    Index::merge_on_disk(&mut parts, output, data)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("vecindex_cli=info".parse()?)
                .add_directive("vecindex_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Build {
            dim,
            descriptor,
            metric,
            input,
            train,
            output,
        } => build(dim, &descriptor, metric, &input, train.as_deref(), &output),
        Command::Search {
            index,
            queries,
            k,
            nprobe,
            ef_search,
        } => search(&index, &queries, k, nprobe, ef_search),
        Command::Info { index } => info(&index),
        Command::Merge {
            output,
            data,
            parts,
        } => merge(&output, &data, parts),
    }
}
