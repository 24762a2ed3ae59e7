use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use pgz_codecs::{GzipCodec, DEFAULT_LEVEL};
use pgz_core::{ArchiveReport, Archiver, ArchiverConfig, Codec, DecodePath, Fault, Framing};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "pgz",
    about = "Block-parallel gzip compression and decompression",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into concatenated gzip members
    Compress {
        /// Source file to compress
        source: PathBuf,
        /// Destination archive (overwritten if it exists)
        destination: PathBuf,
        /// DEFLATE level, 0 (stored) to 9 (smallest)
        #[arg(short, long, default_value_t = DEFAULT_LEVEL, value_parser = clap::value_parser!(u32).range(0..=9))]
        level: u32,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Decompress an archive; plain gzip files are decoded single-threaded
    Decompress {
        /// Source archive
        source: PathBuf,
        /// Destination file (must not exist)
        destination: PathBuf,
        /// Member framing: length | scan
        #[arg(short, long)]
        framing: Option<Framing>,
        #[command(flatten)]
        tuning: Tuning,
    },
}

#[derive(Args)]
struct Tuning {
    /// Raw bytes per block
    #[arg(short, long)]
    block_size: Option<usize>,
    /// Worker threads (default: number of logical CPUs)
    #[arg(short, long)]
    workers: Option<usize>,
    /// Resident blocks per reordering queue
    #[arg(long)]
    queue_capacity: Option<usize>,
    /// JSON file with ArchiverConfig defaults; flags override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the run report as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

impl Tuning {
    fn resolve(&self, framing: Option<Framing>) -> anyhow::Result<ArchiverConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {:?}", path))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing config file {:?}", path))?
            }
            None => ArchiverConfig::default(),
        };
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(framing) = framing {
            config.framing = framing;
        }
        config.validate()?;
        Ok(config)
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn print_report(report: &ArchiveReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let path = match report.path {
        DecodePath::Parallel => "parallel",
        DecodePath::Fallback => "single-threaded fallback",
    };
    println!("  codec       : {}", report.codec);
    println!("  path        : {}", path);
    if let Some(framing) = report.framing {
        println!("  framing     : {}", framing);
    }
    println!("  block size  : {}", human_bytes(report.block_size as u64));
    println!("  workers     : {}", report.workers);
    println!("  blocks      : {}", report.blocks);
    println!("  read        : {}", human_bytes(report.bytes_in));
    println!("  written     : {}", human_bytes(report.bytes_out));
    if let Some(kind) = report.recovered_from {
        println!("  recovered   : {}", kind);
    }
    Ok(())
}

fn print_fault(fault: &Fault) {
    println!("Error!");
    println!("{}", fault.kind());
    println!("{}", fault);
    if let Some(stage) = fault.stage() {
        println!("In {} stage", stage);
    }
    let mut source = std::error::Error::source(fault);
    while let Some(cause) = source {
        println!("  caused by: {}", cause);
        source = cause.source();
    }
}

/// Drop whatever lies past the final write position. A fallback run rewinds
/// and may write less than the failed parallel attempt did.
fn seal(writer: BufWriter<File>) -> anyhow::Result<()> {
    let mut file = writer.into_inner().map_err(|e| e.into_error())?;
    let end = file.stream_position()?;
    file.set_len(end)?;
    Ok(())
}

fn open_source(path: &Path) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("opening source file {:?}", path))?;
    Ok(BufReader::new(file))
}

// ── Subcommand implementations ─────────────────────────────────────────────

/// `Ok(Err(fault))` is a run the archiver reported as failed; `Err` is
/// everything around it (paths, config).
type Outcome = anyhow::Result<Result<ArchiveReport, Fault>>;

fn run_compress(source: &Path, destination: &Path, level: u32, tuning: &Tuning) -> Outcome {
    let config = tuning.resolve(None)?;
    let archiver = Archiver::new(Arc::new(GzipCodec::new(level)), config)?;
    log_setup(&archiver);

    let src = open_source(source)?;
    let dst = File::create(destination)
        .with_context(|| format!("creating destination file {:?}", destination))?;
    let mut dst = BufWriter::new(dst);

    let result = archiver.compress(src, &mut dst);
    if result.is_ok() {
        seal(dst)?;
    }
    Ok(result)
}

fn run_decompress(
    source: &Path,
    destination: &Path,
    framing: Option<Framing>,
    tuning: &Tuning,
) -> Outcome {
    let config = tuning.resolve(framing)?;
    let archiver = Archiver::new(Arc::new(GzipCodec::default()), config)?;
    log_setup(&archiver);

    let src = open_source(source)?;
    let dst = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(destination)
        .with_context(|| format!("creating destination file {:?}", destination))?;
    let mut dst = BufWriter::new(dst);

    let result = archiver.decompress(src, &mut dst);
    if result.is_ok() {
        seal(dst)?;
    }
    Ok(result)
}

fn log_setup(archiver: &Archiver) {
    let config = archiver.config();
    info!(
        codec = archiver.codec().name(),
        block_size = config.block_size,
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        "archiver ready"
    );
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    println!("Processing...");
    let t0 = Instant::now();

    let (outcome, json) = match &cli.command {
        Commands::Compress {
            source,
            destination,
            level,
            tuning,
        } => {
            info!("compressing {:?} into {:?}", source, destination);
            (run_compress(source, destination, *level, tuning), tuning.json)
        }
        Commands::Decompress {
            source,
            destination,
            framing,
            tuning,
        } => {
            info!("decompressing {:?} into {:?}", source, destination);
            (run_decompress(source, destination, *framing, tuning), tuning.json)
        }
    };

    match outcome {
        Ok(Ok(report)) => {
            if let Err(e) = print_report(&report, json) {
                println!("Error! {:#}", e);
                return ExitCode::from(2);
            }
            println!("Success! Elapsed time: {}ms", t0.elapsed().as_millis());
            ExitCode::SUCCESS
        }
        Ok(Err(fault)) => {
            print_fault(&fault);
            ExitCode::from(1)
        }
        Err(e) => {
            println!("Error! {:#}", e);
            ExitCode::from(2)
        }
    }
}
