//! pgz throughput demo
//!
//! Generates a deterministic service-log corpus, then compares plain
//! single-stream gzip with block-parallel pgz on the same data: compression
//! at one worker and at N workers, decompression through the parallel path
//! and through a standard multi-member decoder, and the fallback on a file
//! pgz did not write. Every output is checked against the corpus.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Result};
use clap::Parser;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use pgz_codecs::{GzipCodec, DEFAULT_LEVEL};
use pgz_core::{ArchiveReport, Archiver, ArchiverConfig, DecodePath};

#[derive(Parser)]
#[command(name = "pgz-demo", about = "Compare single-stream gzip with pgz")]
struct Args {
    /// Size of the generated corpus in MB
    #[arg(short, long, default_value_t = 64)]
    megabytes: u64,
    /// Worker threads for the parallel runs (default: logical CPUs)
    #[arg(short, long)]
    workers: Option<usize>,
}

// ── constants ──────────────────────────────────────────────────────────────

const SERVICES: &[&str] = &["checkout", "catalog", "auth", "search", "billing", "gateway"];
const LEVELS: &[&str] = &["INFO", "INFO", "INFO", "DEBUG", "WARN", "INFO", "ERROR", "INFO"];
const EVENTS: &[&str] = &[
    "request completed",
    "cache miss, fetching from origin",
    "token refreshed",
    "upstream responded slowly",
    "retrying after connection reset",
    "order {id} moved to state shipped",
    "query returned {n} rows",
];
const REGIONS: &[&str] = &["eu-west-1", "us-east-2", "ap-south-1"];

// ── data generator ─────────────────────────────────────────────────────────

/// Structured log line for entry `i`; the same `i` always yields the same
/// bytes.
fn generate_log_line(i: u64) -> Vec<u8> {
    let service = SERVICES[(i as usize * 5 + 1) % SERVICES.len()];
    let level = LEVELS[(i as usize * 3 + 2) % LEVELS.len()];
    let event = EVENTS[(i as usize * 7 + 4) % EVENTS.len()]
        .replace("{id}", &(i * 31 % 1_000_003).to_string())
        .replace("{n}", &(i % 500).to_string());
    let region = REGIONS[(i as usize) % REGIONS.len()];
    let ts_ms = 1_767_225_600_000u64 + i * 13;
    let latency_us = (i * 7919) % 250_000 + 90;
    let trace = i.wrapping_mul(0x9e37_79b9_7f4a_7c15);

    format!(
        "{{\"ts\":{ts_ms},\"level\":\"{level}\",\"service\":\"{service}\",\
         \"region\":\"{region}\",\"trace\":\"{trace:016x}\",\
         \"latency_us\":{latency_us},\"msg\":\"{event}\"}}\n"
    )
    .into_bytes()
}

fn write_corpus(path: &Path, target_bytes: u64) -> Result<(u64, u64)> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut lines = 0u64;
    let mut total = 0u64;
    while total < target_bytes {
        let line = generate_log_line(lines);
        total += line.len() as u64;
        out.write_all(&line)?;
        lines += 1;
    }
    out.flush()?;
    Ok((lines, total))
}

// ── contenders ─────────────────────────────────────────────────────────────

fn gzip_single(source: &Path, destination: &Path) -> Result<()> {
    let mut src = BufReader::new(File::open(source)?);
    let mut enc = GzEncoder::new(
        BufWriter::new(File::create(destination)?),
        Compression::new(DEFAULT_LEVEL),
    );
    io::copy(&mut src, &mut enc)?;
    enc.finish()?.flush()?;
    Ok(())
}

fn gunzip_single(source: &Path, destination: &Path) -> Result<()> {
    let mut dec = MultiGzDecoder::new(BufReader::new(File::open(source)?));
    let mut dst = BufWriter::new(File::create(destination)?);
    io::copy(&mut dec, &mut dst)?;
    dst.flush()?;
    Ok(())
}

fn archiver(workers: usize) -> Result<Archiver> {
    let config = ArchiverConfig {
        workers,
        ..ArchiverConfig::default()
    };
    Archiver::new(Arc::new(GzipCodec::default()), config)
}

fn pgz_compress(archiver: &Archiver, source: &Path, destination: &Path) -> Result<ArchiveReport> {
    let src = BufReader::new(File::open(source)?);
    let mut dst = BufWriter::new(File::create(destination)?);
    let report = archiver.compress(src, &mut dst)?;
    dst.flush()?;
    Ok(report)
}

fn pgz_decompress(archiver: &Archiver, source: &Path, destination: &Path) -> Result<ArchiveReport> {
    let src = BufReader::new(File::open(source)?);
    let dst = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(destination)?;
    let mut dst = BufWriter::new(dst);
    let report = archiver.decompress(src, &mut dst)?;
    let mut file = dst.into_inner().map_err(|e| e.into_error())?;
    let end = file.stream_position()?;
    file.set_len(end)?;
    Ok(report)
}

// ── verification ───────────────────────────────────────────────────────────

fn same_contents(a: &Path, b: &Path) -> Result<bool> {
    if file_size(a)? != file_size(b)? {
        return Ok(false);
    }
    let mut ra = BufReader::new(File::open(a)?);
    let mut rb = BufReader::new(File::open(b)?);
    let mut ba = vec![0u8; 1 << 16];
    let mut bb = vec![0u8; 1 << 16];
    loop {
        let n = ra.read(&mut ba)?;
        if n == 0 {
            return Ok(true);
        }
        rb.read_exact(&mut bb[..n])?;
        if ba[..n] != bb[..n] {
            return Ok(false);
        }
    }
}

// ── demo runner ────────────────────────────────────────────────────────────

struct Row {
    label: String,
    elapsed: Duration,
    output: u64,
}

fn print_table(title: &str, rows: &[Row]) {
    section(title);
    println!("  {:<34} {:>10}  {:>12}  {:>8}", "Method", "Time", "Output", "Speedup");
    println!("  {}", "─".repeat(70));
    let baseline = rows.first().map(|r| r.elapsed).unwrap_or_default();
    for row in rows {
        println!(
            "  {:<34} {:>10}  {:>12}  {:>7.1}×",
            row.label,
            fmt_duration(row.elapsed),
            human_bytes(row.output),
            speedup(baseline, row.elapsed)
        );
    }
    println!();
}

fn timed<T>(f: impl FnOnce() -> Result<T>) -> Result<(T, Duration)> {
    let t0 = Instant::now();
    let value = f()?;
    Ok((value, t0.elapsed()))
}

fn run(args: Args) -> Result<()> {
    let workers = args.workers.unwrap_or_else(|| ArchiverConfig::default().workers);
    let out_dir = std::env::temp_dir().join("pgz_demo");
    std::fs::create_dir_all(&out_dir)?;

    let corpus = out_dir.join("corpus.jsonl");
    let plain_gz = out_dir.join("corpus.single.gz");
    let pgz_one = out_dir.join("corpus.pgz-1.gz");
    let pgz_many = out_dir.join("corpus.pgz-n.gz");
    let restored = out_dir.join("corpus.restored");

    println!();
    println!("pgz demo: block-parallel gzip vs single-stream gzip");
    println!();

    section("0 · DATA GENERATION");
    let (lines, raw_bytes) = write_corpus(&corpus, args.megabytes * 1024 * 1024)?;
    println!("  {} log lines, {}", format_number(lines), human_bytes(raw_bytes));
    println!("  sample: {}", String::from_utf8_lossy(&generate_log_line(42)).trim_end());
    println!();

    // ── compression ──────────────────────────────────────────────────────
    let one = archiver(1)?;
    let many = archiver(workers)?;

    let ((), t_single) = timed(|| gzip_single(&corpus, &plain_gz))?;
    let (_, t_one) = timed(|| pgz_compress(&one, &corpus, &pgz_one))?;
    let (packed, t_many) = timed(|| pgz_compress(&many, &corpus, &pgz_many))?;

    print_table(
        "1 · COMPRESSION",
        &[
            Row { label: "gzip (single stream)".into(), elapsed: t_single, output: file_size(&plain_gz)? },
            Row { label: "pgz, 1 worker".into(), elapsed: t_one, output: file_size(&pgz_one)? },
            Row { label: format!("pgz, {workers} workers"), elapsed: t_many, output: file_size(&pgz_many)? },
        ],
    );
    println!("  members written      : {}", format_number(packed.blocks));
    println!("  peak queue residency : {} in, {} out", packed.peak_input_queue, packed.peak_output_queue);
    ensure!(
        same_contents(&pgz_one, &pgz_many)?,
        "archive bytes differ between 1 and {workers} workers"
    );
    println!("  archives at 1 and {workers} workers are byte-identical ✓");
    println!();

    // ── decompression ────────────────────────────────────────────────────
    let ((), t_multi) = timed(|| gunzip_single(&pgz_many, &restored))?;
    ensure!(same_contents(&corpus, &restored)?, "standard decoder mismatch");
    let (unpacked, t_parallel) = timed(|| pgz_decompress(&many, &pgz_many, &restored))?;
    ensure!(same_contents(&corpus, &restored)?, "parallel decoder mismatch");
    ensure!(unpacked.path == DecodePath::Parallel, "expected the parallel path");

    print_table(
        "2 · DECOMPRESSION",
        &[
            Row { label: "MultiGzDecoder (single thread)".into(), elapsed: t_multi, output: raw_bytes },
            Row { label: format!("pgz, {workers} workers"), elapsed: t_parallel, output: raw_bytes },
        ],
    );
    println!("  both decoders restore the corpus exactly ✓");
    println!();

    // ── fallback ─────────────────────────────────────────────────────────
    section("3 · FOREIGN GZIP INPUT");
    let (report, t_fallback) = timed(|| pgz_decompress(&many, &plain_gz, &restored))?;
    ensure!(same_contents(&corpus, &restored)?, "fallback decoder mismatch");
    println!("  path          : {:?}", report.path);
    if let Some(kind) = report.recovered_from {
        println!("  recovered from: {kind}");
    }
    println!("  elapsed       : {}", fmt_duration(t_fallback));
    println!("  plain gzip restored exactly ✓");
    println!();

    println!("  artifacts in {}", out_dir.display());
    Ok(())
}

// ── small helpers ──────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const U: &[&str] = &["B", "KB", "MB", "GB"];
    let mut v = n as f64;
    let mut u = 0;
    while v >= 1024.0 && u < U.len() - 1 {
        v /= 1024.0;
        u += 1;
    }
    if u == 0 {
        format!("{n} B")
    } else {
        format!("{v:.2} {}", U[u])
    }
}

fn fmt_duration(d: Duration) -> String {
    let ms = d.as_secs_f64() * 1000.0;
    if ms < 1000.0 {
        format!("{ms:.1} ms")
    } else {
        format!("{:.2} s", d.as_secs_f64())
    }
}

fn speedup(baseline: Duration, other: Duration) -> f64 {
    baseline.as_secs_f64() / other.as_secs_f64().max(1e-9)
}

fn section(title: &str) {
    println!("━━━ {title} {}", "━".repeat(70usize.saturating_sub(title.len() + 5)));
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.chars().rev().collect()
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

fn main() {
    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
