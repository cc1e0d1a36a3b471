//! Binary entry point for the Basalt administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use basalt::admin::{dump_log, recover, stats, LogReport, RecoverReport, StatsReport};
use basalt::options::{DbOptions, Synchronous};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "basalt",
    version,
    about = "Administrative CLI for Basalt database directories",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(long, global = true, value_name = "FILE", help = "TOML options file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override block size (bytes)")]
    block_size: Option<usize>,

    #[arg(long, global = true, help = "Override buffer pool size (buffers)")]
    buffers: Option<usize>,

    #[arg(long, global = true, value_enum, help = "Synchronous mode override")]
    synchronous: Option<SynchronousArg>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every log record, newest first.
    Log {
        #[arg(value_name = "DIR")]
        db_dir: PathBuf,
    },
    /// Undo unfinished transactions and write a checkpoint.
    Recover {
        #[arg(value_name = "DIR")]
        db_dir: PathBuf,
    },
    /// Show file sizes and engine counters.
    Stats {
        #[arg(value_name = "DIR")]
        db_dir: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum SynchronousArg {
    Full,
    Off,
}

impl From<SynchronousArg> for Synchronous {
    fn from(value: SynchronousArg) -> Self {
        match value {
            SynchronousArg::Full => Synchronous::Full,
            SynchronousArg::Off => Synchronous::Off,
        }
    }
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let opts = build_options(&cli.open)?;

    match cli.command {
        Command::Log { db_dir } => {
            let report = dump_log(&db_dir, &opts)?;
            emit(&cli.format, &report, |_| print_log_text(&report))?;
        }
        Command::Recover { db_dir } => {
            let report = recover(&db_dir, &opts)?;
            emit(&cli.format, &report, |_| print_recover_text(&report))?;
        }
        Command::Stats { db_dir } => {
            let report = stats(&db_dir, &opts)?;
            emit(&cli.format, &report, |_| print_stats_text(&report))?;
        }
    }
    Ok(())
}

fn build_options(args: &OpenArgs) -> Result<DbOptions, Box<dyn Error>> {
    let mut opts = match &args.config {
        Some(path) => DbOptions::load(path)?,
        None => DbOptions::default(),
    };
    if let Some(block_size) = args.block_size {
        opts.block_size = block_size;
    }
    if let Some(buffers) = args.buffers {
        opts.buffer_pool_size = buffers;
    }
    if let Some(mode) = args.synchronous {
        opts.synchronous = mode.into();
    }
    opts.validate()?;
    Ok(opts)
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_log_text(report: &LogReport) {
    println!(
        "Log {} ({} blocks, {} records)",
        report.log_file,
        report.blocks,
        report.records.len()
    );
    for entry in &report.records {
        println!("  {:>6} {}", entry.position, entry.text);
    }
    if !report.counts.is_empty() {
        let counts: Vec<String> = report
            .counts
            .iter()
            .map(|(kind, n)| format!("{kind}={n}"))
            .collect();
        println!();
        println!("Counts: {}", counts.join(" "));
    }
}

fn print_recover_text(report: &RecoverReport) {
    println!(
        "Recovery by tx {} undid {} updates in {:.2} ms",
        report.tx, report.undone, report.duration_ms
    );
}

fn print_stats_text(report: &StatsReport) {
    println!("Database: {} block_size={}", report.dir, report.block_size);
    println!();
    println!("Files:");
    for file in &report.files {
        println!(
            "  {} blocks={} size={}",
            file.name, file.blocks, file.size_bytes
        );
    }
    println!();
    println!(
        "WAL: file={} blocks={} size={} records={} flushes={}",
        report.wal.file,
        report.wal.blocks,
        report.wal.size_bytes,
        report.wal.records,
        report.wal.flushes
    );
    println!();
    println!(
        "Buffers: pool={} available={} hits={} misses={} writebacks={} pin_waits={} pin_timeouts={}",
        report.buffers.pool_size,
        report.buffers.available,
        report.buffers.hits,
        report.buffers.misses,
        report.buffers.writebacks,
        report.buffers.pin_waits,
        report.buffers.pin_timeouts
    );
}
