//! tpmsync CLI
//!
//! Run parameter sweeps of Tree Parity Machine synchronization trials and
//! replay persisted results.
//!
//! # Example
//!
//! ```bash
//! # Sweep a settings document on 8 workers, appending results to a file
//! tpmsync sweep sweep.toml --workers 8 --output results.jsonl
//!
//! # Check that every stored trial reproduces from its seed
//! tpmsync replay results.jsonl
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tpmsync_dispatch_pooled::{PooledDispatch, WorkerPoolConfig};
use tpmsync_orchestrator::{
    Clock, FallbackClock, JsonLinesSink, NullSink, Orchestrator, OrchestratorConfig, ResultSink,
    SimulationSettings, SntpClock, SystemClock, DEFAULT_NTP_SERVER,
};
use tpmsync_registry::{RegistryConfig, SessionRegistry};
use tpmsync_simulator::{read_records, replay_record, SweepOverrides};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// tpmsync
///
/// Neural key-exchange synchronization workbench.
#[derive(Parser, Debug)]
#[command(name = "tpmsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level filter (overrides RUST_LOG)
    #[arg(long, global = true, default_value = "warn,tpmsync=info")]
    log_level: String,

    /// Path to log file (redirects all logs to this file)
    #[arg(long, global = true)]
    logfile: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every combination of a settings document
    Sweep(SweepArgs),
    /// Re-run stored trials and compare against the stored outcome
    Replay(ReplayArgs),
}

#[derive(clap::Args, Debug)]
struct SweepArgs {
    /// Settings document (.toml or .json)
    settings: PathBuf,

    /// Concurrent trial groups (overrides max_worker_count)
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Trials per settings value (overrides max_session_count)
    #[arg(short = 'r', long)]
    repetitions: Option<u64>,

    /// Iteration cap per trial, 0 for uncapped (overrides max_iterations)
    #[arg(long)]
    max_iterations: Option<u64>,

    /// Append results as JSON lines to this file; discarded when omitted
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// SNTP server used for timestamps and seeds
    #[arg(long, default_value = DEFAULT_NTP_SERVER)]
    ntp_server: String,

    /// Use local time only
    #[arg(long)]
    no_ntp: bool,

    /// Pin each worker thread to its own core
    #[arg(long)]
    pin_cores: bool,

    /// Write Prometheus metrics to this file when the sweep ends
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct ReplayArgs {
    /// JSON-lines result file
    results: PathBuf,

    /// Replay only this record (0-based, blank lines excluded)
    #[arg(long)]
    index: Option<usize>,

    /// Print each outcome as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli)?;

    match cli.command {
        Command::Sweep(args) => run_sweep(args),
        Command::Replay(args) => run_replay(args),
    }
}

fn init_logging(cli: &Cli) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let builder = tracing_subscriber::fmt();
    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let Some(log_file) = &cli.logfile else {
        builder.with_env_filter(filter()).init();
        return Ok(None);
    };

    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }
    let file_name = log_file
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid log file name"))?
        .to_string_lossy()
        .to_string();
    let directory = log_file
        .parent()
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    builder
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_env_filter(filter())
        .init();
    Ok(Some(guard))
}

fn run_sweep(args: SweepArgs) -> Result<()> {
    let mut simulation = SimulationSettings::load(&args.settings)
        .with_context(|| format!("Failed to load settings: {}", args.settings.display()))?;
    SweepOverrides {
        workers: args.workers,
        repetitions: args.repetitions,
        max_iterations: args.max_iterations,
    }
    .apply(&mut simulation);
    simulation
        .validate()
        .context("Settings invalid after overrides")?;

    let base = simulation.base();
    info!(
        topology = %simulation.topology(),
        workers = base.max_worker_count,
        repetitions = base.max_session_count,
        max_iterations = base.max_iterations,
        combinations = simulation.combinations().len(),
        "Starting sweep"
    );

    if args.metrics_out.is_some() {
        tpmsync_metrics_prometheus::install();
    }

    let pool_config = WorkerPoolConfig::builder()
        .workers(base.max_worker_count)
        .pin_cores(args.pin_cores)
        .build()
        .context("Invalid worker pool configuration")?;
    let dispatch = PooledDispatch::new(pool_config).context("Failed to initialize thread pools")?;

    let sink: Arc<dyn ResultSink> = match &args.output {
        Some(path) => Arc::new(
            JsonLinesSink::create(path)
                .with_context(|| format!("Failed to open result file: {}", path.display()))?,
        ),
        None => {
            warn!("No --output given; results will be discarded");
            Arc::new(NullSink)
        }
    };

    let clock: Arc<dyn Clock> = if args.no_ntp {
        Arc::new(SystemClock)
    } else {
        Arc::new(FallbackClock::new(
            SntpClock::new(args.ntp_server.clone(), Duration::from_secs(2)),
            Duration::from_secs(60),
        ))
    };

    let orchestrator = Orchestrator::new(
        dispatch,
        SessionRegistry::new(RegistryConfig::default()),
        sink,
        clock,
        OrchestratorConfig::default(),
    );
    let report = orchestrator.run_sweep(&simulation)?;

    println!(
        "submitted {} skipped {} completed {}",
        report.submitted, report.skipped, report.completed
    );

    if let Some(path) = &args.metrics_out {
        let encoded =
            tpmsync_metrics_prometheus::encode_metrics().context("Failed to encode metrics")?;
        fs::write(path, encoded)
            .with_context(|| format!("Failed to write metrics: {}", path.display()))?;
        info!(path = %path.display(), "Metrics written");
    }

    if report.completed < report.submitted {
        bail!(
            "{} of {} trial groups did not complete",
            report.submitted - report.completed,
            report.submitted
        );
    }
    Ok(())
}

fn run_replay(args: ReplayArgs) -> Result<()> {
    let records = read_records(&args.results)
        .with_context(|| format!("Failed to read results: {}", args.results.display()))?;
    let selected: Vec<_> = match args.index {
        Some(index) => {
            let record = records.get(index).with_context(|| {
                format!("Record {index} out of range ({} records)", records.len())
            })?;
            vec![(index, record)]
        }
        None => records.iter().enumerate().collect(),
    };

    let mut mismatches = 0usize;
    for (index, record) in selected.iter().copied() {
        let outcome = replay_record(record)
            .with_context(|| format!("Failed to replay record {index}"))?;
        if !outcome.matches() {
            mismatches += 1;
            warn!(
                index,
                seed = outcome.seed,
                recorded_status = %outcome.recorded_status,
                replayed_status = %outcome.result.status,
                "Replay diverged from record"
            );
        }
        if args.json {
            println!("{}", serde_json::to_string(&outcome)?);
        }
    }

    println!("replayed {} mismatched {}", selected.len(), mismatches);
    if mismatches > 0 {
        bail!("{mismatches} records did not reproduce");
    }
    Ok(())
}
