//! perfmon command line entry point
//!
//! Runs the synthetic workload under the monitor, or renders and checks
//! snapshots saved by earlier runs.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use perfmon::{
    config::MonitorConfig, generate_report, generate_report_from_snapshot, monitoring::SourceScope,
    workload, Monitor, Session,
};

/// Resource monitor for benchmark workloads
#[derive(Parser)]
#[command(name = "perfmon")]
#[command(about = "Sample CPU, memory and disk I/O during a workload and report on it")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overriding the configuration
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor the synthetic workload, save a snapshot and generate a report
    Run {
        /// Sampling interval in seconds
        #[arg(short, long)]
        interval: Option<f64>,

        /// Rows to generate
        #[arg(short, long)]
        rows: Option<u64>,

        /// Sample this process or the whole host
        #[arg(short, long)]
        scope: Option<SourceScope>,

        /// Output directory for the snapshot and report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Save the snapshot only
        #[arg(long)]
        no_report: bool,
    },

    /// Generate a report from a saved snapshot
    Report {
        /// Snapshot file
        snapshot: PathBuf,

        /// Report directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that a snapshot is well formed
    Validate {
        /// Snapshot file
        snapshot: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Also write it to the default configuration path
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            process::exit(1);
        }
    };

    let _guard = match initialize_logging(&cli, &config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            interval,
            rows,
            scope,
            output,
            no_report,
        } => {
            let mut config = config;
            if let Some(interval) = interval {
                config.sampling.interval_secs = interval;
            }
            if let Some(rows) = rows {
                config.workload.rows = rows;
            }
            if let Some(scope) = scope {
                config.sampling.scope = scope;
            }
            if let Some(output) = output {
                config.output.directory = output;
            }
            run_workload(config, no_report).await
        }
        Commands::Report { snapshot, output } => {
            let output = output.unwrap_or_else(|| config.report_dir());
            render_snapshot(&snapshot, &output)
        }
        Commands::Validate { snapshot } => validate_snapshot(&snapshot),
        Commands::Config { save } => show_config(&config, save),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        process::exit(1);
    }
}

/// Load configuration from the given file, the default location, or defaults
fn load_configuration(cli: &Cli) -> Result<MonitorConfig> {
    let path = match &cli.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("configuration file {} does not exist", path.display());
            }
            Some(path.clone())
        }
        None => MonitorConfig::default_config_path().ok(),
    };

    let mut config = MonitorConfig::load_with_fallback(path.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Initialize logging; the returned guard flushes the log file on drop
fn initialize_logging(cli: &Cli, config: &MonitorConfig) -> Result<Option<WorkerGuard>> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("perfmon={}", log_level).parse()?)
        .add_directive("tokio=warn".parse()?)
        .add_directive("mio=warn".parse()?);

    let mut guard = None;
    let file_layer = match &config.logging.file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("log file path {} has no file name", path.display()))?;
            std::fs::create_dir_all(directory)
                .with_context(|| format!("creating log directory {}", directory.display()))?;

            let (writer, worker) = tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
            guard = Some(worker);
            Some(fmt::layer().with_writer(writer).with_ansi(false))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if cli.json_logs || config.logging.json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()?;
    }

    Ok(guard)
}

async fn run_workload(config: MonitorConfig, no_report: bool) -> Result<()> {
    config.validate()?;
    info!(
        "Running workload: {} rows, {}s interval, {} scope",
        config.workload.rows, config.sampling.interval_secs, config.sampling.scope
    );

    let monitor = Monitor::start_with_config(&config).context("starting monitor")?;
    let snapshot_path = config.snapshot_path(monitor.started_at());

    let outcome = tokio::select! {
        result = workload::run(&config.workload, &monitor) => Some(result),
        _ = signal::ctrl_c() => None,
    };

    let workload_error = match outcome {
        Some(Ok(summary)) => {
            info!(
                "Workload finished: {} rows in {} chunks, {} bytes of scratch data",
                summary.rows, summary.chunks, summary.scratch_bytes
            );
            for query in &summary.queries {
                info!("  {:<32} {:>10.2} ms  {}", query.name, query.duration_ms, query.result);
            }
            None
        }
        Some(Err(e)) => {
            note_event(&monitor, format!("workload_error: {}", e));
            Some(e)
        }
        None => {
            warn!("Interrupted, stopping monitor");
            note_event(&monitor, "interrupted");
            None
        }
    };

    let session = monitor.stop().await.context("stopping monitor")?;
    session
        .save_snapshot(&snapshot_path)
        .with_context(|| format!("saving snapshot to {}", snapshot_path.display()))?;
    info!("Snapshot saved to {}", snapshot_path.display());

    if !no_report {
        let generated = generate_report(&session, config.report_dir()).context("generating report")?;
        info!("Open {} to view the performance report", generated.html_path().display());
    }

    match workload_error {
        Some(e) => Err(e).context("workload failed"),
        None => Ok(()),
    }
}

/// Record a best-effort milestone; returns whether it made it into the log
fn note_event(monitor: &Monitor, label: impl AsRef<str>) -> bool {
    let label = label.as_ref();
    match monitor.record_event(label) {
        Ok(_) => true,
        Err(e) => {
            warn!("Event '{}' was not recorded: {}", label, e);
            false
        }
    }
}

fn render_snapshot(snapshot: &Path, output: &Path) -> Result<()> {
    let generated = generate_report_from_snapshot(snapshot, output)
        .with_context(|| format!("generating report from {}", snapshot.display()))?;

    println!("Report written to {}", generated.directory.display());
    for artifact in &generated.artifacts {
        println!("  {}", artifact.display());
    }
    Ok(())
}

fn validate_snapshot(snapshot: &Path) -> Result<()> {
    let session = Session::load_snapshot(snapshot)
        .with_context(|| format!("validating {}", snapshot.display()))?;

    let unavailable = session.samples.iter().filter(|s| s.is_sentinel()).count();
    println!("{} is valid", snapshot.display());
    println!("  start:    {}", session.start_time.to_rfc3339());
    println!("  duration: {:.2}s", session.duration_secs());
    println!("  samples:  {} ({} unavailable)", session.samples.len(), unavailable);
    println!("  events:   {}", session.events.len());
    Ok(())
}

fn show_config(config: &MonitorConfig, save: bool) -> Result<()> {
    print!("{}", config.to_toml()?);

    if save {
        let path = MonitorConfig::default_config_path()?;
        config.save_to_file(&path)?;
        println!("# saved to {}", path.display());
    }
    Ok(())
}
