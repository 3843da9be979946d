//! ---
//! rmon_section: "01-core-functionality"
//! rmon_subsection: "binary"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Binary entrypoint for the rmon harness."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rmon_common::{init_tracing, HarnessConfig, LoadedConfig};
use rmon_metrics::{new_registry, HarnessMetrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod harness;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Supervised chaos-experiment harness",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Directory for logs and reports")]
    output_dir: Option<PathBuf>,

    #[arg(long, value_name = "HOURS", help = "Total matrix run duration in hours")]
    duration: Option<f64>,

    #[arg(long, value_name = "N", help = "Requests per fault window")]
    requests: Option<u32>,

    #[arg(long, value_name = "SECS", help = "Fault window duration in seconds")]
    chaos_duration: Option<u64>,

    #[arg(
        long,
        value_name = "SECS",
        help = "Cooldown and normal-period duration in seconds"
    )]
    normal_duration: Option<u64>,

    #[arg(long, help = "Run the validation suite instead of the matrix")]
    validation: bool,

    #[arg(long, help = "Do not start or supervise target services")]
    no_supervise: bool,

    #[arg(long, help = "Serve Prometheus metrics while running")]
    metrics: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the fault-injection matrix (default)")]
    Run,
    #[command(about = "Run the canonical validation suite")]
    Validate,
    #[command(about = "Supervise target services until interrupted")]
    Supervise,
    #[command(about = "Regenerate the final report from an experiment log")]
    Report {
        #[arg(long, value_name = "CSV")]
        experiment_log: PathBuf,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut HarnessConfig) {
        if let Some(hours) = self.duration {
            config.experiment.duration_hours = hours;
        }
        if let Some(requests) = self.requests {
            config.experiment.requests_per_cycle = requests;
        }
        if let Some(secs) = self.chaos_duration {
            config.experiment.fault_window = Duration::from_secs(secs);
        }
        if let Some(secs) = self.normal_duration {
            config.experiment.cooldown = Duration::from_secs(secs);
            config.experiment.normal_period = Duration::from_secs(secs);
        }
        if let Some(dir) = &self.output_dir {
            config.output.directory = dir.clone();
        }
        if self.no_supervise {
            config.supervisor.enabled = false;
        }
        if self.metrics {
            config.metrics.enabled = true;
        }
    }
}

fn load_config(cli: &Cli) -> Result<LoadedConfig> {
    if let Some(path) = &cli.config {
        // An explicit path wins over RMON_CONFIG and must exist.
        return HarnessConfig::load_file(path);
    }
    let candidates = vec![
        PathBuf::from("configs/rmon.toml"),
        PathBuf::from("rmon.toml"),
    ];
    HarnessConfig::load_or_default(&candidates)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let load_started = Instant::now();
    let loaded = load_config(&cli)?;
    let mut config = loaded.config;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .context("configuration invalid after command-line overrides")?;
    let load_duration = load_started.elapsed();

    init_tracing("rmon", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using built-in defaults"),
    }

    let registry = new_registry();
    let harness_metrics = HarnessMetrics::new(registry.clone())?;
    harness_metrics.observe_config_load(load_duration.as_secs_f64());

    let command = match cli.command {
        Some(command) => command,
        None if cli.validation => Commands::Validate,
        None => Commands::Run,
    };

    match command {
        Commands::Report { experiment_log } => harness::regenerate_report(&config, &experiment_log),
        Commands::Supervise => {
            harness_metrics.inc_run("supervise");
            let cancel = shutdown_token();
            harness::supervise(&config, registry, cancel).await
        }
        Commands::Run => {
            harness_metrics.inc_run("matrix");
            let cancel = shutdown_token();
            harness::run(&config, harness::Mode::Matrix, harness_metrics, cancel).await
        }
        Commands::Validate => {
            harness_metrics.inc_run("validation");
            let cancel = shutdown_token();
            harness::run(&config, harness::Mode::Validation, harness_metrics, cancel).await
        }
    }
}

/// Token cancelled on Ctrl-C or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received; finishing in-flight work");
        trigger.cancel();
    });
    cancel
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    match unix_signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "unable to install SIGTERM handler; listening for ctrl-c only");
            let _ = signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
