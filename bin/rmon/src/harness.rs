//! ---
//! rmon_section: "01-core-functionality"
//! rmon_subsection: "binary"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Wires supervisor, scheduler, recorder, and report for one run."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Local;
use rmon_chaos::{
    ChaosMetrics, ExperimentScheduler, HttpChaosClient, HttpTargetClient, LoadGenerator,
    RunSummary, SchedulerSettings, ValidationSuite,
};
use rmon_common::time::file_stamp;
use rmon_common::{CrashSink, ExperimentRecord, HarnessConfig, RecordSink, RequestTally};
use rmon_metrics::{spawn_http_server, HarnessMetrics, MetricsServer, SharedRegistry};
use rmon_persistence::{load_experiment_log, MetricsRecorder};
use rmon_report::{ReportGenerator, ReportInput};
use rmon_supervisor::{
    HttpHealthProbe, ServiceSupervisor, SupervisorError, SupervisorMetrics, SupervisorReport,
    SupervisorSettings, SupervisorView,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Matrix,
    Validation,
}

type SupervisorTask = JoinHandle<(ServiceSupervisor, rmon_supervisor::Result<()>)>;

fn build_supervisor(
    config: &HarnessConfig,
    registry: SharedRegistry,
    crash_sink: Arc<dyn CrashSink>,
) -> Result<ServiceSupervisor> {
    let probe = Arc::new(HttpHealthProbe::new()?);
    let metrics = SupervisorMetrics::new(registry)?;
    let mut supervisor = ServiceSupervisor::new(SupervisorSettings::from(&config.supervisor), probe)
        .with_metrics(metrics)
        .with_crash_sink(crash_sink);
    for (name, service) in &config.services {
        supervisor.register(name.clone(), service.clone());
    }
    Ok(supervisor)
}

fn spawn_supervisor(mut supervisor: ServiceSupervisor, cancel: CancellationToken) -> SupervisorTask {
    tokio::spawn(async move {
        let outcome = supervisor.run(&cancel).await;
        (supervisor, outcome)
    })
}

fn start_metrics_server(config: &HarnessConfig, registry: SharedRegistry) -> Option<MetricsServer> {
    if !config.metrics.enabled {
        return None;
    }
    match spawn_http_server(registry, config.metrics.listen) {
        Ok(server) => {
            info!(address = %server.addr(), "metrics exporter enabled");
            Some(server)
        }
        Err(err) => {
            warn!(error = %err, "failed to start metrics exporter");
            None
        }
    }
}

/// Matrix or validation run: supervise, experiment, record, report.
///
/// The report is written even when the scheduler fails or the run is
/// cancelled; the scheduler error is returned afterwards.
pub async fn run(
    config: &HarnessConfig,
    mode: Mode,
    harness_metrics: HarnessMetrics,
    cancel: CancellationToken,
) -> Result<()> {
    let registry = harness_metrics.registry();
    let stamp = file_stamp(Local::now());
    let output_dir = config.output.directory.clone();
    let recorder = Arc::new(
        MetricsRecorder::create(&output_dir, &stamp)
            .with_context(|| format!("unable to create output files in {}", output_dir.display()))?,
    );
    info!(directory = %output_dir.display(), stamp = %stamp, ?mode, "run starting");
    let metrics_server = start_metrics_server(config, registry.clone());

    let supervise = config.supervisor.enabled && !config.services.is_empty();
    let supervisor_cancel = cancel.child_token();
    let mut view: Option<SupervisorView> = None;
    let supervisor_task = if supervise {
        let supervisor = build_supervisor(config, registry.clone(), recorder.clone())?;
        view = Some(supervisor.subscribe());
        Some(spawn_supervisor(supervisor, supervisor_cancel.clone()))
    } else {
        info!("service supervision disabled");
        None
    };

    let started = Instant::now();
    let outcome = run_scheduler(config, mode, registry, recorder.clone(), view, &cancel).await;
    harness_metrics.set_run_seconds(started.elapsed().as_secs_f64());
    match &outcome {
        Ok(summary) => info!(
            cycles = summary.cycles,
            closed = summary.experiments_closed,
            aborted = summary.experiments_aborted,
            injection_failures = summary.injection_failures,
            load_requests = summary.load_requests,
            cancelled = summary.cancelled,
            "run finished",
        ),
        Err(err) => error!(error = %format!("{err:#}"), "run failed; writing report from collected data"),
    }

    supervisor_cancel.cancel();
    let supervisor_report = match supervisor_task {
        Some(task) => join_supervisor(task).await,
        None => None,
    };

    if let Err(err) = recorder.flush() {
        error!(error = %err, "failed to flush recorder");
    }
    let paths = recorder.paths();
    let experiments = recorder.experiments();
    let input = ReportInput {
        stamp: &stamp,
        experiments: &experiments,
        services: &config.target.services,
        faults: &config.experiment.faults,
        run_duration: started.elapsed(),
        tally: recorder.tally(),
        supervisor: supervisor_report.as_ref(),
        data_files: vec![
            paths.experiment_log.clone(),
            paths.request_log.clone(),
            paths.crash_log.clone(),
        ],
    };
    let report = ReportGenerator::new(&output_dir).generate(&input);

    if let Some(server) = metrics_server {
        if let Err(err) = server.shutdown().await {
            warn!(error = %err, "metrics exporter shutdown failed");
        }
    }

    let files = report.context("failed to write final report")?;
    info!(report = %files.report.display(), "all data files written");
    outcome.map(|_| ())
}

async fn run_scheduler(
    config: &HarnessConfig,
    mode: Mode,
    registry: SharedRegistry,
    sink: Arc<dyn RecordSink>,
    view: Option<SupervisorView>,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    let chaos_metrics = ChaosMetrics::new(registry)?;
    let control = Arc::new(HttpChaosClient::new(&config.target)?);
    let sender = Arc::new(HttpTargetClient::new(&config.target)?);
    let load = LoadGenerator::new(sender, config.load.prompts.clone(), config.load.seed)?
        .with_metrics(chaos_metrics.clone());
    let mut scheduler = ExperimentScheduler::new(
        SchedulerSettings::from_config(config),
        config.experiment.faults.clone(),
        config.target.services.clone(),
        control,
        load,
        sink,
    )
    .with_metrics(chaos_metrics);
    if let Some(view) = view {
        scheduler = scheduler.with_view(view);
    }

    let summary = match mode {
        Mode::Matrix => {
            info!(
                cells = scheduler.matrix().len(),
                hours = config.experiment.duration_hours,
                "running fault-injection matrix"
            );
            scheduler.run_matrix(cancel).await?
        }
        Mode::Validation => {
            let suite = ValidationSuite::canonical(&config.suite, &config.target.services);
            info!(
                steps = suite.steps.len(),
                planned_secs = suite.planned_duration().as_secs(),
                "running validation suite"
            );
            scheduler.run_suite(&suite, cancel).await?
        }
    };
    Ok(summary)
}

async fn join_supervisor(task: SupervisorTask) -> Option<SupervisorReport> {
    match task.await {
        Ok((supervisor, outcome)) => {
            match outcome {
                Ok(()) => {}
                Err(SupervisorError::AllServicesFatal) => {
                    error!("supervisor stopped: every service is FATAL")
                }
                Err(err) => error!(error = %err, "supervisor stopped with an error"),
            }
            Some(supervisor.status_report())
        }
        Err(err) => {
            error!(error = %err, "supervisor task failed");
            None
        }
    }
}

/// Supervise configured services until cancelled.
pub async fn supervise(
    config: &HarnessConfig,
    registry: SharedRegistry,
    cancel: CancellationToken,
) -> Result<()> {
    if config.services.is_empty() {
        anyhow::bail!("no services configured under [services]");
    }
    let stamp = file_stamp(Local::now());
    let recorder = Arc::new(MetricsRecorder::create(&config.output.directory, &stamp)?);
    let metrics_server = start_metrics_server(config, registry.clone());

    let mut supervisor = build_supervisor(config, registry, recorder.clone())?;
    let outcome = supervisor.run(&cancel).await;
    info!(report = %supervisor.status_report().render(), "supervisor finished");
    recorder.flush()?;

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    outcome.map_err(Into::into)
}

/// Rebuild the report from a previously written experiment log.
pub fn regenerate_report(config: &HarnessConfig, experiment_log: &Path) -> Result<()> {
    let experiments = load_experiment_log(experiment_log)
        .with_context(|| format!("unable to read {}", experiment_log.display()))?;
    let stamp = file_stamp(Local::now());
    let input = ReportInput {
        stamp: &stamp,
        experiments: &experiments,
        services: &config.target.services,
        faults: &config.experiment.faults,
        run_duration: run_span(&experiments),
        tally: tally_from(&experiments),
        supervisor: None,
        data_files: vec![experiment_log.to_path_buf()],
    };
    let files = ReportGenerator::new(&config.output.directory).generate(&input)?;
    info!(
        experiments = experiments.len(),
        report = %files.report.display(),
        "report regenerated"
    );
    Ok(())
}

fn tally_from(experiments: &[ExperimentRecord]) -> RequestTally {
    let total = experiments.iter().map(|e| e.stats.total_requests).sum();
    RequestTally {
        total,
        successful: experiments.iter().map(|e| e.stats.successful_requests).sum(),
        experiment: total,
        load: 0,
        recovery: 0,
    }
}

fn run_span(experiments: &[ExperimentRecord]) -> std::time::Duration {
    let first = experiments.iter().map(|e| e.started_at).min();
    let last = experiments.iter().map(|e| e.ended_at).max();
    match (first, last) {
        (Some(first), Some(last)) => (last - first).to_std().unwrap_or_default(),
        _ => std::time::Duration::ZERO,
    }
}
