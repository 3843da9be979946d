//! ---
//! rmon_section: "07-resilience-fault-tolerance"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Experiment matrix driver: inject, load, stop, recover, record."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use rmon_common::{FaultConfig, HarnessConfig, RecordSink, RequestRecord, RunTag};
use rmon_supervisor::SupervisorView;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::ChaosControl;
use crate::experiment::{Experiment, ExperimentCell, ExperimentPhase};
use crate::load::{LoadGenerator, LoadPattern, PacedPlan, RecordingObserver, RequestObserver, ServiceSelector};
use crate::metrics::ChaosMetrics;
use crate::suite::{SuiteStep, ValidationSuite};
use crate::{Result, SchedulerError};

/// Timing knobs for the scheduler, usually taken from [`HarnessConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub fault_window: Duration,
    pub cooldown: Duration,
    pub normal_period: Duration,
    pub normal_requests: u32,
    pub pacing_interval: Duration,
    pub recovery_load: bool,
    pub recovery_interval: Duration,
    pub run_duration: Duration,
    pub max_cycles: Option<u32>,
    pub max_injection_failures: u32,
    pub ready_timeout: Duration,
    pub ready_poll: Duration,
    /// Log experiment progress every N requests.
    pub progress_every: u64,
}

impl SchedulerSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        let experiment = &config.experiment;
        Self {
            fault_window: experiment.fault_window,
            cooldown: experiment.cooldown,
            normal_period: experiment.normal_period,
            normal_requests: experiment.normal_requests,
            pacing_interval: experiment.pacing_interval(),
            recovery_load: experiment.recovery_load,
            recovery_interval: experiment.recovery_interval,
            run_duration: config.run_duration(),
            max_cycles: experiment.max_cycles,
            max_injection_failures: experiment.max_consecutive_injection_failures,
            ready_timeout: config.target.ready_timeout,
            ready_poll: experiment.ready_poll,
            progress_every: experiment.progress_every,
        }
    }

    fn cell_timing(&self) -> CellTiming {
        CellTiming {
            window: self.fault_window,
            interval: self.pacing_interval,
            cooldown: self.cooldown,
        }
    }
}

/// Fault window, request interval and recovery window of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellTiming {
    pub window: Duration,
    pub interval: Duration,
    pub cooldown: Duration,
}

/// Totals for one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub cycles: u32,
    pub experiments_closed: u64,
    pub experiments_aborted: u64,
    pub injection_failures: u64,
    pub load_requests: u64,
    pub cancelled: bool,
}

/// Forwards fault-window requests to the sink and the open experiment,
/// polling circuit state after each one.
struct ExperimentObserver<'a> {
    experiment: &'a mut Experiment,
    control: &'a dyn ChaosControl,
    sink: &'a dyn RecordSink,
    metrics: Option<&'a ChaosMetrics>,
    progress_every: u64,
}

#[async_trait]
impl<'a> RequestObserver for ExperimentObserver<'a> {
    async fn on_complete(&mut self, mut record: RequestRecord) -> anyhow::Result<()> {
        let state = self.control.status().await.state(&record.service);
        record.circuit_state = state;
        if self.experiment.observe_circuit(state) {
            warn!(
                target: "rmon::chaos",
                experiment = self.experiment.id(),
                service = %record.service,
                "circuit breaker opened",
            );
            if let Some(metrics) = self.metrics {
                metrics.inc_circuit_trip(&record.service);
            }
        }
        self.sink.append_request(&record)?;
        self.experiment.record(record);

        let count = self.experiment.records().len() as u64;
        if self.progress_every > 0 && count % self.progress_every == 0 {
            info!(
                target: "rmon::chaos",
                experiment = self.experiment.id(),
                requests = count,
                success_rate = self.experiment.success_rate(),
                trips = self.experiment.trips(),
                "experiment progress",
            );
        }
        Ok(())
    }
}

/// Drives the fault matrix (or the validation suite) against the target.
pub struct ExperimentScheduler {
    settings: SchedulerSettings,
    faults: IndexMap<String, FaultConfig>,
    services: Vec<String>,
    control: Arc<dyn ChaosControl>,
    load: LoadGenerator,
    sink: Arc<dyn RecordSink>,
    view: Option<SupervisorView>,
    metrics: Option<ChaosMetrics>,
    next_id: u64,
    injection_failures: u32,
}

impl std::fmt::Debug for ExperimentScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentScheduler")
            .field("settings", &self.settings)
            .field("services", &self.services)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl ExperimentScheduler {
    pub fn new(
        settings: SchedulerSettings,
        faults: IndexMap<String, FaultConfig>,
        services: Vec<String>,
        control: Arc<dyn ChaosControl>,
        load: LoadGenerator,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            settings,
            faults,
            services,
            control,
            load,
            sink,
            view: None,
            metrics: None,
            next_id: 1,
            injection_failures: 0,
        }
    }

    /// Refuse to run while any supervised service is FATAL.
    pub fn with_view(mut self, view: SupervisorView) -> Self {
        self.view = Some(view);
        self
    }

    pub fn with_metrics(mut self, metrics: ChaosMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cells in enumeration order: fault types as configured, then
    /// intensities, then services.
    pub fn matrix(&self) -> Vec<ExperimentCell> {
        self.faults
            .iter()
            .flat_map(|(fault, spec)| {
                spec.intensities.iter().flat_map(move |intensity| {
                    self.services
                        .iter()
                        .map(move |service| ExperimentCell::new(fault.clone(), *intensity, service.clone()))
                })
            })
            .collect()
    }

    fn check_supervision(&self) -> Result<()> {
        if let Some(view) = &self.view {
            let fatal = view.fatal_services();
            if !fatal.is_empty() {
                return Err(SchedulerError::ServiceFatal(fatal.join(", ")));
            }
        }
        Ok(())
    }

    /// Poll the target until it is healthy. `Ok(false)` means cancelled.
    pub async fn wait_until_ready(&self, cancel: &CancellationToken) -> Result<bool> {
        let started = Instant::now();
        loop {
            self.check_supervision()?;
            let status = self.control.health().await;
            if status.is_healthy() {
                info!(target: "rmon::chaos", waited_secs = started.elapsed().as_secs_f64(), "target healthy");
                return Ok(true);
            }
            let waited = started.elapsed();
            if waited >= self.settings.ready_timeout {
                return Err(SchedulerError::TargetUnavailable {
                    waited,
                    reason: status.describe(),
                });
            }
            info!(target: "rmon::chaos", reason = %status.describe(), "waiting for target");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.settings.ready_poll) => {}
            }
        }
    }

    /// Repeat the matrix until the run duration elapses, `max_cycles` is
    /// reached, or `cancel` fires. A normal-load period separates cells.
    pub async fn run_matrix(&mut self, cancel: &CancellationToken) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        if !self.wait_until_ready(cancel).await? {
            summary.cancelled = true;
            return Ok(summary);
        }
        let cells = self.matrix();
        if cells.is_empty() {
            warn!(target: "rmon::chaos", "experiment matrix is empty");
            return Ok(summary);
        }
        let deadline = Instant::now() + self.settings.run_duration;
        let timing = self.settings.cell_timing();
        info!(
            target: "rmon::chaos",
            cells = cells.len(),
            run_secs = self.settings.run_duration.as_secs_f64(),
            "experiment matrix starting",
        );

        'cycles: loop {
            if self.settings.max_cycles.map_or(false, |max| summary.cycles >= max) {
                break;
            }
            summary.cycles += 1;
            info!(target: "rmon::chaos", cycle = summary.cycles, "matrix cycle starting");

            for cell in &cells {
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    break 'cycles;
                }
                if Instant::now() >= deadline {
                    info!(target: "rmon::chaos", "run duration elapsed");
                    break 'cycles;
                }
                self.check_supervision()?;
                self.run_cell(cell, timing, cancel, &mut summary).await?;
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    break 'cycles;
                }

                let normal = self.normal_plan();
                let mut observer = RecordingObserver::new(self.sink.clone());
                let load = self.load.run_paced(&normal, cancel, &mut observer).await?;
                summary.load_requests += load.sent;
                if load.cancelled {
                    summary.cancelled = true;
                    break 'cycles;
                }
            }
        }
        Ok(summary)
    }

    fn normal_plan(&self) -> PacedPlan {
        let requests = self.settings.normal_requests.max(1);
        PacedPlan {
            pattern: LoadPattern::Steady,
            tag: RunTag::Normal,
            selector: ServiceSelector::Random(self.services.clone()),
            interval: self.settings.normal_period / requests,
            window: self.settings.normal_period,
            max_requests: Some(u64::from(requests)),
            fault: None,
        }
    }

    /// Run the canonical validation sequence. Chaos steps are full experiments.
    pub async fn run_suite(
        &mut self,
        suite: &ValidationSuite,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        if !self.wait_until_ready(cancel).await? {
            summary.cancelled = true;
            return Ok(summary);
        }
        summary.cycles = 1;
        for (index, step) in suite.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            info!(target: "rmon::chaos", step = index + 1, total = suite.steps.len(), name = %step.label(), "validation step");
            let cancelled = match step {
                SuiteStep::Load(plan) => {
                    let mut observer = RecordingObserver::new(self.sink.clone());
                    let load = self.load.run_paced(plan, cancel, &mut observer).await?;
                    summary.load_requests += load.sent;
                    info!(
                        target: "rmon::chaos",
                        pattern = plan.pattern.as_str(),
                        sent = load.sent,
                        success_rate = load.success_rate(),
                        jitter_ms = load.jitter.as_ref().map(|j| j.mean_ms).unwrap_or_default(),
                        "load step finished",
                    );
                    load.cancelled
                }
                SuiteStep::Burst(plan) => {
                    let load = self.load.run_burst(plan, self.sink.clone(), cancel).await?;
                    summary.load_requests += load.sent;
                    load.cancelled
                }
                SuiteStep::Cooldown(duration) => {
                    tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(*duration) => false,
                    }
                }
                SuiteStep::Chaos { cell, timing } => {
                    self.check_supervision()?;
                    self.run_cell(cell, *timing, cancel, &mut summary).await?;
                    cancel.is_cancelled()
                }
            };
            if cancelled {
                summary.cancelled = true;
                break;
            }
        }
        Ok(summary)
    }

    /// One matrix cell: inject, paced load under the fault, stop exactly once,
    /// recover, and record.
    pub async fn run_cell(
        &mut self,
        cell: &ExperimentCell,
        timing: CellTiming,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let id = self.next_id;
        self.next_id += 1;
        let mut experiment = Experiment::new(id, cell.clone(), timing.window);
        info!(
            target: "rmon::chaos",
            experiment = id,
            fault = %cell.fault,
            intensity = cell.intensity,
            service = %cell.service,
            window_secs = timing.window.as_secs_f64(),
            "experiment starting",
        );

        experiment.transition(ExperimentPhase::Injecting)?;
        let injected = self
            .control
            .inject(&cell.service, &cell.fault, cell.intensity, timing.window)
            .await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_injection(&cell.fault, injected.is_ok());
        }
        if let Err(err) = injected {
            self.injection_failures += 1;
            summary.injection_failures += 1;
            summary.experiments_aborted += 1;
            let _ = experiment.abort(err.to_string());
            warn!(
                target: "rmon::chaos",
                experiment = id,
                error = %err,
                consecutive = self.injection_failures,
                "fault injection failed; skipping experiment",
            );
            if self.injection_failures >= self.settings.max_injection_failures {
                return Err(SchedulerError::InjectionFailuresExhausted {
                    failures: self.injection_failures,
                    last: err.to_string(),
                });
            }
            return Ok(());
        }
        self.injection_failures = 0;

        experiment.transition(ExperimentPhase::Running)?;
        let plan = PacedPlan {
            pattern: LoadPattern::Steady,
            tag: RunTag::Experiment(id),
            selector: ServiceSelector::Fixed(cell.service.clone()),
            interval: timing.interval,
            window: timing.window,
            max_requests: None,
            fault: Some(cell.fault.clone()),
        };
        let load = {
            let mut observer = ExperimentObserver {
                experiment: &mut experiment,
                control: self.control.as_ref(),
                sink: self.sink.as_ref(),
                metrics: self.metrics.as_ref(),
                progress_every: self.settings.progress_every,
            };
            self.load.run_paced(&plan, cancel, &mut observer).await
        };

        experiment.transition(ExperimentPhase::Stopping)?;
        if let Err(err) = self.control.stop(&cell.service).await {
            warn!(target: "rmon::chaos", experiment = id, service = %cell.service, error = %err, "failed to stop fault");
        }

        let load = match load {
            Ok(load) => load,
            Err(err) => {
                let record = experiment.abort(err.to_string());
                summary.experiments_aborted += 1;
                self.sink.append_experiment(&record).map_err(|sink_err| {
                    SchedulerError::Sink(
                        sink_err.context(format!("recording experiment {id} aborted by: {err}")),
                    )
                })?;
                return Err(err);
            }
        };
        if load.cancelled {
            return self.record_abort(experiment, "cancelled during fault window", summary);
        }

        experiment.transition(ExperimentPhase::Recovering)?;
        let recovery_started = Instant::now();
        let cancelled = if self.settings.recovery_load {
            let plan = PacedPlan {
                pattern: LoadPattern::Steady,
                tag: RunTag::Recovery(id),
                selector: ServiceSelector::Fixed(cell.service.clone()),
                interval: self.settings.recovery_interval,
                window: timing.cooldown,
                max_requests: None,
                fault: None,
            };
            let mut observer = RecordingObserver::new(self.sink.clone());
            let recovery = self.load.run_paced(&plan, cancel, &mut observer).await?;
            summary.load_requests += recovery.sent;
            recovery.cancelled
        } else {
            tokio::select! {
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(timing.cooldown) => false,
            }
        };
        if cancelled {
            return self.record_abort(experiment, "cancelled during recovery", summary);
        }

        let record = experiment.close(recovery_started.elapsed())?;
        self.sink
            .append_experiment(&record)
            .map_err(SchedulerError::Sink)?;
        summary.experiments_closed += 1;
        info!(
            target: "rmon::chaos",
            experiment = id,
            fault = %record.fault,
            intensity = record.intensity,
            service = %record.service,
            requests = record.stats.total_requests,
            success_rate = record.stats.success_rate,
            avg_latency_ms = record.stats.avg_latency_ms,
            trips = record.stats.circuit_breaker_trips,
            recovery_secs = record.stats.recovery_secs,
            "experiment closed",
        );
        Ok(())
    }

    fn record_abort(
        &self,
        experiment: Experiment,
        reason: &str,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let id = experiment.id();
        let record = experiment.abort(reason);
        warn!(
            target: "rmon::chaos",
            experiment = id,
            requests = record.stats.total_requests,
            reason,
            "experiment aborted",
        );
        summary.experiments_aborted += 1;
        self.sink
            .append_experiment(&record)
            .map_err(SchedulerError::Sink)
    }
}
