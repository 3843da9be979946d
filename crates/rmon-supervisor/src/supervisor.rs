//! ---
//! rmon_section: "02-process-supervision"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Tick-driven supervisor with bounded restart policy."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use rmon_common::{CrashEvent, CrashReason, CrashSink, ServiceConfig, SupervisorConfig};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::SupervisorMetrics;
use crate::port::port_in_use;
use crate::probe::{HealthProbe, HealthStatus};
use crate::process::ProcessHandle;
use crate::state::{ServiceLifecycle, ServiceSnapshot, SupervisorReport};
use crate::{Result, SupervisorError};

/// Runtime policy for the supervisor, usually derived from [`SupervisorConfig`].
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub check_interval: Duration,
    pub health_timeout: Duration,
    pub failure_threshold: u32,
    pub max_restarts: u32,
    pub termination_grace: Duration,
    pub startup_grace: Duration,
    pub crash_history: usize,
    pub status_report_every: u32,
    pub port_probe_timeout: Duration,
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            check_interval: config.check_interval,
            health_timeout: config.health_timeout,
            failure_threshold: config.failure_threshold.max(1),
            max_restarts: config.max_restarts,
            termination_grace: config.termination_grace,
            startup_grace: config.startup_grace,
            crash_history: config.crash_history,
            status_report_every: config.status_report_every,
            port_probe_timeout: Duration::from_secs(1),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

/// What `ensure_running` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Spawned { pid: Option<u32> },
    /// The port was already bound by a process the supervisor does not own.
    External,
}

/// Counters for a single `tick`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub checked: usize,
    pub healthy: usize,
    pub crashes: usize,
    pub restarts: usize,
    pub fatal: usize,
}

struct ServiceSlot {
    config: ServiceConfig,
    handle: Option<ProcessHandle>,
    snapshot: ServiceSnapshot,
    started: Option<Instant>,
}

/// Read-only view of supervisor state for other tasks.
#[derive(Debug, Clone)]
pub struct SupervisorView {
    rx: watch::Receiver<Vec<ServiceSnapshot>>,
}

impl SupervisorView {
    pub fn snapshots(&self) -> Vec<ServiceSnapshot> {
        self.rx.borrow().clone()
    }

    pub fn service(&self, name: &str) -> Option<ServiceSnapshot> {
        self.rx.borrow().iter().find(|s| s.name == name).cloned()
    }

    pub fn fatal_services(&self) -> Vec<String> {
        self.rx
            .borrow()
            .iter()
            .filter(|s| s.lifecycle == ServiceLifecycle::Fatal)
            .map(|s| s.name.clone())
            .collect()
    }

    /// True when every supervised service has passed a health check.
    pub fn all_healthy(&self) -> bool {
        self.rx
            .borrow()
            .iter()
            .all(|s| s.lifecycle == ServiceLifecycle::Healthy)
    }

    /// Wait for the next published change. Errors once the supervisor is gone.
    pub async fn changed(&mut self) -> std::result::Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }
}

/// Owns the supervised processes and their restart bookkeeping.
pub struct ServiceSupervisor {
    settings: SupervisorSettings,
    probe: Arc<dyn HealthProbe>,
    services: IndexMap<String, ServiceSlot>,
    crashes: VecDeque<CrashEvent>,
    crash_sink: Option<Arc<dyn CrashSink>>,
    metrics: Option<SupervisorMetrics>,
    started_at: chrono::DateTime<Utc>,
    started: Instant,
    view_tx: watch::Sender<Vec<ServiceSnapshot>>,
    ticks: u64,
}

impl std::fmt::Debug for ServiceSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSupervisor")
            .field("settings", &self.settings)
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

impl ServiceSupervisor {
    pub fn new(settings: SupervisorSettings, probe: Arc<dyn HealthProbe>) -> Self {
        let (view_tx, _) = watch::channel(Vec::new());
        Self {
            settings,
            probe,
            services: IndexMap::new(),
            crashes: VecDeque::new(),
            crash_sink: None,
            metrics: None,
            started_at: Utc::now(),
            started: Instant::now(),
            view_tx,
            ticks: 0,
        }
    }

    pub fn with_metrics(mut self, metrics: SupervisorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Persist every crash event through `sink` in addition to the in-memory history.
    pub fn with_crash_sink(mut self, sink: Arc<dyn CrashSink>) -> Self {
        self.crash_sink = Some(sink);
        self
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Track a service. It stays `STOPPED` until `start_all` or `ensure_running`.
    pub fn register(&mut self, name: impl Into<String>, config: ServiceConfig) {
        let name = name.into();
        debug!(target: "rmon::supervisor", service = %name, program = %config.command.program, "registered service");
        self.services.insert(
            name.clone(),
            ServiceSlot {
                config,
                handle: None,
                snapshot: ServiceSnapshot::new(name),
                started: None,
            },
        );
        self.publish();
    }

    pub fn subscribe(&self) -> SupervisorView {
        SupervisorView {
            rx: self.view_tx.subscribe(),
        }
    }

    /// Start every registered service that is not already running. A start
    /// failure is recorded as a crash; the next tick retries it under the cap.
    pub async fn start_all(&mut self) -> Result<()> {
        let names: Vec<String> = self.services.keys().cloned().collect();
        for name in names {
            let pending = self
                .services
                .get(&name)
                .map(|slot| slot.handle.is_none() && slot.snapshot.lifecycle == ServiceLifecycle::Stopped)
                .unwrap_or(false);
            if !pending {
                continue;
            }
            match self.ensure_running(&name).await {
                Ok(_) => {}
                Err(err @ SupervisorError::Spawn { .. }) => self.start_failed(&name, &err)?,
                Err(err) => return Err(err),
            }
        }
        self.publish();
        Ok(())
    }

    /// Make sure `name` has a live process: adopt an external listener on the
    /// service port, otherwise replace any stale owned process with a fresh one.
    pub async fn ensure_running(&mut self, name: &str) -> Result<StartOutcome> {
        let grace = self.settings.termination_grace;
        let port_timeout = self.settings.port_probe_timeout;
        let slot = self
            .services
            .get_mut(name)
            .ok_or_else(|| SupervisorError::UnknownService(name.to_owned()))?;

        if let Some(mut stale) = slot.handle.take() {
            if stale.poll_alive()? {
                info!(target: "rmon::supervisor", service = name, pid = ?stale.pid(), "terminating stale process");
                stale.shutdown(grace).await?;
            }
        }
        slot.snapshot.pid = None;

        if let Some(port) = slot.config.port {
            if port_in_use(&slot.config.host, port, port_timeout).await {
                info!(target: "rmon::supervisor", service = name, port, "port already bound; treating service as external");
                slot.snapshot.external = true;
                slot.snapshot.lifecycle = ServiceLifecycle::Starting;
                slot.snapshot.consecutive_failures = 0;
                slot.snapshot.started_at = Some(Utc::now());
                slot.started = Some(Instant::now());
                self.publish();
                return Ok(StartOutcome::External);
            }
        }

        let handle = ProcessHandle::spawn(name, &slot.config.command)?;
        let pid = handle.pid();
        info!(target: "rmon::supervisor", service = name, ?pid, "service starting");
        slot.handle = Some(handle);
        slot.snapshot.pid = pid;
        slot.snapshot.external = false;
        slot.snapshot.lifecycle = ServiceLifecycle::Starting;
        slot.snapshot.consecutive_failures = 0;
        slot.snapshot.started_at = Some(Utc::now());
        slot.started = Some(Instant::now());
        self.publish();
        Ok(StartOutcome::Spawned { pid })
    }

    /// One supervision pass over every non-FATAL service.
    ///
    /// All services are visited even when one of them fails; the first error
    /// (typically [`SupervisorError::RestartsExhausted`]) is returned afterwards.
    pub async fn tick(&mut self) -> Result<TickSummary> {
        let mut summary = TickSummary::default();
        let mut first_error = None;
        let names: Vec<String> = self.services.keys().cloned().collect();
        for name in names {
            if let Err(err) = self.check_service(&name, &mut summary).await {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        self.ticks += 1;
        self.publish();
        match first_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    async fn check_service(&mut self, name: &str, summary: &mut TickSummary) -> Result<()> {
        let (lifecycle, endpoint, exited) = {
            let Some(slot) = self.services.get_mut(name) else {
                return Err(SupervisorError::UnknownService(name.to_owned()));
            };
            let lifecycle = slot.snapshot.lifecycle;
            if lifecycle == ServiceLifecycle::Fatal {
                summary.fatal += 1;
                return Ok(());
            }
            if lifecycle == ServiceLifecycle::Stopped {
                return Ok(());
            }
            summary.checked += 1;

            let mut exited = None;
            if let Some(handle) = slot.handle.as_mut() {
                if !handle.poll_alive()? {
                    let code = handle.exit_code();
                    let diagnostics = handle.diagnostics().await;
                    exited = Some((code, diagnostics));
                }
            }
            (lifecycle, slot.config.health_url.clone(), exited)
        };

        if let Some((code, diagnostics)) = exited {
            if let Some(slot) = self.services.get_mut(name) {
                slot.handle = None;
                slot.snapshot.pid = None;
                slot.snapshot.lifecycle = ServiceLifecycle::Crashed;
                slot.snapshot.last_status = Some(match code {
                    Some(code) => format!("exited with code {code}"),
                    None => "terminated by signal".to_owned(),
                });
            }
            self.record_crash(name, CrashReason::ProcessExited { code }, diagnostics)?;
            summary.crashes += 1;
            return self.restart(name, summary).await;
        }

        if lifecycle == ServiceLifecycle::Crashed {
            return self.restart(name, summary).await;
        }

        let status = self
            .probe
            .check(&endpoint, self.settings.health_timeout)
            .await;
        let threshold = self.settings.failure_threshold;
        let startup_grace = self.settings.startup_grace;
        let Some(slot) = self.services.get_mut(name) else {
            return Ok(());
        };
        slot.snapshot.last_check = Some(Utc::now());
        slot.snapshot.last_status = Some(status.describe());

        let failure = match status {
            HealthStatus::Healthy => {
                if lifecycle != ServiceLifecycle::Healthy {
                    info!(target: "rmon::supervisor", service = name, "service healthy");
                }
                slot.snapshot.consecutive_failures = 0;
                slot.snapshot.lifecycle = ServiceLifecycle::Healthy;
                summary.healthy += 1;
                return Ok(());
            }
            HealthStatus::Unhealthy(failure) => failure,
        };

        if let Some(metrics) = &self.metrics {
            metrics.inc_health_failure(name, &failure);
        }

        let in_grace = lifecycle == ServiceLifecycle::Starting
            && slot.started.map_or(false, |at| at.elapsed() < startup_grace);
        if in_grace {
            debug!(target: "rmon::supervisor", service = name, reason = %failure, "health check failed during startup grace");
            return Ok(());
        }

        // Lifecycle holds until the threshold; a single miss is not UNHEALTHY.
        slot.snapshot.consecutive_failures += 1;
        let failures = slot.snapshot.consecutive_failures;
        warn!(
            target: "rmon::supervisor",
            service = name,
            failures,
            threshold,
            reason = %failure,
            "health check failed",
        );
        if failures < threshold {
            return Ok(());
        }

        slot.snapshot.lifecycle = ServiceLifecycle::Unhealthy;
        let diagnostics = slot
            .handle
            .as_ref()
            .map(ProcessHandle::recent_output)
            .unwrap_or_default();
        self.publish();
        self.record_crash(
            name,
            CrashReason::HealthCheckExhausted {
                failures,
                last_reason: failure.to_string(),
            },
            diagnostics,
        )?;
        summary.crashes += 1;
        self.restart(name, summary).await
    }

    /// Restart under the cap. Past the cap the service becomes FATAL and any
    /// process still owned for it is terminated.
    async fn restart(&mut self, name: &str, summary: &mut TickSummary) -> Result<()> {
        let max = self.settings.max_restarts;
        let grace = self.settings.termination_grace;
        let slot = self
            .services
            .get_mut(name)
            .ok_or_else(|| SupervisorError::UnknownService(name.to_owned()))?;

        if slot.snapshot.restart_count >= max {
            slot.snapshot.lifecycle = ServiceLifecycle::Fatal;
            slot.snapshot.pid = None;
            let attempts = slot.snapshot.restart_count;
            if let Some(mut handle) = slot.handle.take() {
                if let Err(err) = handle.shutdown(grace).await {
                    warn!(target: "rmon::supervisor", service = name, error = %err, "failed to stop process of fatal service");
                }
            }
            summary.fatal += 1;
            error!(target: "rmon::supervisor", service = name, attempts, "restart cap exhausted; service is FATAL");
            self.publish();
            return Err(SupervisorError::RestartsExhausted {
                service: name.to_owned(),
                attempts,
            });
        }

        slot.snapshot.restart_count += 1;
        let attempt = slot.snapshot.restart_count;
        info!(target: "rmon::supervisor", service = name, attempt, max, "restarting service");
        if let Some(metrics) = &self.metrics {
            metrics.inc_restart(name);
        }
        summary.restarts += 1;

        match self.ensure_running(name).await {
            Ok(_) => Ok(()),
            Err(err @ SupervisorError::Spawn { .. }) => self.start_failed(name, &err),
            Err(err) => Err(err),
        }
    }

    fn start_failed(&mut self, name: &str, err: &SupervisorError) -> Result<()> {
        if let Some(slot) = self.services.get_mut(name) {
            slot.handle = None;
            slot.snapshot.pid = None;
            slot.snapshot.lifecycle = ServiceLifecycle::Crashed;
            slot.snapshot.last_status = Some(err.to_string());
        }
        self.record_crash(
            name,
            CrashReason::StartFailed {
                error: err.to_string(),
            },
            String::new(),
        )
    }

    fn record_crash(&mut self, name: &str, reason: CrashReason, diagnostics: String) -> Result<()> {
        let event = CrashEvent {
            timestamp: Utc::now(),
            service: name.to_owned(),
            reason,
            diagnostics,
        };
        error!(
            target: "rmon::supervisor",
            service = name,
            reason = %event.reason,
            diagnostics = %event.diagnostics,
            "service crashed",
        );
        if let Some(sink) = &self.crash_sink {
            sink.append_crash(&event)
                .map_err(|err| SupervisorError::CrashLog {
                    service: name.to_owned(),
                    reason: format!("{err:#}"),
                })?;
        }
        if self.crashes.len() >= self.settings.crash_history.max(1) {
            self.crashes.pop_front();
        }
        self.crashes.push_back(event);
        Ok(())
    }

    fn publish(&self) {
        let snapshots = self.snapshots();
        if let Some(metrics) = &self.metrics {
            for snapshot in &snapshots {
                metrics.set_state(&snapshot.name, snapshot.lifecycle);
            }
        }
        self.view_tx.send_replace(snapshots);
    }

    pub fn snapshots(&self) -> Vec<ServiceSnapshot> {
        self.services
            .values()
            .map(|slot| slot.snapshot.clone())
            .collect()
    }

    pub fn snapshot(&self, name: &str) -> Option<ServiceSnapshot> {
        self.services.get(name).map(|slot| slot.snapshot.clone())
    }

    /// Most recent crashes, oldest first, bounded by `crash_history`.
    pub fn crash_events(&self) -> Vec<CrashEvent> {
        self.crashes.iter().cloned().collect()
    }

    fn all_fatal(&self) -> bool {
        !self.services.is_empty()
            && self
                .services
                .values()
                .all(|slot| slot.snapshot.lifecycle == ServiceLifecycle::Fatal)
    }

    pub fn status_report(&self) -> SupervisorReport {
        SupervisorReport {
            started_at: self.started_at,
            uptime: self.started.elapsed(),
            services: self.snapshots(),
            recent_crashes: self.crash_events(),
        }
    }

    /// Start everything, then tick at `check_interval` until `cancel` fires or
    /// every service is FATAL. Owned processes are terminated on the way out.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        info!(
            target: "rmon::supervisor",
            services = self.services.len(),
            interval_secs = self.settings.check_interval.as_secs_f64(),
            "supervisor starting",
        );
        if let Err(err) = self.start_all().await {
            self.shutdown().await;
            return Err(err);
        }

        let mut interval = tokio::time::interval(self.settings.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        let every = u64::from(self.settings.status_report_every);
        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = interval.tick() => {}
            }
            match self.tick().await {
                Ok(_) | Err(SupervisorError::RestartsExhausted { .. }) => {}
                Err(err @ SupervisorError::CrashLog { .. }) => break Err(err),
                Err(err) => {
                    warn!(target: "rmon::supervisor", error = %err, "supervisor tick failed");
                }
            }
            if self.all_fatal() {
                error!(target: "rmon::supervisor", "every supervised service is FATAL");
                break Err(SupervisorError::AllServicesFatal);
            }
            if every > 0 && self.ticks % every == 0 {
                info!(target: "rmon::supervisor", report = %self.status_report().render(), "supervisor status");
            }
        };

        self.shutdown().await;
        outcome
    }

    /// Terminate every owned process. FATAL services keep their state.
    pub async fn shutdown(&mut self) {
        let grace = self.settings.termination_grace;
        for (name, slot) in self.services.iter_mut() {
            if let Some(mut handle) = slot.handle.take() {
                match handle.shutdown(grace).await {
                    Ok(code) => {
                        info!(target: "rmon::supervisor", service = %name, ?code, "service stopped")
                    }
                    Err(err) => {
                        warn!(target: "rmon::supervisor", service = %name, error = %err, "failed to stop service")
                    }
                }
            }
            slot.snapshot.pid = None;
            if slot.snapshot.lifecycle != ServiceLifecycle::Fatal {
                slot.snapshot.lifecycle = ServiceLifecycle::Stopped;
            }
        }
        self.publish();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::probe::ProbeFailure;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rmon_common::{CommandConfig, MemorySink};

    #[derive(Default)]
    struct ScriptedProbe {
        script: Mutex<VecDeque<HealthStatus>>,
    }

    impl ScriptedProbe {
        fn with(statuses: Vec<HealthStatus>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(statuses.into()),
            })
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn check(&self, _endpoint: &str, _timeout: Duration) -> HealthStatus {
            self.script.lock().pop_front().unwrap_or(HealthStatus::Healthy)
        }
    }

    fn refused() -> HealthStatus {
        HealthStatus::Unhealthy(ProbeFailure::ConnectionRefused)
    }

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            check_interval: Duration::from_millis(50),
            health_timeout: Duration::from_millis(100),
            failure_threshold: 3,
            max_restarts: 3,
            termination_grace: Duration::from_secs(2),
            startup_grace: Duration::ZERO,
            crash_history: 10,
            status_report_every: 0,
            port_probe_timeout: Duration::from_millis(200),
        }
    }

    fn service(script: &str) -> ServiceConfig {
        ServiceConfig::new(
            CommandConfig::new("sh", &["-c", script]),
            "http://127.0.0.1:9/test",
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn always_crashing_service_is_restarted_exactly_cap_times() {
        let sink = Arc::new(MemorySink::default());
        let mut supervisor = ServiceSupervisor::new(settings(), ScriptedProbe::with(vec![]))
            .with_crash_sink(sink.clone());
        supervisor.register("flaky", service("echo starting; exit 1"));
        supervisor.start_all().await.unwrap();

        let mut results = Vec::new();
        for _ in 0..6 {
            settle().await;
            results.push(supervisor.tick().await);
        }

        assert!(results[..3].iter().all(|r| r.is_ok()));
        assert!(matches!(
            results[3],
            Err(SupervisorError::RestartsExhausted { attempts: 3, .. })
        ));
        assert_eq!(results[4].as_ref().unwrap().fatal, 1);
        assert_eq!(results[5].as_ref().unwrap().restarts, 0);

        let snapshot = supervisor.snapshot("flaky").unwrap();
        assert_eq!(snapshot.restart_count, 3);
        assert_eq!(snapshot.lifecycle, ServiceLifecycle::Fatal);

        let crashes = sink.crashes();
        assert_eq!(crashes.len(), 4);
        assert_eq!(crashes[0].reason, CrashReason::ProcessExited { code: Some(1) });
        assert!(crashes[0].diagnostics.contains("starting"));
    }

    /// Crash sink that notes the published lifecycle when each crash lands.
    #[derive(Default)]
    struct LifecycleAtCrash {
        view: Mutex<Option<SupervisorView>>,
        seen: Mutex<Vec<ServiceLifecycle>>,
    }

    impl CrashSink for LifecycleAtCrash {
        fn append_crash(&self, event: &CrashEvent) -> anyhow::Result<()> {
            if let Some(snapshot) = self
                .view
                .lock()
                .as_ref()
                .and_then(|view| view.service(&event.service))
            {
                self.seen.lock().push(snapshot.lifecycle);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn health_failures_force_restart_at_threshold() {
        let probe = ScriptedProbe::with(vec![
            HealthStatus::Healthy,
            refused(),
            refused(),
            refused(),
        ]);
        let sink = Arc::new(LifecycleAtCrash::default());
        let mut supervisor =
            ServiceSupervisor::new(settings(), probe).with_crash_sink(sink.clone());
        let view = supervisor.subscribe();
        *sink.view.lock() = Some(supervisor.subscribe());
        supervisor.register("api", service("exec sleep 30"));
        supervisor.start_all().await.unwrap();
        let first_pid = supervisor.snapshot("api").unwrap().pid;

        supervisor.tick().await.unwrap();
        let snapshot = supervisor.snapshot("api").unwrap();
        assert_eq!(snapshot.lifecycle, ServiceLifecycle::Healthy);

        for failures in 1..=2 {
            supervisor.tick().await.unwrap();
            let snapshot = supervisor.snapshot("api").unwrap();
            assert_eq!(snapshot.consecutive_failures, failures);
            assert_eq!(snapshot.lifecycle, ServiceLifecycle::Healthy);
            assert_eq!(snapshot.restart_count, 0);
        }
        assert!(view.all_healthy());

        let summary = supervisor.tick().await.unwrap();
        assert_eq!(*sink.seen.lock(), vec![ServiceLifecycle::Unhealthy]);
        assert_eq!(summary.crashes, 1);
        assert_eq!(summary.restarts, 1);
        let snapshot = supervisor.snapshot("api").unwrap();
        assert_eq!(snapshot.lifecycle, ServiceLifecycle::Starting);
        assert_ne!(snapshot.pid, first_pid);
        assert!(matches!(
            supervisor.crash_events()[0].reason,
            CrashReason::HealthCheckExhausted { failures: 3, .. }
        ));

        supervisor.tick().await.unwrap();
        let snapshot = supervisor.snapshot("api").unwrap();
        assert_eq!(snapshot.lifecycle, ServiceLifecycle::Healthy);
        assert_eq!(snapshot.consecutive_failures, 0);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn single_success_resets_failure_counter() {
        let probe = ScriptedProbe::with(vec![
            refused(),
            HealthStatus::Unhealthy(ProbeFailure::Timeout(Duration::from_secs(5))),
            HealthStatus::Healthy,
            HealthStatus::Unhealthy(ProbeFailure::Status(503)),
        ]);
        let mut supervisor = ServiceSupervisor::new(settings(), probe);
        supervisor.register("api", service("exec sleep 30"));
        supervisor.start_all().await.unwrap();
        for _ in 0..4 {
            supervisor.tick().await.unwrap();
        }
        let snapshot = supervisor.snapshot("api").unwrap();
        assert_eq!(snapshot.consecutive_failures, 1);
        assert_eq!(snapshot.restart_count, 0);
        assert_eq!(snapshot.last_status.as_deref(), Some("HTTP 503"));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn startup_grace_does_not_count_failures() {
        let probe = ScriptedProbe::with(vec![refused(); 5]);
        let mut settings = settings();
        settings.startup_grace = Duration::from_secs(60);
        let mut supervisor = ServiceSupervisor::new(settings, probe);
        supervisor.register("api", service("exec sleep 30"));
        supervisor.start_all().await.unwrap();
        for _ in 0..5 {
            supervisor.tick().await.unwrap();
        }
        let snapshot = supervisor.snapshot("api").unwrap();
        assert_eq!(snapshot.lifecycle, ServiceLifecycle::Starting);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.last_status.as_deref(), Some("Connection refused"));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn occupied_port_is_treated_as_external() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut config = service("exit 1");
        config.port = Some(port);

        let mut supervisor = ServiceSupervisor::new(settings(), ScriptedProbe::with(vec![]));
        supervisor.register("web", config);
        let view = supervisor.subscribe();
        let outcome = supervisor.ensure_running("web").await.unwrap();
        assert_eq!(outcome, StartOutcome::External);

        let snapshot = view.service("web").unwrap();
        assert!(snapshot.external);
        assert_eq!(snapshot.pid, None);
        supervisor.tick().await.unwrap();
        assert!(view.all_healthy());
    }

    #[tokio::test]
    async fn unknown_program_is_recorded_as_start_failure() {
        let sink = Arc::new(MemorySink::default());
        let mut supervisor = ServiceSupervisor::new(settings(), ScriptedProbe::with(vec![]))
            .with_crash_sink(sink.clone());
        supervisor.register(
            "ghost",
            ServiceConfig::new(CommandConfig::new("/nonexistent/rmon-ghost", &[]), "http://127.0.0.1:9/"),
        );
        supervisor.start_all().await.unwrap();
        assert_eq!(
            supervisor.snapshot("ghost").unwrap().lifecycle,
            ServiceLifecycle::Crashed
        );
        assert!(matches!(sink.crashes()[0].reason, CrashReason::StartFailed { .. }));

        supervisor.tick().await.unwrap();
        assert_eq!(supervisor.snapshot("ghost").unwrap().restart_count, 1);
    }

    #[tokio::test]
    async fn run_terminates_processes_on_cancel() {
        let mut supervisor = ServiceSupervisor::new(settings(), ScriptedProbe::with(vec![]));
        supervisor.register("api", service("exec sleep 30"));
        let view = supervisor.subscribe();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let result = supervisor.run(&token).await;
            (supervisor, result)
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(view.service("api").unwrap().lifecycle, ServiceLifecycle::Healthy);
        cancel.cancel();
        let (supervisor, result) = task.await.unwrap();
        result.unwrap();
        let snapshot = supervisor.snapshot("api").unwrap();
        assert_eq!(snapshot.lifecycle, ServiceLifecycle::Stopped);
        assert_eq!(snapshot.pid, None);
    }

    #[tokio::test]
    async fn run_exits_when_every_service_is_fatal() {
        let mut settings = settings();
        settings.max_restarts = 1;
        let mut supervisor = ServiceSupervisor::new(settings, ScriptedProbe::with(vec![]));
        supervisor.register("flaky", service("exit 2"));
        let cancel = CancellationToken::new();
        let result = tokio::time::timeout(Duration::from_secs(10), supervisor.run(&cancel))
            .await
            .expect("supervisor loop should end");
        assert!(matches!(result, Err(SupervisorError::AllServicesFatal)));
        let report = supervisor.status_report();
        assert_eq!(report.fatal_services(), vec!["flaky"]);
        assert_eq!(report.recent_crashes.len(), 2);
    }
}
