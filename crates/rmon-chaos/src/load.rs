//! ---
//! rmon_section: "07-resilience-fault-tolerance"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Paced and burst request patterns against the target."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rmon_common::pacing::{JitterHistogram, JitterSummary, Pacer};
use rmon_common::time::duration_to_millis;
use rmon_common::{CircuitState, RecordSink, RequestRecord, RunTag};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::ChaosMetrics;
use crate::target::{RequestOutcome, RequestSender};
use crate::{Result, SchedulerError};

/// Named request patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPattern {
    Steady,
    HighRate,
    RoundRobin,
    Burst,
}

impl LoadPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadPattern::Steady => "steady",
            LoadPattern::HighRate => "high_rate",
            LoadPattern::RoundRobin => "round_robin",
            LoadPattern::Burst => "burst",
        }
    }
}

/// How each request picks its target service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceSelector {
    Fixed(String),
    /// Seeded-random choice from the list.
    Random(Vec<String>),
    /// Deterministic cycle through the list, one service per request.
    RoundRobin(Vec<String>),
}

/// A paced (steady, high-rate or round-robin) run.
#[derive(Debug, Clone)]
pub struct PacedPlan {
    pub pattern: LoadPattern,
    pub tag: RunTag,
    pub selector: ServiceSelector,
    pub interval: Duration,
    pub window: Duration,
    /// Stop early after this many requests.
    pub max_requests: Option<u64>,
    /// Fault active on the target while this plan runs, recorded on every request.
    pub fault: Option<String>,
}

/// `bursts` rounds of `burst_size` concurrent requests through `workers` slots.
#[derive(Debug, Clone)]
pub struct BurstPlan {
    pub bursts: u32,
    pub burst_size: usize,
    pub workers: usize,
    pub inter_burst_delay: Duration,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub pattern: LoadPattern,
    pub sent: u64,
    pub succeeded: u64,
    /// The run ended because of cancellation rather than exhaustion.
    pub cancelled: bool,
    pub jitter: Option<JitterSummary>,
}

impl LoadSummary {
    pub fn success_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.sent as f64 * 100.0
        }
    }
}

/// What the generator is about to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub sequence: u64,
    pub service: String,
    pub prompt: String,
}

/// Receives every completed request of a paced run, in send order.
#[async_trait]
pub trait RequestObserver: Send {
    async fn on_complete(&mut self, record: RequestRecord) -> anyhow::Result<()>;
}

/// Observer that appends straight to a sink.
pub struct RecordingObserver {
    sink: Arc<dyn RecordSink>,
}

impl RecordingObserver {
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl RequestObserver for RecordingObserver {
    async fn on_complete(&mut self, record: RequestRecord) -> anyhow::Result<()> {
        self.sink.append_request(&record)
    }
}

/// Generates request streams against a [`RequestSender`].
pub struct LoadGenerator {
    sender: Arc<dyn RequestSender>,
    prompts: Arc<Vec<String>>,
    rng: Mutex<StdRng>,
    metrics: Option<ChaosMetrics>,
}

impl std::fmt::Debug for LoadGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadGenerator")
            .field("prompts", &self.prompts.len())
            .finish_non_exhaustive()
    }
}

impl LoadGenerator {
    pub fn new(sender: Arc<dyn RequestSender>, prompts: Vec<String>, seed: u64) -> Result<Self> {
        if prompts.is_empty() {
            return Err(SchedulerError::NoPrompts);
        }
        Ok(Self {
            sender,
            prompts: Arc::new(prompts),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: ChaosMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn next_dispatch(&self, selector: &ServiceSelector, sequence: u64) -> Dispatch {
        let mut rng = self.rng.lock();
        let service = match selector {
            ServiceSelector::Fixed(service) => service.clone(),
            ServiceSelector::Random(services) => services.choose(&mut *rng).cloned().unwrap_or_default(),
            ServiceSelector::RoundRobin(services) if services.is_empty() => String::new(),
            ServiceSelector::RoundRobin(services) => {
                services[(sequence % services.len() as u64) as usize].clone()
            }
        };
        let prompt = self.prompts.choose(&mut *rng).cloned().unwrap_or_default();
        Dispatch {
            sequence,
            service,
            prompt,
        }
    }

    /// Drift-corrected paced run: request `k` is due at `start + k * interval`.
    ///
    /// Cancellation is checked between requests only; an in-flight request
    /// always completes and is handed to the observer.
    pub async fn run_paced(
        &self,
        plan: &PacedPlan,
        cancel: &CancellationToken,
        observer: &mut dyn RequestObserver,
    ) -> Result<LoadSummary> {
        if plan.interval.is_zero() && !plan.window.is_zero() {
            return Err(SchedulerError::UnpacedLoad {
                tag: plan.tag.to_string(),
            });
        }
        let start = Instant::now();
        let deadline = start + plan.window;
        let mut pacer = Pacer::starting_at(start, plan.interval);
        let jitter = JitterHistogram::default();
        let mut summary = LoadSummary {
            pattern: plan.pattern,
            sent: 0,
            succeeded: 0,
            cancelled: false,
            jitter: None,
        };
        debug!(
            target: "rmon::chaos",
            pattern = plan.pattern.as_str(),
            tag = %plan.tag,
            interval_ms = duration_to_millis(plan.interval),
            window_secs = plan.window.as_secs_f64(),
            "paced load starting",
        );

        loop {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if plan.max_requests.map_or(false, |max| summary.sent >= max) {
                break;
            }
            let slot = pacer.next_slot(Instant::now());
            if slot >= deadline {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                _ = tokio::time::sleep_until(slot) => {}
            }
            jitter.record(Instant::now().saturating_duration_since(slot));

            let dispatch = self.next_dispatch(&plan.selector, summary.sent);
            let timestamp = Utc::now();
            let outcome = self.sender.send(&dispatch.service, &dispatch.prompt).await;
            summary.sent += 1;
            if outcome.success {
                summary.succeeded += 1;
            }
            if let Some(metrics) = &self.metrics {
                metrics.observe_request(&dispatch.service, &outcome);
            }
            let record = build_record(timestamp, plan.tag, plan.fault.clone(), dispatch, outcome);
            observer
                .on_complete(record)
                .await
                .map_err(SchedulerError::Sink)?;
        }

        summary.jitter = jitter.summary();
        Ok(summary)
    }

    /// Concurrent bursts through a bounded worker pool. Each burst is a barrier:
    /// all of its requests finish before the inter-burst delay starts.
    pub async fn run_burst(
        &self,
        plan: &BurstPlan,
        sink: Arc<dyn RecordSink>,
        cancel: &CancellationToken,
    ) -> Result<LoadSummary> {
        let pool = Arc::new(Semaphore::new(plan.workers.max(1)));
        let selector = ServiceSelector::Random(plan.services.clone());
        let mut summary = LoadSummary {
            pattern: LoadPattern::Burst,
            sent: 0,
            succeeded: 0,
            cancelled: false,
            jitter: None,
        };

        for burst in 1..=plan.bursts {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let tag = RunTag::LoadBurst(burst);
            info!(target: "rmon::chaos", burst, size = plan.burst_size, "burst starting");

            let mut workers = JoinSet::new();
            for _ in 0..plan.burst_size {
                let permit = pool.clone().acquire_owned().await?;
                let dispatch = self.next_dispatch(&selector, summary.sent);
                let sender = self.sender.clone();
                let sink = sink.clone();
                let metrics = self.metrics.clone();
                workers.spawn(async move {
                    let _permit = permit;
                    let timestamp = Utc::now();
                    let outcome = sender.send(&dispatch.service, &dispatch.prompt).await;
                    if let Some(metrics) = &metrics {
                        metrics.observe_request(&dispatch.service, &outcome);
                    }
                    let record = build_record(timestamp, tag, None, dispatch, outcome);
                    sink.append_request(&record).map(|()| record.success)
                });
            }
            while let Some(joined) = workers.join_next().await {
                let success = joined?.map_err(SchedulerError::Sink)?;
                summary.sent += 1;
                if success {
                    summary.succeeded += 1;
                }
            }

            if burst < plan.bursts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        summary.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(plan.inter_burst_delay) => {}
                }
            }
        }
        Ok(summary)
    }
}

fn build_record(
    timestamp: chrono::DateTime<Utc>,
    tag: RunTag,
    fault: Option<String>,
    dispatch: Dispatch,
    outcome: RequestOutcome,
) -> RequestRecord {
    RequestRecord {
        timestamp,
        tag,
        service: dispatch.service,
        fault,
        success: outcome.success,
        latency_ms: duration_to_millis(outcome.latency),
        error: outcome.error,
        circuit_state: CircuitState::Unknown,
        response_size: outcome.response_size,
        prompt: dispatch.prompt,
    }
}
