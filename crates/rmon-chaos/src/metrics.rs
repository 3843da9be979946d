//! ---
//! rmon_section: "07-resilience-fault-tolerance"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Prometheus families published by experiments and load runs."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use anyhow::Result;
use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, Opts};
use rmon_metrics::SharedRegistry;

use crate::target::RequestOutcome;

/// Metrics published by the chaos subsystem.
#[derive(Clone)]
pub struct ChaosMetrics {
    registry: SharedRegistry,
    injections_total: IntCounterVec,
    requests_total: IntCounterVec,
    request_latency_seconds: HistogramVec,
    circuit_trips_total: IntCounterVec,
}

impl std::fmt::Debug for ChaosMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosMetrics").finish_non_exhaustive()
    }
}

impl ChaosMetrics {
    /// Register the chaos metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let injections_total = IntCounterVec::new(
            Opts::new(
                "rmon_chaos_injections_total",
                "Fault injection attempts grouped by fault type and outcome",
            ),
            &["fault", "outcome"],
        )?;
        registry.register(Box::new(injections_total.clone()))?;

        let requests_total = IntCounterVec::new(
            Opts::new(
                "rmon_chaos_requests_total",
                "Requests sent to the target grouped by service and outcome",
            ),
            &["service", "outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "rmon_chaos_request_latency_seconds",
            "Observed request latency against the target",
        )
        .buckets(prometheus::exponential_buckets(0.01, 2.0, 14)?);
        let request_latency_seconds = HistogramVec::new(histogram_opts, &["service"])?;
        registry.register(Box::new(request_latency_seconds.clone()))?;

        let circuit_trips_total = IntCounterVec::new(
            Opts::new(
                "rmon_chaos_circuit_trips_total",
                "CLOSED to OPEN circuit-breaker transitions observed during experiments",
            ),
            &["service"],
        )?;
        registry.register(Box::new(circuit_trips_total.clone()))?;

        Ok(Self {
            registry,
            injections_total,
            requests_total,
            request_latency_seconds,
            circuit_trips_total,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn observe_injection(&self, fault: &str, accepted: bool) {
        let outcome = if accepted { "accepted" } else { "failed" };
        self.injections_total
            .with_label_values(&[fault, outcome])
            .inc();
    }

    pub fn observe_request(&self, service: &str, outcome: &RequestOutcome) {
        let label = if outcome.success { "success" } else { "failure" };
        self.requests_total
            .with_label_values(&[service, label])
            .inc();
        self.request_latency_seconds
            .with_label_values(&[service])
            .observe(outcome.latency.as_secs_f64());
    }

    pub fn inc_circuit_trip(&self, service: &str) {
        self.circuit_trips_total.with_label_values(&[service]).inc();
    }
}
