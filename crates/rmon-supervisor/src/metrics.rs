//! ---
//! rmon_section: "02-process-supervision"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Prometheus families published by the supervisor."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use prometheus::{IntCounterVec, IntGaugeVec, Opts};
use rmon_metrics::SharedRegistry;

use crate::probe::ProbeFailure;
use crate::state::ServiceLifecycle;
use crate::Result;

/// Metrics published by the service supervisor.
#[derive(Clone)]
pub struct SupervisorMetrics {
    registry: SharedRegistry,
    restarts_total: IntCounterVec,
    health_failures_total: IntCounterVec,
    service_state: IntGaugeVec,
}

impl std::fmt::Debug for SupervisorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorMetrics").finish_non_exhaustive()
    }
}

impl SupervisorMetrics {
    /// Register the supervisor metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let restarts_total = IntCounterVec::new(
            Opts::new(
                "rmon_supervisor_restarts_total",
                "Restart attempts issued by the supervisor",
            ),
            &["service"],
        )?;
        registry.register(Box::new(restarts_total.clone()))?;

        let health_failures_total = IntCounterVec::new(
            Opts::new(
                "rmon_supervisor_health_failures_total",
                "Failed health checks grouped by failure reason",
            ),
            &["service", "reason"],
        )?;
        registry.register(Box::new(health_failures_total.clone()))?;

        let service_state = IntGaugeVec::new(
            Opts::new(
                "rmon_supervisor_service_state",
                "Lifecycle state per service (0=stopped .. 5=fatal)",
            ),
            &["service"],
        )?;
        registry.register(Box::new(service_state.clone()))?;

        Ok(Self {
            registry,
            restarts_total,
            health_failures_total,
            service_state,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_restart(&self, service: &str) {
        self.restarts_total.with_label_values(&[service]).inc();
    }

    pub fn inc_health_failure(&self, service: &str, failure: &ProbeFailure) {
        self.health_failures_total
            .with_label_values(&[service, failure.label()])
            .inc();
    }

    pub fn set_state(&self, service: &str, lifecycle: ServiceLifecycle) {
        self.service_state
            .with_label_values(&[service])
            .set(lifecycle.gauge_value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_restarts_and_states() {
        let registry = rmon_metrics::new_registry();
        let metrics = SupervisorMetrics::new(registry.clone()).unwrap();
        metrics.inc_restart("backend");
        metrics.inc_restart("backend");
        metrics.inc_health_failure("backend", &ProbeFailure::ConnectionRefused);
        metrics.set_state("backend", ServiceLifecycle::Fatal);

        let families = registry.gather();
        let restarts = families
            .iter()
            .find(|family| family.get_name() == "rmon_supervisor_restarts_total")
            .unwrap();
        assert_eq!(restarts.get_metric()[0].get_counter().get_value(), 2.0);
        let state = families
            .iter()
            .find(|family| family.get_name() == "rmon_supervisor_service_state")
            .unwrap();
        assert_eq!(state.get_metric()[0].get_gauge().get_value(), 5.0);
    }
}
