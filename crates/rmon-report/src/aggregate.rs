//! ---
//! rmon_section: "09-reporting"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Per-service and per-fault aggregation of experiment records."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::fmt;

use indexmap::IndexMap;
use rmon_common::{ExperimentRecord, FaultConfig};
use serde::Serialize;

use crate::score::resilience_score;

/// Totals for one service across every experiment that targeted it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceAggregate {
    pub service: String,
    pub experiments: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    /// Plain mean of the per-experiment averages.
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub circuit_breaker_trips: u64,
    /// Plain mean over every experiment with data; an aborted experiment
    /// contributes its zero recovery time.
    pub avg_recovery_secs: f64,
    pub resilience_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
}

impl ImpactLevel {
    pub fn from_success_rate(rate: f64) -> Self {
        if rate < 50.0 {
            ImpactLevel::High
        } else if rate < 75.0 {
            ImpactLevel::Medium
        } else {
            ImpactLevel::Low
        }
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImpactLevel::High => "High",
            ImpactLevel::Medium => "Medium",
            ImpactLevel::Low => "Low",
        })
    }
}

/// How one fault type affected the target, averaged per experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultAggregate {
    pub fault: String,
    pub label: String,
    pub experiments: usize,
    pub avg_success_rate: f64,
    pub avg_trips: f64,
    pub impact: ImpactLevel,
}

/// Group experiments by service. Services listed in `order` come first, in
/// that order; services without any experiment data are omitted.
pub fn aggregate_services(
    experiments: &[ExperimentRecord],
    order: &[String],
) -> Vec<ServiceAggregate> {
    let mut groups: IndexMap<&str, Vec<&ExperimentRecord>> =
        order.iter().map(|service| (service.as_str(), Vec::new())).collect();
    for record in experiments.iter().filter(|record| record.has_data()) {
        groups.entry(record.service.as_str()).or_default().push(record);
    }
    groups
        .into_iter()
        .filter(|(_, records)| !records.is_empty())
        .map(|(service, records)| service_aggregate(service, &records))
        .collect()
}

fn service_aggregate(service: &str, records: &[&ExperimentRecord]) -> ServiceAggregate {
    let total_requests: u64 = records.iter().map(|r| r.stats.total_requests).sum();
    let successful_requests: u64 = records.iter().map(|r| r.stats.successful_requests).sum();
    let success_rate = percentage(successful_requests, total_requests);

    let latencies: Vec<f64> = records.iter().map(|r| r.stats.avg_latency_ms).collect();
    let avg_latency_ms = mean(&latencies);
    let with_latency = || records.iter().filter(|r| r.stats.successful_requests > 0);
    let min_latency_ms = with_latency().map(|r| r.stats.min_latency_ms).min().unwrap_or(0);
    let max_latency_ms = with_latency().map(|r| r.stats.max_latency_ms).max().unwrap_or(0);

    let circuit_breaker_trips: u64 = records
        .iter()
        .map(|r| u64::from(r.stats.circuit_breaker_trips))
        .sum();
    let recoveries: Vec<f64> = records.iter().map(|r| r.stats.recovery_secs).collect();
    let avg_recovery_secs = mean(&recoveries);

    ServiceAggregate {
        service: service.to_owned(),
        experiments: records.len(),
        total_requests,
        successful_requests,
        failed_requests: total_requests - successful_requests,
        success_rate,
        avg_latency_ms,
        min_latency_ms,
        max_latency_ms,
        circuit_breaker_trips,
        avg_recovery_secs,
        resilience_score: resilience_score(
            success_rate,
            avg_latency_ms,
            circuit_breaker_trips,
            avg_recovery_secs,
        ),
    }
}

/// Group experiments by fault type, in catalogue order first.
pub fn aggregate_faults(
    experiments: &[ExperimentRecord],
    catalogue: &IndexMap<String, FaultConfig>,
) -> Vec<FaultAggregate> {
    let mut groups: IndexMap<&str, Vec<&ExperimentRecord>> = catalogue
        .keys()
        .map(|fault| (fault.as_str(), Vec::new()))
        .collect();
    for record in experiments.iter().filter(|record| record.has_data()) {
        groups.entry(record.fault.as_str()).or_default().push(record);
    }
    groups
        .into_iter()
        .filter(|(_, records)| !records.is_empty())
        .map(|(fault, records)| {
            let rates: Vec<f64> = records.iter().map(|r| r.stats.success_rate).collect();
            let trips: Vec<f64> = records
                .iter()
                .map(|r| f64::from(r.stats.circuit_breaker_trips))
                .collect();
            let avg_success_rate = mean(&rates);
            FaultAggregate {
                fault: fault.to_owned(),
                label: catalogue
                    .get(fault)
                    .map(|spec| spec.label.clone())
                    .unwrap_or_else(|| fault.to_owned()),
                experiments: records.len(),
                avg_success_rate,
                avg_trips: mean(&trips),
                impact: ImpactLevel::from_success_rate(avg_success_rate),
            }
        })
        .collect()
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use rmon_common::{ExperimentOutcome, ExperimentStats};

    pub(crate) fn experiment(
        id: u64,
        fault: &str,
        service: &str,
        total: u64,
        ok: u64,
        avg_latency_ms: f64,
        trips: u32,
        recovery_secs: f64,
    ) -> ExperimentRecord {
        ExperimentRecord {
            id,
            fault: fault.into(),
            intensity: 100,
            service: service.into(),
            planned_duration_secs: 300,
            started_at: Utc::now(),
            ended_at: Utc::now(),
            outcome: ExperimentOutcome::Closed,
            stats: ExperimentStats {
                total_requests: total,
                successful_requests: ok,
                failed_requests: total - ok,
                success_rate: percentage(ok, total),
                avg_latency_ms,
                min_latency_ms: avg_latency_ms as u64 / 2,
                max_latency_ms: avg_latency_ms as u64 * 2,
                circuit_breaker_trips: trips,
                recovery_secs,
            },
            abort_reason: None,
        }
    }

    #[test]
    fn services_average_per_experiment() {
        let experiments = vec![
            experiment(1, "latency", "gemini", 10, 10, 100.0, 0, 180.0),
            experiment(2, "error", "gemini", 10, 5, 400.0, 2, 180.0),
            experiment(3, "error", "cohere", 4, 0, 0.0, 1, 180.0),
        ];
        let order = vec!["huggingface".to_owned(), "gemini".to_owned(), "cohere".to_owned()];
        let services = aggregate_services(&experiments, &order);
        assert_eq!(services.len(), 2);

        let gemini = &services[0];
        assert_eq!(gemini.service, "gemini");
        assert_eq!(gemini.total_requests, 20);
        assert!((gemini.success_rate - 75.0).abs() < 1e-9);
        assert!((gemini.avg_latency_ms - 250.0).abs() < 1e-9);
        assert_eq!(gemini.circuit_breaker_trips, 2);
        assert_eq!(gemini.min_latency_ms, 50);
        assert_eq!(gemini.max_latency_ms, 800);

        let cohere = &services[1];
        assert_eq!(cohere.success_rate, 0.0);
        assert_eq!(cohere.min_latency_ms, 0);
        assert!((0.0..=100.0).contains(&cohere.resilience_score));
    }

    #[test]
    fn aborted_experiments_count_toward_every_mean() {
        let mut aborted = experiment(2, "latency", "gemini", 4, 4, 100.0, 0, 0.0);
        aborted.outcome = ExperimentOutcome::Aborted;
        let mut empty = experiment(3, "latency", "gemini", 0, 0, 0.0, 0, 0.0);
        empty.outcome = ExperimentOutcome::Aborted;
        let experiments = vec![
            experiment(1, "latency", "gemini", 10, 10, 100.0, 0, 120.0),
            aborted,
            empty,
        ];
        let services = aggregate_services(&experiments, &[]);
        assert_eq!(services[0].experiments, 2);
        assert_eq!(services[0].total_requests, 14);
        assert!((services[0].avg_recovery_secs - 60.0).abs() < 1e-9);
    }

    #[test]
    fn slow_failing_experiment_weighs_as_much_as_a_fast_one() {
        let experiments = vec![
            experiment(1, "latency", "gemini", 10, 10, 100.0, 0, 0.0),
            experiment(2, "latency", "gemini", 10, 1, 5000.0, 0, 0.0),
        ];
        let services = aggregate_services(&experiments, &[]);
        let gemini = &services[0];
        assert!((gemini.avg_latency_ms - 2550.0).abs() < 1e-9);
        assert!((gemini.success_rate - 55.0).abs() < 1e-9);
        // 0.4 * 55 + 0.3 * (100 - 51) + 0.2 * 100 + 0.1 * 100
        assert!((gemini.resilience_score - 66.7).abs() < 1e-9, "{}", gemini.resilience_score);
    }

    #[test]
    fn fault_impact_levels() {
        let experiments = vec![
            experiment(1, "latency", "gemini", 10, 9, 100.0, 0, 0.0),
            experiment(2, "error", "gemini", 10, 6, 100.0, 1, 0.0),
            experiment(3, "error", "cohere", 10, 6, 100.0, 2, 0.0),
            experiment(4, "timeout", "gemini", 10, 2, 100.0, 3, 0.0),
            experiment(5, "mystery", "gemini", 10, 10, 100.0, 0, 0.0),
        ];
        let faults = aggregate_faults(&experiments, &rmon_common::config::default_fault_catalogue());
        let summary: Vec<(&str, ImpactLevel)> =
            faults.iter().map(|f| (f.label.as_str(), f.impact)).collect();
        assert_eq!(
            summary,
            vec![
                ("Network Latency", ImpactLevel::Low),
                ("Error Injection", ImpactLevel::Medium),
                ("Timeout Simulation", ImpactLevel::High),
                ("mystery", ImpactLevel::Low),
            ]
        );
        assert!((faults[1].avg_trips - 1.5).abs() < 1e-9);
    }
}
