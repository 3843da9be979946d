//! ---
//! rmon_section: "01-core-functionality"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Request, experiment, and crash records exchanged between components."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Circuit-breaker state as reported by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
    #[default]
    Unknown,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
            CircuitState::Unknown => "UNKNOWN",
        }
    }

    /// Lenient parse; anything unrecognised maps to [`CircuitState::Unknown`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "CLOSED" => CircuitState::Closed,
            "OPEN" => CircuitState::Open,
            "HALF_OPEN" | "HALFOPEN" => CircuitState::HalfOpen,
            _ => CircuitState::Unknown,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of a request: an experiment id or a named load run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunTag {
    Experiment(u64),
    Normal,
    LoadNormal,
    LoadHigh,
    LoadBurst(u32),
    LoadMixed,
    Recovery(u64),
}

impl RunTag {
    pub fn experiment_id(&self) -> Option<u64> {
        match self {
            RunTag::Experiment(id) => Some(*id),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(id) = value.parse::<u64>() {
            return Some(RunTag::Experiment(id));
        }
        match value {
            "NORMAL" => Some(RunTag::Normal),
            "LOAD_NORMAL" => Some(RunTag::LoadNormal),
            "LOAD_HIGH" => Some(RunTag::LoadHigh),
            "LOAD_MIXED" => Some(RunTag::LoadMixed),
            other => {
                if let Some(n) = other.strip_prefix("LOAD_BURST_") {
                    n.parse().ok().map(RunTag::LoadBurst)
                } else if let Some(id) = other.strip_prefix("RECOVERY_") {
                    id.parse().ok().map(RunTag::Recovery)
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for RunTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunTag::Experiment(id) => write!(f, "{id}"),
            RunTag::Normal => f.write_str("NORMAL"),
            RunTag::LoadNormal => f.write_str("LOAD_NORMAL"),
            RunTag::LoadHigh => f.write_str("LOAD_HIGH"),
            RunTag::LoadBurst(n) => write!(f, "LOAD_BURST_{n}"),
            RunTag::LoadMixed => f.write_str("LOAD_MIXED"),
            RunTag::Recovery(id) => write!(f, "RECOVERY_{id}"),
        }
    }
}

impl Serialize for RunTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RunTag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RunTag::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown run tag '{raw}'")))
    }
}

/// One request sent to the target. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub tag: RunTag,
    pub service: String,
    /// Fault type active on the target while the request ran.
    pub fault: Option<String>,
    pub success: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
    /// Circuit-breaker state observed when the request was sent.
    pub circuit_state: CircuitState,
    pub response_size: u64,
    pub prompt: String,
}

impl RequestRecord {
    pub fn chaos_active(&self) -> bool {
        self.fault.is_some()
    }
}

/// Terminal state of an experiment snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentOutcome {
    Closed,
    Aborted,
}

impl ExperimentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentOutcome::Closed => "CLOSED",
            ExperimentOutcome::Aborted => "ABORTED",
        }
    }
}

/// Statistics derived from the full request set of one experiment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ExperimentStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percentage in `[0, 100]`.
    pub success_rate: f64,
    /// Latency figures cover successful requests only.
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub circuit_breaker_trips: u32,
    pub recovery_secs: f64,
}

impl ExperimentStats {
    pub fn from_records(records: &[RequestRecord], trips: u32, recovery: Duration) -> Self {
        let total = records.len() as u64;
        let latencies: Vec<u64> = records
            .iter()
            .filter(|record| record.success)
            .map(|record| record.latency_ms)
            .collect();
        let successful = latencies.len() as u64;
        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        };
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };
        Self {
            total_requests: total,
            successful_requests: successful,
            failed_requests: total - successful,
            success_rate,
            avg_latency_ms,
            min_latency_ms: latencies.iter().copied().min().unwrap_or(0),
            max_latency_ms: latencies.iter().copied().max().unwrap_or(0),
            circuit_breaker_trips: trips,
            recovery_secs: recovery.as_secs_f64(),
        }
    }
}

/// Closed (or aborted) experiment handed to recording and reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: u64,
    pub fault: String,
    pub intensity: u32,
    pub service: String,
    pub planned_duration_secs: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: ExperimentOutcome,
    pub stats: ExperimentStats,
    #[serde(default)]
    pub abort_reason: Option<String>,
}

impl ExperimentRecord {
    /// Whether the record contributes to aggregates.
    pub fn has_data(&self) -> bool {
        self.outcome == ExperimentOutcome::Closed || self.stats.total_requests > 0
    }
}

/// Why the supervisor recorded a crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrashReason {
    ProcessExited { code: Option<i32> },
    HealthCheckExhausted { failures: u32, last_reason: String },
    StartFailed { error: String },
}

impl fmt::Display for CrashReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashReason::ProcessExited { code: Some(code) } => {
                write!(f, "process exited with code {code}")
            }
            CrashReason::ProcessExited { code: None } => f.write_str("process terminated by signal"),
            CrashReason::HealthCheckExhausted {
                failures,
                last_reason,
            } => write!(f, "{failures} consecutive health check failures ({last_reason})"),
            CrashReason::StartFailed { error } => write!(f, "failed to start: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashEvent {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub reason: CrashReason,
    /// Recent captured output, empty when output is inherited.
    pub diagnostics: String,
}

/// Request counters kept next to the durable logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RequestTally {
    pub total: u64,
    pub successful: u64,
    pub experiment: u64,
    pub load: u64,
    pub recovery: u64,
}

impl RequestTally {
    pub fn observe(&mut self, record: &RequestRecord) {
        self.total += 1;
        if record.success {
            self.successful += 1;
        }
        match record.tag {
            RunTag::Experiment(_) => self.experiment += 1,
            RunTag::Recovery(_) => self.recovery += 1,
            _ => self.load += 1,
        }
    }
}

/// Append-only destination for request and experiment records.
pub trait RecordSink: Send + Sync {
    fn append_request(&self, record: &RequestRecord) -> anyhow::Result<()>;
    fn append_experiment(&self, record: &ExperimentRecord) -> anyhow::Result<()>;
}

/// Append-only destination for supervisor crash events.
pub trait CrashSink: Send + Sync {
    fn append_crash(&self, event: &CrashEvent) -> anyhow::Result<()>;
}

/// In-memory sink used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    requests: Mutex<Vec<RequestRecord>>,
    experiments: Mutex<Vec<ExperimentRecord>>,
    crashes: Mutex<Vec<CrashEvent>>,
}

impl MemorySink {
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().clone()
    }

    pub fn experiments(&self) -> Vec<ExperimentRecord> {
        self.experiments.lock().clone()
    }

    pub fn crashes(&self) -> Vec<CrashEvent> {
        self.crashes.lock().clone()
    }
}

impl RecordSink for MemorySink {
    fn append_request(&self, record: &RequestRecord) -> anyhow::Result<()> {
        self.requests.lock().push(record.clone());
        Ok(())
    }

    fn append_experiment(&self, record: &ExperimentRecord) -> anyhow::Result<()> {
        self.experiments.lock().push(record.clone());
        Ok(())
    }
}

impl CrashSink for MemorySink {
    fn append_crash(&self, event: &CrashEvent) -> anyhow::Result<()> {
        self.crashes.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(success: bool, latency_ms: u64) -> RequestRecord {
        RequestRecord {
            timestamp: Utc::now(),
            tag: RunTag::Experiment(1),
            service: "gemini".into(),
            fault: Some("latency".into()),
            success,
            latency_ms,
            error: (!success).then(|| "Timeout".to_owned()),
            circuit_state: CircuitState::Closed,
            response_size: if success { 128 } else { 0 },
            prompt: "What is artificial intelligence?".into(),
        }
    }

    #[test]
    fn stats_use_successful_latencies_only() {
        let records = vec![record(true, 100), record(false, 30_000), record(true, 300)];
        let stats = ExperimentStats::from_records(&records, 2, Duration::from_secs(180));
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests + stats.failed_requests, 3);
        assert!((stats.success_rate - 66.666).abs() < 0.01);
        assert_eq!(stats.avg_latency_ms, 200.0);
        assert_eq!(stats.min_latency_ms, 100);
        assert_eq!(stats.max_latency_ms, 300);
        assert_eq!(stats.circuit_breaker_trips, 2);
        assert_eq!(stats.recovery_secs, 180.0);
    }

    #[test]
    fn stats_for_empty_or_failed_runs_stay_in_range() {
        let empty = ExperimentStats::from_records(&[], 0, Duration::ZERO);
        assert_eq!(empty.success_rate, 0.0);
        assert_eq!(empty.avg_latency_ms, 0.0);

        let failed = ExperimentStats::from_records(&[record(false, 5), record(false, 7)], 0, Duration::ZERO);
        assert_eq!(failed.success_rate, 0.0);
        assert_eq!(failed.failed_requests, 2);
        assert_eq!(failed.max_latency_ms, 0);
    }

    #[test]
    fn run_tags_round_trip_through_display() {
        for tag in [
            RunTag::Experiment(42),
            RunTag::Normal,
            RunTag::LoadNormal,
            RunTag::LoadHigh,
            RunTag::LoadBurst(3),
            RunTag::LoadMixed,
            RunTag::Recovery(7),
        ] {
            assert_eq!(RunTag::parse(&tag.to_string()), Some(tag));
        }
        assert_eq!(RunTag::parse("CHAOS"), None);
    }

    #[test]
    fn circuit_state_parse_is_lenient() {
        assert_eq!(CircuitState::parse("open"), CircuitState::Open);
        assert_eq!(CircuitState::parse("half-open"), CircuitState::HalfOpen);
        assert_eq!(CircuitState::parse("HALF_OPEN"), CircuitState::HalfOpen);
        assert_eq!(CircuitState::parse("tripped"), CircuitState::Unknown);
    }

    #[test]
    fn tally_splits_by_owner() {
        let mut tally = RequestTally::default();
        tally.observe(&record(true, 10));
        let mut load = record(false, 10);
        load.tag = RunTag::LoadBurst(1);
        tally.observe(&load);
        let mut recovery = record(true, 10);
        recovery.tag = RunTag::Recovery(1);
        tally.observe(&recovery);
        assert_eq!(tally.total, 3);
        assert_eq!(tally.successful, 2);
        assert_eq!((tally.experiment, tally.load, tally.recovery), (1, 1, 1));
    }

    #[test]
    fn crash_reason_serializes_with_kind_tag() {
        let reason = CrashReason::ProcessExited { code: Some(1) };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["kind"], "process_exited");
        assert_eq!(reason.to_string(), "process exited with code 1");
    }
}
