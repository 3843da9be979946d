//! ---
//! rmon_section: "07-resilience-fault-tolerance"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Per-cell experiment state machine and circuit trip detection."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rmon_common::{
    CircuitState, ExperimentOutcome, ExperimentRecord, ExperimentStats, RequestRecord,
};
use serde::Serialize;

use crate::{Result, SchedulerError};

/// Lifecycle of one matrix cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentPhase {
    Pending,
    Injecting,
    Running,
    Stopping,
    Recovering,
    Closed,
    Aborted,
}

impl ExperimentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentPhase::Pending => "PENDING",
            ExperimentPhase::Injecting => "INJECTING",
            ExperimentPhase::Running => "RUNNING",
            ExperimentPhase::Stopping => "STOPPING",
            ExperimentPhase::Recovering => "RECOVERING",
            ExperimentPhase::Closed => "CLOSED",
            ExperimentPhase::Aborted => "ABORTED",
        }
    }

    /// Legal edges. `Aborted` is reachable from every non-terminal phase except
    /// `Running`, which must pass through `Stopping` so the fault is cleared.
    pub fn can_transition(self, to: ExperimentPhase) -> bool {
        use ExperimentPhase::*;
        matches!(
            (self, to),
            (Pending, Injecting)
                | (Injecting, Running)
                | (Running, Stopping)
                | (Stopping, Recovering)
                | (Recovering, Closed)
                | (Pending | Injecting | Stopping | Recovering, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExperimentPhase::Closed | ExperimentPhase::Aborted)
    }
}

impl fmt::Display for ExperimentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(fault, intensity, service)` combination of the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExperimentCell {
    pub fault: String,
    pub intensity: u32,
    pub service: String,
}

impl ExperimentCell {
    pub fn new(fault: impl Into<String>, intensity: u32, service: impl Into<String>) -> Self {
        Self {
            fault: fault.into(),
            intensity,
            service: service.into(),
        }
    }
}

impl fmt::Display for ExperimentCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} on {}", self.fault, self.intensity, self.service)
    }
}

/// Counts `CLOSED -> OPEN` edges across successive status polls.
#[derive(Debug, Clone, Default)]
pub struct TripDetector {
    previous: Option<CircuitState>,
    trips: u32,
}

impl TripDetector {
    /// Feed the next observed state; returns true when it completes a trip.
    pub fn observe(&mut self, state: CircuitState) -> bool {
        let tripped = self.previous == Some(CircuitState::Closed) && state == CircuitState::Open;
        if tripped {
            self.trips += 1;
        }
        self.previous = Some(state);
        tripped
    }

    pub fn trips(&self) -> u32 {
        self.trips
    }
}

/// An open experiment. Statistics exist only once it is consumed by
/// [`Experiment::close`] or [`Experiment::abort`].
#[derive(Debug)]
pub struct Experiment {
    id: u64,
    cell: ExperimentCell,
    planned: Duration,
    started_at: DateTime<Utc>,
    phase: ExperimentPhase,
    records: Vec<RequestRecord>,
    trips: TripDetector,
}

impl Experiment {
    pub fn new(id: u64, cell: ExperimentCell, planned: Duration) -> Self {
        Self {
            id,
            cell,
            planned,
            started_at: Utc::now(),
            phase: ExperimentPhase::Pending,
            records: Vec::new(),
            trips: TripDetector::default(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cell(&self) -> &ExperimentCell {
        &self.cell
    }

    pub fn phase(&self) -> ExperimentPhase {
        self.phase
    }

    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    pub fn trips(&self) -> u32 {
        self.trips.trips()
    }

    pub fn transition(&mut self, to: ExperimentPhase) -> Result<()> {
        if !self.phase.can_transition(to) {
            return Err(SchedulerError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Append a request observed during the fault window.
    pub fn record(&mut self, record: RequestRecord) {
        self.records.push(record);
    }

    pub fn observe_circuit(&mut self, state: CircuitState) -> bool {
        self.trips.observe(state)
    }

    /// Running success rate over the requests recorded so far.
    pub fn success_rate(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let ok = self.records.iter().filter(|r| r.success).count();
        ok as f64 / self.records.len() as f64 * 100.0
    }

    /// Close after recovery. Only legal from `RECOVERING`.
    pub fn close(mut self, recovery: Duration) -> Result<ExperimentRecord> {
        self.transition(ExperimentPhase::Closed)?;
        Ok(self.into_record(ExperimentOutcome::Closed, recovery, None))
    }

    /// Abort, keeping whatever requests were recorded.
    pub fn abort(mut self, reason: impl Into<String>) -> ExperimentRecord {
        self.phase = ExperimentPhase::Aborted;
        self.into_record(ExperimentOutcome::Aborted, Duration::ZERO, Some(reason.into()))
    }

    fn into_record(
        self,
        outcome: ExperimentOutcome,
        recovery: Duration,
        abort_reason: Option<String>,
    ) -> ExperimentRecord {
        let stats = ExperimentStats::from_records(&self.records, self.trips.trips(), recovery);
        ExperimentRecord {
            id: self.id,
            fault: self.cell.fault,
            intensity: self.cell.intensity,
            service: self.cell.service,
            planned_duration_secs: self.planned.as_secs(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            outcome,
            stats,
            abort_reason,
        }
    }
}
