//! ---
//! rmon_section: "07-resilience-fault-tolerance"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Fault injection client, load patterns, and the experiment scheduler."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
//! Drives fault-injection experiments against a live target.
//!
//! The [`ExperimentScheduler`] walks the fault x intensity x service matrix. Each
//! cell injects a fault through a [`ChaosControl`], runs paced load from the
//! [`LoadGenerator`] while watching circuit-breaker transitions, stops the fault
//! and measures recovery. Every request and every closed (or aborted)
//! experiment is handed to a [`rmon_common::RecordSink`] as soon as it exists.

use std::time::Duration;

pub mod client;
pub mod experiment;
pub mod load;
pub mod metrics;
pub mod scheduler;
pub mod suite;
pub mod target;

pub use client::{ChaosControl, CircuitStatus, HttpChaosClient, InjectAck};
pub use experiment::{Experiment, ExperimentCell, ExperimentPhase, TripDetector};
pub use load::{
    BurstPlan, Dispatch, LoadGenerator, LoadPattern, LoadSummary, PacedPlan, RecordingObserver,
    RequestObserver, ServiceSelector,
};
pub use metrics::ChaosMetrics;
pub use scheduler::{CellTiming, ExperimentScheduler, RunSummary, SchedulerSettings};
pub use suite::{SuiteStep, ValidationSuite};
pub use target::{HttpTargetClient, RequestOutcome, RequestSender};

/// Result alias for control-API calls.
pub type ChaosResult<T> = std::result::Result<T, ChaosError>;

/// Result alias for scheduling and load generation.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failures talking to the target's chaos control API.
#[derive(Debug, thiserror::Error)]
pub enum ChaosError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} rejected the request with HTTP {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Failures that end a scheduler run or a load pattern.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Chaos(#[from] ChaosError),
    #[error("failed to record results: {0:#}")]
    Sink(anyhow::Error),
    #[error("load worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("worker pool closed")]
    PoolClosed,
    #[error("target not healthy after {waited:?}: {reason}")]
    TargetUnavailable { waited: Duration, reason: String },
    #[error("supervised services are fatal: {0}")]
    ServiceFatal(String),
    #[error("{failures} consecutive fault injections failed; last error: {last}")]
    InjectionFailuresExhausted { failures: u32, last: String },
    #[error("illegal experiment transition {from} -> {to}")]
    InvalidTransition {
        from: ExperimentPhase,
        to: ExperimentPhase,
    },
    #[error("no prompts configured")]
    NoPrompts,
    #[error("{tag} load has a zero pacing interval")]
    UnpacedLoad { tag: String },
}

impl From<tokio::sync::AcquireError> for SchedulerError {
    fn from(_: tokio::sync::AcquireError) -> Self {
        SchedulerError::PoolClosed
    }
}
