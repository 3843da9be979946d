//! ---
//! rmon_section: "01-core-functionality"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Shared primitives and utilities for the resilience harness."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
//! Core shared primitives for the R-MON workspace.
//! This crate exposes configuration loading, logging, request pacing and the
//! record types exchanged between the supervisor, scheduler, and recorder.

pub mod config;
pub mod logging;
pub mod model;
pub mod pacing;
pub mod time;

pub use config::{
    CommandConfig, ExperimentConfig, FaultConfig, HarnessConfig, LoadConfig, LoadedConfig,
    LoggingConfig, MetricsConfig, OutputConfig, ScenarioConfig, ServiceConfig, SuiteConfig,
    SupervisorConfig, TargetConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use model::{
    CircuitState, CrashEvent, CrashReason, CrashSink, ExperimentOutcome, ExperimentRecord,
    ExperimentStats, MemorySink, RecordSink, RequestRecord, RequestTally, RunTag,
};
pub use pacing::{JitterHistogram, JitterSummary, Pacer};
