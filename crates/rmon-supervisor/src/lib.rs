//! ---
//! rmon_section: "02-process-supervision"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Process ownership, health probing, and restart policy."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
//! Keeps the services a harness run depends on alive.
//!
//! [`ServiceSupervisor`] owns one [`ProcessHandle`] per declared service and drives a
//! fixed-interval tick: exited processes are recorded as crashes and restarted,
//! live ones are probed through a [`HealthProbe`] and force-restarted once the
//! consecutive-failure threshold is reached. Restarts are capped; a service that
//! exhausts its cap is parked in [`ServiceLifecycle::Fatal`].

use std::time::Duration;

/// Result alias used throughout the supervisor crate.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error type for process supervision.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The configured program could not be spawned.
    #[error("failed to spawn '{program}' for {service}: {source}")]
    Spawn {
        /// Service being started.
        service: String,
        /// Program that failed to launch.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Waiting on or polling a child process failed.
    #[error("process io error for {service}: {source}")]
    Process {
        /// Service owning the process.
        service: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Delivering a termination signal failed.
    #[error("failed to signal pid {pid}: {reason}")]
    Signal {
        /// Target process id.
        pid: u32,
        /// OS error description.
        reason: String,
    },
    /// The service exhausted its restart budget and is now FATAL.
    #[error("service {service} exhausted {attempts} restart attempts")]
    RestartsExhausted {
        /// Service that entered FATAL.
        service: String,
        /// Restarts attempted before giving up.
        attempts: u32,
    },
    /// Every supervised service is FATAL; nothing is left to supervise.
    #[error("all supervised services are fatal")]
    AllServicesFatal,
    /// Appending to the crash log failed.
    #[error("failed to record crash for {service}: {reason}")]
    CrashLog {
        /// Service whose crash could not be persisted.
        service: String,
        /// Sink error description.
        reason: String,
    },
    /// Lookup of a service that was never registered.
    #[error("unknown service {0}")]
    UnknownService(String),
    /// Building the HTTP client for health probes failed.
    #[error("failed to build health probe client: {0}")]
    Client(#[from] reqwest::Error),
    /// Metrics registration failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod metrics;
pub mod port;
pub mod probe;
pub mod process;
pub mod state;
pub mod supervisor;

pub use metrics::SupervisorMetrics;
pub use port::port_in_use;
pub use probe::{HealthProbe, HealthStatus, HttpHealthProbe, ProbeFailure};
pub use process::ProcessHandle;
pub use state::{ServiceLifecycle, ServiceSnapshot, SupervisorReport};
pub use supervisor::{ServiceSupervisor, StartOutcome, SupervisorSettings, SupervisorView, TickSummary};

/// How long the supervisor waits for output drain tasks after a process exits.
pub(crate) const OUTPUT_SETTLE: Duration = Duration::from_millis(200);
