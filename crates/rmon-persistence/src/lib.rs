//! ---
//! rmon_section: "03-persistence-logging"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Durable, append-only recording of harness output."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
#![warn(missing_docs)]

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing output files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for CSV encoding and decoding failures.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A stored row could not be mapped back onto a record.
    #[error("malformed row {row} in {file}: {reason}")]
    MalformedRow {
        /// File the row was read from.
        file: String,
        /// One-based data row number.
        row: usize,
        /// What was wrong with it.
        reason: String,
    },
}

pub mod crash_log;
pub mod recorder;

pub use crash_log::replay as replay_crash_log;
pub use crash_log::{CrashLogEntry, CrashLogReader, CrashLogWriter};
pub use recorder::{
    load_experiment_log, MetricsRecorder, RecorderPaths, EXPERIMENT_LOG_HEADER,
    REQUEST_LOG_HEADER,
};
