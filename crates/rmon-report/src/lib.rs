//! ---
//! rmon_section: "09-reporting"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Aggregation, resilience scoring, and final report export."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
//! Turns recorded experiments into the final run report.

pub mod aggregate;
pub mod generator;
pub mod score;

pub use aggregate::{aggregate_faults, aggregate_services, FaultAggregate, ImpactLevel, ServiceAggregate};
pub use generator::{ReportFiles, ReportGenerator, ReportInput};
pub use score::resilience_score;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("io error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
