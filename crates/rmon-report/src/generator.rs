//! ---
//! rmon_section: "09-reporting"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Writes the final text report, service comparison, and JSON summary."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use rmon_common::time::format_uptime;
use rmon_common::{ExperimentOutcome, ExperimentRecord, FaultConfig, RequestTally};
use rmon_supervisor::SupervisorReport;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::aggregate::{aggregate_faults, aggregate_services, FaultAggregate, ServiceAggregate};
use crate::{ReportError, Result};

const RULE: &str =
    "================================================================================";

/// Everything the report is built from.
#[derive(Debug, Clone)]
pub struct ReportInput<'a> {
    pub stamp: &'a str,
    pub experiments: &'a [ExperimentRecord],
    /// Preferred service order in the comparison.
    pub services: &'a [String],
    pub faults: &'a IndexMap<String, FaultConfig>,
    pub run_duration: Duration,
    pub tally: RequestTally,
    pub supervisor: Option<&'a SupervisorReport>,
    /// Data files written during the run, listed at the end of the report.
    pub data_files: Vec<PathBuf>,
}

/// Paths of the files written by [`ReportGenerator::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    pub report: PathBuf,
    pub comparison: PathBuf,
    pub summary: PathBuf,
}

#[derive(Debug, Serialize)]
struct ReportEnvelope<'a> {
    run_id: Uuid,
    stamp: &'a str,
    generated_at: String,
    run_duration_secs: f64,
    requests: RequestTally,
    experiments_total: usize,
    experiments_aborted: usize,
    services: &'a [ServiceAggregate],
    faults: &'a [FaultAggregate],
    #[serde(skip_serializing_if = "Option::is_none")]
    supervisor: Option<&'a SupervisorReport>,
}

#[derive(Debug, Clone)]
pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn generate(&self, input: &ReportInput<'_>) -> Result<ReportFiles> {
        fs::create_dir_all(&self.output_dir).map_err(|source| io_error(&self.output_dir, source))?;
        let generated_at = Utc::now();
        let services = aggregate_services(input.experiments, input.services);
        let faults = aggregate_faults(input.experiments, input.faults);

        let files = ReportFiles {
            report: self
                .output_dir
                .join(format!("final_report_{}.txt", input.stamp)),
            comparison: self
                .output_dir
                .join(format!("service_comparison_{}.csv", input.stamp)),
            summary: self.output_dir.join(format!("summary_{}.json", input.stamp)),
        };

        write_comparison(&files.comparison, generated_at, &services)?;

        let envelope = ReportEnvelope {
            run_id: Uuid::new_v4(),
            stamp: input.stamp,
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            run_duration_secs: input.run_duration.as_secs_f64(),
            requests: input.tally,
            experiments_total: input.experiments.len(),
            experiments_aborted: aborted(input.experiments),
            services: &services,
            faults: &faults,
            supervisor: input.supervisor,
        };
        let json = serde_json::to_string_pretty(&envelope)?;
        fs::write(&files.summary, json).map_err(|source| io_error(&files.summary, source))?;

        let text = render(input, generated_at, &services, &faults, &files);
        fs::write(&files.report, text).map_err(|source| io_error(&files.report, source))?;

        for service in &services {
            info!(
                target: "rmon::report",
                service = %service.service,
                requests = service.total_requests,
                success_rate = service.success_rate,
                score = service.resilience_score,
                "service scored",
            );
        }
        info!(target: "rmon::report", path = %files.report.display(), "final report written");
        Ok(files)
    }
}

fn aborted(experiments: &[ExperimentRecord]) -> usize {
    experiments
        .iter()
        .filter(|record| record.outcome == ExperimentOutcome::Aborted)
        .count()
}

fn io_error(path: &Path, source: std::io::Error) -> ReportError {
    ReportError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn write_comparison(
    path: &Path,
    generated_at: DateTime<Utc>,
    services: &[ServiceAggregate],
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "Timestamp",
        "Service",
        "Total_Requests",
        "Success_Rate_%",
        "Avg_Latency_Ms",
        "Total_Failures",
        "Circuit_Breaker_Trips",
        "Avg_Recovery_Time_Sec",
        "Resilience_Score",
    ])?;
    let timestamp = generated_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    for service in services {
        writer.write_record([
            timestamp.clone(),
            service.service.clone(),
            service.total_requests.to_string(),
            format!("{:.2}", service.success_rate),
            format!("{:.0}", service.avg_latency_ms),
            service.failed_requests.to_string(),
            service.circuit_breaker_trips.to_string(),
            format!("{:.1}", service.avg_recovery_secs),
            format!("{:.2}", service.resilience_score),
        ])?;
    }
    writer.flush().map_err(|source| io_error(path, source))?;
    Ok(())
}

fn heading(out: &mut String, title: &str) {
    let _ = write!(out, "\n{RULE}\n{title}\n{RULE}\n\n");
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn render(
    input: &ReportInput<'_>,
    generated_at: DateTime<Utc>,
    services: &[ServiceAggregate],
    faults: &[FaultAggregate],
    files: &ReportFiles,
) -> String {
    let mut out = String::new();
    let _ = write!(out, "{RULE}\nRESILIENCE TEST FINAL REPORT\n{RULE}\n\n");
    let _ = writeln!(out, "Run Duration: {}", format_uptime(input.run_duration));
    let _ = writeln!(
        out,
        "Total Requests: {} (experiment {}, load {}, recovery {})",
        input.tally.total, input.tally.experiment, input.tally.load, input.tally.recovery
    );
    let _ = writeln!(out, "Successful Requests: {}", input.tally.successful);
    let _ = writeln!(
        out,
        "Total Chaos Experiments: {} ({} aborted)",
        input.experiments.len(),
        aborted(input.experiments)
    );
    let _ = writeln!(
        out,
        "Report Generated: {}",
        generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );

    heading(&mut out, "SERVICE PERFORMANCE COMPARISON");
    if services.is_empty() {
        let _ = writeln!(out, "No experiment data recorded.\n");
    }
    for service in services {
        let _ = writeln!(out, "{}", service.service.to_uppercase());
        let _ = writeln!(out, "  Experiments: {}", service.experiments);
        let _ = writeln!(out, "  Total Requests: {}", service.total_requests);
        let _ = writeln!(out, "  Success Rate: {:.2}%", service.success_rate);
        let _ = writeln!(
            out,
            "  Latency: avg {:.0}ms, min {}ms, max {}ms",
            service.avg_latency_ms, service.min_latency_ms, service.max_latency_ms
        );
        let _ = writeln!(out, "  Circuit Breaker Trips: {}", service.circuit_breaker_trips);
        let _ = writeln!(out, "  Avg Recovery Time: {:.1}s", service.avg_recovery_secs);
        let _ = writeln!(out, "  Resilience Score: {:.2}/100\n", service.resilience_score);
    }

    heading(&mut out, "CHAOS TYPE IMPACT ANALYSIS");
    for fault in faults {
        let _ = writeln!(out, "{}", fault.label.to_uppercase());
        let _ = writeln!(out, "  Experiments Run: {}", fault.experiments);
        let _ = writeln!(out, "  Avg Success Rate: {:.2}%", fault.avg_success_rate);
        let _ = writeln!(out, "  Avg Circuit Breaker Trips: {:.1}", fault.avg_trips);
        let _ = writeln!(out, "  Impact Level: {}\n", fault.impact);
    }

    if let Some(supervisor) = input.supervisor {
        heading(&mut out, "SERVICE SUPERVISION");
        out.push_str(&supervisor.render());
    }

    heading(&mut out, "DATA FILES GENERATED");
    for path in &input.data_files {
        let _ = writeln!(out, "{}", file_name(path));
    }
    let _ = writeln!(out, "{}", file_name(&files.comparison));
    let _ = writeln!(out, "{}", file_name(&files.summary));
    let _ = writeln!(out, "{}", file_name(&files.report));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::experiment;

    #[test]
    fn writes_all_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let experiments = vec![
            experiment(1, "latency", "gemini", 10, 9, 300.0, 1, 180.0),
            experiment(2, "error", "cohere", 10, 4, 200.0, 3, 180.0),
        ];
        let services = vec!["gemini".to_owned(), "cohere".to_owned()];
        let faults = rmon_common::config::default_fault_catalogue();
        let input = ReportInput {
            stamp: "20240101_000000",
            experiments: &experiments,
            services: &services,
            faults: &faults,
            run_duration: Duration::from_secs(3_723),
            tally: RequestTally {
                total: 30,
                successful: 23,
                experiment: 20,
                load: 10,
                recovery: 0,
            },
            supervisor: None,
            data_files: vec![dir.path().join("experiment_log_20240101_000000.csv")],
        };

        let files = ReportGenerator::new(dir.path()).generate(&input).unwrap();
        let text = fs::read_to_string(&files.report).unwrap();
        assert!(text.contains("Run Duration: 1h 02m 03s"));
        assert!(text.contains("GEMINI\n"));
        assert!(text.contains("Impact Level: High"));
        assert!(text.contains("experiment_log_20240101_000000.csv"));
        assert!(!text.contains("SERVICE SUPERVISION"));

        let mut reader = csv::Reader::from_path(&files.comparison).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[8], "Resilience_Score");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "gemini");
        assert_eq!(&rows[1][3], "40.00");

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&files.summary).unwrap()).unwrap();
        assert_eq!(summary["experiments_total"], 2);
        assert_eq!(summary["services"].as_array().unwrap().len(), 2);
        assert!(summary["run_id"].as_str().is_some());
    }
}
