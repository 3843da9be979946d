//! ---
//! rmon_section: "03-persistence-logging"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Append-only CSV recorder shared by the scheduler and load workers."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use parking_lot::Mutex;
use rmon_common::{
    CrashEvent, CrashSink, ExperimentOutcome, ExperimentRecord, ExperimentStats, RecordSink,
    RequestRecord, RequestTally,
};
use tracing::debug;

use crate::crash_log::CrashLogWriter;
use crate::{PersistenceError, Result};

/// Column layout of the experiment log.
pub const EXPERIMENT_LOG_HEADER: [&str; 18] = [
    "Timestamp",
    "Experiment_ID",
    "Chaos_Type",
    "Intensity",
    "Service",
    "Duration_Sec",
    "Total_Requests",
    "Successful_Requests",
    "Failed_Requests",
    "Avg_Latency_Ms",
    "Min_Latency_Ms",
    "Max_Latency_Ms",
    "Success_Rate_%",
    "Circuit_Breaker_Trips",
    "Recovery_Time_Sec",
    "Status",
    "Started_At",
    "Abort_Reason",
];

/// Column layout of the request log.
pub const REQUEST_LOG_HEADER: [&str; 11] = [
    "Timestamp",
    "Experiment_ID",
    "Service",
    "Chaos_Type",
    "Chaos_Active",
    "Success",
    "Latency_Ms",
    "Error_Type",
    "Circuit_Breaker_State",
    "Response_Size",
    "Prompt",
];

/// File locations for one run, all sharing the run stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderPaths {
    /// Output directory.
    pub directory: PathBuf,
    /// Timestamp fragment shared by every file of the run.
    pub stamp: String,
    /// One row per closed or aborted experiment.
    pub experiment_log: PathBuf,
    /// One row per request.
    pub request_log: PathBuf,
    /// JSON lines, one per supervisor crash.
    pub crash_log: PathBuf,
}

impl RecorderPaths {
    /// Derive the per-run file names inside `directory`.
    pub fn new(directory: &Path, stamp: &str) -> Self {
        Self {
            directory: directory.to_path_buf(),
            stamp: stamp.to_owned(),
            experiment_log: directory.join(format!("experiment_log_{stamp}.csv")),
            request_log: directory.join(format!("request_log_{stamp}.csv")),
            crash_log: directory.join(format!("crash_log_{stamp}.jsonl")),
        }
    }
}

struct ExperimentStream {
    writer: csv::Writer<File>,
    retained: Vec<ExperimentRecord>,
}

struct RequestStream {
    writer: csv::Writer<File>,
    tally: RequestTally,
}

/// Durable sink for every record kind of a run.
///
/// Each stream sits behind its own lock and every append is a single row write
/// followed by a flush, so concurrent producers never interleave partial rows.
pub struct MetricsRecorder {
    paths: RecorderPaths,
    experiments: Mutex<ExperimentStream>,
    requests: Mutex<RequestStream>,
    crashes: Mutex<CrashLogWriter>,
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl MetricsRecorder {
    /// Create the output directory and all log files, writing their headers.
    pub fn create(directory: &Path, stamp: &str) -> Result<Self> {
        fs::create_dir_all(directory)?;
        let paths = RecorderPaths::new(directory, stamp);
        let experiments = open_csv(&paths.experiment_log, &EXPERIMENT_LOG_HEADER)?;
        let requests = open_csv(&paths.request_log, &REQUEST_LOG_HEADER)?;
        let crashes = CrashLogWriter::open(&paths.crash_log)?;
        debug!(
            target: "rmon::persistence",
            directory = %directory.display(),
            stamp,
            "recorder opened"
        );
        Ok(Self {
            paths,
            experiments: Mutex::new(ExperimentStream {
                writer: experiments,
                retained: Vec::new(),
            }),
            requests: Mutex::new(RequestStream {
                writer: requests,
                tally: RequestTally::default(),
            }),
            crashes: Mutex::new(crashes),
        })
    }

    /// Paths of the files this recorder writes.
    pub fn paths(&self) -> &RecorderPaths {
        &self.paths
    }

    /// Append one request row.
    pub fn record_request(&self, record: &RequestRecord) -> Result<()> {
        let mut stream = self.requests.lock();
        stream.writer.write_record(request_row(record))?;
        stream.writer.flush()?;
        stream.tally.observe(record);
        Ok(())
    }

    /// Append one experiment row and retain the record for reporting.
    pub fn record_experiment(&self, record: &ExperimentRecord) -> Result<()> {
        let mut stream = self.experiments.lock();
        stream.writer.write_record(experiment_row(record))?;
        stream.writer.flush()?;
        stream.retained.push(record.clone());
        Ok(())
    }

    /// Append one crash to the JSON-lines crash log.
    pub fn record_crash(&self, event: &CrashEvent) -> Result<()> {
        self.crashes.lock().append(event)?;
        Ok(())
    }

    /// Every experiment recorded so far, in append order.
    pub fn experiments(&self) -> Vec<ExperimentRecord> {
        self.experiments.lock().retained.clone()
    }

    /// Request counters for everything durably written.
    pub fn tally(&self) -> RequestTally {
        self.requests.lock().tally
    }

    /// Flush all streams.
    pub fn flush(&self) -> Result<()> {
        self.experiments.lock().writer.flush()?;
        self.requests.lock().writer.flush()?;
        self.crashes.lock().flush()?;
        Ok(())
    }
}

impl RecordSink for MetricsRecorder {
    fn append_request(&self, record: &RequestRecord) -> anyhow::Result<()> {
        Ok(self.record_request(record)?)
    }

    fn append_experiment(&self, record: &ExperimentRecord) -> anyhow::Result<()> {
        Ok(self.record_experiment(record)?)
    }
}

impl CrashSink for MetricsRecorder {
    fn append_crash(&self, event: &CrashEvent) -> anyhow::Result<()> {
        Ok(self.record_crash(event)?)
    }
}

fn open_csv(path: &Path, header: &[&str]) -> Result<csv::Writer<File>> {
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(header)?;
    writer.flush()?;
    Ok(writer)
}

fn request_row(record: &RequestRecord) -> [String; 11] {
    [
        record.timestamp.to_rfc3339(),
        record.tag.to_string(),
        record.service.clone(),
        record.fault.clone().unwrap_or_else(|| "NONE".to_owned()),
        record.chaos_active().to_string(),
        record.success.to_string(),
        record.latency_ms.to_string(),
        record.error.clone().unwrap_or_default(),
        record.circuit_state.to_string(),
        record.response_size.to_string(),
        record.prompt.clone(),
    ]
}

fn experiment_row(record: &ExperimentRecord) -> [String; 18] {
    let stats = &record.stats;
    [
        record.ended_at.to_rfc3339(),
        record.id.to_string(),
        record.fault.clone(),
        record.intensity.to_string(),
        record.service.clone(),
        record.planned_duration_secs.to_string(),
        stats.total_requests.to_string(),
        stats.successful_requests.to_string(),
        stats.failed_requests.to_string(),
        format!("{:.2}", stats.avg_latency_ms),
        stats.min_latency_ms.to_string(),
        stats.max_latency_ms.to_string(),
        format!("{:.2}", stats.success_rate),
        stats.circuit_breaker_trips.to_string(),
        format!("{:.2}", stats.recovery_secs),
        record.outcome.as_str().to_owned(),
        record.started_at.to_rfc3339(),
        record.abort_reason.clone().unwrap_or_default(),
    ]
}

/// Read a previously written experiment log back into records.
pub fn load_experiment_log(path: &Path) -> Result<Vec<ExperimentRecord>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let file = path.display().to_string();
    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row?;
        let parser = RowParser {
            row: &row,
            file: &file,
            line: index + 1,
        };
        records.push(parser.experiment()?);
    }
    Ok(records)
}

struct RowParser<'a> {
    row: &'a StringRecord,
    file: &'a str,
    line: usize,
}

impl RowParser<'_> {
    fn malformed(&self, reason: String) -> PersistenceError {
        PersistenceError::MalformedRow {
            file: self.file.to_owned(),
            row: self.line,
            reason,
        }
    }

    fn text(&self, index: usize) -> Result<&str> {
        self.row
            .get(index)
            .ok_or_else(|| self.malformed(format!("missing column {}", EXPERIMENT_LOG_HEADER[index])))
    }

    fn number<T: std::str::FromStr>(&self, index: usize) -> Result<T> {
        let raw = self.text(index)?;
        raw.trim().parse().map_err(|_| {
            self.malformed(format!(
                "column {} holds '{}'",
                EXPERIMENT_LOG_HEADER[index], raw
            ))
        })
    }

    fn timestamp(&self, index: usize) -> Result<DateTime<Utc>> {
        let raw = self.text(index)?;
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|at| at.with_timezone(&Utc))
            .map_err(|err| {
                self.malformed(format!("column {}: {}", EXPERIMENT_LOG_HEADER[index], err))
            })
    }

    fn experiment(&self) -> Result<ExperimentRecord> {
        let outcome = match self.text(15)?.trim() {
            "CLOSED" => ExperimentOutcome::Closed,
            "ABORTED" => ExperimentOutcome::Aborted,
            other => return Err(self.malformed(format!("unknown status '{other}'"))),
        };
        let abort_reason = Some(self.text(17)?.trim())
            .filter(|reason| !reason.is_empty())
            .map(str::to_owned);
        Ok(ExperimentRecord {
            id: self.number(1)?,
            fault: self.text(2)?.to_owned(),
            intensity: self.number(3)?,
            service: self.text(4)?.to_owned(),
            planned_duration_secs: self.number(5)?,
            started_at: self.timestamp(16)?,
            ended_at: self.timestamp(0)?,
            outcome,
            stats: ExperimentStats {
                total_requests: self.number(6)?,
                successful_requests: self.number(7)?,
                failed_requests: self.number(8)?,
                avg_latency_ms: self.number(9)?,
                min_latency_ms: self.number(10)?,
                max_latency_ms: self.number(11)?,
                success_rate: self.number(12)?,
                circuit_breaker_trips: self.number(13)?,
                recovery_secs: self.number(14)?,
            },
            abort_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use rmon_common::{CircuitState, RunTag};
    use tempfile::tempdir;

    fn request(tag: RunTag, success: bool) -> RequestRecord {
        RequestRecord {
            timestamp: Utc::now(),
            tag,
            service: "cohere".into(),
            fault: tag.experiment_id().map(|_| "error".to_owned()),
            success,
            latency_ms: 420,
            error: (!success).then(|| "Injected error, with comma".to_owned()),
            circuit_state: CircuitState::Closed,
            response_size: 64,
            prompt: "Explain data science".into(),
        }
    }

    fn experiment(id: u64, outcome: ExperimentOutcome) -> ExperimentRecord {
        let records = vec![request(RunTag::Experiment(id), true), request(RunTag::Experiment(id), false)];
        ExperimentRecord {
            id,
            fault: "error".into(),
            intensity: 50,
            service: "cohere".into(),
            planned_duration_secs: 300,
            started_at: Utc::now(),
            ended_at: Utc::now(),
            outcome,
            stats: ExperimentStats::from_records(&records, 1, Duration::from_secs(180)),
            abort_reason: (outcome == ExperimentOutcome::Aborted).then(|| "cancelled".to_owned()),
        }
    }

    #[test]
    fn writes_headers_and_rows() {
        let dir = tempdir().unwrap();
        let recorder = MetricsRecorder::create(dir.path(), "20240101_000000").unwrap();
        recorder.record_request(&request(RunTag::Experiment(1), false)).unwrap();
        recorder.record_request(&request(RunTag::Normal, true)).unwrap();

        let contents = std::fs::read_to_string(&recorder.paths().request_log).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), REQUEST_LOG_HEADER.join(","));
        let first = lines.next().unwrap();
        assert!(first.contains(",1,cohere,error,true,false,420,\"Injected error, with comma\",CLOSED,64,"));
        let second = lines.next().unwrap();
        assert!(second.contains(",NORMAL,cohere,NONE,false,true,"));

        let tally = recorder.tally();
        assert_eq!(tally.total, 2);
        assert_eq!(tally.experiment, 1);
        assert_eq!(tally.load, 1);
    }

    #[test]
    fn experiment_log_round_trips_through_loader() {
        let dir = tempdir().unwrap();
        let recorder = MetricsRecorder::create(dir.path(), "stamp").unwrap();
        recorder.record_experiment(&experiment(1, ExperimentOutcome::Closed)).unwrap();
        recorder.record_experiment(&experiment(2, ExperimentOutcome::Aborted)).unwrap();
        assert_eq!(recorder.experiments().len(), 2);

        let loaded = load_experiment_log(&recorder.paths().experiment_log).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, 1);
        assert_eq!(loaded[0].stats.total_requests, 2);
        assert_eq!(loaded[0].stats.success_rate, 50.0);
        assert_eq!(loaded[0].stats.recovery_secs, 180.0);
        assert_eq!(loaded[1].outcome, ExperimentOutcome::Aborted);
        assert_eq!(loaded[1].abort_reason.as_deref(), Some("cancelled"));
    }

    #[test]
    fn loader_reports_bad_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.csv");
        let mut content = EXPERIMENT_LOG_HEADER.join(",");
        content.push_str("\n2024-01-01T00:00:00Z,1,latency,lots,gemini\n");
        std::fs::write(&path, content).unwrap();
        let err = load_experiment_log(&path).unwrap_err();
        assert!(matches!(err, PersistenceError::Csv(_) | PersistenceError::MalformedRow { .. }));
    }

    #[test]
    fn concurrent_appends_never_interleave() {
        let dir = tempdir().unwrap();
        let recorder = Arc::new(MetricsRecorder::create(dir.path(), "burst").unwrap());
        let handles: Vec<_> = (0..8)
            .map(|burst| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        recorder
                            .record_request(&request(RunTag::LoadBurst(burst), true))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&recorder.paths().request_log)
            .unwrap();
        let rows: Vec<_> = reader.records().map(|row| row.unwrap()).collect();
        assert_eq!(rows.len(), 200);
        assert!(rows.iter().all(|row| row.len() == REQUEST_LOG_HEADER.len()));
        assert_eq!(recorder.tally().total, 200);
    }

    #[test]
    fn crashes_go_to_json_lines() {
        let dir = tempdir().unwrap();
        let recorder = MetricsRecorder::create(dir.path(), "crash").unwrap();
        recorder
            .append_crash(&CrashEvent {
                timestamp: Utc::now(),
                service: "backend".into(),
                reason: rmon_common::CrashReason::ProcessExited { code: Some(137) },
                diagnostics: String::new(),
            })
            .unwrap();
        let count = crate::replay_crash_log(&recorder.paths().crash_log, |_| Ok(())).unwrap();
        assert_eq!(count, 1);
    }
}
