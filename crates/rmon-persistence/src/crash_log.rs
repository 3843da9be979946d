//! ---
//! rmon_section: "03-persistence-logging"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "JSON-lines crash history written by the supervisor."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rmon_common::CrashEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PersistenceError, Result};

/// Format revision of the crash log.
pub const CRASH_LOG_VERSION: u16 = 1;

/// First line of every crash log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CrashLogHeader {
    version: u16,
    created_at: DateTime<Utc>,
    run_id: Uuid,
}

impl CrashLogHeader {
    fn new() -> Self {
        Self {
            version: CRASH_LOG_VERSION,
            created_at: Utc::now(),
            run_id: Uuid::new_v4(),
        }
    }
}

/// One persisted crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashLogEntry {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// The crash as observed by the supervisor.
    pub event: CrashEvent,
}

/// Append-only writer for the crash log.
pub struct CrashLogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl std::fmt::Debug for CrashLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashLogWriter")
            .field("path", &self.path)
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

impl CrashLogWriter {
    /// Open a crash log for appending, writing a header if the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let exists = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        if !exists || fs::metadata(path)?.len() == 0 {
            let line = serde_json::to_string(&CrashLogHeader::new())?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            return Ok(Self {
                path: path.to_path_buf(),
                writer,
                next_sequence: 0,
            });
        }

        let next_sequence = last_sequence(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Append a crash and return its sequence number.
    pub fn append(&mut self, event: &CrashEvent) -> Result<u64> {
        let entry = CrashLogEntry {
            sequence: self.next_sequence + 1,
            event: event.clone(),
        };
        let line = serde_json::to_string(&entry)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.next_sequence = entry.sequence;
        Ok(entry.sequence)
    }

    /// Flush buffered writes to the underlying file handle.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn last_sequence(path: &Path) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut last_seq = 0u64;
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<CrashLogEntry>(&line) {
            last_seq = entry.sequence;
        }
    }
    Ok(last_seq)
}

/// Replay the log in order, invoking the callback for each entry.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize>
where
    F: FnMut(CrashLogEntry) -> Result<()>,
{
    let mut count = 0usize;
    for entry in CrashLogReader::open(path)? {
        handler(entry?)?;
        count += 1;
    }
    Ok(count)
}

/// Streaming iterator over crash log entries.
pub struct CrashLogReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl CrashLogReader {
    /// Open the log for sequential reading, skipping the header.
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut header = String::new();
        reader.read_line(&mut header)?;
        Ok(Self {
            lines: reader.lines(),
        })
    }
}

impl Iterator for CrashLogReader {
    type Item = Result<CrashLogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    return Some(serde_json::from_str(&line).map_err(PersistenceError::from))
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmon_common::CrashReason;
    use tempfile::tempdir;

    fn crash(service: &str, reason: CrashReason) -> CrashEvent {
        CrashEvent {
            timestamp: Utc::now(),
            service: service.into(),
            reason,
            diagnostics: "[stderr] boom".into(),
        }
    }

    #[test]
    fn append_and_replay_crashes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crash_log.jsonl");
        let mut writer = CrashLogWriter::open(&path).unwrap();
        writer
            .append(&crash("backend", CrashReason::ProcessExited { code: Some(1) }))
            .unwrap();
        writer
            .append(&crash(
                "frontend",
                CrashReason::HealthCheckExhausted {
                    failures: 3,
                    last_reason: "Connection refused".into(),
                },
            ))
            .unwrap();

        let mut services = Vec::new();
        let count = replay(&path, |entry| {
            services.push(entry.event.service);
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 2);
        assert_eq!(services, vec!["backend", "frontend"]);
    }

    #[test]
    fn reopening_continues_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("crash_log.jsonl");
        {
            let mut writer = CrashLogWriter::open(&path).unwrap();
            writer
                .append(&crash("backend", CrashReason::StartFailed { error: "ENOENT".into() }))
                .unwrap();
        }
        let mut writer = CrashLogWriter::open(&path).unwrap();
        let seq = writer
            .append(&crash("backend", CrashReason::ProcessExited { code: None }))
            .unwrap();
        assert_eq!(seq, 2);

        let sequences: Vec<_> = CrashLogReader::open(&path)
            .unwrap()
            .map(|entry| entry.unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }
}
