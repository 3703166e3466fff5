//! Append-only structured event stream (C9).
//!
//! One JSON record per line, written with a single buffered write plus an
//! explicit flush so a crash never leaves a partial line behind. Readers
//! (dashboards) tail the file; the engine itself never reads it back.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Event severity, exposed so dashboards can filter without parsing
/// `event` names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// One event log record: `{timestamp, severity, event, ...fields}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub event: String,
    #[serde(flatten)]
    pub fields: Value,
}

impl Event {
    pub fn new(event: impl Into<String>, severity: Severity, fields: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            event: event.into(),
            fields,
        }
    }
}

/// Append-only writer for `LOG_DIR/pipeline.jsonl`.
pub struct EventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line. Line-atomic: the line is
    /// fully formatted in memory before the write call, so no partial
    /// JSON can ever land in the file.
    pub fn append(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = self.file.lock().expect("event log mutex poisoned");
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn info(&self, event: &str, fields: Value) -> Result<()> {
        self.append(&Event::new(event, Severity::Info, fields))
    }

    pub fn warn(&self, event: &str, fields: Value) -> Result<()> {
        self.append(&Event::new(event, Severity::Warn, fields))
    }

    pub fn error(&self, event: &str, fields: Value) -> Result<()> {
        self.append(&Event::new(event, Severity::Error, fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("pipeline.jsonl")).unwrap();
        log.info("processed", json!({"job_id": "abc"})).unwrap();
        log.warn("chunk_failed", json!({"job_id": "abc", "chunk_index": 2}))
            .unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Event = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event, "processed");
        assert_eq!(first.severity, Severity::Info);
        assert_eq!(first.fields["job_id"], "abc");
    }

    #[test]
    fn reopening_appends_rather_than_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.jsonl");
        EventLog::open(&path).unwrap().info("first", json!({})).unwrap();
        EventLog::open(&path).unwrap().info("second", json!({})).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
