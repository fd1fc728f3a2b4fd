//! Append-only event log (`<home>/events.jsonl`), one JSON object per line.
//!
//! This is product output: it is always written and is unaffected by
//! `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::slug::rfc3339_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Completed,
    Retrying,
    Failed,
    Waiting,
    Recovered,
}

/// One lifecycle decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub at: String,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    pub fn new(status: EventStatus, at: DateTime<Utc>) -> Self {
        Self {
            at: rfc3339_millis(at),
            status,
            task_id: None,
            reason: None,
            task_file: None,
            run_dir: None,
            agent: None,
            tool: None,
            branch: None,
            attempt: None,
            max_attempts: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single line.
    pub fn append(&self, event: &Event) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(event).context("serialize event")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))
    }

    /// Read every event back. Lines that do not parse are skipped.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        Ok(contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn append_writes_one_compact_line_per_event() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::new(temp.path().join("events.jsonl"));

        let mut failed = Event::new(EventStatus::Failed, Utc::now());
        failed.task_id = Some("t1".to_string());
        failed.reason = Some("invalid_json".to_string());
        log.append(&failed).expect("append");
        log.append(&Event::new(EventStatus::Waiting, Utc::now()))
            .expect("append");

        let contents = fs::read_to_string(log.path()).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["status"], "failed");
        assert_eq!(first["taskId"], "t1");
        assert_eq!(first["reason"], "invalid_json");
        assert!(first.get("attempt").is_none());
        assert!(first.get("runDir").is_none());
    }

    #[test]
    fn read_all_round_trips_and_skips_garbage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::new(temp.path().join("events.jsonl"));
        let mut retry = Event::new(EventStatus::Retrying, Utc::now());
        retry.attempt = Some(1);
        retry.max_attempts = Some(2);
        log.append(&retry).expect("append");
        fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .and_then(|mut f| f.write_all(b"not json\n"))
            .expect("garbage");

        let events = log.read_all().expect("read");
        assert_eq!(events, vec![retry]);
    }

    #[test]
    fn read_all_on_missing_file_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::new(temp.path().join("none.jsonl"));
        assert!(log.read_all().expect("read").is_empty());
    }
}
