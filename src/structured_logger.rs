//! Structured JSONL logger for debugging and event reconstruction.
//!
//! Machine-parseable log of everything the orchestrator observed and did:
//! snapshot reductions, derived stage events, and action submissions.
//! Entries carry monotonic sequence numbers, ISO 8601 timestamps with
//! microsecond precision, and a session id for correlation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Structured JSONL logger. Thread-safe; one file per orchestrator session.
pub struct StructuredLogger {
    session_id: String,
    seq: AtomicU64,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

/// A single log entry in JSONL format.
#[derive(Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number, unique across the session.
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds.
    pub ts: String,
    /// Orchestrator session ID.
    pub session_id: String,
    /// Component that emitted the log.
    pub component: String,
    /// Structured event data.
    pub event: Value,
}

impl StructuredLogger {
    /// Creates a logger writing to `<logs_dir>/events.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the logs directory cannot be created or the log
    /// file cannot be opened.
    pub fn new(session_id: &str, logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let log_path = logs_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            session_id: session_id.to_string(),
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
            log_path,
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Logs a structured event as one JSONL line.
    pub fn log(&self, component: &str, event: impl Serialize) {
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            session_id: self.session_id.clone(),
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Logs receipt of a workflow snapshot.
    pub fn log_snapshot(&self, job_id: &str, reduction_seq: u64, snapshot: impl Serialize) {
        self.log(
            "StagePoller",
            serde_json::json!({
                "type": "SnapshotObserved",
                "job_id": job_id,
                "reduction_seq": reduction_seq,
                "snapshot": snapshot
            }),
        );
    }

    /// Logs a derived stage event.
    pub fn log_stage_event(&self, reduction_seq: u64, event: impl Serialize) {
        self.log(
            "StageMachine",
            serde_json::json!({
                "type": "StageEvent",
                "reduction_seq": reduction_seq,
                "event": event
            }),
        );
    }

    /// Logs an action submission (approve, retry, decide) and its outcome.
    pub fn log_action(&self, action: &str, target: &str, success: bool) {
        self.log(
            "Action",
            serde_json::json!({
                "type": "ActionSubmitted",
                "action": action,
                "target": target,
                "success": success
            }),
        );
    }

    /// Logs a transient poll failure.
    pub fn log_poll_error(&self, component: &str, error: &str) {
        self.log(
            component,
            serde_json::json!({
                "type": "PollError",
                "error": error
            }),
        );
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }

    /// Returns the current session ID.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
