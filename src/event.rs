//! Append-only event log (spec.md §3 `Event`, §6 event log, §9 event-stream
//! consumers).
//!
//! Events are appended as JSON-lines, one writer at a time, rotated at a
//! size cap with numbered backups (`events.1.jsonl` … `events.N.jsonl`,
//! oldest numeric suffix is the oldest). The core doesn't implement
//! streaming to a dashboard — it only guarantees an ordered, readable log
//! that a pub/sub fan-out can tail.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Event priority, used for notification routing (spec.md §4.2 suppression
/// rule, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    Action,
    Warning,
    Info,
}

/// A dotted event type covering session transitions, PR lifecycle, CI,
/// review, and merge readiness (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventType(pub String);

impl EventType {
    pub fn session_status(status: &str) -> Self {
        EventType(format!("session.{status}"))
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub priority: Priority,
    pub session_id: String,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        priority: Priority,
        session_id: impl Into<String>,
        project_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            priority,
            session_id: session_id.into(),
            project_id: project_id.into(),
            timestamp: Utc::now(),
            message: message.into(),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Default rotation cap: 10 MiB (spec.md §6).
pub const DEFAULT_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

/// Single-writer, rotating, append-only JSON-lines event log.
pub struct EventLog {
    path: PathBuf,
    rotate_bytes: u64,
    writer: Mutex<()>,
}

impl EventLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_rotation(path, DEFAULT_ROTATE_BYTES)
    }

    pub fn with_rotation(path: impl Into<PathBuf>, rotate_bytes: u64) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            rotate_bytes,
            writer: Mutex::new(()),
        })
    }

    /// Appends one event, rotating the log first if it has grown past the
    /// configured cap. Serialized across concurrent callers by an internal
    /// async mutex, so events land in completion order (spec.md §5).
    pub async fn append(&self, event: &Event) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.rotate_if_needed()?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(event)
            .map_err(|e| crate::OrchestratorError::MetadataError(e.to_string()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if size < self.rotate_bytes {
            return Ok(());
        }

        let mut n = 1;
        while self.backup_path(n).exists() {
            n += 1;
        }
        // Shift existing backups up by one, oldest numeric suffix last.
        while n > 1 {
            std::fs::rename(self.backup_path(n - 1), self.backup_path(n))?;
            n -= 1;
        }
        std::fs::rename(&self.path, self.backup_path(1))?;
        Ok(())
    }

    fn backup_path(&self, n: u32) -> PathBuf {
        let file_name = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("events");
        self.path
            .with_file_name(format!("{file_name}.{n}.jsonl"))
    }

    /// Reads all events currently in the live log file (not rotated
    /// backups), in append order. Intended for tests and small-scale
    /// tailing; a real dashboard consumer would track a byte-offset cursor
    /// instead of re-reading from the top.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = std::io::BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .map_err(|e| crate::OrchestratorError::MetadataError(e.to_string()))?;
            events.push(event);
        }
        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
