use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// The run lifecycle as it lands in `events.jsonl`. The vocabulary is
/// closed: every line the orchestrator writes is one of these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    RunStarted {
        flow: String,
        total: usize,
    },
    TaskCompleted {
        task: usize,
        label: String,
    },
    TaskFailed {
        task: usize,
        label: String,
        error: String,
    },
    UsageRecorded {
        task: usize,
        input_tokens: u64,
        output_tokens: u64,
        estimated_cost_usd: f64,
    },
    RunCompleted {
        attempted: usize,
        succeeded: usize,
        failed: usize,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::RunStarted { .. } => "run_started",
            SessionEvent::TaskCompleted { .. } => "task_completed",
            SessionEvent::TaskFailed { .. } => "task_failed",
            SessionEvent::UsageRecorded { .. } => "usage_recorded",
            SessionEvent::RunCompleted { .. } => "run_completed",
        }
    }
}

/// Append-only writer for the session's `events.jsonl`.
///
/// Each event serializes to one compact JSON object per line, stamped with
/// the owning `session_id` and an RFC 3339 `ts` alongside the event fields.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event: &SessionEvent) -> anyhow::Result<Value> {
        let mut line_value = serde_json::to_value(event)?;
        let Some(object) = line_value.as_object_mut() else {
            bail!("session event did not serialize to an object");
        };
        object.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        object.insert("ts".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&line_value)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(line_value)
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-7");

        let emitted = writer.emit(&SessionEvent::RunStarted {
            flow: "macroSet".to_string(),
            total: 4,
        })?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], json!("run_started"));
        assert_eq!(parsed["session_id"], json!("session-7"));
        assert_eq!(parsed["flow"], json!("macroSet"));
        assert_eq!(parsed["total"], json!(4));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn emit_appends_one_line_per_event() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-7");

        writer.emit(&SessionEvent::TaskCompleted {
            task: 0,
            label: "Full Grid".to_string(),
        })?;
        writer.emit(&SessionEvent::RunCompleted {
            attempted: 1,
            succeeded: 1,
            failed: 0,
        })?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(first["type"], json!("task_completed"));
        assert_eq!(second["type"], json!("run_completed"));
        Ok(())
    }

    #[test]
    fn event_tags_match_their_kind() {
        let event = SessionEvent::TaskFailed {
            task: 2,
            label: "Material Study".to_string(),
            error: "quota exhausted".to_string(),
        };
        assert_eq!(event.kind(), "task_failed");
        let value = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(value["type"].as_str(), Some(event.kind()));
        assert_eq!(value["error"], json!("quota exhausted"));
    }
}
