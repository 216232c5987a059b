//! Structured log events attached to a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::TaskId;

/// Serialized `data` payloads longer than this are replaced by a preview.
pub const MAX_EVENT_DATA_CHARS: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Start,
    Complete,
    Error,
    Retry,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Start => "START",
            EventKind::Complete => "COMPLETE",
            EventKind::Error => "ERROR",
            EventKind::Retry => "RETRY",
        };
        f.write_str(s)
    }
}

/// Append-only log event. `seq` orders events within a task and is assigned
/// by the event sink, not the emitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub task_id: TaskId,
    pub seq: u64,
    pub skill_name: String,
    pub event: EventKind,
    pub message: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(
        task_id: &TaskId,
        skill_name: &str,
        event: EventKind,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            task_id: task_id.clone(),
            seq: 0,
            skill_name: skill_name.to_string(),
            event,
            message: message.into(),
            data: bounded_data(data),
            created_at: Utc::now(),
        }
    }
}

fn bounded_data(data: serde_json::Value) -> serde_json::Value {
    let rendered = data.to_string();
    if rendered.chars().count() <= MAX_EVENT_DATA_CHARS {
        return data;
    }
    let preview: String = rendered.chars().take(MAX_EVENT_DATA_CHARS).collect();
    serde_json::json!({
        "truncated": true,
        "original_chars": rendered.chars().count(),
        "preview": preview,
    })
}
