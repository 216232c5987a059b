//! Task/result ledger: durable, idempotent bookkeeping of task lifecycle,
//! result rows and log events.
//!
//! Writes are keyed so repeating one is harmless: tasks by task id, results by
//! result id, log events by `(task id, seq)`. A second terminal status update
//! reports [`WriteOutcome::AlreadyTerminal`] and changes nothing.

pub mod http;
pub mod journal;
pub mod memory;

pub use http::HttpLedger;
pub use journal::{FallbackJournal, JournalEntry, JournalError, ReplaySummary};
pub use memory::MemoryLedger;

use chrono::{DateTime, Utc};
use poollab_core::domain::{LogEvent, ResultRecord, Task, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a ledger write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The same key was written before; nothing changed.
    Duplicate,
    /// The task had already reached a terminal status.
    AlreadyTerminal,
}

/// Terminal (or running) status change for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            status: task.status,
            error_message: task.error_message.clone(),
            completed_at: task.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger unreachable at {url}: {detail}")]
    Transport { url: String, detail: String },

    #[error("ledger server error {status} at {url}: {body}")]
    Server { status: u16, url: String, body: String },

    #[error("ledger rejected write to {url} with {status}: {body}")]
    Rejected { status: u16, url: String, body: String },

    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("invalid ledger response from {url}: {detail}")]
    InvalidResponse { url: String, detail: String },

    #[error("ledger circuit breaker is open")]
    BreakerOpen,
}

impl LedgerError {
    /// Transport failures, 5xx and writes that arrive before their task are
    /// worth repeating; 4xx rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Transport { .. }
            | LedgerError::Server { .. }
            | LedgerError::UnknownTask(_)
            | LedgerError::BreakerOpen => true,
            LedgerError::Rejected { .. } | LedgerError::InvalidResponse { .. } => false,
        }
    }
}

/// Durable store for tasks, results and log events.
pub trait Ledger: Send + Sync {
    /// Short name for log lines, e.g. `memory` or `http`.
    fn name(&self) -> &str;

    fn create_task(&self, task: &Task) -> Result<WriteOutcome, LedgerError>;

    fn append_log(&self, event: &LogEvent) -> Result<WriteOutcome, LedgerError>;

    fn write_result(&self, result: &ResultRecord) -> Result<WriteOutcome, LedgerError>;

    fn update_task_status(&self, update: &StatusUpdate) -> Result<WriteOutcome, LedgerError>;
}
