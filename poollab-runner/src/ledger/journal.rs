//! Local fallback journal for ledger writes that could not reach the remote.
//!
//! JSONL, one [`JournalEntry`] per line. Appends are flushed immediately;
//! [`FallbackJournal::replay`] pushes entries in order and rewrites the file
//! with whatever is still pending (write `.tmp`, then rename). The file lock
//! is not held while the remote ledger is called, so appends made during a
//! replay land in the rewritten file.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use poollab_core::domain::{LogEvent, ResultRecord, Task, TaskId};

use super::{Ledger, LedgerError, StatusUpdate, WriteOutcome};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode journal entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One deferred ledger write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum JournalEntry {
    Task(Task),
    Log(LogEvent),
    Result(ResultRecord),
    Status(StatusUpdate),
}

impl JournalEntry {
    pub fn task_id(&self) -> &TaskId {
        match self {
            JournalEntry::Task(t) => &t.task_id,
            JournalEntry::Log(e) => &e.task_id,
            JournalEntry::Result(r) => &r.task_id,
            JournalEntry::Status(s) => &s.task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JournalEntry::Task(_) => "task",
            JournalEntry::Log(_) => "log",
            JournalEntry::Result(_) => "result",
            JournalEntry::Status(_) => "status",
        }
    }

    /// Perform the write this entry stands for.
    pub fn apply(&self, ledger: &dyn Ledger) -> Result<WriteOutcome, LedgerError> {
        match self {
            JournalEntry::Task(t) => ledger.create_task(t),
            JournalEntry::Log(e) => ledger.append_log(e),
            JournalEntry::Result(r) => ledger.write_result(r),
            JournalEntry::Status(s) => ledger.update_task_status(s),
        }
    }
}

/// Counts from one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    /// Still pending; left in the journal.
    pub kept: usize,
    /// Rejected by the ledger; removed.
    pub dropped: usize,
}

#[derive(Debug)]
pub struct FallbackJournal {
    path: PathBuf,
    /// Guards the file.
    lock: Mutex<()>,
    /// One replay at a time.
    replaying: Mutex<()>,
}

impl FallbackJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            replaying: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn io_err(&self, source: io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let json = serde_json::to_string(entry)?;
        let _guard = self.guard();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        writeln!(file, "{json}").map_err(|e| self.io_err(e))?;
        file.flush().map_err(|e| self.io_err(e))?;

        tracing::warn!(
            task_id = %entry.task_id(),
            kind = entry.kind(),
            path = %self.path.display(),
            "ledger write deferred to fallback journal"
        );
        Ok(())
    }

    /// All readable entries. Malformed lines are skipped.
    pub fn read_all(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let _guard = self.guard();
        self.read_unlocked()
    }

    fn read_unlocked(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let mut entries = Vec::new();
        for (lineno, line) in io::BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| self.io_err(e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(line = lineno + 1, error = %e, "skipping malformed journal line")
                }
            }
        }
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize, JournalError> {
        Ok(self.read_all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, JournalError> {
        Ok(self.len()? == 0)
    }

    /// Push every entry to `ledger` in order.
    ///
    /// Once the remote looks unreachable the remaining entries are kept
    /// without being tried. Rejected entries are dropped.
    pub fn replay(&self, ledger: &dyn Ledger) -> Result<ReplaySummary, JournalError> {
        let _replaying = self.replaying.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = self.read_all()?;
        if entries.is_empty() {
            return Ok(ReplaySummary::default());
        }
        let snapshot_len = entries.len();

        let mut summary = ReplaySummary::default();
        let mut pending = Vec::new();
        let mut remote_down = false;
        for entry in entries {
            if remote_down {
                pending.push(entry);
                continue;
            }
            match entry.apply(ledger) {
                Ok(_) => summary.applied += 1,
                Err(e) if e.is_retryable() => {
                    remote_down = !matches!(e, LedgerError::UnknownTask(_));
                    tracing::debug!(task_id = %entry.task_id(), kind = entry.kind(), error = %e, "journal entry still pending");
                    pending.push(entry);
                }
                Err(e) => {
                    tracing::error!(task_id = %entry.task_id(), kind = entry.kind(), error = %e, "ledger rejected journal entry; dropping it");
                    summary.dropped += 1;
                }
            }
        }

        // only appends touch the file meanwhile, so anything past the
        // snapshot arrived during the replay
        let _guard = self.guard();
        let current = self.read_unlocked()?;
        let arrived = current.len().saturating_sub(snapshot_len);
        pending.extend(current.into_iter().skip(snapshot_len));
        summary.kept = pending.len();
        self.rewrite(&pending)?;
        if arrived > 0 {
            tracing::debug!(arrived, "journal entries appended during replay kept");
        }

        tracing::info!(
            applied = summary.applied,
            kept = summary.kept,
            dropped = summary.dropped,
            ledger = ledger.name(),
            "replayed fallback journal"
        );
        Ok(summary)
    }

    fn rewrite(&self, entries: &[JournalEntry]) -> Result<(), JournalError> {
        if entries.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io_err(e)),
            };
        }

        let mut body = String::new();
        for entry in entries {
            body.push_str(&serde_json::to_string(entry)?);
            body.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, body).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use chrono::Utc;
    use poollab_core::domain::{EventKind, TaskRequest, TaskStatus};
    use poollab_core::PerformanceMetrics;
    use std::collections::BTreeMap;

    fn task(id: &str) -> Task {
        let req = TaskRequest::specified(vec!["多AU".into()], "5y".into(), "equal_weight".into());
        Task::start(TaskId::from(id), &req, serde_json::json!({}), Utc::now())
    }

    fn status(id: &str) -> JournalEntry {
        JournalEntry::Status(StatusUpdate {
            task_id: TaskId::from(id),
            status: TaskStatus::Completed,
            error_message: None,
            completed_at: Some(Utc::now()),
        })
    }

    #[test]
    fn append_creates_parent_dirs_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FallbackJournal::new(dir.path().join("nested/out/ledger-fallback.jsonl"));
        assert!(journal.is_empty().unwrap());

        journal.append(&JournalEntry::Task(task("t1"))).unwrap();
        let ev = LogEvent::new(&TaskId::from("t1"), "strategy", EventKind::Start, "go", serde_json::Value::Null);
        journal.append(&JournalEntry::Log(ev)).unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind(), "task");
        assert_eq!(entries[1].kind(), "log");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.jsonl");
        let journal = FallbackJournal::new(&path);
        journal.append(&status("t1")).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        journal.append(&status("t2")).unwrap();

        assert_eq!(journal.len().unwrap(), 2);
    }

    #[test]
    fn replay_applies_in_order_and_empties_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FallbackJournal::new(dir.path().join("j.jsonl"));
        let t = task("t1");
        journal.append(&JournalEntry::Task(t.clone())).unwrap();
        let r = ResultRecord::strategy(&t.task_id, "多AU", "5y", BTreeMap::new(), PerformanceMetrics::default());
        journal.append(&JournalEntry::Result(r)).unwrap();
        journal.append(&status("t1")).unwrap();

        let ledger = MemoryLedger::new();
        let summary = journal.replay(&ledger).unwrap();
        assert_eq!(summary, ReplaySummary { applied: 3, kept: 0, dropped: 0 });
        assert!(!journal.path().exists());
        assert_eq!(ledger.task(&t.task_id).unwrap().status, TaskStatus::Completed);
        assert_eq!(ledger.results(&t.task_id).len(), 1);
    }

    #[test]
    fn replay_keeps_everything_while_remote_is_down() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FallbackJournal::new(dir.path().join("j.jsonl"));
        journal.append(&JournalEntry::Task(task("t1"))).unwrap();
        journal.append(&status("t1")).unwrap();

        let ledger = MemoryLedger::new();
        ledger.set_offline(true);
        let summary = journal.replay(&ledger).unwrap();
        assert_eq!(summary.kept, 2);
        // the second entry is not tried once the first hit a dead remote
        assert_eq!(ledger.calls(), 1);
        assert_eq!(journal.len().unwrap(), 2);

        ledger.set_offline(false);
        assert_eq!(journal.replay(&ledger).unwrap().applied, 2);
        assert!(journal.is_empty().unwrap());
    }

    /// Ledger that appends to the journal from inside a write, as the
    /// orchestrator does when a write fails while a replay runs.
    struct AppendingLedger {
        inner: MemoryLedger,
        journal: std::sync::Arc<FallbackJournal>,
    }

    impl Ledger for AppendingLedger {
        fn name(&self) -> &str {
            "appending"
        }

        fn create_task(&self, task: &Task) -> Result<WriteOutcome, LedgerError> {
            self.journal.append(&status("late")).unwrap();
            self.inner.create_task(task)
        }

        fn append_log(&self, event: &LogEvent) -> Result<WriteOutcome, LedgerError> {
            self.inner.append_log(event)
        }

        fn write_result(&self, result: &ResultRecord) -> Result<WriteOutcome, LedgerError> {
            self.inner.write_result(result)
        }

        fn update_task_status(&self, update: &StatusUpdate) -> Result<WriteOutcome, LedgerError> {
            self.inner.update_task_status(update)
        }
    }

    #[test]
    fn appends_during_replay_are_not_blocked_or_lost() {
        let dir = tempfile::tempdir().unwrap();
        let journal = std::sync::Arc::new(FallbackJournal::new(dir.path().join("j.jsonl")));
        journal.append(&JournalEntry::Task(task("t1"))).unwrap();
        journal.append(&status("t1")).unwrap();

        let ledger = AppendingLedger {
            inner: MemoryLedger::new(),
            journal: journal.clone(),
        };
        let summary = journal.replay(&ledger).unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.kept, 1);

        let kept = journal.read_all().unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].task_id(), &TaskId::from("late"));
    }

    #[test]
    fn replay_keeps_status_for_unknown_task_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FallbackJournal::new(dir.path().join("j.jsonl"));
        journal.append(&status("ghost")).unwrap();
        journal.append(&JournalEntry::Task(task("t2"))).unwrap();

        let ledger = MemoryLedger::new();
        let summary = journal.replay(&ledger).unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.kept, 1);
        let kept = journal.read_all().unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].kind(), "status");
        assert_eq!(kept[0].task_id(), &TaskId::from("ghost"));
    }
}
