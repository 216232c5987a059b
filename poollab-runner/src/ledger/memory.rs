//! In-process ledger for tests and dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use poollab_core::domain::{LogEvent, ResultRecord, Task, TaskId};

use super::{Ledger, LedgerError, StatusUpdate, WriteOutcome};

#[derive(Default)]
struct State {
    tasks: BTreeMap<TaskId, Task>,
    logs: Vec<LogEvent>,
    log_keys: HashSet<(TaskId, u64)>,
    results: Vec<ResultRecord>,
    result_index: HashMap<String, usize>,
    offline: bool,
    calls: usize,
}

/// Idempotent in-memory ledger. Can be switched offline to simulate an
/// unreachable remote.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// While offline every write fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Write attempts seen, including failed ones.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    pub fn task(&self, task_id: &TaskId) -> Option<Task> {
        self.lock().tasks.get(task_id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.values().cloned().collect()
    }

    /// Log events for a task ordered by `seq`.
    pub fn logs(&self, task_id: &TaskId) -> Vec<LogEvent> {
        let mut logs: Vec<LogEvent> = self
            .lock()
            .logs
            .iter()
            .filter(|e| &e.task_id == task_id)
            .cloned()
            .collect();
        logs.sort_by_key(|e| e.seq);
        logs
    }

    /// Results for a task in write order.
    pub fn results(&self, task_id: &TaskId) -> Vec<ResultRecord> {
        self.lock()
            .results
            .iter()
            .filter(|r| &r.task_id == task_id)
            .cloned()
            .collect()
    }

    fn begin(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        let mut state = self.lock();
        state.calls += 1;
        if state.offline {
            return Err(LedgerError::Transport {
                url: "memory://".into(),
                detail: "ledger offline".into(),
            });
        }
        Ok(state)
    }
}

impl Ledger for MemoryLedger {
    fn name(&self) -> &str {
        "memory"
    }

    fn create_task(&self, task: &Task) -> Result<WriteOutcome, LedgerError> {
        let mut state = self.begin()?;
        if state.tasks.contains_key(&task.task_id) {
            return Ok(WriteOutcome::Duplicate);
        }
        state.tasks.insert(task.task_id.clone(), task.clone());
        Ok(WriteOutcome::Applied)
    }

    fn append_log(&self, event: &LogEvent) -> Result<WriteOutcome, LedgerError> {
        let mut state = self.begin()?;
        if !state.log_keys.insert((event.task_id.clone(), event.seq)) {
            return Ok(WriteOutcome::Duplicate);
        }
        state.logs.push(event.clone());
        Ok(WriteOutcome::Applied)
    }

    fn write_result(&self, result: &ResultRecord) -> Result<WriteOutcome, LedgerError> {
        let mut state = self.begin()?;
        let key = result.result_id.0.clone();
        if let Some(&idx) = state.result_index.get(&key) {
            // Only the report path may change after creation.
            if state.results[idx].excel_path.is_none() && result.excel_path.is_some() {
                state.results[idx].excel_path = result.excel_path.clone();
                return Ok(WriteOutcome::Applied);
            }
            return Ok(WriteOutcome::Duplicate);
        }
        let idx = state.results.len();
        state.results.push(result.clone());
        state.result_index.insert(key, idx);
        Ok(WriteOutcome::Applied)
    }

    fn update_task_status(&self, update: &StatusUpdate) -> Result<WriteOutcome, LedgerError> {
        let mut state = self.begin()?;
        let task = state
            .tasks
            .get_mut(&update.task_id)
            .ok_or_else(|| LedgerError::UnknownTask(update.task_id.clone()))?;
        if task.status.is_terminal() {
            return Ok(WriteOutcome::AlreadyTerminal);
        }
        task.status = update.status;
        task.error_message = update.error_message.clone();
        task.completed_at = update.completed_at;
        Ok(WriteOutcome::Applied)
    }
}
