//! Fire-and-forget log event delivery.
//!
//! [`LedgerRecorder`] numbers events per task, mirrors them to `tracing`, and
//! hands them to a background thread that writes them to the ledger. A slow or
//! failing remote never blocks the caller: failed writes land in the fallback
//! journal, and a circuit breaker stops hammering a dead remote. When the
//! breaker closes again the journal is replayed before new writes.

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use poollab_core::data::{CircuitBreaker, Permit};
use poollab_core::domain::{EventKind, LogEvent, TaskId};

use crate::ledger::{FallbackJournal, JournalEntry, Ledger};

/// Destination for structured log events.
pub trait EventSink: Send + Sync {
    /// Assign the next `seq` for the event's task and deliver it. Must not
    /// block on remote I/O.
    fn record(&self, event: LogEvent);

    /// Block until previously recorded events have been handled.
    fn flush(&self) {}
}

fn mirror(event: &LogEvent) {
    match event.event {
        EventKind::Error => tracing::warn!(
            task_id = %event.task_id, seq = event.seq, skill = %event.skill_name,
            data = %event.data, "{}", event.message
        ),
        EventKind::Retry => tracing::info!(
            task_id = %event.task_id, seq = event.seq, skill = %event.skill_name,
            "{}", event.message
        ),
        EventKind::Start | EventKind::Complete => tracing::debug!(
            task_id = %event.task_id, seq = event.seq, skill = %event.skill_name,
            kind = %event.event, "{}", event.message
        ),
    }
}

#[derive(Default)]
struct SeqCounter(HashMap<TaskId, u64>);

impl SeqCounter {
    fn next(&mut self, task_id: &TaskId) -> u64 {
        let seq = self.0.entry(task_id.clone()).or_insert(0);
        *seq += 1;
        *seq
    }
}

// ─── Recorder ───────────────────────────────────────────────────────

enum Command {
    Event(LogEvent),
    Flush(Sender<()>),
}

struct Shared {
    tx: Option<Sender<Command>>,
    seqs: SeqCounter,
}

pub struct LedgerRecorder {
    shared: Mutex<Shared>,
    breaker: Arc<CircuitBreaker>,
    handle: Option<JoinHandle<()>>,
}

impl LedgerRecorder {
    /// Start the recorder thread. `cooldown` is how long the breaker stays
    /// open after three consecutive failed writes.
    pub fn spawn(
        ledger: Arc<dyn Ledger>,
        journal: Arc<FallbackJournal>,
        cooldown: Duration,
    ) -> std::io::Result<Self> {
        let breaker = Arc::new(CircuitBreaker::new(cooldown).with_threshold(3));
        let (tx, rx) = mpsc::channel::<Command>();

        let worker_breaker = Arc::clone(&breaker);
        let handle = thread::Builder::new()
            .name("poollab-recorder".into())
            .spawn(move || {
                for command in rx {
                    match command {
                        Command::Event(event) => {
                            deliver(ledger.as_ref(), &journal, &worker_breaker, event)
                        }
                        Command::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })?;

        Ok(Self {
            shared: Mutex::new(Shared {
                tx: Some(tx),
                seqs: SeqCounter::default(),
            }),
            breaker,
            handle: Some(handle),
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn deliver(ledger: &dyn Ledger, journal: &FallbackJournal, breaker: &CircuitBreaker, event: LogEvent) {
    match breaker.permit() {
        Permit::Refused => {
            defer(journal, event);
            return;
        }
        Permit::Reopened => {
            if let Err(e) = journal.replay(ledger) {
                tracing::warn!(error = %e, "journal replay after breaker reset failed");
            }
        }
        Permit::Allowed => {}
    }

    match ledger.append_log(&event) {
        Ok(_) => breaker.record_success(),
        Err(e) if e.is_retryable() => {
            breaker.record_failure();
            if breaker.is_open() {
                tracing::warn!(error = %e, ledger = ledger.name(), "ledger circuit breaker opened");
            }
            defer(journal, event);
        }
        Err(e) => {
            tracing::error!(task_id = %event.task_id, seq = event.seq, error = %e, "ledger rejected log event");
        }
    }
}

fn defer(journal: &FallbackJournal, event: LogEvent) {
    let (task_id, seq) = (event.task_id.clone(), event.seq);
    if let Err(e) = journal.append(&JournalEntry::Log(event)) {
        tracing::error!(%task_id, seq, error = %e, "log event lost: journal append failed");
    }
}

impl EventSink for LedgerRecorder {
    fn record(&self, mut event: LogEvent) {
        let mut shared = self.lock();
        event.seq = shared.seqs.next(&event.task_id);
        mirror(&event);
        if let Some(tx) = &shared.tx {
            if tx.send(Command::Event(event)).is_err() {
                tracing::error!("recorder thread is gone; log event dropped");
            }
        }
    }

    fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        {
            let shared = self.lock();
            match &shared.tx {
                Some(tx) if tx.send(Command::Flush(ack_tx)).is_ok() => {}
                _ => return,
            }
        }
        // an Err means the worker exited, which also drains the queue
        let _ = ack_rx.recv();
    }
}

impl Drop for LedgerRecorder {
    fn drop(&mut self) {
        self.lock().tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("recorder thread panicked");
            }
        }
    }
}

// ─── In-memory sink ─────────────────────────────────────────────────

/// Keeps every event in memory. Used by tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    inner: Mutex<(SeqCounter, Vec<LogEvent>)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .1
            .clone()
    }
}

impl EventSink for MemorySink {
    fn record(&self, mut event: LogEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        event.seq = inner.0.next(&event.task_id);
        mirror(&event);
        inner.1.push(event);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
