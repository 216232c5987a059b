//! Uniform failure policy around every skill invocation.
//!
//! A supervised call is retried while its error is retryable and the attempt
//! budget (`retry_limit`, counting every invocation) lasts. After that, or at
//! once for a fatal error, the call escalates to an [`Operator`], which
//! decides between one more attempt, skipping the work, or aborting the task.
//! An abort raises a halt flag shared by every call in the task.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use poollab_core::domain::{EventKind, LogEvent, TaskId};
use poollab_core::skills::{FailureClass, SkillError};

use crate::config::{AppConfig, EscalationPolicy};
use crate::ledger::{FallbackJournal, JournalEntry, Ledger, LedgerError, WriteOutcome};
use crate::recorder::EventSink;

/// Errors the supervisor knows how to classify.
pub trait Supervised: std::fmt::Display {
    fn failure_class(&self) -> FailureClass;

    /// Short tag for log payloads.
    fn kind(&self) -> &'static str;
}

impl Supervised for SkillError {
    fn failure_class(&self) -> FailureClass {
        SkillError::failure_class(self)
    }

    fn kind(&self) -> &'static str {
        SkillError::kind(self)
    }
}

impl Supervised for LedgerError {
    fn failure_class(&self) -> FailureClass {
        if self.is_retryable() {
            FailureClass::Retryable
        } else {
            FailureClass::Fatal
        }
    }

    fn kind(&self) -> &'static str {
        "ledger"
    }
}

/// Result of a supervised call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    /// The operator dropped this piece of work; the task continues.
    Skipped(String),
    /// The task must stop.
    Halted(String),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            Outcome::Skipped(_) | Outcome::Halted(_) => None,
        }
    }
}

// ─── Operators ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorChoice {
    Retry,
    Skip,
    Abort,
}

/// What the operator is asked about.
#[derive(Debug, Clone)]
pub struct Escalation<'a> {
    pub skill: &'a str,
    pub subject: &'a str,
    pub attempts: u32,
    pub error: String,
    pub retryable: bool,
}

/// Decides what happens to a call that could not succeed on its own.
pub trait Operator: Send + Sync {
    fn decide(&self, escalation: &Escalation<'_>) -> OperatorChoice;

    /// Interactive operators are trusted to stop retrying themselves;
    /// automatic ones are bounded by `escalation_retries`.
    fn is_interactive(&self) -> bool {
        false
    }
}

/// Non-interactive operator applying a fixed policy.
#[derive(Debug, Clone, Copy)]
pub struct PolicyOperator {
    policy: EscalationPolicy,
}

impl PolicyOperator {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self { policy }
    }
}

impl Operator for PolicyOperator {
    fn decide(&self, _escalation: &Escalation<'_>) -> OperatorChoice {
        match self.policy {
            EscalationPolicy::Halt => OperatorChoice::Abort,
            EscalationPolicy::Retry => OperatorChoice::Retry,
            EscalationPolicy::Skip => OperatorChoice::Skip,
        }
    }
}

const MAX_PROMPTS: usize = 3;

/// Asks a human on a terminal. End of input counts as abort.
pub struct PromptOperator<R, W> {
    io: Mutex<(R, W)>,
}

impl<R, W> PromptOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        self.io.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PromptOperator<std::io::BufReader<std::io::Stdin>, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), std::io::stderr())
    }
}

fn parse_choice(answer: &str) -> Option<OperatorChoice> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "r" | "retry" => Some(OperatorChoice::Retry),
        "s" | "skip" => Some(OperatorChoice::Skip),
        "a" | "abort" | "q" => Some(OperatorChoice::Abort),
        _ => None,
    }
}

impl<R, W> Operator for PromptOperator<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn decide(&self, escalation: &Escalation<'_>) -> OperatorChoice {
        let mut guard = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let (input, output) = &mut *guard;
        let _ = writeln!(
            output,
            "\n[{}] {} failed after {} attempt(s): {}",
            escalation.skill, escalation.subject, escalation.attempts, escalation.error
        );
        for _ in 0..MAX_PROMPTS {
            let _ = write!(output, "  (r)etry, (s)kip, (a)bort? ");
            let _ = output.flush();
            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) | Err(_) => return OperatorChoice::Abort,
                Ok(_) => {
                    if let Some(choice) = parse_choice(&line) {
                        return choice;
                    }
                }
            }
        }
        OperatorChoice::Abort
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

// ─── Halt flag ──────────────────────────────────────────────────────

/// Task-wide stop signal. The first reason wins.
#[derive(Debug, Default)]
pub struct HaltFlag {
    raised: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl HaltFlag {
    pub fn raise(&self, reason: &str) {
        let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(reason.to_string());
        }
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ─── Supervisor ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorSettings {
    pub retry_limit: u32,
    pub escalation_retries: u32,
    /// Attempts per ledger write; the same bound as `retry_limit` unless
    /// configured apart.
    pub persist_attempts: u32,
    pub persist_backoff: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            escalation_retries: 1,
            persist_attempts: 2,
            persist_backoff: Duration::from_millis(200),
        }
    }
}

impl From<&AppConfig> for SupervisorSettings {
    fn from(app: &AppConfig) -> Self {
        let retry_limit = app.retry_limit.max(1);
        Self {
            retry_limit,
            escalation_retries: app.escalation_retries,
            persist_attempts: app.persist_attempts.unwrap_or(retry_limit).max(1),
            ..Self::default()
        }
    }
}

/// How a correctness-critical ledger write ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Written(WriteOutcome),
    /// Stored in the fallback journal for later replay.
    Deferred,
    /// Rejected by the ledger, or no journal could take it.
    Lost(String),
}

pub struct Supervisor {
    task_id: TaskId,
    settings: SupervisorSettings,
    operator: Arc<dyn Operator>,
    events: Arc<dyn EventSink>,
    halt: Arc<HaltFlag>,
    journal: Option<Arc<FallbackJournal>>,
}

impl Supervisor {
    pub fn new(
        task_id: TaskId,
        settings: SupervisorSettings,
        operator: Arc<dyn Operator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            task_id,
            settings,
            operator,
            events,
            halt: Arc::new(HaltFlag::default()),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Arc<FallbackJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_raised()
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.halt.reason()
    }

    pub fn halt(&self, reason: &str) {
        tracing::warn!(task_id = %self.task_id, %reason, "task halted");
        self.halt.raise(reason);
    }

    fn emit(&self, skill: &str, kind: EventKind, message: String, data: serde_json::Value) {
        self.events
            .record(LogEvent::new(&self.task_id, skill, kind, message, data));
    }

    fn halted_outcome<T>(&self) -> Outcome<T> {
        Outcome::Halted(self.halt_reason().unwrap_or_else(|| "task halted".into()))
    }

    /// Run `call` under the retry and escalation policy.
    pub fn run<T, E, F>(&self, skill: &str, subject: &str, mut call: F) -> Outcome<T>
    where
        E: Supervised,
        F: FnMut() -> Result<T, E>,
    {
        let mut budget = self.settings.retry_limit.max(1);
        let mut escalation_retries = 0u32;
        let mut attempt = 0u32;

        loop {
            if self.is_halted() {
                return self.halted_outcome();
            }
            attempt += 1;
            self.emit(
                skill,
                EventKind::Start,
                format!("{subject} attempt {attempt}"),
                serde_json::json!({ "subject": subject, "attempt": attempt }),
            );

            let err = match call() {
                Ok(value) => {
                    self.emit(
                        skill,
                        EventKind::Complete,
                        format!("{subject} done"),
                        serde_json::json!({ "subject": subject, "attempt": attempt }),
                    );
                    return Outcome::Done(value);
                }
                Err(err) => err,
            };

            let retryable = err.failure_class() == FailureClass::Retryable;
            let error = err.to_string();
            self.emit(
                skill,
                EventKind::Error,
                format!("{subject} failed: {error}"),
                serde_json::json!({
                    "subject": subject,
                    "attempt": attempt,
                    "error": error,
                    "error_kind": err.kind(),
                    "retryable": retryable,
                }),
            );

            if retryable && attempt < budget {
                self.emit(
                    skill,
                    EventKind::Retry,
                    format!("retrying {subject} ({}/{budget})", attempt + 1),
                    serde_json::json!({ "subject": subject, "next_attempt": attempt + 1 }),
                );
                continue;
            }

            if self.is_halted() {
                return self.halted_outcome();
            }
            let reason = format!("{skill} failed for {subject}: {error}");
            let choice = self.operator.decide(&Escalation {
                skill,
                subject,
                attempts: attempt,
                error,
                retryable,
            });
            tracing::info!(task_id = %self.task_id, skill, subject, ?choice, attempts = attempt, "escalation");

            match choice {
                OperatorChoice::Retry
                    if self.operator.is_interactive()
                        || escalation_retries < self.settings.escalation_retries =>
                {
                    escalation_retries += 1;
                    budget = attempt + 1;
                    self.emit(
                        skill,
                        EventKind::Retry,
                        format!("escalation retry of {subject}"),
                        serde_json::json!({ "subject": subject, "escalation": escalation_retries }),
                    );
                }
                OperatorChoice::Retry => {
                    let reason = format!("{reason} (escalation retries exhausted)");
                    self.halt(&reason);
                    return Outcome::Halted(reason);
                }
                OperatorChoice::Skip => {
                    tracing::warn!(task_id = %self.task_id, skill, subject, "skipped after escalation");
                    return Outcome::Skipped(reason);
                }
                OperatorChoice::Abort => {
                    self.halt(&reason);
                    return Outcome::Halted(reason);
                }
            }
        }
    }

    /// Write `entry` to `ledger` with bounded retries; hand it to the
    /// fallback journal when the ledger stays unreachable.
    pub fn persist(&self, ledger: &dyn Ledger, entry: &JournalEntry) -> PersistOutcome {
        let attempts = self.settings.persist_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match entry.apply(ledger) {
                Ok(outcome) => {
                    if outcome == WriteOutcome::AlreadyTerminal {
                        tracing::warn!(task_id = %entry.task_id(), "ledger reports task already terminal");
                    }
                    return PersistOutcome::Written(outcome);
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(task_id = %entry.task_id(), kind = entry.kind(), error = %e, "ledger rejected write");
                    return PersistOutcome::Lost(e.to_string());
                }
                Err(e) => {
                    tracing::warn!(task_id = %entry.task_id(), kind = entry.kind(), attempt, error = %e, "ledger write failed");
                    last_error = e.to_string();
                    if attempt < attempts && !self.settings.persist_backoff.is_zero() {
                        std::thread::sleep(self.settings.persist_backoff * attempt);
                    }
                }
            }
        }

        match &self.journal {
            Some(journal) => match journal.append(entry) {
                Ok(()) => PersistOutcome::Deferred,
                Err(e) => {
                    tracing::error!(task_id = %entry.task_id(), error = %e, "ledger write lost");
                    PersistOutcome::Lost(format!("{last_error}; journal: {e}"))
                }
            },
            None => PersistOutcome::Lost(last_error),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryLedger, StatusUpdate};
    use crate::recorder::MemorySink;
    use chrono::Utc;
    use poollab_core::domain::TaskStatus;
    use std::io::Cursor;

    fn supervisor(policy: EscalationPolicy) -> (Supervisor, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let settings = SupervisorSettings {
            persist_backoff: Duration::ZERO,
            ..SupervisorSettings::default()
        };
        let sup = Supervisor::new(
            TaskId::from("t1"),
            settings,
            Arc::new(PolicyOperator::new(policy)),
            sink.clone(),
        );
        (sup, sink)
    }

    fn insufficient() -> SkillError {
        SkillError::InsufficientData {
            subject: "多AU".into(),
            period: "5y".into(),
            detail: "no rows".into(),
        }
    }

    fn kinds(sink: &MemorySink) -> Vec<EventKind> {
        sink.events().iter().map(|e| e.event).collect()
    }

    #[test]
    fn success_emits_start_and_complete() {
        let (sup, sink) = supervisor(EscalationPolicy::Halt);
        let out = sup.run("strategy_evaluator", "多AU@5y", || Ok::<_, SkillError>(7));
        assert_eq!(out, Outcome::Done(7));
        assert_eq!(kinds(&sink), vec![EventKind::Start, EventKind::Complete]);
    }

    #[test]
    fn retry_limit_counts_total_invocations() {
        let (sup, sink) = supervisor(EscalationPolicy::Halt);
        let mut calls = 0;
        let out = sup.run("strategy_evaluator", "多AU@5y", || {
            calls += 1;
            Err::<(), _>(insufficient())
        });
        assert_eq!(calls, 2);
        assert!(matches!(out, Outcome::Halted(ref r) if r.contains("insufficient data")));
        assert!(sup.is_halted());
        assert_eq!(
            kinds(&sink),
            vec![
                EventKind::Start,
                EventKind::Error,
                EventKind::Retry,
                EventKind::Start,
                EventKind::Error,
            ]
        );
    }

    #[test]
    fn transient_failure_recovers() {
        let (sup, _) = supervisor(EscalationPolicy::Halt);
        let mut calls = 0;
        let out = sup.run("s", "x", || {
            calls += 1;
            if calls == 1 {
                Err(insufficient())
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out, Outcome::Done(2));
        assert!(!sup.is_halted());
    }

    #[test]
    fn fatal_errors_escalate_without_retry() {
        let (sup, _) = supervisor(EscalationPolicy::Skip);
        let mut calls = 0;
        let out = sup.run("portfolio_composer", "AU+AG", || {
            calls += 1;
            Err::<(), _>(SkillError::UnsupportedModel {
                model: "risk_parity".into(),
                available: "equal_weight".into(),
            })
        });
        assert_eq!(calls, 1);
        assert!(matches!(out, Outcome::Skipped(_)));
        assert!(!sup.is_halted());
    }

    #[test]
    fn policy_retry_is_bounded_then_halts() {
        let (sup, _) = supervisor(EscalationPolicy::Retry);
        let mut calls = 0;
        let out = sup.run("s", "x", || {
            calls += 1;
            Err::<(), _>(insufficient())
        });
        // two budgeted attempts plus one escalation retry
        assert_eq!(calls, 3);
        assert!(matches!(out, Outcome::Halted(ref r) if r.contains("exhausted")));
    }

    #[test]
    fn halt_stops_later_calls() {
        let (sup, _) = supervisor(EscalationPolicy::Halt);
        sup.halt("operator abort");
        let mut called = false;
        let out = sup.run("s", "x", || {
            called = true;
            Ok::<_, SkillError>(())
        });
        assert!(!called);
        assert_eq!(out, Outcome::Halted("operator abort".into()));
    }

    #[test]
    fn prompt_operator_reads_choices() {
        let op = PromptOperator::new(Cursor::new("what\nS\n"), Vec::new());
        let esc = Escalation {
            skill: "s",
            subject: "x",
            attempts: 2,
            error: "boom".into(),
            retryable: true,
        };
        assert_eq!(op.decide(&esc), OperatorChoice::Skip);
        let (_, out) = op.into_inner();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("x failed after 2 attempt(s): boom"));

        let eof = PromptOperator::new(Cursor::new(""), Vec::new());
        assert_eq!(eof.decide(&esc), OperatorChoice::Abort);
    }

    #[test]
    fn persist_defers_to_journal_when_ledger_is_down() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(FallbackJournal::new(dir.path().join("j.jsonl")));
        let (sup, _) = supervisor(EscalationPolicy::Halt);
        let sup = sup.with_journal(journal.clone());

        let ledger = MemoryLedger::new();
        ledger.set_offline(true);
        let entry = JournalEntry::Status(StatusUpdate {
            task_id: TaskId::from("t1"),
            status: TaskStatus::Completed,
            error_message: None,
            completed_at: Some(Utc::now()),
        });
        assert_eq!(sup.persist(&ledger, &entry), PersistOutcome::Deferred);
        assert_eq!(ledger.calls(), 2);
        assert_eq!(journal.len().unwrap(), 1);
    }

    #[test]
    fn ledger_writes_share_the_retry_bound() {
        let app = AppConfig {
            retry_limit: 4,
            ..AppConfig::default()
        };
        let settings = SupervisorSettings::from(&app);
        assert_eq!(settings.persist_attempts, 4);
        let defaults = SupervisorSettings::default();
        assert_eq!(defaults.persist_attempts, defaults.retry_limit);

        let app = AppConfig {
            retry_limit: 4,
            persist_attempts: Some(6),
            ..AppConfig::default()
        };
        assert_eq!(SupervisorSettings::from(&app).persist_attempts, 6);
    }
}
