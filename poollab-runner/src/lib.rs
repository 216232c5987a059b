//! PoolLab Runner: supervised backtest orchestration.
//!
//! This crate builds on `poollab-core` to provide:
//! - Configuration (TOML + `POOLLAB_*` env) and tracing setup
//! - Supervisor with retry/escalation policy and a task-wide halt flag
//! - Combinatorial portfolio search on a private rayon pool, plus ranking
//! - Ledger clients (memory, HTTP), fallback journal and event recorder
//! - CSV reports and the task orchestrator
//! - One-line instruction parsing for the `simple` command

pub mod config;
pub mod instruction;
pub mod leaderboard;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod recorder;
pub mod report;
pub mod search;
pub mod supervisor;

pub use config::{AppConfig, ConfigError, EscalationPolicy, LedgerConfig, PoolLabConfig};
pub use instruction::{parse_instruction, Instruction, InstructionError};
pub use leaderboard::{rank, Candidate, Ranked};
pub use ledger::{
    FallbackJournal, HttpLedger, JournalEntry, JournalError, Ledger, LedgerError, MemoryLedger,
    ReplaySummary, StatusUpdate, WriteOutcome,
};
pub use logging::{init_logging, LogFormat};
pub use orchestrator::{Orchestrator, OrchestratorError, TaskOutcome};
pub use recorder::{EventSink, LedgerRecorder, MemorySink};
pub use report::{CsvReportGenerator, ReportError, ReportGenerator};
pub use search::{
    EvaluationCache, PeriodStats, SearchEngine, SearchError, SearchSettings, SearchStats,
};
pub use supervisor::{
    Escalation, HaltFlag, Operator, OperatorChoice, Outcome, PersistOutcome, PolicyOperator,
    PromptOperator, Supervised, Supervisor, SupervisorSettings,
};
