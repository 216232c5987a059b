//! Task pipeline: create task → validate request → resolve models → screen
//! price coverage → evaluate → compose/rank → report → persist results →
//! terminal status.
//!
//! Every skill call goes through the [`Supervisor`]; the orchestrator only
//! sees outcomes. The task moves from `running` to exactly one terminal
//! status. A halt keeps every result gathered so far and skips the report.
//! Validation errors, the complexity guard, a pool with no covered unit and
//! panics fail the task. Units whose price history does not reach back over
//! the longest period are dropped before evaluation.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use poollab_core::domain::{
    EventKind, LogEvent, RequestError, ResultRecord, SearchPlan, Task, TaskId, TaskRequest,
    TaskStatus, ValidatedRequest,
};
use poollab_core::period::Period;
use poollab_core::position::PositionUnit;
use poollab_core::skills::{longest_period, Coverage, DataValidator, FailureClass};

use crate::config::PoolLabConfig;
use crate::leaderboard;
use crate::ledger::{FallbackJournal, JournalEntry, Ledger, StatusUpdate};
use crate::recorder::EventSink;
use crate::report::{ReportError, ReportGenerator};
use crate::search::{SearchEngine, SearchError, SearchStats, COMPOSER_SKILL};
use crate::supervisor::{
    Operator, Outcome, PersistOutcome, PolicyOperator, Supervised, Supervisor, SupervisorSettings,
};

const ORCHESTRATOR_SKILL: &str = "orchestrator";
const VALIDATOR_SKILL: &str = "data_validator";
const REPORT_SKILL: &str = "report_generator";

/// Errors that fail a task outright.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("no position has price history covering {period}")]
    NoCoverage { period: String },

    #[error("none of the requested portfolio models is available")]
    NoUsableModel,
}

impl Supervised for ReportError {
    fn failure_class(&self) -> FailureClass {
        match self {
            ReportError::Io { .. } => FailureClass::Retryable,
            ReportError::Render(_) => FailureClass::Fatal,
        }
    }

    fn kind(&self) -> &'static str {
        "report"
    }
}

enum Flow {
    Completed,
    Halted(String),
}

enum Screened<T> {
    Kept(Vec<T>),
    Halted(String),
}

/// Everything a finished task produced.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task: Task,
    pub results: Vec<ResultRecord>,
    pub report_path: Option<PathBuf>,
    pub stats: SearchStats,
}

impl TaskOutcome {
    /// 0 completed, 2 halted, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.task.status {
            TaskStatus::Completed => 0,
            TaskStatus::Halted => 2,
            TaskStatus::Failed | TaskStatus::Running => 1,
        }
    }

    pub fn portfolio_results(&self) -> impl Iterator<Item = &ResultRecord> {
        self.results
            .iter()
            .filter(|r| r.portfolio_positions.is_some())
    }
}

#[derive(Default)]
struct Gathered {
    results: Vec<ResultRecord>,
    report_path: Option<PathBuf>,
    stats: SearchStats,
}

pub struct Orchestrator {
    engine: SearchEngine,
    ledger: Arc<dyn Ledger>,
    events: Arc<dyn EventSink>,
    reports: Arc<dyn ReportGenerator>,
    operator: Arc<dyn Operator>,
    validator: Option<Arc<dyn DataValidator>>,
    journal: Option<Arc<FallbackJournal>>,
    settings: SupervisorSettings,
    snapshot: serde_json::Value,
}

impl Orchestrator {
    pub fn new(
        engine: SearchEngine,
        ledger: Arc<dyn Ledger>,
        events: Arc<dyn EventSink>,
        reports: Arc<dyn ReportGenerator>,
    ) -> Self {
        Self {
            engine,
            ledger,
            events,
            reports,
            operator: Arc::new(PolicyOperator::new(Default::default())),
            validator: None,
            journal: None,
            settings: SupervisorSettings::default(),
            snapshot: serde_json::Value::Null,
        }
    }

    pub fn with_operator(mut self, operator: Arc<dyn Operator>) -> Self {
        self.operator = operator;
        self
    }

    /// Screen every unit for price coverage before evaluation. Without a
    /// validator every parsed unit is evaluated.
    pub fn with_data_validator(mut self, validator: Arc<dyn DataValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_journal(mut self, journal: Arc<FallbackJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_supervisor_settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Supervisor settings and the settings snapshot stored with each task.
    pub fn with_config(self, config: &PoolLabConfig) -> Self {
        let mut this = self.with_supervisor_settings(SupervisorSettings::from(&config.app));
        this.snapshot = config.snapshot();
        this
    }

    /// Run a request under a freshly generated task id.
    pub fn run(&self, request: &TaskRequest) -> TaskOutcome {
        let started_at = Utc::now();
        let task_id = TaskId::generate(&started_at, &mut rand::thread_rng());
        self.run_as(task_id, request)
    }

    pub fn run_as(&self, task_id: TaskId, request: &TaskRequest) -> TaskOutcome {
        let params = serde_json::json!({
            "request": request,
            "settings": self.snapshot,
        });
        let mut task = Task::start(task_id.clone(), request, params, Utc::now());

        let mut sup = Supervisor::new(
            task_id.clone(),
            self.settings,
            Arc::clone(&self.operator),
            Arc::clone(&self.events),
        );
        if let Some(journal) = &self.journal {
            sup = sup.with_journal(Arc::clone(journal));
        }

        tracing::info!(%task_id, mode = %request.mode, positions = request.positions.len(), "task started");
        self.persist(&sup, JournalEntry::Task(task.clone()));
        self.emit(&task_id, EventKind::Start, "task started", serde_json::json!({
            "mode": request.mode,
            "positions": request.positions,
            "periods": request.periods,
        }));

        let mut gathered = Gathered::default();
        let flow = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pipeline(&sup, request, &mut gathered)
        }));
        let (status, error_message) = match flow {
            Ok(Ok(Flow::Completed)) => (TaskStatus::Completed, None),
            Ok(Ok(Flow::Halted(reason))) => (TaskStatus::Halted, Some(reason)),
            Ok(Err(e)) => (TaskStatus::Failed, Some(e.to_string())),
            Err(payload) => (TaskStatus::Failed, Some(panic_message(payload.as_ref()))),
        };

        for result in &gathered.results {
            self.persist(&sup, JournalEntry::Result(result.clone()));
        }

        if let Err(e) = task.finish(status, error_message, Utc::now()) {
            tracing::error!(%task_id, error = %e, "task transition rejected");
        }
        self.persist(&sup, JournalEntry::Status(StatusUpdate::from_task(&task)));

        let kind = if status == TaskStatus::Completed {
            EventKind::Complete
        } else {
            EventKind::Error
        };
        self.emit(&task_id, kind, format!("task {status}"), serde_json::json!({
            "status": status,
            "error_message": task.error_message,
            "results": gathered.results.len(),
        }));
        self.events.flush();

        match status {
            TaskStatus::Completed => tracing::info!(%task_id, results = gathered.results.len(), "task completed"),
            _ => tracing::warn!(
                %task_id,
                %status,
                error = task.error_message.as_deref().unwrap_or(""),
                results = gathered.results.len(),
                "task did not complete"
            ),
        }

        TaskOutcome {
            task,
            results: gathered.results,
            report_path: gathered.report_path,
            stats: gathered.stats,
        }
    }

    fn pipeline(
        &self,
        sup: &Supervisor,
        request: &TaskRequest,
        out: &mut Gathered,
    ) -> Result<Flow, OrchestratorError> {
        let task_id = sup.task_id().clone();
        let ValidatedRequest {
            units,
            periods,
            models,
            plan,
        } = request.validate()?;

        let models = match self.resolve_models(sup, models)? {
            Screened::Kept(models) => models,
            Screened::Halted(reason) => return Ok(Flow::Halted(reason)),
        };

        if let SearchPlan::Smart { range, .. } = plan {
            let total = self
                .engine
                .check_complexity(units.len(), range, periods.len(), models.len())?;
            tracing::info!(%task_id, compositions = total, "search space accepted");
        }

        // phase 1: price history coverage
        let units = match &self.validator {
            Some(validator) => {
                match self.screen(sup, validator.as_ref(), units, &periods, &mut out.stats)? {
                    Screened::Kept(units) => units,
                    Screened::Halted(reason) => return Ok(Flow::Halted(reason)),
                }
            }
            None => units,
        };
        if let SearchPlan::Smart { range, .. } = plan {
            if range.min > units.len() {
                return Err(RequestError::ComboRangeOutOfPool {
                    range,
                    pool_size: units.len(),
                }
                .into());
            }
        }

        // phase 2: every unit for every period
        let pass = self.engine.evaluate_all(
            sup,
            &units,
            &periods,
            request.strategy_max_evals,
            &mut out.stats,
        );
        for eval in pass.cache.iter() {
            let metrics = eval
                .metrics
                .clone()
                .with_extra("evaluations", eval.evaluations);
            out.results.push(ResultRecord::strategy(
                &task_id,
                &eval.unit.to_string(),
                eval.period.code(),
                eval.best_params.clone(),
                metrics,
            ));
        }
        if let Some(reason) = pass.halted {
            return Ok(Flow::Halted(reason));
        }

        // phase 3: compositions
        match &plan {
            SearchPlan::Smart { range, top_n } => {
                for period in &periods {
                    let found = self.engine.search_period(
                        sup,
                        &pass.cache,
                        &units,
                        period,
                        *range,
                        &models,
                        &mut out.stats,
                    );
                    for ranked in leaderboard::rank(found.candidates, *top_n) {
                        let composition = ranked.candidate.composition;
                        let mut record = ResultRecord::portfolio(
                            &task_id,
                            &composition.weights,
                            &ranked.candidate.model,
                            period.code(),
                            composition.metrics,
                        );
                        record.rank = Some(ranked.rank);
                        out.results.push(record);
                    }
                    if let Some(reason) = found.halted {
                        return Ok(Flow::Halted(reason));
                    }
                }
            }
            SearchPlan::Specified { model } => {
                for period in &periods {
                    match self.engine.compose_full(
                        sup,
                        &pass.cache,
                        &units,
                        period,
                        model,
                        &mut out.stats,
                    ) {
                        Outcome::Done(composition) => out.results.push(ResultRecord::portfolio(
                            &task_id,
                            &composition.weights,
                            model,
                            period.code(),
                            composition.metrics,
                        )),
                        Outcome::Skipped(reason) => {
                            tracing::warn!(%task_id, period = %period, %reason, "no portfolio for period")
                        }
                        Outcome::Halted(reason) => return Ok(Flow::Halted(reason)),
                    }
                }
            }
        }

        // report, once
        let results = &out.results;
        match sup.run(REPORT_SKILL, task_id.as_str(), || {
            self.reports.generate(&task_id, results)
        }) {
            Outcome::Done(path) => {
                let shown = path.display().to_string();
                for r in &mut out.results {
                    r.excel_path = Some(shown.clone());
                }
                out.report_path = Some(path);
            }
            Outcome::Skipped(reason) => tracing::warn!(%task_id, %reason, "report skipped"),
            Outcome::Halted(reason) => return Ok(Flow::Halted(reason)),
        }

        Ok(Flow::Completed)
    }

    /// Look every model up before any work is spent on it. An unknown model
    /// escalates once here rather than once per composition.
    fn resolve_models(
        &self,
        sup: &Supervisor,
        models: Vec<String>,
    ) -> Result<Screened<String>, OrchestratorError> {
        let registry = self.engine.composers();
        let mut kept = Vec::with_capacity(models.len());
        for model in models {
            match sup.run(COMPOSER_SKILL, &model, || registry.get(&model)) {
                Outcome::Done(_) => kept.push(model),
                Outcome::Skipped(reason) => {
                    tracing::warn!(task_id = %sup.task_id(), %model, %reason, "model dropped")
                }
                Outcome::Halted(reason) => return Ok(Screened::Halted(reason)),
            }
        }
        if kept.is_empty() {
            return Err(OrchestratorError::NoUsableModel);
        }
        Ok(Screened::Kept(kept))
    }

    /// Check every unit against the longest period; keep the covered ones.
    fn screen(
        &self,
        sup: &Supervisor,
        validator: &dyn DataValidator,
        units: Vec<PositionUnit>,
        periods: &[Period],
        stats: &mut SearchStats,
    ) -> Result<Screened<PositionUnit>, OrchestratorError> {
        let task_id = sup.task_id();
        let longest = longest_period(periods);
        tracing::info!(%task_id, units = units.len(), period = %longest, validator = validator.name(), "coverage check");

        let mut kept = Vec::with_capacity(units.len());
        for unit in units {
            let subject = format!("{unit}@{longest}");
            let reason = match sup.run(VALIDATOR_SKILL, &subject, || validator.check(&unit, &longest)) {
                Outcome::Done(Coverage::Covered { .. }) => {
                    kept.push(unit);
                    continue;
                }
                Outcome::Done(Coverage::Short { instrument, detail }) => format!("{instrument}: {detail}"),
                Outcome::Skipped(reason) => reason,
                Outcome::Halted(reason) => return Ok(Screened::Halted(reason)),
            };
            tracing::warn!(%task_id, unit = %unit, %reason, "position excluded");
            self.events.record(LogEvent::new(
                task_id,
                VALIDATOR_SKILL,
                EventKind::Error,
                format!("{unit} excluded: {reason}"),
                serde_json::json!({
                    "unit": unit.to_string(),
                    "period": longest.code(),
                    "reason": reason,
                    "excluded": true,
                }),
            ));
            stats.units_excluded.push(unit.to_string());
        }

        if kept.is_empty() {
            return Err(OrchestratorError::NoCoverage {
                period: longest.code().to_string(),
            });
        }
        Ok(Screened::Kept(kept))
    }

    fn emit(&self, task_id: &TaskId, kind: EventKind, message: impl Into<String>, data: serde_json::Value) {
        self.events
            .record(LogEvent::new(task_id, ORCHESTRATOR_SKILL, kind, message, data));
    }

    fn persist(&self, sup: &Supervisor, entry: JournalEntry) {
        match sup.persist(self.ledger.as_ref(), &entry) {
            PersistOutcome::Written(_) | PersistOutcome::Deferred => {}
            PersistOutcome::Lost(reason) => tracing::error!(
                task_id = %entry.task_id(),
                kind = entry.kind(),
                %reason,
                "ledger write lost"
            ),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into());
    format!("internal error: {detail}")
}
