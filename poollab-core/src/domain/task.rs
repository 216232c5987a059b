//! Task: one invocation of the backtest pipeline, and the request that starts it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::ids::TaskId;
use crate::period::{Period, PeriodError};
use crate::position::{self, ParseError, PositionUnit};

/// Pipeline mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    /// Search all subsets of the pool within a size range and rank them.
    Smart,
    /// Compose the full pool once per period with a single model.
    Specified,
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskMode::Smart => f.write_str("smart"),
            TaskMode::Specified => f.write_str("specified"),
        }
    }
}

/// Task lifecycle state. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Halted,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Halted => "halted",
        };
        f.write_str(s)
    }
}

/// Inclusive subset-size range for smart mode, written `a-b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComboRange {
    pub min: usize,
    pub max: usize,
}

impl ComboRange {
    pub fn new(min: usize, max: usize) -> Result<Self, RequestError> {
        if min == 0 || min > max {
            return Err(RequestError::InvalidComboRange(format!("{min}-{max}")));
        }
        Ok(Self { min, max })
    }

    /// Upper bound clamped to the pool size.
    pub fn clamped_max(&self, pool_size: usize) -> usize {
        self.max.min(pool_size)
    }
}

impl FromStr for ComboRange {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RequestError::InvalidComboRange(s.trim().to_string());
        let (a, b) = s.trim().split_once('-').ok_or_else(invalid)?;
        let min = a.trim().parse().map_err(|_| invalid())?;
        let max = b.trim().parse().map_err(|_| invalid())?;
        Self::new(min, max).map_err(|_| invalid())
    }
}

impl fmt::Display for ComboRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Request validation failures. Each of these fails the task before any
/// evaluation runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error(transparent)]
    Position(#[from] ParseError),

    #[error(transparent)]
    Period(#[from] PeriodError),

    #[error("invalid combo range '{0}': expected a-b with 1 <= a <= b")]
    InvalidComboRange(String),

    #[error("position pool is empty")]
    EmptyPool,

    #[error("no periods requested")]
    NoPeriods,

    #[error("no portfolio models requested")]
    NoModels,

    #[error("duplicate position '{0}' in pool")]
    DuplicatePosition(String),

    #[error("combo range {range} is empty for a pool of {pool_size} position(s)")]
    ComboRangeOutOfPool { range: ComboRange, pool_size: usize },

    #[error("specified mode takes exactly one portfolio model, got {0}")]
    SpecifiedModelCount(usize),
}

/// Everything needed to start a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub mode: TaskMode,
    /// Position texts in operator order.
    pub positions: Vec<String>,
    /// Period codes, e.g. `3y`.
    pub periods: Vec<String>,
    /// Smart mode only.
    pub combo_range: Option<ComboRange>,
    pub portfolio_models: Vec<String>,
    /// Smart mode only.
    pub top_n: Option<usize>,
    /// Evaluation budget per (unit, period).
    pub strategy_max_evals: usize,
}

/// Portfolios kept per period when a smart request leaves `top_n` unset.
pub const DEFAULT_TOP_N: usize = 10;

/// What the composition phase does with the evaluated pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPlan {
    Smart { range: ComboRange, top_n: usize },
    Specified { model: String },
}

/// A request whose positions, periods and models parsed cleanly.
///
/// Periods and models are deduplicated, first occurrence wins.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub units: Vec<PositionUnit>,
    pub periods: Vec<Period>,
    pub models: Vec<String>,
    pub plan: SearchPlan,
}

impl TaskRequest {
    pub fn smart(
        positions: Vec<String>,
        periods: Vec<String>,
        combo_range: ComboRange,
        portfolio_models: Vec<String>,
        top_n: usize,
    ) -> Self {
        Self {
            mode: TaskMode::Smart,
            positions,
            periods,
            combo_range: Some(combo_range),
            portfolio_models,
            top_n: Some(top_n),
            strategy_max_evals: 2000,
        }
    }

    pub fn specified(positions: Vec<String>, period: String, portfolio_model: String) -> Self {
        Self {
            mode: TaskMode::Specified,
            positions,
            periods: vec![period],
            combo_range: None,
            portfolio_models: vec![portfolio_model],
            top_n: None,
            strategy_max_evals: 2000,
        }
    }

    pub fn with_max_evals(mut self, max_evals: usize) -> Self {
        self.strategy_max_evals = max_evals;
        self
    }

    /// Parse positions and periods and check the shape of the request.
    ///
    /// Position parse errors are reported first, in pool order.
    pub fn validate(&self) -> Result<ValidatedRequest, RequestError> {
        if self.positions.is_empty() {
            return Err(RequestError::EmptyPool);
        }
        let units = self
            .positions
            .iter()
            .map(|p| position::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        for unit in &units {
            if !seen.insert(unit.to_string()) {
                return Err(RequestError::DuplicatePosition(unit.to_string()));
            }
        }

        if self.periods.is_empty() {
            return Err(RequestError::NoPeriods);
        }
        let mut periods: Vec<Period> = Vec::with_capacity(self.periods.len());
        for code in &self.periods {
            let period = Period::parse(code)?;
            if !periods.contains(&period) {
                periods.push(period);
            }
        }

        let mut models: Vec<String> = Vec::with_capacity(self.portfolio_models.len());
        for model in &self.portfolio_models {
            let model = model.trim().to_ascii_lowercase();
            if !model.is_empty() && !models.contains(&model) {
                models.push(model);
            }
        }
        if models.is_empty() {
            return Err(RequestError::NoModels);
        }

        let plan = match self.mode {
            TaskMode::Smart => {
                let range = self
                    .combo_range
                    .ok_or_else(|| RequestError::InvalidComboRange("missing".into()))?;
                if range.min > units.len() {
                    return Err(RequestError::ComboRangeOutOfPool {
                        range,
                        pool_size: units.len(),
                    });
                }
                SearchPlan::Smart {
                    range,
                    top_n: self.top_n.unwrap_or(DEFAULT_TOP_N),
                }
            }
            TaskMode::Specified => {
                if models.len() != 1 {
                    return Err(RequestError::SpecifiedModelCount(models.len()));
                }
                SearchPlan::Specified {
                    model: models[0].clone(),
                }
            }
        };

        Ok(ValidatedRequest {
            units,
            periods,
            models,
            plan,
        })
    }
}

/// Attempted a transition out of a terminal state, or into `Running`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("task {task_id} is already {status}")]
    AlreadyTerminal { task_id: TaskId, status: TaskStatus },

    #[error("cannot transition task {0} back to running")]
    NotTerminal(TaskId),
}

/// One pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub mode: TaskMode,
    pub status: TaskStatus,
    pub positions: Vec<String>,
    pub periods: Vec<String>,
    pub combo_range: Option<ComboRange>,
    pub portfolio_models: Vec<String>,
    pub top_n: Option<usize>,
    /// Full parameter snapshot (request plus effective settings).
    pub params: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Task {
    /// Create a running task from a request.
    pub fn start(
        task_id: TaskId,
        request: &TaskRequest,
        params: serde_json::Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            mode: request.mode,
            status: TaskStatus::Running,
            positions: request.positions.clone(),
            periods: request.periods.clone(),
            combo_range: request.combo_range,
            portfolio_models: request.portfolio_models.clone(),
            top_n: request.top_n,
            params,
            started_at,
            completed_at: None,
            error_message: None,
        }
    }

    /// Move to a terminal state. Allowed exactly once.
    pub fn finish(
        &mut self,
        status: TaskStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::AlreadyTerminal {
                task_id: self.task_id.clone(),
                status: self.status,
            });
        }
        if !status.is_terminal() {
            return Err(TransitionError::NotTerminal(self.task_id.clone()));
        }
        self.status = status;
        self.error_message = error_message;
        self.completed_at = Some(at);
        Ok(())
    }
}
