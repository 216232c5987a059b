//! Strategy evaluator contract.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::SkillError;
use super::series::ReturnSeries;
use crate::metrics::PerformanceMetrics;
use crate::period::Period;
use crate::position::PositionUnit;

/// Best parameter set found for one unit over one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyEvaluation {
    pub unit: PositionUnit,
    pub period: Period,
    pub best_params: BTreeMap<String, f64>,
    pub metrics: PerformanceMetrics,
    /// Daily returns of the best parameter set, already in the unit's
    /// direction. Portfolio composers consume this.
    pub returns: ReturnSeries,
    /// Parameter candidates actually evaluated.
    pub evaluations: usize,
}

/// Runs a bounded parameter search for one position unit.
///
/// Implementations are pure with respect to the engine: no ledger writes, no
/// shared mutable state visible to callers.
pub trait StrategyEvaluator: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(
        &self,
        unit: &PositionUnit,
        period: &Period,
        max_evals: usize,
    ) -> Result<StrategyEvaluation, SkillError>;
}
