//! Combinatorial search: strategy evaluation for every (unit, period), then
//! portfolio composition over subsets of the pool.
//!
//! Work runs on a private rayon pool. The evaluation pass completes before
//! any composition starts; compositions only read the evaluation cache.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use poollab_core::domain::ComboRange;
use poollab_core::period::Period;
use poollab_core::position::PositionUnit;
use poollab_core::skills::{
    ComposerRegistry, Composition, EvaluatedUnit, StrategyEvaluation, StrategyEvaluator,
};

use crate::leaderboard::Candidate;
use crate::supervisor::{Outcome, Supervisor};

pub const EVALUATOR_SKILL: &str = "strategy_evaluator";
pub const COMPOSER_SKILL: &str = "portfolio_composer";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("search space of {requested} compositions exceeds max_combinations ({limit})")]
    TooManyCombinations { requested: String, limit: u64 },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

// ─── Counting and enumeration ───────────────────────────────────────

/// `C(n, k)`, or `None` on overflow.
pub fn binomial(n: u64, k: u64) -> Option<u64> {
    if k > n {
        return Some(0);
    }
    let k = k.min(n - k);
    let mut acc: u64 = 1;
    for i in 0..k {
        // acc * (n - i) is divisible by (i + 1) at every step
        acc = acc.checked_mul(n - i)? / (i + 1);
    }
    Some(acc)
}

/// Σ C(pool, k) for k in the range, upper bound clamped to the pool.
pub fn subset_count(pool_size: usize, range: ComboRange) -> Option<u64> {
    let max = range.clamped_max(pool_size);
    (range.min..=max).try_fold(0u64, |acc, k| acc.checked_add(binomial(pool_size as u64, k as u64)?))
}

/// Compositions a smart search would attempt.
pub fn search_space(pool_size: usize, range: ComboRange, periods: usize, models: usize) -> Option<u64> {
    subset_count(pool_size, range)?
        .checked_mul(periods as u64)?
        .checked_mul(models as u64)
}

/// Index subsets of `0..n` in increasing size, lexicographic within a size.
pub fn subsets(n: usize, range: ComboRange) -> Subsets {
    Subsets {
        n,
        k: range.min,
        max: range.clamped_max(n),
        current: None,
    }
}

#[derive(Debug, Clone)]
pub struct Subsets {
    n: usize,
    k: usize,
    max: usize,
    current: Option<Vec<usize>>,
}

impl Iterator for Subsets {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        loop {
            if self.k == 0 || self.k > self.max {
                return None;
            }
            let next = match self.current.take() {
                None => Some((0..self.k).collect::<Vec<_>>()),
                Some(mut idx) => {
                    // rightmost position that can still move
                    let k = self.k;
                    match (0..k).rev().find(|&i| idx[i] < self.n - k + i) {
                        Some(i) => {
                            idx[i] += 1;
                            for j in i + 1..k {
                                idx[j] = idx[j - 1] + 1;
                            }
                            Some(idx)
                        }
                        None => None,
                    }
                }
            };
            match next {
                Some(idx) => {
                    self.current = Some(idx.clone());
                    return Some(idx);
                }
                None => {
                    self.k += 1;
                    self.current = None;
                }
            }
        }
    }
}

// ─── Evaluation cache ───────────────────────────────────────────────

/// Strategy evaluations keyed by (canonical unit text, period code).
#[derive(Debug, Clone, Default)]
pub struct EvaluationCache {
    entries: HashMap<(String, String), EvaluatedUnit>,
    order: Vec<(String, String)>,
}

impl EvaluationCache {
    fn key(unit: &PositionUnit, period: &Period) -> (String, String) {
        (unit.to_string(), period.code().to_string())
    }

    pub fn get(&self, unit: &PositionUnit, period: &Period) -> Option<&EvaluatedUnit> {
        self.entries.get(&Self::key(unit, period))
    }

    pub fn contains(&self, unit: &PositionUnit, period: &Period) -> bool {
        self.entries.contains_key(&Self::key(unit, period))
    }

    pub fn insert(&mut self, evaluation: StrategyEvaluation) {
        let key = Self::key(&evaluation.unit, &evaluation.period);
        if self.entries.insert(key.clone(), Arc::new(evaluation)).is_none() {
            self.order.push(key);
        }
    }

    /// Evaluations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &EvaluatedUnit> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Statistics ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodStats {
    pub subsets_enumerated: usize,
    /// Subsets left out because a member's evaluation was skipped.
    pub subsets_excluded: usize,
    /// Per model.
    pub compositions_attempted: BTreeMap<String, usize>,
    pub compositions_succeeded: usize,
    pub compositions_skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchStats {
    /// Units dropped before evaluation for short price history.
    pub units_excluded: Vec<String>,
    pub evaluations_attempted: usize,
    pub evaluations_succeeded: usize,
    pub evaluations_skipped: usize,
    /// Keyed by period code.
    pub periods: BTreeMap<String, PeriodStats>,
}

impl SearchStats {
    pub fn period(&self, code: &str) -> Option<&PeriodStats> {
        self.periods.get(code)
    }
}

/// Output of the evaluation pass.
#[derive(Debug, Default)]
pub struct EvaluationPass {
    pub cache: EvaluationCache,
    /// (unit, period) pairs the operator skipped.
    pub skipped: HashSet<(String, String)>,
    pub halted: Option<String>,
}

/// Output of one period's composition pass.
#[derive(Debug, Default)]
pub struct CompositionPass {
    pub candidates: Vec<Candidate>,
    pub halted: Option<String>,
}

// ─── Engine ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSettings {
    pub max_combinations: u64,
    /// Worker threads, at least 1.
    pub concurrency: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_combinations: 20_000,
            concurrency: 1,
        }
    }
}

pub struct SearchEngine {
    evaluator: Arc<dyn StrategyEvaluator>,
    composers: ComposerRegistry,
    settings: SearchSettings,
    pool: rayon::ThreadPool,
}

impl SearchEngine {
    pub fn new(
        evaluator: Arc<dyn StrategyEvaluator>,
        composers: ComposerRegistry,
        settings: SearchSettings,
    ) -> Result<Self, SearchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.concurrency.max(1))
            .thread_name(|i| format!("poollab-search-{i}"))
            .build()
            .map_err(|e| SearchError::ThreadPool(e.to_string()))?;
        Ok(Self {
            evaluator,
            composers,
            settings,
            pool,
        })
    }

    pub fn composers(&self) -> &ComposerRegistry {
        &self.composers
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Reject a smart search whose composition count exceeds the cap.
    pub fn check_complexity(
        &self,
        pool_size: usize,
        range: ComboRange,
        periods: usize,
        models: usize,
    ) -> Result<u64, SearchError> {
        let limit = self.settings.max_combinations;
        match search_space(pool_size, range, periods, models) {
            Some(n) if n <= limit => Ok(n),
            Some(n) => Err(SearchError::TooManyCombinations {
                requested: n.to_string(),
                limit,
            }),
            None => Err(SearchError::TooManyCombinations {
                requested: "more than u64::MAX".into(),
                limit,
            }),
        }
    }

    /// Evaluate every unit for every period, once each.
    pub fn evaluate_all(
        &self,
        sup: &Supervisor,
        units: &[PositionUnit],
        periods: &[Period],
        max_evals: usize,
        stats: &mut SearchStats,
    ) -> EvaluationPass {
        let jobs: Vec<(&PositionUnit, &Period)> = periods
            .iter()
            .flat_map(|p| units.iter().map(move |u| (u, p)))
            .collect();
        tracing::info!(task_id = %sup.task_id(), jobs = jobs.len(), max_evals, "strategy evaluation pass");

        let evaluator = self.evaluator.as_ref();
        let outcomes: Vec<Outcome<StrategyEvaluation>> = self.pool.install(|| {
            jobs.par_iter()
                .map(|(unit, period)| {
                    let subject = format!("{unit}@{period}");
                    sup.run(EVALUATOR_SKILL, &subject, || {
                        evaluator.evaluate(unit, period, max_evals)
                    })
                })
                .collect()
        });

        let mut pass = EvaluationPass::default();
        stats.evaluations_attempted += jobs.len();
        for ((unit, period), outcome) in jobs.into_iter().zip(outcomes) {
            match outcome {
                Outcome::Done(evaluation) => {
                    stats.evaluations_succeeded += 1;
                    pass.cache.insert(evaluation);
                }
                Outcome::Skipped(_) => {
                    stats.evaluations_skipped += 1;
                    pass.skipped
                        .insert((unit.to_string(), period.code().to_string()));
                }
                Outcome::Halted(reason) => {
                    pass.halted.get_or_insert(reason);
                }
            }
        }
        pass
    }

    /// Compose every subset in `range` for `period` under each model.
    pub fn search_period(
        &self,
        sup: &Supervisor,
        cache: &EvaluationCache,
        units: &[PositionUnit],
        period: &Period,
        range: ComboRange,
        models: &[String],
        stats: &mut SearchStats,
    ) -> CompositionPass {
        let period_stats = stats.periods.entry(period.code().to_string()).or_default();

        let mut jobs: Vec<(Vec<EvaluatedUnit>, &str)> = Vec::new();
        for idx in subsets(units.len(), range) {
            let members: Option<Vec<EvaluatedUnit>> = idx
                .iter()
                .map(|&i| cache.get(&units[i], period).cloned())
                .collect();
            let Some(members) = members else {
                period_stats.subsets_excluded += 1;
                continue;
            };
            period_stats.subsets_enumerated += 1;
            for model in models {
                jobs.push((members.clone(), model.as_str()));
            }
        }
        for (_, model) in &jobs {
            *period_stats
                .compositions_attempted
                .entry((*model).to_string())
                .or_default() += 1;
        }
        tracing::info!(
            task_id = %sup.task_id(),
            period = %period,
            subsets = period_stats.subsets_enumerated,
            excluded = period_stats.subsets_excluded,
            compositions = jobs.len(),
            "portfolio search"
        );

        let outcomes: Vec<Outcome<Composition>> = self.pool.install(|| {
            jobs.par_iter()
                .map(|(members, model)| self.compose_supervised(sup, members, period, model))
                .collect()
        });

        let mut pass = CompositionPass::default();
        for (order, ((_, model), outcome)) in jobs.iter().zip(outcomes).enumerate() {
            match outcome {
                Outcome::Done(composition) => {
                    period_stats.compositions_succeeded += 1;
                    pass.candidates.push(Candidate {
                        model: (*model).to_string(),
                        composition,
                        order,
                    });
                }
                Outcome::Skipped(_) => period_stats.compositions_skipped += 1,
                Outcome::Halted(reason) => {
                    pass.halted.get_or_insert(reason);
                }
            }
        }
        pass
    }

    /// Compose the whole pool once for `period`.
    ///
    /// `Outcome::Skipped` when a unit has no evaluation for the period.
    pub fn compose_full(
        &self,
        sup: &Supervisor,
        cache: &EvaluationCache,
        units: &[PositionUnit],
        period: &Period,
        model: &str,
        stats: &mut SearchStats,
    ) -> Outcome<Composition> {
        let period_stats = stats.periods.entry(period.code().to_string()).or_default();
        let members: Option<Vec<EvaluatedUnit>> = units
            .iter()
            .map(|u| cache.get(u, period).cloned())
            .collect();
        let Some(members) = members else {
            period_stats.subsets_excluded += 1;
            return Outcome::Skipped(format!("pool has unevaluated units for {period}"));
        };
        period_stats.subsets_enumerated += 1;
        *period_stats
            .compositions_attempted
            .entry(model.to_string())
            .or_default() += 1;

        let outcome = self.compose_supervised(sup, &members, period, model);
        match &outcome {
            Outcome::Done(_) => period_stats.compositions_succeeded += 1,
            Outcome::Skipped(_) => period_stats.compositions_skipped += 1,
            Outcome::Halted(_) => {}
        }
        outcome
    }

    fn compose_supervised(
        &self,
        sup: &Supervisor,
        members: &[EvaluatedUnit],
        period: &Period,
        model: &str,
    ) -> Outcome<Composition> {
        let label = members
            .iter()
            .map(|m| m.unit.to_string())
            .collect::<Vec<_>>()
            .join("+");
        let subject = format!("{label}@{period}/{model}");
        sup.run(COMPOSER_SKILL, &subject, || self.composers.compose(members, model))
    }
}
