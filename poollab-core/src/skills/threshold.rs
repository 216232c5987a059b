//! Reference strategy: price-to-moving-average threshold timing.
//!
//! Signal is `price / MA(60)` (at least 20 observations, back-filled). A long
//! unit enters when the signal drops to `low_threshold` and exits at
//! `reverse_long_threshold`; a short unit enters at `high_threshold` and exits
//! at `reverse_short_threshold`. Exposure scales in by `position_increase_pct`
//! each time the signal moves another `threshold_adjust_pct` beyond the entry
//! level. Trades also close on stop-loss, take-profit or trade drawdown.
//! Today's return is earned with yesterday's exposure; exposure changes pay
//! slippage plus commission.
//!
//! Hedge pairs trade the ratio of the long leg's scaled price to the short
//! leg's, and earn the ratio-weighted average of the signed leg returns.

use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::SkillError;
use super::series::{inner_join, ReturnSeries};
use super::strategy::{StrategyEvaluation, StrategyEvaluator};
use crate::data::PriceSource;
use crate::metrics::{mean_std, sharpe, PerformanceMetrics};
use crate::period::Period;
use crate::position::{Direction, PositionUnit};
use crate::rng::SeedHierarchy;

pub const MA_WINDOW: usize = 60;
pub const MA_MIN_PERIODS: usize = 20;
/// Minimum aligned observations for an evaluation.
pub const MIN_OBSERVATIONS: usize = 3;

const PARAM_NAMES: [&str; 10] = [
    "low_threshold",
    "high_threshold",
    "reverse_long_threshold",
    "reverse_short_threshold",
    "stop_loss_pct",
    "threshold_adjust_pct",
    "max_position_pct",
    "position_increase_pct",
    "profit_threshold_pct",
    "drawdown_threshold_pct",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdParams {
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub reverse_long_threshold: f64,
    pub reverse_short_threshold: f64,
    pub stop_loss_pct: f64,
    pub threshold_adjust_pct: f64,
    pub max_position_pct: f64,
    pub position_increase_pct: f64,
    pub profit_threshold_pct: f64,
    pub drawdown_threshold_pct: f64,
}

impl ThresholdParams {
    fn from_values(v: [f64; 10]) -> Self {
        Self {
            low_threshold: v[0],
            high_threshold: v[1],
            reverse_long_threshold: v[2],
            reverse_short_threshold: v[3],
            stop_loss_pct: v[4],
            threshold_adjust_pct: v[5],
            max_position_pct: v[6],
            position_increase_pct: v[7],
            profit_threshold_pct: v[8],
            drawdown_threshold_pct: v[9],
        }
    }

    fn values(&self) -> [f64; 10] {
        [
            self.low_threshold,
            self.high_threshold,
            self.reverse_long_threshold,
            self.reverse_short_threshold,
            self.stop_loss_pct,
            self.threshold_adjust_pct,
            self.max_position_pct,
            self.position_increase_pct,
            self.profit_threshold_pct,
            self.drawdown_threshold_pct,
        ]
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        PARAM_NAMES
            .iter()
            .zip(self.values())
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

fn steps(start: f64, step: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| ((start + step * i as f64) * 100.0).round() / 100.0)
        .collect()
}

/// Cartesian parameter grid. Index order matches a nested loop with the last
/// axis varying fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGrid {
    axes: [Vec<f64>; 10],
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            axes: [
                steps(1.00, 0.01, 5),
                steps(1.45, 0.01, 5),
                steps(1.10, 0.01, 5),
                steps(1.00, 0.01, 15),
                steps(0.01, 0.01, 2),
                steps(0.05, 0.05, 3),
                vec![1.0],
                steps(0.1, 0.1, 2),
                steps(0.1, 0.1, 2),
                steps(0.2, 0.1, 3),
            ],
        }
    }
}

impl ParamGrid {
    pub fn total(&self) -> usize {
        self.axes
            .iter()
            .fold(1usize, |acc, axis| acc.saturating_mul(axis.len()))
    }

    pub fn candidate(&self, mut index: usize) -> ThresholdParams {
        let mut values = [0.0; 10];
        for (slot, axis) in values.iter_mut().zip(&self.axes).rev() {
            *slot = axis[index % axis.len()];
            index /= axis.len();
        }
        ThresholdParams::from_values(values)
    }

    pub fn first(&self) -> ThresholdParams {
        self.candidate(0)
    }

    /// Independent uniform draw per axis.
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> ThresholdParams {
        let mut values = [0.0; 10];
        for (slot, axis) in values.iter_mut().zip(&self.axes) {
            *slot = axis[rng.gen_range(0..axis.len())];
        }
        ThresholdParams::from_values(values)
    }
}

/// Proportional trading costs per unit of exposure change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub slippage: f64,
    pub commission: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            slippage: 0.001,
            commission: 0.0002,
        }
    }
}

impl CostModel {
    pub fn rate(&self) -> f64 {
        self.slippage + self.commission
    }
}

/// Unit data ready for simulation: aligned dates, direction-adjusted unit
/// returns and the timing signal.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSeries {
    pub dates: Vec<NaiveDate>,
    pub returns: Vec<f64>,
    pub signal: Vec<f64>,
}

pub struct ThresholdStrategy {
    source: Arc<dyn PriceSource>,
    grid: ParamGrid,
    costs: CostModel,
    fixed: Option<ThresholdParams>,
    seeds: SeedHierarchy,
}

impl ThresholdStrategy {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            grid: ParamGrid::default(),
            costs: CostModel::default(),
            fixed: None,
            seeds: SeedHierarchy::default(),
        }
    }

    /// Skip the search and always use `params`.
    pub fn with_fixed_params(mut self, params: ThresholdParams) -> Self {
        self.fixed = Some(params);
        self
    }

    pub fn with_costs(mut self, costs: CostModel) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seeds = SeedHierarchy::new(seed);
        self
    }

    pub fn grid(&self) -> &ParamGrid {
        &self.grid
    }

    /// Load, align and transform the legs of `unit`.
    pub fn prepare(&self, unit: &PositionUnit, period: &Period) -> Result<PreparedSeries, SkillError> {
        let subject = unit.to_string();
        let insufficient = |detail: String| SkillError::InsufficientData {
            subject: subject.clone(),
            period: period.code().to_string(),
            detail,
        };

        let legs = unit.legs();
        // per leg: (return dates, prices on those dates, simple returns)
        let mut leg_columns: Vec<(Vec<NaiveDate>, Vec<f64>, Vec<f64>)> = Vec::with_capacity(legs.len());
        for leg in &legs {
            let points = self
                .source
                .get_price_series(&leg.instrument, period)
                .map_err(|e| SkillError::from_data(&subject, period.code(), e))?;
            if points.len() < 2 {
                return Err(insufficient(format!(
                    "{} has {} observation(s)",
                    leg.instrument,
                    points.len()
                )));
            }
            let dates = points[1..].iter().map(|p| p.date).collect();
            let prices = points[1..].iter().map(|p| p.price).collect();
            let returns = points
                .windows(2)
                .map(|w| w[1].price / w[0].price - 1.0)
                .collect();
            leg_columns.push((dates, prices, returns));
        }

        let columns: Vec<(&[NaiveDate], &[f64])> = leg_columns
            .iter()
            .flat_map(|(d, p, r)| [(d.as_slice(), p.as_slice()), (d.as_slice(), r.as_slice())])
            .collect();
        let (dates, aligned) = inner_join(&columns);
        if dates.len() < MIN_OBSERVATIONS {
            return Err(insufficient(format!(
                "only {} aligned observation(s), need {MIN_OBSERVATIONS}",
                dates.len()
            )));
        }

        let (returns, signal_prices) = if legs.len() == 1 {
            let sign = legs[0].signed_ratio.signum();
            let returns = aligned[1].iter().map(|r| r * sign).collect();
            (returns, aligned[0].clone())
        } else {
            let total = unit.total_weight();
            let returns = (0..dates.len())
                .map(|t| {
                    legs.iter()
                        .enumerate()
                        .map(|(k, leg)| aligned[2 * k + 1][t] * leg.signed_ratio)
                        .sum::<f64>()
                        / total
                })
                .collect();
            let long = legs.iter().position(|l| l.signed_ratio > 0.0).unwrap_or(0);
            let short = legs.iter().position(|l| l.signed_ratio < 0.0).unwrap_or(1);
            let prices = (0..dates.len())
                .map(|t| {
                    (aligned[2 * long][t] * legs[long].signed_ratio.abs())
                        / (aligned[2 * short][t] * legs[short].signed_ratio.abs())
                })
                .collect();
            (returns, prices)
        };

        Ok(PreparedSeries {
            dates,
            returns,
            signal: ma_signal(&signal_prices, MA_WINDOW, MA_MIN_PERIODS),
        })
    }

    fn optimize(
        &self,
        unit: &PositionUnit,
        prepared: &PreparedSeries,
        max_evals: usize,
    ) -> (ThresholdParams, usize) {
        if max_evals == 0 {
            return (self.grid.first(), 0);
        }

        let direction = unit.direction();
        let rate = self.costs.rate();
        let score = |p: &ThresholdParams| {
            let (returns, _) = simulate(prepared, direction, p, rate);
            let (mean, std) = mean_std(&returns);
            sharpe(mean, std)
        };

        let mut best: Option<(f64, ThresholdParams)> = None;
        let mut consider = |p: ThresholdParams| {
            let s = score(&p);
            if best.map_or(true, |(b, _)| s > b) {
                best = Some((s, p));
            }
        };

        let total = self.grid.total();
        let evaluations = if total <= max_evals {
            for i in 0..total {
                consider(self.grid.candidate(i));
            }
            total
        } else {
            let unit_text = unit.to_string();
            let first = prepared.dates.first().map(|d| d.to_string()).unwrap_or_default();
            let last = prepared.dates.last().map(|d| d.to_string()).unwrap_or_default();
            let mut rng = self
                .seeds
                .rng_for(&[&unit_text, &direction.to_string(), &first, &last]);
            for _ in 0..max_evals {
                consider(self.grid.random(&mut rng));
            }
            max_evals
        };

        let params = best.map_or_else(|| self.grid.first(), |(_, p)| p);
        (params, evaluations)
    }
}

impl StrategyEvaluator for ThresholdStrategy {
    fn name(&self) -> &str {
        "threshold_strategy"
    }

    fn evaluate(
        &self,
        unit: &PositionUnit,
        period: &Period,
        max_evals: usize,
    ) -> Result<StrategyEvaluation, SkillError> {
        let prepared = self.prepare(unit, period)?;
        let (params, evaluations) = match self.fixed {
            Some(p) => (p, 1),
            None => self.optimize(unit, &prepared, max_evals),
        };

        let (returns, n_trades) = simulate(&prepared, unit.direction(), &params, self.costs.rate());
        if returns.iter().any(|r| !r.is_finite()) {
            return Err(SkillError::Evaluation {
                subject: unit.to_string(),
                detail: "non-finite strategy return".into(),
            });
        }
        let metrics = PerformanceMetrics::from_returns(&returns).with_extra("n_trades", n_trades);

        Ok(StrategyEvaluation {
            unit: unit.clone(),
            period: period.clone(),
            best_params: params.to_map(),
            metrics,
            returns: ReturnSeries::new(prepared.dates, returns),
            evaluations,
        })
    }
}

/// `price / rolling mean`, back-filled over the warm-up, 1.0 where undefined.
pub fn ma_signal(prices: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let n = prices.len();
    let mut raw: Vec<Option<f64>> = vec![None; n];
    let mut sum = 0.0;
    for i in 0..n {
        sum += prices[i];
        if i >= window {
            sum -= prices[i - window];
        }
        let count = (i + 1).min(window);
        if count >= min_periods {
            let s = prices[i] / (sum / count as f64);
            if s.is_finite() {
                raw[i] = Some(s);
            }
        }
    }
    let mut next = None;
    for slot in raw.iter_mut().rev() {
        match slot {
            Some(v) => next = Some(*v),
            None => *slot = next,
        }
    }
    raw.into_iter().map(|v| v.unwrap_or(1.0)).collect()
}

/// Run the threshold rules over prepared data. Returns daily strategy returns
/// and the number of trades opened.
pub fn simulate(
    prepared: &PreparedSeries,
    direction: Direction,
    p: &ThresholdParams,
    cost_rate: f64,
) -> (Vec<f64>, usize) {
    let n = prepared.returns.len();
    let mut out = vec![0.0; n];

    let mut exposure = 0.0_f64;
    let mut entry_equity = 1.0;
    let mut trade_peak = 1.0_f64;
    let mut trade_equity = 1.0;
    let mut in_trade = false;
    let mut n_trades = 0;
    let mut n_adds = 0u32;

    for i in 0..n {
        out[i] = exposure * prepared.returns[i];
        trade_equity *= 1.0 + out[i];
        if in_trade {
            trade_peak = trade_peak.max(trade_equity);
        }

        let s = prepared.signal.get(i).copied().unwrap_or(1.0);
        let mut next = exposure;

        let (wants_entry, wants_exit, add_level) = match direction {
            Direction::Long => (
                s <= p.low_threshold,
                s >= p.reverse_long_threshold,
                p.low_threshold - p.threshold_adjust_pct * f64::from(n_adds + 1),
            ),
            Direction::Short => (
                s >= p.high_threshold,
                s <= p.reverse_short_threshold,
                p.high_threshold + p.threshold_adjust_pct * f64::from(n_adds + 1),
            ),
        };
        let beyond_add_level = match direction {
            Direction::Long => s <= add_level,
            Direction::Short => s >= add_level,
        };

        if !in_trade && wants_entry {
            next = p.max_position_pct.min(p.position_increase_pct);
            in_trade = true;
            n_trades += 1;
            n_adds = 0;
            entry_equity = trade_equity;
            trade_peak = trade_equity;
        } else if in_trade {
            if beyond_add_level && next < p.max_position_pct {
                next = p.max_position_pct.min(next + p.position_increase_pct);
                n_adds += 1;
            }
            let trade_ret = trade_equity / entry_equity - 1.0;
            let trade_dd = if trade_peak != 0.0 {
                trade_equity / trade_peak - 1.0
            } else {
                0.0
            };
            if wants_exit
                || trade_ret <= -p.stop_loss_pct
                || trade_ret >= p.profit_threshold_pct
                || trade_dd <= -p.drawdown_threshold_pct
            {
                next = 0.0;
                in_trade = false;
            }
        }

        let delta = (next - exposure).abs();
        if delta > 0.0 {
            out[i] -= delta * cost_rate;
        }
        exposure = next;
    }

    (out, n_trades)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PricePoint, StaticPriceSource};
    use crate::position::parse;

    fn d(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + chrono::Duration::days(offset)
    }

    fn wave(n: i64, phase: f64) -> Vec<PricePoint> {
        (0..n)
            .map(|i| PricePoint::new(d(i), 100.0 + 15.0 * ((i as f64) / 9.0 + phase).sin()))
            .collect()
    }

    fn fixed() -> ThresholdParams {
        ThresholdParams {
            low_threshold: 1.0,
            high_threshold: 1.45,
            reverse_long_threshold: 1.1,
            reverse_short_threshold: 1.0,
            stop_loss_pct: 0.5,
            threshold_adjust_pct: 0.05,
            max_position_pct: 1.0,
            position_increase_pct: 0.2,
            profit_threshold_pct: 10.0,
            drawdown_threshold_pct: 0.9,
        }
    }

    #[test]
    fn default_grid_size() {
        let grid = ParamGrid::default();
        assert_eq!(grid.total(), 5 * 5 * 5 * 15 * 2 * 3 * 2 * 2 * 3);
        assert_eq!(grid.first().low_threshold, 1.0);
        assert_eq!(grid.candidate(grid.total() - 1).drawdown_threshold_pct, 0.4);
        assert_eq!(grid.candidate(1).drawdown_threshold_pct, 0.3);
    }

    #[test]
    fn simulate_enters_and_exits_long() {
        let prepared = PreparedSeries {
            dates: (0..4).map(d).collect(),
            returns: vec![0.0, 0.1, 0.1, 0.0],
            signal: vec![0.99, 1.05, 1.2, 1.0],
        };
        let c = 0.0012;
        let (out, trades) = simulate(&prepared, Direction::Long, &fixed(), c);
        assert_eq!(trades, 1);
        let expected = [-0.2 * c, 0.02, 0.02 - 0.2 * c, 0.0];
        for (a, b) in out.iter().zip(expected) {
            assert!((a - b).abs() < 1e-12, "{out:?}");
        }
    }

    #[test]
    fn signal_is_backfilled_during_warmup() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let sig = ma_signal(&prices, 60, 20);
        assert_eq!(sig[0], sig[19]);
        assert!(sig[29] > 1.0);
    }

    #[test]
    fn evaluation_is_deterministic_and_bounded() {
        let source = Arc::new(StaticPriceSource::new().with_series("RB", wave(300, 0.0)));
        let strategy = ThresholdStrategy::new(source);
        let unit = parse("多RB").unwrap();

        let a = strategy.evaluate(&unit, &Period::all(), 25).unwrap();
        let b = strategy.evaluate(&unit, &Period::all(), 25).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.evaluations, 25);
        assert_eq!(a.best_params.len(), 10);
        assert_eq!(a.returns.len(), 299);
        assert!(a.metrics.max_drawdown <= 0.0);
        assert!(a.metrics.extra("n_trades").is_some());
    }

    #[test]
    fn zero_budget_uses_first_grid_point() {
        let source = Arc::new(StaticPriceSource::new().with_series("RB", wave(120, 0.0)));
        let strategy = ThresholdStrategy::new(source);
        let eval = strategy.evaluate(&parse("空RB").unwrap(), &Period::all(), 0).unwrap();
        assert_eq!(eval.best_params, ParamGrid::default().first().to_map());
        assert_eq!(eval.evaluations, 0);
    }

    #[test]
    fn hedge_legs_are_inner_joined() {
        let a: Vec<PricePoint> = wave(10, 0.0);
        let b: Vec<PricePoint> = (2..12).map(|i| PricePoint::new(d(i), 50.0 + i as f64)).collect();
        let source = Arc::new(
            StaticPriceSource::new()
                .with_series("A", a)
                .with_series("B", b),
        );
        let strategy = ThresholdStrategy::new(source).with_fixed_params(fixed());
        let prepared = strategy.prepare(&parse("多A-B:2:1").unwrap(), &Period::all()).unwrap();
        // returns of A start at day 1, of B at day 3; both end by day 9
        assert_eq!(prepared.dates.first(), Some(&d(3)));
        assert_eq!(prepared.dates.len(), 7);
    }

    #[test]
    fn short_series_is_insufficient() {
        let source = Arc::new(
            StaticPriceSource::new()
                .with_series("AU", wave(3, 0.0))
                .with_series("AG", Vec::new()),
        );
        let strategy = ThresholdStrategy::new(source);
        for text in ["多AU", "空AG", "多CU"] {
            let err = strategy.evaluate(&parse(text).unwrap(), &Period::all(), 5).unwrap_err();
            assert!(
                matches!(err, SkillError::InsufficientData { .. }),
                "{text}: {err}"
            );
        }
    }
}
