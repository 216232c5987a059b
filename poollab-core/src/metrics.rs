//! Performance metrics computed from a daily return series.
//!
//! All figures assume 252 trading days per year. Volatility uses the
//! population standard deviation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Aggregate performance of a strategy or a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub sharpe_ratio: f64,
    /// Worst peak-to-trough decline, signed (≤ 0).
    pub max_drawdown: f64,
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub n_days: usize,
    /// Model-specific figures (`n_trades`, `weighting_fallback`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            total_return: 0.0,
            annualized_return: 0.0,
            annualized_volatility: 0.0,
            n_days: 0,
            extras: BTreeMap::new(),
        }
    }
}

impl PerformanceMetrics {
    /// Compute metrics from daily simple returns.
    ///
    /// Fewer than two observations yield all-zero metrics.
    pub fn from_returns(returns: &[f64]) -> Self {
        let n = returns.len();
        if n < 2 {
            return Self {
                n_days: n,
                ..Self::default()
            };
        }

        let (mean, std) = mean_std(returns);
        let sharpe_ratio = sharpe(mean, std);

        let mut equity = 1.0;
        let mut peak = f64::NEG_INFINITY;
        let mut max_drawdown: f64 = 0.0;
        for r in returns {
            equity *= 1.0 + r;
            peak = peak.max(equity);
            if peak > 0.0 {
                max_drawdown = max_drawdown.min(equity / peak - 1.0);
            }
        }
        let total_return = equity - 1.0;
        let growth = 1.0 + total_return;
        let annualized_return = if growth > 0.0 {
            growth.powf(TRADING_DAYS_PER_YEAR / n as f64) - 1.0
        } else {
            -1.0
        };

        Self {
            sharpe_ratio,
            max_drawdown,
            total_return,
            annualized_return,
            annualized_volatility: std * TRADING_DAYS_PER_YEAR.sqrt(),
            n_days: n,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extras.insert(key.to_string(), value.into());
        self
    }

    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extras.get(key)
    }
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Annualised Sharpe ratio (zero risk-free rate). Zero variance → 0.
pub fn sharpe(mean: f64, std: f64) -> f64 {
    if std > 1e-12 && std.is_finite() {
        mean / std * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}
