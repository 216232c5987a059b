//! Maximum-Sharpe weighting.
//!
//! Each member's sign is fixed by its direction, so the search runs over
//! exposure magnitudes `a` on the simplex (`a >= 0`, `Σa = 1`) against the
//! direction-adjusted return columns. The optimiser is projected gradient
//! ascent from the equal-weight point, keeping the best iterate seen.
//! Degenerate inputs fall back to equal weights and say so in the metrics.

use super::equal_weight::EqualWeight;
use super::error::SkillError;
use super::portfolio::{signed_weights, AlignedReturns, Composition, EvaluatedUnit, PortfolioComposer};
use crate::metrics::{mean_std, PerformanceMetrics};

const VARIANCE_FLOOR: f64 = 1e-18;

#[derive(Debug, Clone, Copy)]
pub struct MeanVariance {
    pub max_iterations: usize,
    pub initial_step: f64,
}

impl Default for MeanVariance {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            initial_step: 0.1,
        }
    }
}

impl MeanVariance {
    pub const MODEL: &'static str = "mean_variance";

    /// Optimal magnitudes, or the reason the problem is degenerate.
    pub fn optimize(&self, aligned: &AlignedReturns) -> Result<Vec<f64>, String> {
        let n = aligned.columns.len();
        let t = aligned.len();
        if t < 2 {
            return Err(format!("{t} observation(s)"));
        }

        let means: Vec<f64> = aligned.columns.iter().map(|c| mean_std(c).0).collect();
        let cov = covariance(&aligned.columns, &means);
        if cov.iter().flatten().any(|v| !v.is_finite()) {
            return Err("non-finite covariance".into());
        }
        if let Some(i) = (0..n).find(|&i| cov[i][i] <= VARIANCE_FLOOR) {
            return Err(format!("member {i} has zero variance"));
        }
        if n == 1 {
            return Ok(vec![1.0]);
        }

        let objective = |a: &[f64]| -> f64 {
            let var = quad(&cov, a);
            if var <= VARIANCE_FLOOR {
                return f64::NEG_INFINITY;
            }
            dot(&means, a) / var.sqrt()
        };

        let mut a = EqualWeight::magnitudes(n);
        let mut best = (objective(&a), a.clone());
        for k in 0..self.max_iterations {
            let var = quad(&cov, &a);
            let sd = var.sqrt();
            let ret = dot(&means, &a);
            let sigma_a = mat_vec(&cov, &a);
            let grad: Vec<f64> = (0..n)
                .map(|i| means[i] / sd - ret * sigma_a[i] / (var * sd))
                .collect();
            let norm = dot(&grad, &grad).sqrt();
            if !norm.is_finite() || norm < 1e-12 {
                break;
            }
            let step = self.initial_step / ((k + 1) as f64).sqrt();
            let moved: Vec<f64> = a.iter().zip(&grad).map(|(x, g)| x + step * g / norm).collect();
            a = project_to_simplex(&moved);

            let value = objective(&a);
            if value > best.0 {
                best = (value, a.clone());
            }
        }

        let (value, weights) = best;
        if !value.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err("optimum is not finite".into());
        }
        Ok(weights)
    }
}

impl PortfolioComposer for MeanVariance {
    fn model(&self) -> &str {
        Self::MODEL
    }

    fn compose(&self, units: &[EvaluatedUnit]) -> Result<Composition, SkillError> {
        let aligned = AlignedReturns::from_units(units)?;
        let (magnitudes, fallback) = match self.optimize(&aligned) {
            Ok(w) => (w, None),
            Err(reason) => {
                tracing::debug!(%reason, members = units.len(), "mean_variance falling back to equal weights");
                (EqualWeight::magnitudes(units.len()), Some(reason))
            }
        };

        let mut metrics = PerformanceMetrics::from_returns(&aligned.portfolio_returns(&magnitudes));
        if let Some(reason) = fallback {
            metrics = metrics
                .with_extra("weighting_fallback", EqualWeight::MODEL)
                .with_extra("fallback_reason", reason);
        }
        Ok(Composition {
            weights: signed_weights(units, &magnitudes),
            metrics,
        })
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn mat_vec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v)).collect()
}

fn quad(m: &[Vec<f64>], v: &[f64]) -> f64 {
    dot(v, &mat_vec(m, v))
}

/// Population covariance matrix of the columns.
fn covariance(columns: &[Vec<f64>], means: &[f64]) -> Vec<Vec<f64>> {
    let n = columns.len();
    let t = columns.first().map_or(0, Vec::len) as f64;
    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let c = columns[i]
                .iter()
                .zip(&columns[j])
                .map(|(x, y)| (x - means[i]) * (y - means[j]))
                .sum::<f64>()
                / t;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }
    cov
}

/// Euclidean projection onto `{a : a >= 0, Σa = 1}`.
pub fn project_to_simplex(v: &[f64]) -> Vec<f64> {
    let mut sorted = v.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let mut cumsum = 0.0;
    let mut theta = 0.0;
    for (j, u) in sorted.iter().enumerate() {
        cumsum += u;
        let candidate = (cumsum - 1.0) / (j + 1) as f64;
        if u - candidate > 0.0 {
            theta = candidate;
        }
    }
    v.iter().map(|x| (x - theta).max(0.0)).collect()
}
