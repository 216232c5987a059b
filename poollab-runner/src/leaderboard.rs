//! Per-period portfolio ranking.
//!
//! Order: Sharpe descending, then |max drawdown| ascending, then subset size
//! ascending; remaining ties keep enumeration order. A non-finite Sharpe
//! always sorts last.

use std::cmp::Ordering;

use poollab_core::skills::Composition;

/// One successful composition awaiting ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub model: String,
    pub composition: Composition,
    /// Position in enumeration order, used as the final tie-break.
    pub order: usize,
}

impl Candidate {
    pub fn size(&self) -> usize {
        self.composition.weights.len()
    }

    fn sharpe(&self) -> f64 {
        self.composition.metrics.sharpe_ratio
    }

    fn drawdown(&self) -> f64 {
        self.composition.metrics.max_drawdown.abs()
    }
}

/// A candidate with its 1-based rank.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub rank: usize,
    pub candidate: Candidate,
}

fn by_sharpe_desc(a: f64, b: f64) -> Ordering {
    match (a.is_finite(), b.is_finite()) {
        (true, true) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    }
}

fn by_abs_asc(a: f64, b: f64) -> Ordering {
    // NaN drawdowns go last
    a.partial_cmp(&b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}

pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    by_sharpe_desc(a.sharpe(), b.sharpe())
        .then_with(|| by_abs_asc(a.drawdown(), b.drawdown()))
        .then_with(|| a.size().cmp(&b.size()))
        .then_with(|| a.order.cmp(&b.order))
}

/// Sort, assign ranks 1..N, keep the first `top_n`.
pub fn rank(mut candidates: Vec<Candidate>, top_n: usize) -> Vec<Ranked> {
    candidates.sort_by(compare);
    candidates
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(i, candidate)| Ranked {
            rank: i + 1,
            candidate,
        })
        .collect()
}
