//! Price source trait and structured error types.
//!
//! A `PriceSource` returns the daily close series of one instrument over a
//! look-back period. Implementations: HTTP continuous-contract API, Parquet
//! directory, seeded synthetic walk, and an in-memory map for tests.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::period::Period;

/// One daily observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, price: f64) -> Self {
        Self { date, price }
    }
}

#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by price service (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("price service returned HTTP {status} for {instrument}")]
    Http { status: u16, instrument: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("instrument not found: {instrument}")]
    InstrumentNotFound { instrument: String },

    #[error("price service blocked (circuit breaker open)")]
    CircuitBreakerTripped,

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Whether the failure reflects missing data rather than a broken source.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, DataError::InstrumentNotFound { .. })
    }
}

/// Source of daily prices.
pub trait PriceSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Daily prices for `instrument` within `period`, ascending by date with
    /// no duplicate dates.
    fn get_price_series(
        &self,
        instrument: &str,
        period: &Period,
    ) -> Result<Vec<PricePoint>, DataError>;
}

/// Sort ascending, keep the last observation per date, drop non-positive or
/// non-finite prices.
pub fn normalize_series(mut points: Vec<PricePoint>) -> Vec<PricePoint> {
    points.retain(|p| p.price.is_finite() && p.price > 0.0);
    // stable sort keeps arrival order within a date, so the last one wins below
    points.sort_by_key(|p| p.date);
    let mut out: Vec<PricePoint> = Vec::with_capacity(points.len());
    for p in points {
        match out.last_mut() {
            Some(last) if last.date == p.date => *last = p,
            _ => out.push(p),
        }
    }
    out
}

/// Keep only the observations inside `period`, measured back from the last
/// observation.
pub fn trim_to_period(points: Vec<PricePoint>, period: &Period) -> Vec<PricePoint> {
    let Some(end) = points.last().map(|p| p.date) else {
        return points;
    };
    points
        .into_iter()
        .filter(|p| period.contains(p.date, end))
        .collect()
}
