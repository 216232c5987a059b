//! Price-history coverage check, run once per unit before any evaluation.
//!
//! A unit is covered when every leg has prices reaching back to the start of
//! the longest requested look-back window. Windows end at the last
//! observation of each leg, as in [`Period::contains`]. The first observation
//! may fall up to [`BOUNDARY_GRACE_DAYS`] after the window start, so weekends,
//! holidays and contract rolls near the boundary do not count as gaps.

use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;

use super::error::SkillError;
use crate::data::{DataError, PriceSource};
use crate::period::Period;
use crate::position::PositionUnit;

pub const BOUNDARY_GRACE_DAYS: i64 = 45;

/// Outcome of a coverage check. A short history is a normal answer, not an
/// error: the unit is dropped from the pool and the task continues.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Coverage {
    Covered {
        /// Fewest observations across the unit's legs.
        observations: usize,
    },
    Short { instrument: String, detail: String },
}

impl Coverage {
    pub fn is_covered(&self) -> bool {
        matches!(self, Coverage::Covered { .. })
    }
}

/// Checks whether a unit has enough price history for a look-back window.
pub trait DataValidator: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` only when the source itself failed; missing or short data comes
    /// back as [`Coverage::Short`].
    fn check(&self, unit: &PositionUnit, longest: &Period) -> Result<Coverage, SkillError>;
}

/// The longest finite period, or `all` when none is finite.
pub fn longest_period(periods: &[Period]) -> Period {
    periods
        .iter()
        .filter(|p| p.lookback_days().is_some())
        .max_by_key(|p| p.lookback_days())
        .cloned()
        .unwrap_or_else(Period::all)
}

/// Coverage against a [`PriceSource`].
pub struct HistoryCoverage {
    source: Arc<dyn PriceSource>,
}

impl HistoryCoverage {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self { source }
    }
}

impl DataValidator for HistoryCoverage {
    fn name(&self) -> &str {
        "history_coverage"
    }

    fn check(&self, unit: &PositionUnit, longest: &Period) -> Result<Coverage, SkillError> {
        let subject = unit.to_string();
        let mut observations = usize::MAX;

        for leg in unit.legs() {
            let instrument = leg.instrument.clone();
            let points = match self.source.get_price_series(&instrument, &Period::all()) {
                Ok(points) => points,
                Err(DataError::InstrumentNotFound { .. }) => {
                    return Ok(Coverage::Short {
                        instrument,
                        detail: "no price data".into(),
                    })
                }
                Err(e) => {
                    return Err(SkillError::Evaluation {
                        subject,
                        detail: e.to_string(),
                    })
                }
            };

            let (Some(first), Some(last)) = (points.first(), points.last()) else {
                return Ok(Coverage::Short {
                    instrument,
                    detail: "no price data".into(),
                });
            };
            if let Some(start) = longest.start_date(last.date) {
                let latest_first = start + Duration::days(BOUNDARY_GRACE_DAYS);
                if first.date > latest_first {
                    return Ok(Coverage::Short {
                        detail: format!(
                            "history starts {}, {longest} needs prices from {start}",
                            first.date
                        ),
                        instrument,
                    });
                }
            }
            observations = observations.min(points.len());
        }

        Ok(Coverage::Covered { observations })
    }
}
