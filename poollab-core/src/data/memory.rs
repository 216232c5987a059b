//! In-memory price source.

use std::collections::HashMap;

use super::provider::{normalize_series, trim_to_period, DataError, PricePoint, PriceSource};
use crate::period::Period;

/// Fixed series keyed by instrument code. Unknown instruments are reported as
/// not found; an instrument registered with an empty series yields an empty
/// result.
#[derive(Debug, Default, Clone)]
pub struct StaticPriceSource {
    series: HashMap<String, Vec<PricePoint>>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, instrument: &str, points: Vec<PricePoint>) -> Self {
        self.insert(instrument, points);
        self
    }

    pub fn insert(&mut self, instrument: &str, points: Vec<PricePoint>) {
        self.series
            .insert(instrument.to_ascii_uppercase(), normalize_series(points));
    }
}

impl PriceSource for StaticPriceSource {
    fn name(&self) -> &str {
        "static"
    }

    fn get_price_series(
        &self,
        instrument: &str,
        period: &Period,
    ) -> Result<Vec<PricePoint>, DataError> {
        let points = self
            .series
            .get(&instrument.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| DataError::InstrumentNotFound {
                instrument: instrument.to_string(),
            })?;
        Ok(trim_to_period(points, period))
    }
}
