//! Dated return series and inner-join alignment.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Daily returns keyed by date, ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl ReturnSeries {
    /// Pairs are truncated to the shorter of the two inputs.
    pub fn new(mut dates: Vec<NaiveDate>, mut values: Vec<f64>) -> Self {
        let n = dates.len().min(values.len());
        dates.truncate(n);
        values.truncate(n);
        Self { dates, values }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }
}

/// Inner-join columns on date. Returns the common dates (ascending) and one
/// value vector per input column, in input order.
pub fn inner_join(columns: &[(&[NaiveDate], &[f64])]) -> (Vec<NaiveDate>, Vec<Vec<f64>>) {
    let Some((first_dates, _)) = columns.first() else {
        return (Vec::new(), Vec::new());
    };
    let lookups: Vec<HashMap<NaiveDate, f64>> = columns
        .iter()
        .map(|(dates, values)| dates.iter().copied().zip(values.iter().copied()).collect())
        .collect();

    let mut common: Vec<NaiveDate> = first_dates
        .iter()
        .copied()
        .filter(|d| lookups[1..].iter().all(|lookup| lookup.contains_key(d)))
        .collect();
    common.sort_unstable();
    common.dedup();

    let aligned = lookups
        .iter()
        .map(|lookup| common.iter().map(|d| lookup[d]).collect())
        .collect();
    (common, aligned)
}

/// Inner-join return series.
pub fn align(series: &[&ReturnSeries]) -> (Vec<NaiveDate>, Vec<Vec<f64>>) {
    let columns: Vec<(&[NaiveDate], &[f64])> =
        series.iter().map(|s| (s.dates(), s.values())).collect();
    inner_join(&columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, day).unwrap()
    }

    #[test]
    fn keeps_only_common_dates() {
        let a = ReturnSeries::new(vec![d(1), d(2), d(3), d(5)], vec![0.1, 0.2, 0.3, 0.5]);
        let b = ReturnSeries::new(vec![d(2), d(3), d(4), d(5)], vec![-0.2, -0.3, -0.4, -0.5]);
        let (dates, cols) = align(&[&a, &b]);
        assert_eq!(dates, vec![d(2), d(3), d(5)]);
        assert_eq!(cols[0], vec![0.2, 0.3, 0.5]);
        assert_eq!(cols[1], vec![-0.2, -0.3, -0.5]);
    }

    #[test]
    fn disjoint_series_align_to_nothing() {
        let a = ReturnSeries::new(vec![d(1)], vec![0.1]);
        let b = ReturnSeries::new(vec![d(2)], vec![0.2]);
        let (dates, cols) = align(&[&a, &b]);
        assert!(dates.is_empty());
        assert!(cols.iter().all(Vec::is_empty));
    }
}
