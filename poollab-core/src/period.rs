//! Look-back periods: `3y`, `6m`, `90d`, `all`.
//!
//! Years count as 365 days and months as 30 days. The window ends at the last
//! available observation of a series, not at the wall clock.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid period '{0}': expected <N>y, <N>m, <N>d or all")]
pub struct PeriodError(pub String);

/// A parsed period. Equality and hashing follow the canonical code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    code: String,
    days: Option<u32>,
}

impl Period {
    pub fn all() -> Self {
        Self {
            code: "all".into(),
            days: None,
        }
    }

    pub fn days(n: u32) -> Self {
        Self {
            code: format!("{n}d"),
            days: Some(n),
        }
    }

    pub fn parse(text: &str) -> Result<Self, PeriodError> {
        let code = text.trim().to_ascii_lowercase();
        if code == "all" || code == "max" {
            return Ok(Self::all());
        }
        let invalid = || PeriodError(text.trim().to_string());
        let unit = code.chars().last().ok_or_else(invalid)?;
        let num: u32 = code[..code.len() - unit.len_utf8()]
            .trim()
            .parse()
            .map_err(|_| invalid())?;
        if num == 0 {
            return Err(invalid());
        }
        let per_unit = match unit {
            'y' => 365,
            'm' => 30,
            'd' => 1,
            _ => return Err(invalid()),
        };
        let days = num.checked_mul(per_unit).ok_or_else(invalid)?;
        Ok(Self {
            code: format!("{num}{unit}"),
            days: Some(days),
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Window length in days; `None` for the whole history.
    pub fn lookback_days(&self) -> Option<u32> {
        self.days
    }

    /// First date inside the window ending at `end`.
    pub fn start_date(&self, end: NaiveDate) -> Option<NaiveDate> {
        self.days
            .and_then(|d| end.checked_sub_signed(Duration::days(i64::from(d))))
    }

    /// Whether `date` falls inside the window that ends at `end`.
    pub fn contains(&self, date: NaiveDate, end: NaiveDate) -> bool {
        match self.start_date(end) {
            Some(start) => date >= start && date <= end,
            None => date <= end,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Period {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(Period::parse("3y").unwrap().lookback_days(), Some(1095));
        assert_eq!(Period::parse("6M").unwrap().lookback_days(), Some(180));
        assert_eq!(Period::parse(" 90d ").unwrap().lookback_days(), Some(90));
        assert_eq!(Period::parse("max").unwrap(), Period::all());
        assert_eq!(Period::parse("ALL").unwrap().lookback_days(), None);
    }

    #[test]
    fn canonical_code_is_lowercase() {
        assert_eq!(Period::parse("5Y").unwrap().code(), "5y");
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "y", "0y", "3w", "-1y", "三年", "3.5y"] {
            assert!(Period::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn window_contains_dates() {
        let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let p = Period::parse("30d").unwrap();
        assert!(p.contains(NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(), end));
        assert!(!p.contains(NaiveDate::from_ymd_opt(2024, 11, 30).unwrap(), end));
        assert!(Period::all().contains(NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(), end));
    }
}
