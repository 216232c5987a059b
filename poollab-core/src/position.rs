//! Position grammar: textual position descriptions → [`PositionUnit`].
//!
//! Grammar (surrounding whitespace ignored, instrument codes case-insensitive):
//!
//! ```text
//! <DIR><INSTRUMENT>                        single leg, weight 1
//! <DIR><INSTRUMENT>:<W>                    single leg, weight W
//! <DIR><INSTRUMENT_A>-<INSTRUMENT_B>       hedge pair, ratios 1:1
//! <DIR><INSTRUMENT_A>-<INSTRUMENT_B>:<RA>:<RB>
//! ```
//!
//! `<DIR>` is `多` (long) or `空` (short). For a hedge pair, leg A carries the
//! sign of `<DIR>` and leg B the opposite sign.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const LONG_TOKEN: char = '多';
const SHORT_TOKEN: char = '空';

/// Trade direction of a position unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn token(self) -> char {
        match self {
            Direction::Long => LONG_TOKEN,
            Direction::Short => SHORT_TOKEN,
        }
    }

    fn from_token(c: char) -> Option<Self> {
        match c {
            LONG_TOKEN => Some(Direction::Long),
            SHORT_TOKEN => Some(Direction::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Shape of a position unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PositionKind {
    Single {
        instrument: String,
        weight: u32,
    },
    HedgePair {
        instrument_a: String,
        instrument_b: String,
        ratio_a: u32,
        ratio_b: u32,
    },
}

/// One instrument leg with its signed contract-value ratio.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub instrument: String,
    /// Ratio carrying the leg's sign: positive = long exposure.
    pub signed_ratio: f64,
}

/// A parsed, immutable position unit.
///
/// Serializes as its canonical text so that persisted records carry the same
/// form the operator typed (modulo case normalisation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PositionUnit {
    direction: Direction,
    kind: PositionKind,
}

/// Errors from [`parse`]. Each variant names the offending token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty position text")]
    Empty,

    #[error("unknown direction token '{token}' in '{text}' (expected 多 or 空)")]
    UnknownDirection { token: String, text: String },

    #[error("empty instrument code in '{text}'")]
    EmptyInstrument { text: String },

    #[error("invalid instrument code '{token}' in '{text}'")]
    InvalidInstrument { token: String, text: String },

    #[error("invalid ratio '{token}' in '{text}': ratios must be positive integers")]
    InvalidRatio { token: String, text: String },

    #[error("expected {expected} ratio(s) in '{text}', found {found}")]
    RatioCount {
        expected: usize,
        found: usize,
        text: String,
    },
}

impl PositionUnit {
    pub fn single(direction: Direction, instrument: impl Into<String>, weight: u32) -> Self {
        Self {
            direction,
            kind: PositionKind::Single {
                instrument: instrument.into().to_ascii_uppercase(),
                weight: weight.max(1),
            },
        }
    }

    pub fn hedge_pair(
        direction: Direction,
        instrument_a: impl Into<String>,
        instrument_b: impl Into<String>,
        ratio_a: u32,
        ratio_b: u32,
    ) -> Self {
        Self {
            direction,
            kind: PositionKind::HedgePair {
                instrument_a: instrument_a.into().to_ascii_uppercase(),
                instrument_b: instrument_b.into().to_ascii_uppercase(),
                ratio_a: ratio_a.max(1),
                ratio_b: ratio_b.max(1),
            },
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn kind(&self) -> &PositionKind {
        &self.kind
    }

    pub fn is_hedge(&self) -> bool {
        matches!(self.kind, PositionKind::HedgePair { .. })
    }

    /// The same unit traded in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            direction: self.direction.reversed(),
            kind: self.kind.clone(),
        }
    }

    /// Legs with their signed ratios.
    pub fn legs(&self) -> Vec<Leg> {
        let sign = self.direction.sign();
        match &self.kind {
            PositionKind::Single { instrument, weight } => vec![Leg {
                instrument: instrument.clone(),
                signed_ratio: sign * f64::from(*weight),
            }],
            PositionKind::HedgePair {
                instrument_a,
                instrument_b,
                ratio_a,
                ratio_b,
            } => vec![
                Leg {
                    instrument: instrument_a.clone(),
                    signed_ratio: sign * f64::from(*ratio_a),
                },
                Leg {
                    instrument: instrument_b.clone(),
                    signed_ratio: -sign * f64::from(*ratio_b),
                },
            ],
        }
    }

    /// Sum of absolute leg ratios.
    pub fn total_weight(&self) -> f64 {
        match &self.kind {
            PositionKind::Single { weight, .. } => f64::from(*weight),
            PositionKind::HedgePair {
                ratio_a, ratio_b, ..
            } => f64::from(*ratio_a) + f64::from(*ratio_b),
        }
    }

    pub fn instruments(&self) -> Vec<&str> {
        match &self.kind {
            PositionKind::Single { instrument, .. } => vec![instrument.as_str()],
            PositionKind::HedgePair {
                instrument_a,
                instrument_b,
                ..
            } => vec![instrument_a.as_str(), instrument_b.as_str()],
        }
    }
}

impl fmt::Display for PositionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.direction.token())?;
        match &self.kind {
            PositionKind::Single { instrument, weight } => {
                write!(f, "{instrument}")?;
                if *weight != 1 {
                    write!(f, ":{weight}")?;
                }
                Ok(())
            }
            PositionKind::HedgePair {
                instrument_a,
                instrument_b,
                ratio_a,
                ratio_b,
            } => {
                write!(f, "{instrument_a}-{instrument_b}")?;
                if (*ratio_a, *ratio_b) != (1, 1) {
                    write!(f, ":{ratio_a}:{ratio_b}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for PositionUnit {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl TryFrom<String> for PositionUnit {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse(&value)
    }
}

impl From<PositionUnit> for String {
    fn from(unit: PositionUnit) -> Self {
        unit.to_string()
    }
}

/// Parse a position description.
pub fn parse(text: &str) -> Result<PositionUnit, ParseError> {
    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    let first = chars.next().ok_or(ParseError::Empty)?;
    let direction = Direction::from_token(first).ok_or_else(|| ParseError::UnknownDirection {
        token: first.to_string(),
        text: trimmed.to_string(),
    })?;
    let rest = chars.as_str();

    let mut parts = rest.split(':');
    // split always yields at least one item
    let instruments_part = parts.next().unwrap_or_default();
    let ratios: Vec<&str> = parts.collect();

    match instruments_part.split_once('-') {
        None => {
            let instrument = instrument_code(instruments_part, trimmed)?;
            let weight = match ratios.as_slice() {
                [] => 1,
                [w] => ratio(w, trimmed)?,
                _ => {
                    return Err(ParseError::RatioCount {
                        expected: 1,
                        found: ratios.len(),
                        text: trimmed.to_string(),
                    })
                }
            };
            Ok(PositionUnit::single(direction, instrument, weight))
        }
        Some((a, b)) => {
            let instrument_a = instrument_code(a, trimmed)?;
            let instrument_b = instrument_code(b, trimmed)?;
            let (ratio_a, ratio_b) = match ratios.as_slice() {
                [] => (1, 1),
                [ra, rb] => (ratio(ra, trimmed)?, ratio(rb, trimmed)?),
                _ => {
                    return Err(ParseError::RatioCount {
                        expected: 2,
                        found: ratios.len(),
                        text: trimmed.to_string(),
                    })
                }
            };
            Ok(PositionUnit::hedge_pair(
                direction,
                instrument_a,
                instrument_b,
                ratio_a,
                ratio_b,
            ))
        }
    }
}

fn instrument_code(token: &str, text: &str) -> Result<String, ParseError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ParseError::EmptyInstrument {
            text: text.to_string(),
        });
    }
    if !token.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ParseError::InvalidInstrument {
            token: token.to_string(),
            text: text.to_string(),
        });
    }
    Ok(token.to_ascii_uppercase())
}

fn ratio(token: &str, text: &str) -> Result<u32, ParseError> {
    let invalid = || ParseError::InvalidRatio {
        token: token.to_string(),
        text: text.to_string(),
    };
    let value: u32 = token.trim().parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_long_defaults_to_unit_weight() {
        let unit = parse("多AU").unwrap();
        assert_eq!(unit.direction(), Direction::Long);
        assert_eq!(
            unit.kind(),
            &PositionKind::Single {
                instrument: "AU".into(),
                weight: 1
            }
        );
        assert_eq!(unit.to_string(), "多AU");
    }

    #[test]
    fn single_with_weight_and_lowercase_code() {
        let unit = parse("  空ag:3 ").unwrap();
        assert_eq!(unit.direction(), Direction::Short);
        assert_eq!(unit.legs()[0].signed_ratio, -3.0);
        assert_eq!(unit.to_string(), "空AG:3");
    }

    #[test]
    fn hedge_pair_legs_have_opposite_signs() {
        let unit = parse("多RB-HC:2:1").unwrap();
        let legs = unit.legs();
        assert_eq!(legs[0].instrument, "RB");
        assert_eq!(legs[0].signed_ratio, 2.0);
        assert_eq!(legs[1].instrument, "HC");
        assert_eq!(legs[1].signed_ratio, -1.0);
        assert_eq!(unit.total_weight(), 3.0);
    }

    #[test]
    fn reversing_direction_flips_both_legs() {
        let long = parse("多L-V:2:1").unwrap();
        let short = parse("空L-V:2:1").unwrap();
        assert_eq!(long.reversed(), short);

        let long_legs = long.legs();
        let short_legs = short.legs();
        for (l, s) in long_legs.iter().zip(&short_legs) {
            assert_eq!(l.signed_ratio, -s.signed_ratio);
            assert_eq!(l.signed_ratio.abs(), s.signed_ratio.abs());
        }
    }

    #[test]
    fn hedge_without_ratios_is_one_to_one() {
        let unit = parse("多CU-NI").unwrap();
        assert_eq!(unit.total_weight(), 2.0);
        assert_eq!(unit.to_string(), "多CU-NI");
    }

    #[test]
    fn unknown_direction_names_token() {
        let err = parse("买AU").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownDirection {
                token: "买".into(),
                text: "买AU".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse("   ").unwrap_err(), ParseError::Empty);
        assert!(matches!(
            parse("多").unwrap_err(),
            ParseError::EmptyInstrument { .. }
        ));
        assert!(matches!(
            parse("多RB-").unwrap_err(),
            ParseError::EmptyInstrument { .. }
        ));
        assert!(matches!(
            parse("多AU:0").unwrap_err(),
            ParseError::InvalidRatio { .. }
        ));
        assert!(matches!(
            parse("多AU:x").unwrap_err(),
            ParseError::InvalidRatio { .. }
        ));
        assert!(matches!(
            parse("多RB-HC:1").unwrap_err(),
            ParseError::RatioCount { expected: 2, found: 1, .. }
        ));
        assert!(matches!(
            parse("多R$B").unwrap_err(),
            ParseError::InvalidInstrument { .. }
        ));
    }

    #[test]
    fn serializes_as_canonical_text() {
        let unit = parse("空i-j:1:2").unwrap();
        let json = serde_json::to_string(&unit).unwrap();
        assert_eq!(json, "\"空I-J:1:2\"");
        let back: PositionUnit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, unit);
    }
}
