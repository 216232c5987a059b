//! One-line backtest instructions, e.g. `回测 多RB,多CU-NI 3年,5年 2000次`
//! or `组合回测 多RB,空I,多CU-NI 3年 2-3`.
//!
//! - positions: `多`/`空` followed by instrument text (`A-Z0-9`, `-`, `:`)
//! - periods: `<N>年` or `<N>y`; default `3y`
//! - evaluation budget: `<N>次`
//! - combo range `a-b`, only read when the text contains `组合`
//!
//! Instructions always run smart mode with both models and top 10.

use thiserror::Error;

use poollab_core::domain::{ComboRange, RequestError, TaskRequest};
use poollab_core::skills::{EqualWeight, MeanVariance};

const PORTFOLIO_MARKER: &str = "组合";
const DEFAULT_PERIOD: &str = "3y";
const TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstructionError {
    #[error("instruction is empty")]
    Empty,

    #[error("no positions found in '{0}' (expected e.g. 回测 多RB,多CU-NI 3年)")]
    NoPositions(String),

    #[error(transparent)]
    ComboRange(#[from] RequestError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub positions: Vec<String>,
    pub periods: Vec<String>,
    pub max_evals: Option<usize>,
    pub combo_range: Option<ComboRange>,
    pub is_portfolio: bool,
}

fn is_instrument_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == ':'
}

pub fn parse_instruction(text: &str) -> Result<Instruction, InstructionError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(InstructionError::Empty);
    }
    let is_portfolio = text.contains(PORTFOLIO_MARKER);

    let chars: Vec<char> = text.chars().collect();
    let mut positions = Vec::new();
    let mut periods = Vec::new();
    let mut max_evals = None;
    let mut combo_range = None;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '多' || c == '空' {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && is_instrument_char(chars[end]) {
                end += 1;
            }
            if end > start {
                let body: String = chars[start..end].iter().collect();
                positions.push(format!("{c}{}", body.trim_end_matches('-')));
            }
            i = end.max(i + 1);
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let number: String = chars[start..i].iter().collect();
            match chars.get(i) {
                Some('年') | Some('y') | Some('Y') => {
                    periods.push(format!("{number}y"));
                    i += 1;
                }
                Some('次') => {
                    max_evals = number.parse().ok();
                    i += 1;
                }
                Some('-') if is_portfolio => {
                    let from = i + 1;
                    let mut to = from;
                    while to < chars.len() && chars[to].is_ascii_digit() {
                        to += 1;
                    }
                    if to > from {
                        let upper: String = chars[from..to].iter().collect();
                        combo_range = Some(format!("{number}-{upper}").parse::<ComboRange>()?);
                        i = to;
                    }
                }
                _ => {}
            }
            continue;
        }
        i += 1;
    }

    if positions.is_empty() {
        return Err(InstructionError::NoPositions(text.to_string()));
    }
    if periods.is_empty() {
        periods.push(DEFAULT_PERIOD.to_string());
    }
    Ok(Instruction {
        positions,
        periods,
        max_evals,
        combo_range,
        is_portfolio,
    })
}

impl Instruction {
    /// Smart-mode request. Without an explicit range a portfolio instruction
    /// searches every subset size and a plain one tests units alone.
    pub fn into_request(self, default_max_evals: usize) -> TaskRequest {
        let pool = self.positions.len().max(1);
        let range = self.combo_range.unwrap_or(if self.is_portfolio {
            ComboRange { min: 1, max: pool }
        } else {
            ComboRange { min: 1, max: 1 }
        });
        TaskRequest::smart(
            self.positions,
            self.periods,
            range,
            vec![MeanVariance::MODEL.to_string(), EqualWeight::MODEL.to_string()],
            TOP_N,
        )
        .with_max_evals(self.max_evals.unwrap_or(default_max_evals))
    }
}
