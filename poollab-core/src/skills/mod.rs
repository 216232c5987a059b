//! Pluggable skills: data validators, strategy evaluators and portfolio
//! composers.
//!
//! The engine only depends on the traits here; `HistoryCoverage`,
//! `ThresholdStrategy`, `EqualWeight` and `MeanVariance` are the reference
//! implementations.

pub mod coverage;
pub mod equal_weight;
pub mod error;
pub mod mean_variance;
pub mod portfolio;
pub mod series;
pub mod strategy;
pub mod threshold;

pub use coverage::{longest_period, Coverage, DataValidator, HistoryCoverage};
pub use equal_weight::EqualWeight;
pub use error::{FailureClass, SkillError};
pub use mean_variance::MeanVariance;
pub use portfolio::{AlignedReturns, ComposerRegistry, Composition, EvaluatedUnit, PortfolioComposer};
pub use series::{align, inner_join, ReturnSeries};
pub use strategy::{StrategyEvaluation, StrategyEvaluator};
pub use threshold::{CostModel, ParamGrid, ThresholdParams, ThresholdStrategy};
