//! PoolLab Core: domain types, position grammar, market data and skills.
//!
//! This crate holds everything the orchestration layer builds on:
//! - Position grammar (`多AU`, `空RB-HC:2:1`) and look-back periods
//! - Task, result and log-event records
//! - Performance metrics over daily return series
//! - Price sources (HTTP, Parquet, synthetic, in-memory)
//! - Strategy evaluator and portfolio composer traits with reference skills

pub mod data;
pub mod domain;
pub mod metrics;
pub mod period;
pub mod position;
pub mod rng;
pub mod skills;

pub use metrics::PerformanceMetrics;
pub use period::{Period, PeriodError};
pub use position::{parse as parse_position, Direction, ParseError, PositionKind, PositionUnit};
