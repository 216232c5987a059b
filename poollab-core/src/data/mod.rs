//! Market data: the `PriceSource` trait and its implementations.

pub mod circuit_breaker;
pub mod http;
pub mod memory;
pub mod parquet;
pub mod provider;
pub mod synthetic;

pub use circuit_breaker::{BreakerState, CircuitBreaker, Permit};
pub use http::HttpPriceSource;
pub use memory::StaticPriceSource;
pub use parquet::ParquetPriceSource;
pub use provider::{normalize_series, trim_to_period, DataError, PricePoint, PriceSource};
pub use synthetic::SyntheticPriceSource;
