use chrono::{DateTime, TimeZone};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task identifier: `task_<YYYYMMDD_HHMMSS>_<6 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a fresh id from a start timestamp and 24 random bits.
    pub fn generate<Tz, R>(started_at: &DateTime<Tz>, rng: &mut R) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
        R: Rng + ?Sized,
    {
        let suffix: u32 = rng.gen_range(0..0x0100_0000);
        Self(format!(
            "task_{}_{suffix:06x}",
            started_at.format("%Y%m%d_%H%M%S")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Deterministic result identifier (BLAKE3 over the result's identity).
///
/// Two writes of the same logical result share an id, which is what makes
/// ledger writes idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(pub String);

impl ResultId {
    pub fn derive(parts: &[&str]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hasher.finalize().to_hex()[..32].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
