//! Runtime configuration: TOML file plus `POOLLAB_*` environment overrides.
//!
//! ```toml
//! [ledger]
//! write_url = "http://ledger.internal:8080"
//! read_url = "http://ledger.internal:8080"
//! timeout_secs = 30
//!
//! [app]
//! output_dir = "output"
//! non_interactive = true
//! on_escalate = "skip"
//! retry_limit = 2
//! max_combinations = 20000
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const ENV_PREFIX: &str = "POOLLAB_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// What a non-interactive supervisor does once a call has exhausted its
/// retries or failed with a non-retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationPolicy {
    /// Abort the task; status becomes `halted`.
    #[default]
    Halt,
    /// One more attempt, bounded by `escalation_retries`.
    Retry,
    /// Drop the unit or subset and continue.
    Skip,
}

impl FromStr for EscalationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "halt" => Ok(Self::Halt),
            "retry" => Ok(Self::Retry),
            "skip" => Ok(Self::Skip),
            other => Err(format!("expected halt, retry or skip, got '{other}'")),
        }
    }
}

impl fmt::Display for EscalationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Halt => "halt",
            Self::Retry => "retry",
            Self::Skip => "skip",
        };
        f.write_str(s)
    }
}

/// Remote ledger and price service endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub write_url: Option<String>,
    pub read_url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            write_url: None,
            read_url: None,
            token: None,
            timeout_secs: 30,
        }
    }
}

/// Engine knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output_dir: PathBuf,
    pub non_interactive: bool,
    pub on_escalate: EscalationPolicy,
    /// Total invocations allowed per supervised call before escalation.
    pub retry_limit: u32,
    /// Extra attempts an escalation `retry` may grant per call.
    pub escalation_retries: u32,
    /// Attempts per correctness-critical ledger write; unset follows
    /// `retry_limit`.
    pub persist_attempts: Option<u32>,
    /// Upper bound on compositions per task (subsets × periods × models).
    pub max_combinations: u64,
    /// Worker threads; 0 = available parallelism.
    pub concurrency: usize,
    pub strategy_max_evals: usize,
    pub breaker_cooldown_secs: u64,
    pub log_level: String,
    /// `pretty` or `json`.
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            non_interactive: false,
            on_escalate: EscalationPolicy::Halt,
            retry_limit: 2,
            escalation_retries: 1,
            persist_attempts: None,
            max_combinations: 20_000,
            concurrency: 0,
            strategy_max_evals: 2000,
            breaker_cooldown_secs: 30,
            log_level: "info".into(),
            log_format: "pretty".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolLabConfig {
    pub ledger: LedgerConfig,
    pub app: AppConfig,
}

impl PoolLabConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(s)?;
        config.normalize();
        Ok(config)
    }

    /// Load from an optional TOML file, then apply process environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Apply `POOLLAB_*` overrides from `vars`. Unknown keys are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.trim().to_string();
            match name {
                "LEDGER_WRITE_URL" => self.ledger.write_url = non_empty(value),
                "LEDGER_READ_URL" => self.ledger.read_url = non_empty(value),
                "LEDGER_TOKEN" => self.ledger.token = non_empty(value),
                "LEDGER_TIMEOUT_SECS" => self.ledger.timeout_secs = number(&key, &value)?,
                "OUTPUT_DIR" => self.app.output_dir = PathBuf::from(value),
                "NON_INTERACTIVE" => self.app.non_interactive = boolean(&key, &value)?,
                "ON_ESCALATE" => {
                    self.app.on_escalate =
                        value.parse().map_err(|reason| ConfigError::InvalidValue {
                            key: key.clone(),
                            value: value.clone(),
                            reason,
                        })?
                }
                "RETRY_LIMIT" => self.app.retry_limit = number(&key, &value)?,
                "MAX_COMBINATIONS" => self.app.max_combinations = number(&key, &value)?,
                "CONCURRENCY" => self.app.concurrency = number(&key, &value)?,
                "STRATEGY_MAX_EVALS" => self.app.strategy_max_evals = number(&key, &value)?,
                "LOG_LEVEL" => self.app.log_level = value,
                "LOG_FORMAT" => self.app.log_format = value,
                _ => {}
            }
        }
        self.normalize();
        Ok(())
    }

    fn normalize(&mut self) {
        for url in [&mut self.ledger.write_url, &mut self.ledger.read_url] {
            if let Some(u) = url.as_mut() {
                let trimmed = u.trim().trim_end_matches('/').to_string();
                *u = trimmed;
            }
            if url.as_deref() == Some("") {
                *url = None;
            }
        }
        self.app.retry_limit = self.app.retry_limit.max(1);
        self.app.persist_attempts = self.app.persist_attempts.map(|n| n.max(1));
    }

    pub fn effective_concurrency(&self) -> usize {
        if self.app.concurrency > 0 {
            return self.app.concurrency;
        }
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }

    /// Local fallback journal for ledger writes.
    pub fn journal_path(&self) -> PathBuf {
        self.app.output_dir.join("ledger-fallback.jsonl")
    }

    /// Settings snapshot stored with each task. Secrets are omitted.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "ledger": {
                "write_url": self.ledger.write_url,
                "read_url": self.ledger.read_url,
                "timeout_secs": self.ledger.timeout_secs,
            },
            "app": &self.app,
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn boolean(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}
