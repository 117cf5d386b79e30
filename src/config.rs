//! Dispatch configuration
//!
//! Settings come from code (`Default` plus `with_*` builders), from serde, or
//! from the process environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `CONCURRENT_EXECUTION_LIMIT` | [`DispatchConfig::concurrency_limit`] |
//! | `MAX_QUEUE_SIZE` | [`DispatchConfig::max_queue_size`] |
//! | `MAX_BATCH_SIZE` | [`DispatchConfig::max_batch_size`] |

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable holding the concurrency limit
pub const ENV_CONCURRENCY_LIMIT: &str = "CONCURRENT_EXECUTION_LIMIT";
/// Environment variable holding the waiting-list bound
pub const ENV_MAX_QUEUE_SIZE: &str = "MAX_QUEUE_SIZE";
/// Environment variable holding the maximum batch size
pub const ENV_MAX_BATCH_SIZE: &str = "MAX_BATCH_SIZE";

/// Default maximum number of targets in one batch
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name
        key: String,
        /// Raw value
        value: String,
    },

    /// A setting is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Limits applied by the queue and the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum executions running at once, system-wide
    pub concurrency_limit: usize,
    /// Bound on tickets waiting for a slot; `None` means unbounded
    pub max_queue_size: Option<usize>,
    /// Maximum targets in one batch after expansion and dedup
    pub max_batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: num_cpus::get().max(1),
            max_queue_size: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl DispatchConfig {
    /// Set the concurrency limit
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Bound the waiting list
    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = Some(max);
        self
    }

    /// Set the maximum batch size
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup`; missing keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(limit) = parse_var(&lookup, ENV_CONCURRENCY_LIMIT)? {
            config.concurrency_limit = limit;
        }
        if let Some(max) = parse_var(&lookup, ENV_MAX_QUEUE_SIZE)? {
            config.max_queue_size = Some(max);
        }
        if let Some(max) = parse_var(&lookup, ENV_MAX_BATCH_SIZE)? {
            config.max_batch_size = max;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject zero limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_queue_size == Some(0) {
            return Err(ConfigError::Invalid(
                "max_queue_size must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}
