//! Configuration for the persistence layer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Base directory for blob files
    pub data_dir: PathBuf,

    /// Retry policy applied to writes at the gateway boundary
    pub retry: RetryConfig,
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data"), retry: RetryConfig::default() }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the first retry
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Delay that follows `current`, capped at `max_delay_ms`
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next = current.as_millis() as f64 * self.backoff_multiplier;
        Duration::from_millis(next.min(self.max_delay_ms as f64) as u64)
    }
}

impl PersistenceConfig {
    /// Create a new configuration with custom data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), ..Default::default() }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.retry.max_attempts == 0 {
            return Err("retry max_attempts must be greater than 0".to_string());
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err("retry backoff_multiplier must be at least 1.0".to_string());
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err("retry initial_delay_ms must not exceed max_delay_ms".to_string());
        }

        Ok(())
    }
}
