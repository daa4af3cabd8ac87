//! Configuration types consumed by the core.
//!
//! The host application owns the configuration file; these structs are the
//! sections it embeds and hands over at startup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_workers() -> usize {
    0
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    2_000
}
fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Settings for the persist worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Number of persist workers (0 means one per CPU)
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attempts per persist before it is reported as a durability failure,
    /// at least 2 so every failed write is retried once
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for the retry delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Bounded wait for draining and flushing on shutdown, in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl WriterConfig {
    /// Resolved worker count, never zero.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(2),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 2 {
            return Err(format!(
                "writer.max_attempts must be at least 2, got {}",
                self.max_attempts
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "writer.initial_backoff_ms ({}) must not exceed writer.max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            ));
        }
        Ok(())
    }
}

/// Exponential backoff schedule for failed persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): doubles each
    /// time, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        WriterConfig::default().retry_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = WriterConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_count() >= 1);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn explicit_worker_count_is_kept() {
        let config = WriterConfig {
            workers: 3,
            ..WriterConfig::default()
        };
        assert_eq!(config.worker_count(), 3);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(500));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = WriterConfig::default();
        config.max_attempts = 0;
        assert!(config.validate().is_err());
        config.max_attempts = 1;
        assert!(config.validate().is_err());
        config.max_attempts = 2;
        assert!(config.validate().is_ok());

        let single = WriterConfig {
            max_attempts: 1,
            ..WriterConfig::default()
        };
        assert_eq!(single.retry_policy().max_attempts, 2);

        let mut config = WriterConfig::default();
        config.initial_backoff_ms = 5_000;
        config.max_backoff_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: WriterConfig = serde_json::from_str(r#"{"workers": 2}"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_backoff_ms, 2_000);
    }
}
