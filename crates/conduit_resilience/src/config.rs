//! Declarative resilience configuration.

use std::time::Duration;

use conduit_core::{ConduitError, ConduitResult};
use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::retry::{RetryPolicy, SyncBackoff};

/// Serializable backoff schedule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// No delay
    #[default]
    None,
    /// Fixed delay
    Constant {
        /// Delay in milliseconds
        delay_ms: u64,
    },
    /// `base * attempt`
    Linear {
        /// Base delay in milliseconds
        base_ms: u64,
    },
    /// `base * 2^(attempt - 1)`
    Exponential {
        /// Base delay in milliseconds
        base_ms: u64,
        /// Optional cap in milliseconds
        #[serde(default)]
        max_delay_ms: Option<u64>,
    },
}

impl From<BackoffConfig> for Backoff {
    fn from(config: BackoffConfig) -> Self {
        match config {
            BackoffConfig::None => Backoff::None,
            BackoffConfig::Constant { delay_ms } => Backoff::constant(Duration::from_millis(delay_ms)),
            BackoffConfig::Linear { base_ms } => Backoff::linear(Duration::from_millis(base_ms)),
            BackoffConfig::Exponential {
                base_ms,
                max_delay_ms,
            } => Backoff::Exponential {
                base: Duration::from_millis(base_ms),
                max_delay: max_delay_ms.map(Duration::from_millis),
            },
        }
    }
}

/// Retry options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Upper bound on attempts, at least 1
    pub max_attempts: u32,
    /// Delay schedule
    pub backoff: BackoffConfig,
    /// Blocking-path backoff behavior
    pub sync_backoff: SyncBackoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::None,
            sync_backoff: SyncBackoff::Block,
        }
    }
}

impl RetryConfig {
    /// Parse from JSON
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed JSON or unknown fields.
    pub fn from_json(json: &str) -> ConduitResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build the policy, without a retry scope
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `max_attempts` is zero.
    pub fn policy(&self) -> ConduitResult<RetryPolicy> {
        Ok(RetryPolicy::new(self.max_attempts)?
            .with_backoff(self.backoff.into())
            .with_sync_backoff(self.sync_backoff))
    }
}

/// Timeout options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Deadline in milliseconds
    pub timeout_ms: u64,
}

impl TimeoutConfig {
    /// Parse from JSON
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed JSON or unknown fields.
    pub fn from_json(json: &str) -> ConduitResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The deadline
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero deadline.
    pub fn duration(&self) -> ConduitResult<Duration> {
        if self.timeout_ms == 0 {
            return Err(ConduitError::configuration(
                "timeout_ms",
                "deadline must be positive",
            ));
        }
        Ok(Duration::from_millis(self.timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_from_json() {
        let config = RetryConfig::from_json(
            r#"{
                "max_attempts": 4,
                "backoff": {"kind": "exponential", "base_ms": 100, "max_delay_ms": 250},
                "sync_backoff": "skip"
            }"#,
        )
        .unwrap();
        let policy = config.policy().unwrap();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.backoff().delay(3), Duration::from_millis(250));
        assert_eq!(policy.sync_backoff(), SyncBackoff::Skip);
    }

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::from_json("{}").unwrap();
        assert_eq!(config, RetryConfig::default());
        assert_eq!(config.policy().unwrap().backoff().delay(1), Duration::ZERO);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert!(config.policy().is_err());
    }

    #[test]
    fn test_timeout_config() {
        let config = TimeoutConfig::from_json(r#"{"timeout_ms": 1500}"#).unwrap();
        assert_eq!(config.duration().unwrap(), Duration::from_millis(1500));
        assert!(TimeoutConfig { timeout_ms: 0 }.duration().is_err());
        assert!(TimeoutConfig::from_json(r#"{"timeout": 1}"#).is_err());
    }
}
