use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ContactError, Result};

/// Tunables for the contact component. Every field has a default, so a
/// partial JSON document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Minimum time between foreground-triggered resolves.
    pub foreground_resolve_interval_ms: u64,
    pub dispatch: DispatchConfig,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            foreground_resolve_interval_ms: 24 * 60 * 60 * 1000,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl ContactConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ContactError::Config(e.to_string()))?;
        config.dispatch.validate()?;
        Ok(config)
    }
}

/// Retry policy for [`crate::sync::ContactDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive retryable failures tolerated before the head operation is
    /// dropped.
    pub max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 30_000,
            max_backoff_ms: 300_000,
            max_attempts: 8,
        }
    }
}

impl DispatchConfig {
    /// Delay before retry number `attempt` (1-based): doubles from
    /// `initial_backoff_ms`, capped at `max_backoff_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ContactError::Config(
                "dispatch.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ContactError::Config(format!(
                "dispatch.initial_backoff_ms ({}) exceeds dispatch.max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }
}
