//! Resilience configuration
//!
//! Loaded from JSON. Every field has a default, so `{}` is a valid
//! configuration:
//!
//! ```json
//! {
//!   "retry": { "max_attempts": 5, "initial_delay_ms": 200 },
//!   "poller": { "interval_ms": 2000, "timeout_secs": 900 },
//!   "spot": { "enabled": true, "spot_percentage": 70, "max_spot_price": 0.12 },
//!   "strategy": "conservative"
//! }
//! ```

use crate::events::NoopEventSink;
use crate::manager::SpotDecisionManager;
use crate::poller::{
    CompletionPoller, DEFAULT_POLL_INTERVAL_MS, DEFAULT_WAIT_TIMEOUT_SECS, MAX_WAIT_TIMEOUT_SECS,
};
use crate::retry::RetryPolicy;
use crate::strategy::AllocationStrategy;
use serde::{Deserialize, Serialize};
use spotwise_core::{EventSink, Result, SpotConfig, SpotwiseError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Retry settings, delays in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay_ms: u64,
    /// Cap on any single delay
    pub max_delay_ms: u64,
    /// Growth factor between attempts
    pub multiplier: f64,
    /// Randomize delays
    pub jitter: bool,
    /// Fraction of the delay that may be randomized
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::from(&RetryPolicy::default())
    }
}

impl From<&RetryPolicy> for RetrySettings {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter: policy.jitter_enabled,
            jitter_factor: policy.jitter_factor,
        }
    }
}

impl RetrySettings {
    /// Build the retry policy
    pub fn policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::with_max_attempts(self.max_attempts)
            .with_delays(
                Duration::from_millis(self.initial_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )
            .with_multiplier(self.multiplier)
            .with_jitter(self.jitter_factor);

        if self.jitter { policy } else { policy.without_jitter() }
    }
}

/// Completion poller settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    /// Time between status checks
    pub interval_ms: u64,
    /// Overall wait deadline
    pub timeout_secs: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
        }
    }
}

impl PollerSettings {
    /// Build the poller
    pub fn poller(&self) -> CompletionPoller {
        CompletionPoller::with_interval(Duration::from_millis(self.interval_ms))
    }

    /// Overall wait timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry engine settings
    pub retry: RetrySettings,
    /// Completion poller settings
    pub poller: PollerSettings,
    /// Default spot settings for node pools
    pub spot: SpotConfig,
    /// Allocation strategy
    pub strategy: AllocationStrategy,
}

impl ResilienceConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SpotwiseError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SpotwiseError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Check every setting
    pub fn validate(&self) -> Result<()> {
        self.retry.policy().validate()?;

        if self.poller.interval_ms == 0 {
            return Err(SpotwiseError::config("poller interval_ms must be greater than 0"));
        }
        if self.poller.timeout_secs > MAX_WAIT_TIMEOUT_SECS {
            return Err(SpotwiseError::config(format!(
                "poller timeout_secs must be at most {}, got {}",
                MAX_WAIT_TIMEOUT_SECS, self.poller.timeout_secs
            )));
        }
        if self.spot.spot_percentage > 100 {
            return Err(SpotwiseError::config(format!(
                "spot_percentage must be within 0..=100, got {}",
                self.spot.spot_percentage
            )));
        }
        if self.spot.max_spot_price.is_nan() || self.spot.max_spot_price < 0.0 {
            return Err(SpotwiseError::config(format!(
                "max_spot_price must not be negative, got {}",
                self.spot.max_spot_price
            )));
        }
        Ok(())
    }

    /// Decision manager using the configured strategy and retry policy
    pub fn build_manager(&self, events: Option<Arc<dyn EventSink>>) -> SpotDecisionManager {
        SpotDecisionManager::new(self.strategy)
            .with_events(events.unwrap_or_else(|| Arc::new(NoopEventSink)))
            .with_create_retry(self.retry.policy())
    }
}
