//! Retry with bounded exponential backoff and jitter
//!
//! Every call into a flaky external process or cloud API goes through
//! [`RetryEngine::run`]. Failures are classified by a [`Classifier`]:
//!
//! - **Fatal**: returned immediately, remaining attempts are not used
//! - **Transient**: retried after a backoff delay until attempts run out,
//!   then the last error is returned
//!
//! ## Delay
//!
//! ```text
//! delay(n) = min(max_delay, initial_delay * multiplier^(n-1))
//! ```
//!
//! With jitter enabled the delay is moved by a uniform offset in
//! `±jitter_factor * delay` and clamped to `[0, max_delay]`.
//!
//! ## Example
//!
//! ```ignore
//! let engine = RetryEngine::new(RetryPolicy::for_cloud_api(), SubstringClassifier::backup_tool());
//! let output = engine.run("backup create", || async { run_backup_tool(&args).await }).await?;
//! ```

use crate::classify::Classifier;
use crate::events::{kinds, payload, NoopEventSink};
use rand::Rng;
use serde_json::json;
use spotwise_core::{EventSink, Result, SpotwiseError};
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const CLOUD_API_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_DELAY_MS: u64 = 100;
const DEFAULT_MAX_DELAY_SECS: u64 = 30;
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Observer called before each retry sleep: `(attempt, error, delay)`
pub type OnRetry = Arc<dyn Fn(u32, &dyn Display, Duration) + Send + Sync>;

/// Backoff and attempt budget for one kind of operation
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between attempts (> 1.0)
    pub multiplier: f64,
    /// Randomize delays
    pub jitter_enabled: bool,
    /// Fraction of the delay that may be randomized (0.0 - 1.0)
    pub jitter_factor: f64,
    /// Observability hook
    pub on_retry: Option<OnRetry>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter_enabled", &self.jitter_enabled)
            .field("jitter_factor", &self.jitter_factor)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_MULTIPLIER,
            jitter_enabled: true,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            on_retry: None,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Policy for cloud API calls (5 attempts)
    pub fn for_cloud_api() -> Self {
        Self::with_max_attempts(CLOUD_API_MAX_ATTEMPTS)
    }

    /// Single attempt, never sleeps
    pub fn no_retry() -> Self {
        Self::with_max_attempts(1)
    }

    /// Set delay bounds
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Set growth factor
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable jitter with the given fraction
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_enabled = true;
        self.jitter_factor = factor;
        self
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.jitter_enabled = false;
        self
    }

    /// Set the retry observer
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, &dyn Display, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    /// Check the policy invariants
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SpotwiseError::config("retry max_attempts must be at least 1"));
        }
        if self.multiplier.is_nan() || self.multiplier <= 1.0 || self.multiplier.is_infinite() {
            return Err(SpotwiseError::config(format!(
                "retry multiplier must be greater than 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(SpotwiseError::config(format!(
                "retry jitter_factor must be within 0.0..=1.0, got {}",
                self.jitter_factor
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(SpotwiseError::config(format!(
                "retry initial_delay {:?} exceeds max_delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter.
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max = self.max_delay.as_secs_f64();
        let delay = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent)).min(max);
        if delay.is_nan() || delay < 0.0 {
            return Duration::ZERO;
        }
        // max_delay near Duration::MAX does not survive the f64 round trip
        Duration::try_from_secs_f64(delay).unwrap_or(self.max_delay)
    }

    /// Delay after failed attempt `attempt` (1-based), with jitter applied.
    ///
    /// Always within `[0, max_delay]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter_enabled || self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }

        let spread = base.as_secs_f64() * self.jitter_factor.min(1.0);
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let jittered = (base.as_secs_f64() + offset).clamp(0.0, self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(jittered)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Runs operations under a [`RetryPolicy`], classifying failures with `C`
pub struct RetryEngine<C> {
    policy: RetryPolicy,
    classifier: C,
    events: Arc<dyn EventSink>,
}

impl<C> RetryEngine<C> {
    /// Create an engine that does not emit events
    pub fn new(policy: RetryPolicy, classifier: C) -> Self {
        Self {
            policy,
            classifier,
            events: Arc::new(NoopEventSink),
        }
    }

    /// Emit `retry.attempt` / `retry.exhausted` to the sink
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Get the policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation` until it succeeds, fails fatally, or runs out of attempts.
    ///
    /// Attempts are strictly sequential. The calling task sleeps between
    /// attempts; there is no sleep after the last one.
    pub async fn run<F, Fut, T, E>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
        C: Classifier<E>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let e = match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(operation = %operation_name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !self.classifier.classify(&e).is_transient() {
                error!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    "Operation failed with non-retryable error"
                );
                return Err(e);
            }

            if attempt >= max_attempts {
                error!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    "Operation failed after max retries"
                );
                self.events.emit(
                    kinds::RETRY_EXHAUSTED,
                    payload([
                        ("operation", json!(operation_name)),
                        ("attempts", json!(attempt)),
                        ("error", json!(e.to_string())),
                    ]),
                );
                return Err(e);
            }

            let delay = self.policy.delay_for(attempt);

            warn!(
                operation = %operation_name,
                attempt,
                error = %e,
                delay_ms = delay.as_millis() as u64,
                "Operation failed, retrying"
            );

            if let Some(on_retry) = &self.policy.on_retry {
                on_retry(attempt, &e, delay);
            }
            self.events.emit(
                kinds::RETRY_ATTEMPT,
                payload([
                    ("operation", json!(operation_name)),
                    ("attempt", json!(attempt)),
                    ("error", json!(e.to_string())),
                    ("delay_ms", json!(delay.as_millis() as u64)),
                ]),
            );

            tokio::time::sleep(delay).await;
        }
    }
}
