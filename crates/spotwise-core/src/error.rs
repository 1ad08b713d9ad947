//! Error types for Spotwise

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Expected to succeed on retry
    Transient,
    /// Will not succeed on retry
    Fatal,
}

impl FailureKind {
    /// Build from a plain "is this transient?" predicate result
    pub fn from_transient(transient: bool) -> Self {
        if transient { Self::Transient } else { Self::Fatal }
    }

    /// True for [`FailureKind::Transient`]
    pub fn is_transient(self) -> bool {
        self == Self::Transient
    }
}

/// Why a spot request was not placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// The provider reported no spot capacity for the type/zone
    CapacityUnavailable,
    /// The quoted price was rejected by the allocation strategy
    PriceTooHigh,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::CapacityUnavailable => write!(f, "capacity_unavailable"),
            UnavailableReason::PriceTooHigh => write!(f, "price_too_high"),
        }
    }
}

/// Core error type for Spotwise operations
#[derive(Error, Debug)]
pub enum SpotwiseError {
    /// Retryable failure (throttling, dropped connection, leader change, ...)
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Non-retryable failure
    #[error("Fatal failure: {0}")]
    Fatal(String),

    /// Spot capacity could not be used for this request
    #[error("Spot unavailable ({reason}), fallback to on-demand: {fallback_to_on_demand}")]
    SpotUnavailable {
        reason: UnavailableReason,
        fallback_to_on_demand: bool,
    },

    /// Completion poller deadline reached without a terminal status
    #[error("Timed out after {timeout:?} waiting for {name}")]
    TimeoutExceeded { name: String, timeout: Duration },

    /// Tracked job reached a failed terminal phase
    #[error("Job {name} finished with status {phase}")]
    JobFailed { name: String, phase: String },

    /// Wait aborted by an external cancellation signal
    #[error("Wait for {0} was cancelled")]
    Cancelled(String),

    /// No adapter registered under this provider name
    #[error("Provider {0} not registered")]
    ProviderNotRegistered(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SpotwiseError {
    /// Create a transient failure
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a fatal failure
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a spot-unavailable outcome
    pub fn spot_unavailable(reason: UnavailableReason, fallback_to_on_demand: bool) -> Self {
        Self::SpotUnavailable {
            reason,
            fallback_to_on_demand,
        }
    }

    /// Classify for the retry engine. Only [`SpotwiseError::Transient`] is retried.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SpotwiseError::Transient(_) => FailureKind::Transient,
            _ => FailureKind::Fatal,
        }
    }

    /// True when the caller may provision on-demand capacity instead
    pub fn should_fallback(&self) -> bool {
        matches!(
            self,
            SpotwiseError::SpotUnavailable {
                fallback_to_on_demand: true,
                ..
            }
        )
    }
}
