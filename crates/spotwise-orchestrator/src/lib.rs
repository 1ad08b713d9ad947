//! # Spotwise Orchestrator
//!
//! Resilience and spot-decision layer for multi-cloud cluster provisioning.
//!
//! ## Architecture
//!
//! ```text
//! Provisioning flow                 Provider adapters (per cloud)
//! ├── Retry engine  ──────────────  transient vs fatal failures
//! ├── Completion poller ──────────  backup / restore job status
//! ├── Allocation strategy           (Default, Aggressive, Conservative)
//! └── Spot decision manager ──────  price, capacity, create, interrupt
//! ```
//!
//! - [`retry`]: exponential backoff with jitter, attempts classified by [`classify`]
//! - [`poller`]: fixed-interval status polling with a deadline and cancellation
//! - [`strategy`]: which nodes go to spot, which prices and zones are acceptable
//! - [`manager`]: provider registry, spot decisions and interruption dispatch
//! - [`watcher`]: feeds a stream of interruption notices to the manager
//!
//! Every retry, decision and interruption is logged through `tracing` and
//! reported to an [`EventSink`](spotwise_core::EventSink) (see [`events`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod config;
pub mod events;
pub mod manager;
pub mod poller;
pub mod retry;
pub mod strategy;
pub mod telemetry;
pub mod watcher;

// ============================================================================
// Public exports
// ============================================================================

// Retry
pub use classify::{AlwaysTransient, ByErrorKind, Classifier, SubstringClassifier};
pub use retry::{OnRetry, RetryEngine, RetryPolicy};

// Polling
pub use poller::{
    CompletionPoller, RetryingFetcher, DEFAULT_POLL_INTERVAL_MS, DEFAULT_WAIT_TIMEOUT_SECS,
    MAX_WAIT_TIMEOUT_SECS,
};

// Spot decisions
pub use manager::{OnDemandReason, SpotDecision, SpotDecisionManager, SpotPlacement};
pub use strategy::AllocationStrategy;
pub use watcher::{InterruptionNotice, InterruptionWatcher, NoticeAction, WatchSummary};

// Events and configuration
pub use config::{PollerSettings, ResilienceConfig, RetrySettings};
pub use events::{MemoryEventSink, NoopEventSink, TracingEventSink};
pub use telemetry::init_tracing;

// Core types
pub use spotwise_core::{FailureKind, Result, SpotwiseError};
