//! Core traits for Spotwise
//!
//! Cloud-specific code lives behind these interfaces. The decision engine,
//! retry engine and completion poller work through them ONLY - never
//! concrete provider types.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::SpotwiseError;
use crate::types::*;

/// Result type for Spotwise operations
pub type Result<T> = std::result::Result<T, SpotwiseError>;

/// Structured payload attached to an emitted event
pub type EventPayload = Map<String, Value>;

/// Spot operations for one cloud provider.
///
/// Adapters report retryable failures as [`SpotwiseError::Transient`] and
/// everything else as [`SpotwiseError::Fatal`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Launch a spot instance for the node
    async fn create_spot_instance(
        &self,
        node: &NodeConfig,
        spot: &SpotConfig,
    ) -> Result<InstanceHandle>;

    /// Current spot price for the type in the zone
    async fn get_spot_price(&self, instance_type: &str, zone: &str) -> Result<f64>;

    /// Whether spot capacity exists for the type in the zone
    async fn is_spot_available(&self, instance_type: &str, zone: &str) -> Result<bool>;

    /// Provider-side reaction to an interruption notice
    async fn handle_interruption(&self, node_id: &str) -> Result<()>;
}

/// Plug-in run on every interruption notice
#[async_trait]
pub trait InterruptionHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle_interruption(&self, event: &InterruptionEvent) -> Result<()>;
}

/// Source of job status for the completion poller
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn get_status(&self, job_name: &str) -> Result<JobPhase>;
}

/// Fire-and-forget observability sink.
///
/// Implementations must not panic; delivery failures are swallowed.
pub trait EventSink: Send + Sync {
    fn emit(&self, event_type: &str, payload: EventPayload);
}
