//! Event sinks for retry, decision and interruption notifications
//!
//! Emitting is fire-and-forget: a sink never reports failure back to the
//! engine that emitted.

use serde_json::Value;
use spotwise_core::{EventPayload, EventSink};
use std::sync::Mutex;
use tracing::info;

/// Event type names emitted by the engines
pub mod kinds {
    /// A transient failure is about to be retried
    pub const RETRY_ATTEMPT: &str = "retry.attempt";
    /// Attempts ran out on a transient failure
    pub const RETRY_EXHAUSTED: &str = "retry.exhausted";
    /// Spot instance creation requested
    pub const SPOT_CREATING: &str = "spot.creating";
    /// Spot instance created
    pub const SPOT_CREATED: &str = "spot.created";
    /// Spot instance creation failed
    pub const SPOT_FAILED: &str = "spot.failed";
    /// No spot capacity, caller should consider on-demand
    pub const SPOT_FALLBACK: &str = "spot.fallback";
    /// Quoted price rejected by the strategy
    pub const SPOT_PRICE_REJECTED: &str = "spot.price_rejected";
    /// Interruption notice received
    pub const INTERRUPTION_RECEIVED: &str = "interruption.received";
    /// An interruption handler returned an error
    pub const INTERRUPTION_HANDLER_FAILED: &str = "interruption.handler_failed";
    /// Handler chain and adapter finished
    pub const INTERRUPTION_HANDLED: &str = "interruption.handled";
}

/// Build a payload from `(key, value)` pairs
pub fn payload<I, K>(fields: I) -> EventPayload
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event_type: &str, _payload: EventPayload) {}
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event_type: &str, payload: EventPayload) {
        let payload = Value::Object(payload);
        info!(event = %event_type, payload = %payload, "event");
    }
}

/// Keeps every event in memory, in emission order
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<(String, EventPayload)>>,
}

impl MemoryEventSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<(String, EventPayload)> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Event types in emission order
    pub fn kinds(&self) -> Vec<String> {
        self.events().into_iter().map(|(kind, _)| kind).collect()
    }

    /// Number of events of one type
    pub fn count(&self, event_type: &str) -> usize {
        self.events()
            .iter()
            .filter(|(kind, _)| kind == event_type)
            .count()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event_type: &str, payload: EventPayload) {
        // A poisoned lock drops the event rather than propagating the panic
        if let Ok(mut events) = self.events.lock() {
            events.push((event_type.to_string(), payload));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemoryEventSink::new();
        sink.emit(kinds::SPOT_CREATING, payload([("node", json!("worker-0"))]));
        sink.emit(kinds::SPOT_CREATED, payload([("node", json!("worker-0"))]));
        sink.emit(kinds::SPOT_CREATING, EventPayload::new());

        assert_eq!(
            sink.kinds(),
            vec!["spot.creating", "spot.created", "spot.creating"]
        );
        assert_eq!(sink.count(kinds::SPOT_CREATING), 2);
        assert_eq!(sink.events()[0].1["node"], json!("worker-0"));
    }

    #[test]
    fn test_payload_builder() {
        let p = payload([("attempt", json!(2)), ("delay_ms", json!(200))]);
        assert_eq!(p.len(), 2);
        assert_eq!(p["attempt"], json!(2));
    }

    #[test]
    fn test_noop_and_tracing_sinks_accept_events() {
        NoopEventSink.emit(kinds::RETRY_ATTEMPT, EventPayload::new());
        TracingEventSink.emit(kinds::RETRY_ATTEMPT, payload([("attempt", json!(1))]));
    }
}
