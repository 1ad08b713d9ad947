//! Spot decision manager
//!
//! Drives the per-node spot decision and dispatches interruption notices:
//!
//! ```text
//! NodeRequest
//!     │
//!     ├── 1. Look up provider adapter        (missing → ProviderNotRegistered)
//!     │
//!     ├── 2. Strategy: spot-eligible index?  (no → on-demand)
//!     │
//!     ├── 3. Pick zone (quote candidates, strategy chooses)
//!     │
//!     ├── 4. Adapter: spot capacity?         (no → SpotUnavailable)
//!     │
//!     ├── 5. Adapter: price, strategy gate   (rejected → SpotUnavailable)
//!     │
//!     └── 6. Adapter: create instance        (optionally retried)
//! ```
//!
//! `SpotUnavailable` is an outcome, not a fault: it carries whether the
//! caller may fall back to on-demand capacity.
//!
//! The provider registry and the handler list are the only shared mutable
//! state. Both sit behind reader/writer locks; no lock is held while an
//! adapter or handler runs.

use crate::classify::ByErrorKind;
use crate::events::{kinds, payload, NoopEventSink};
use crate::retry::{RetryEngine, RetryPolicy};
use crate::strategy::AllocationStrategy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use spotwise_core::{
    EventSink, InstanceHandle, InterruptionEvent, InterruptionHandler, NodeRequest, PriceQuote,
    ProviderAdapter, Result, SpotwiseError, UnavailableReason,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// A spot instance that was created for a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotPlacement {
    /// Handle returned by the adapter
    pub instance: InstanceHandle,

    /// Price accepted for the instance
    pub quote: PriceQuote,
}

/// Why a node goes to on-demand capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDemandReason {
    /// The strategy keeps this pool index on on-demand
    NotEligible,

    /// Spot was rejected and the pool allows fallback
    Fallback(UnavailableReason),
}

/// Outcome of a spot decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpotDecision {
    /// Spot instance created
    Spot(SpotPlacement),

    /// Provision on-demand capacity instead
    OnDemand(OnDemandReason),
}

impl SpotDecision {
    /// True when the node proceeds on spot capacity
    pub fn proceed_with_spot(&self) -> bool {
        matches!(self, SpotDecision::Spot(_))
    }

    /// Placement, if spot was used
    pub fn placement(&self) -> Option<&SpotPlacement> {
        match self {
            SpotDecision::Spot(placement) => Some(placement),
            SpotDecision::OnDemand(_) => None,
        }
    }
}

/// Owns the provider registry, the interruption handlers and the strategy
pub struct SpotDecisionManager {
    /// Fixed at construction
    strategy: AllocationStrategy,

    /// Provider name → adapter
    providers: RwLock<HashMap<String, Arc<dyn ProviderAdapter>>>,

    /// Run in insertion order on every interruption
    handlers: RwLock<Vec<Arc<dyn InterruptionHandler>>>,

    /// Observability sink
    events: Arc<dyn EventSink>,

    /// Retry applied to instance creation, if any
    create_retry: Option<RetryPolicy>,
}

impl Default for SpotDecisionManager {
    fn default() -> Self {
        Self::new(AllocationStrategy::Default)
    }
}

impl SpotDecisionManager {
    /// Create a manager with the given strategy
    pub fn new(strategy: AllocationStrategy) -> Self {
        Self {
            strategy,
            providers: RwLock::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
            events: Arc::new(NoopEventSink),
            create_retry: None,
        }
    }

    /// Send decision and interruption events to `events`
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Retry transient instance-creation failures under `policy`
    pub fn with_create_retry(mut self, policy: RetryPolicy) -> Self {
        self.create_retry = Some(policy);
        self
    }

    /// Get the active strategy
    pub fn strategy(&self) -> AllocationStrategy {
        self.strategy
    }

    /// Register (or replace) the adapter for `name`
    pub async fn register_provider(&self, name: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) {
        let name = name.into();
        let replaced = self.providers.write().await.insert(name.clone(), adapter).is_some();
        info!(provider = %name, replaced, "Registered spot provider");
    }

    /// Registered provider names, sorted
    pub async fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Append an interruption handler; handlers run in registration order
    pub async fn register_interruption_handler(&self, handler: Arc<dyn InterruptionHandler>) {
        info!(handler = %handler.name(), "Registered interruption handler");
        self.handlers.write().await.push(handler);
    }

    /// Number of registered interruption handlers
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    async fn adapter(&self, provider: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.providers
            .read()
            .await
            .get(provider)
            .cloned()
            .ok_or_else(|| SpotwiseError::ProviderNotRegistered(provider.to_string()))
    }

    /// Decide whether `request` runs on spot, creating the instance if so.
    ///
    /// Returns `SpotUnavailable` when capacity or price rule spot out; the
    /// error's `fallback_to_on_demand` mirrors the pool's setting.
    pub async fn decide(&self, request: &NodeRequest) -> Result<SpotDecision> {
        let adapter = self.adapter(&request.provider).await?;

        if !self
            .strategy
            .should_use_spot(&request.spot, request.node_index, request.total_nodes)
        {
            info!(
                node = %request.node_name,
                node_index = request.node_index,
                total_nodes = request.total_nodes,
                strategy = %self.strategy,
                "Node not spot-eligible, using on-demand"
            );
            return Ok(SpotDecision::OnDemand(OnDemandReason::NotEligible));
        }

        let zone = self.choose_zone(adapter.as_ref(), request).await?;
        let fallback = request.spot.fallback_on_demand;

        if !adapter.is_spot_available(&request.instance_type, &zone).await? {
            warn!(
                node = %request.node_name,
                instance_type = %request.instance_type,
                zone = %zone,
                fallback,
                "Spot capacity unavailable"
            );
            self.events.emit(
                kinds::SPOT_FALLBACK,
                payload([
                    ("node", json!(request.node_name)),
                    ("provider", json!(request.provider)),
                    ("instance_type", json!(request.instance_type)),
                    ("zone", json!(zone)),
                    ("reason", json!(UnavailableReason::CapacityUnavailable.to_string())),
                    ("fallback_to_on_demand", json!(fallback)),
                ]),
            );
            return Err(SpotwiseError::spot_unavailable(
                UnavailableReason::CapacityUnavailable,
                fallback,
            ));
        }

        let price = adapter.get_spot_price(&request.instance_type, &zone).await?;
        let quote = PriceQuote {
            instance_type: request.instance_type.clone(),
            zone: zone.clone(),
            price,
        };

        if !self.strategy.is_price_acceptable(&request.spot, price) {
            warn!(
                node = %request.node_name,
                price,
                max_spot_price = request.spot.max_spot_price,
                strategy = %self.strategy,
                fallback,
                "Spot price rejected"
            );
            self.events.emit(
                kinds::SPOT_PRICE_REJECTED,
                payload([
                    ("node", json!(request.node_name)),
                    ("provider", json!(request.provider)),
                    ("zone", json!(zone)),
                    ("price", json!(price)),
                    ("max_spot_price", json!(request.spot.max_spot_price)),
                    ("fallback_to_on_demand", json!(fallback)),
                ]),
            );
            return Err(SpotwiseError::spot_unavailable(
                UnavailableReason::PriceTooHigh,
                fallback,
            ));
        }

        let node = request.node_config(&zone);
        self.events.emit(
            kinds::SPOT_CREATING,
            payload([
                ("node", json!(request.node_name)),
                ("provider", json!(request.provider)),
                ("instance_type", json!(request.instance_type)),
                ("zone", json!(zone)),
                ("price", json!(price)),
            ]),
        );

        let created = match &self.create_retry {
            Some(policy) => {
                RetryEngine::new(policy.clone(), ByErrorKind)
                    .with_events(self.events.clone())
                    .run("create spot instance", || {
                        adapter.create_spot_instance(&node, &request.spot)
                    })
                    .await
            }
            None => adapter.create_spot_instance(&node, &request.spot).await,
        };

        match created {
            Ok(instance) => {
                info!(
                    node = %request.node_name,
                    instance = %instance,
                    zone = %zone,
                    price,
                    "Spot instance created"
                );
                self.events.emit(
                    kinds::SPOT_CREATED,
                    payload([
                        ("node", json!(request.node_name)),
                        ("provider", json!(request.provider)),
                        ("instance_id", json!(instance.id)),
                        ("zone", json!(zone)),
                        ("price", json!(price)),
                    ]),
                );
                Ok(SpotDecision::Spot(SpotPlacement { instance, quote }))
            }
            Err(e) => {
                error!(node = %request.node_name, error = %e, "Spot instance creation failed");
                self.events.emit(
                    kinds::SPOT_FAILED,
                    payload([
                        ("node", json!(request.node_name)),
                        ("provider", json!(request.provider)),
                        ("zone", json!(zone)),
                        ("error", json!(e.to_string())),
                    ]),
                );
                Err(e)
            }
        }
    }

    /// Like [`decide`](Self::decide), but turns a fallback-eligible
    /// `SpotUnavailable` into an on-demand decision
    pub async fn decide_with_fallback(&self, request: &NodeRequest) -> Result<SpotDecision> {
        match self.decide(request).await {
            Err(SpotwiseError::SpotUnavailable {
                reason,
                fallback_to_on_demand: true,
            }) => {
                info!(node = %request.node_name, %reason, "Falling back to on-demand");
                Ok(SpotDecision::OnDemand(OnDemandReason::Fallback(reason)))
            }
            other => other,
        }
    }

    /// Resolve the zone for a request, quoting candidates when there are several
    async fn choose_zone(&self, adapter: &dyn ProviderAdapter, request: &NodeRequest) -> Result<String> {
        match request.zones.as_slice() {
            [] => Err(SpotwiseError::config(format!(
                "node request {} has no candidate zones",
                request.node_name
            ))),
            [zone] => Ok(zone.clone()),
            zones => {
                let mut prices = HashMap::new();
                for zone in zones {
                    match adapter.get_spot_price(&request.instance_type, zone).await {
                        Ok(price) => {
                            prices.insert(zone.clone(), price);
                        }
                        Err(e) => {
                            warn!(zone = %zone, error = %e, "Could not quote zone, skipping");
                        }
                    }
                }

                let zone = self
                    .strategy
                    .select_best_zone(zones, &prices)
                    .ok_or_else(|| SpotwiseError::config("no zone could be selected"))?;

                debug!(
                    node = %request.node_name,
                    zone = %zone,
                    quoted = prices.len(),
                    candidates = zones.len(),
                    "Selected zone"
                );
                Ok(zone.to_string())
            }
        }
    }

    /// Handle an interruption notice for `node_id` on `provider`
    pub async fn handle_interruption(&self, provider: &str, node_id: &str) -> Result<()> {
        self.handle_interruption_event(InterruptionEvent::new(provider, node_id))
            .await
    }

    /// Run every handler, then the adapter's own interruption handling.
    ///
    /// Handler failures are logged and emitted but never stop the chain;
    /// only the adapter's result is returned.
    pub async fn handle_interruption_event(&self, event: InterruptionEvent) -> Result<()> {
        let adapter = self.adapter(&event.provider).await?;

        info!(
            event_id = %event.id,
            provider = %event.provider,
            node_id = %event.node_id,
            seconds_until_action = ?event.seconds_until_action,
            "Spot interruption received"
        );
        self.events.emit(
            kinds::INTERRUPTION_RECEIVED,
            payload([
                ("event_id", json!(event.id.to_string())),
                ("provider", json!(event.provider)),
                ("node_id", json!(event.node_id)),
                ("timestamp", json!(event.timestamp.to_rfc3339())),
            ]),
        );

        // Snapshot so registration is never blocked by a slow handler
        let handlers: Vec<Arc<dyn InterruptionHandler>> = self.handlers.read().await.clone();

        let mut failed = 0usize;
        for handler in &handlers {
            if let Err(e) = handler.handle_interruption(&event).await {
                failed += 1;
                warn!(
                    handler = %handler.name(),
                    node_id = %event.node_id,
                    error = %e,
                    "Interruption handler failed, continuing"
                );
                self.events.emit(
                    kinds::INTERRUPTION_HANDLER_FAILED,
                    payload([
                        ("event_id", json!(event.id.to_string())),
                        ("handler", json!(handler.name())),
                        ("node_id", json!(event.node_id)),
                        ("error", json!(e.to_string())),
                    ]),
                );
            }
        }

        let result = adapter.handle_interruption(&event.node_id).await;
        if let Err(e) = &result {
            error!(node_id = %event.node_id, error = %e, "Provider interruption handling failed");
        }

        self.events.emit(
            kinds::INTERRUPTION_HANDLED,
            payload([
                ("event_id", json!(event.id.to_string())),
                ("node_id", json!(event.node_id)),
                ("handlers", json!(handlers.len())),
                ("handlers_failed", json!(failed)),
                ("provider_ok", json!(result.is_ok())),
            ]),
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use async_trait::async_trait;
    use spotwise_core::{NodeConfig, SpotConfig};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeAdapter {
        unavailable: bool,
        price: f64,
        zone_prices: HashMap<String, f64>,
        create_failures: Mutex<VecDeque<SpotwiseError>>,
        interruption_error: Option<String>,
        availability_calls: AtomicU32,
        price_calls: AtomicU32,
        create_calls: AtomicU32,
        interruption_calls: AtomicU32,
        created: Mutex<Vec<NodeConfig>>,
    }

    impl FakeAdapter {
        fn priced(price: f64) -> Self {
            Self {
                price,
                ..Default::default()
            }
        }

        fn total_calls(&self) -> u32 {
            self.availability_calls.load(Ordering::SeqCst)
                + self.price_calls.load(Ordering::SeqCst)
                + self.create_calls.load(Ordering::SeqCst)
                + self.interruption_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        async fn create_spot_instance(&self, node: &NodeConfig, _spot: &SpotConfig) -> Result<InstanceHandle> {
            let n = self.create_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.create_failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            self.created.lock().unwrap().push(node.clone());
            Ok(InstanceHandle {
                id: format!("i-{}-{}", node.name, n),
                provider: "fake".to_string(),
                zone: node.zone.clone(),
            })
        }

        async fn get_spot_price(&self, _instance_type: &str, zone: &str) -> Result<f64> {
            self.price_calls.fetch_add(1, Ordering::SeqCst);
            if self.zone_prices.is_empty() {
                return Ok(self.price);
            }
            self.zone_prices
                .get(zone)
                .copied()
                .ok_or_else(|| SpotwiseError::transient(format!("no quote for {zone}")))
        }

        async fn is_spot_available(&self, _instance_type: &str, _zone: &str) -> Result<bool> {
            self.availability_calls.fetch_add(1, Ordering::SeqCst);
            Ok(!self.unavailable)
        }

        async fn handle_interruption(&self, _node_id: &str) -> Result<()> {
            self.interruption_calls.fetch_add(1, Ordering::SeqCst);
            match &self.interruption_error {
                Some(msg) => Err(SpotwiseError::fatal(msg.clone())),
                None => Ok(()),
            }
        }
    }

    struct RecordingHandler {
        name: String,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl InterruptionHandler for RecordingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle_interruption(&self, event: &InterruptionEvent) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event.node_id));
            if self.fail {
                Err(SpotwiseError::fatal("drain failed"))
            } else {
                Ok(())
            }
        }
    }

    fn request(index: usize, total: usize, spot: SpotConfig) -> NodeRequest {
        NodeRequest::new("aws", format!("worker-{index}"), "m5.large", index, total)
            .with_zone("us-east-1a")
            .with_spot(spot)
    }

    async fn manager_with(
        strategy: AllocationStrategy,
        adapter: Arc<FakeAdapter>,
    ) -> (SpotDecisionManager, Arc<MemoryEventSink>) {
        let sink = Arc::new(MemoryEventSink::new());
        let manager = SpotDecisionManager::new(strategy).with_events(sink.clone());
        manager.register_provider("aws", adapter).await;
        (manager, sink)
    }

    #[tokio::test]
    async fn test_unregistered_provider_touches_no_adapter() {
        let adapter = Arc::new(FakeAdapter::priced(0.05));
        let (manager, _) = manager_with(AllocationStrategy::Default, adapter.clone()).await;

        let mut req = request(0, 1, SpotConfig::enabled());
        req.provider = "gcp".to_string();

        let err = manager.decide(&req).await.unwrap_err();
        assert!(matches!(err, SpotwiseError::ProviderNotRegistered(ref p) if p == "gcp"));
        assert_eq!(adapter.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_carries_fallback_flag() {
        for fallback in [true, false] {
            let adapter = Arc::new(FakeAdapter {
                unavailable: true,
                ..Default::default()
            });
            let (manager, sink) = manager_with(AllocationStrategy::Default, adapter.clone()).await;

            let req = request(0, 1, SpotConfig::enabled().with_fallback(fallback));
            let err = manager.decide(&req).await.unwrap_err();

            match err {
                SpotwiseError::SpotUnavailable {
                    reason,
                    fallback_to_on_demand,
                } => {
                    assert_eq!(reason, UnavailableReason::CapacityUnavailable);
                    assert_eq!(fallback_to_on_demand, fallback);
                }
                other => panic!("expected SpotUnavailable, got {:?}", other),
            }
            assert_eq!(adapter.price_calls.load(Ordering::SeqCst), 0);
            assert_eq!(adapter.create_calls.load(Ordering::SeqCst), 0);
            assert_eq!(sink.kinds(), vec!["spot.fallback"]);
        }
    }

    #[tokio::test]
    async fn test_price_rejection() {
        let adapter = Arc::new(FakeAdapter::priced(0.09));
        let (manager, sink) = manager_with(AllocationStrategy::Conservative, adapter.clone()).await;

        let req = request(0, 10, SpotConfig::enabled().with_percentage(100).with_max_price(0.10));
        let err = manager.decide(&req).await.unwrap_err();

        assert!(matches!(
            err,
            SpotwiseError::SpotUnavailable {
                reason: UnavailableReason::PriceTooHigh,
                fallback_to_on_demand: true,
            }
        ));
        assert_eq!(adapter.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.kinds(), vec!["spot.price_rejected"]);
    }

    #[tokio::test]
    async fn test_accepted_price_creates_instance() {
        let adapter = Arc::new(FakeAdapter::priced(0.04));
        let (manager, sink) = manager_with(AllocationStrategy::Default, adapter.clone()).await;

        let req = request(0, 2, SpotConfig::enabled().with_max_price(0.05));
        let decision = manager.decide(&req).await.unwrap();

        assert!(decision.proceed_with_spot());
        let placement = decision.placement().unwrap();
        assert_eq!(placement.instance.zone, "us-east-1a");
        assert_eq!(placement.quote.price, 0.04);
        assert_eq!(placement.quote.instance_type, "m5.large");
        assert_eq!(adapter.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.kinds(), vec!["spot.creating", "spot.created"]);
    }

    #[tokio::test]
    async fn test_ineligible_index_goes_on_demand() {
        let adapter = Arc::new(FakeAdapter::priced(0.01));
        let (manager, sink) = manager_with(AllocationStrategy::Default, adapter.clone()).await;

        let spot = SpotConfig::enabled().with_percentage(40);
        let mut spot_nodes = Vec::new();
        for i in 0..5 {
            let decision = manager.decide(&request(i, 5, spot.clone())).await.unwrap();
            if decision.proceed_with_spot() {
                spot_nodes.push(i);
            } else {
                assert_eq!(decision, SpotDecision::OnDemand(OnDemandReason::NotEligible));
            }
        }

        assert_eq!(spot_nodes, vec![0, 1]);
        assert_eq!(adapter.create_calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.count(kinds::SPOT_CREATED), 2);
    }

    #[tokio::test]
    async fn test_zone_selection_quotes_candidates() {
        let adapter = Arc::new(FakeAdapter {
            zone_prices: [("a", 0.05), ("b", 0.03), ("c", 0.04)]
                .into_iter()
                .map(|(z, p)| (z.to_string(), p))
                .collect(),
            ..Default::default()
        });

        let (manager, _) = manager_with(AllocationStrategy::Default, adapter.clone()).await;
        let req = request(0, 1, SpotConfig::enabled()).with_zones(["a", "b", "c", "unquoted"]);
        let decision = manager.decide(&req).await.unwrap();
        assert_eq!(decision.placement().unwrap().instance.zone, "b");

        let (manager, _) = manager_with(AllocationStrategy::Conservative, adapter.clone()).await;
        let req = request(0, 10, SpotConfig::enabled().with_max_price(1.0)).with_zones(["a", "b", "c"]);
        let decision = manager.decide(&req).await.unwrap();
        assert_eq!(decision.placement().unwrap().instance.zone, "c");
    }

    #[tokio::test]
    async fn test_request_without_zones_is_config_error() {
        let adapter = Arc::new(FakeAdapter::priced(0.01));
        let (manager, _) = manager_with(AllocationStrategy::Default, adapter.clone()).await;

        let req = NodeRequest::new("aws", "worker-0", "m5.large", 0, 1);
        let err = manager.decide(&req).await.unwrap_err();
        assert!(matches!(err, SpotwiseError::Config(_)));
        assert_eq!(adapter.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_retry_absorbs_transient_failures() {
        let adapter = Arc::new(FakeAdapter::priced(0.02));
        adapter.create_failures.lock().unwrap().extend([
            SpotwiseError::transient("RequestLimitExceeded"),
            SpotwiseError::transient("InsufficientInstanceCapacity"),
        ]);

        let sink = Arc::new(MemoryEventSink::new());
        let manager = SpotDecisionManager::new(AllocationStrategy::Default)
            .with_events(sink.clone())
            .with_create_retry(
                RetryPolicy::with_max_attempts(3)
                    .with_delays(Duration::from_millis(1), Duration::from_millis(5))
                    .without_jitter(),
            );
        manager.register_provider("aws", adapter.clone()).await;

        let decision = manager.decide(&request(0, 1, SpotConfig::enabled())).await.unwrap();
        assert!(decision.proceed_with_spot());
        assert_eq!(adapter.create_calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.count(kinds::RETRY_ATTEMPT), 2);
        assert_eq!(sink.count(kinds::SPOT_CREATED), 1);
    }

    #[tokio::test]
    async fn test_create_failure_is_surfaced() {
        let adapter = Arc::new(FakeAdapter::priced(0.02));
        adapter
            .create_failures
            .lock()
            .unwrap()
            .push_back(SpotwiseError::fatal("InvalidAMIID.NotFound"));

        let (manager, sink) = manager_with(AllocationStrategy::Aggressive, adapter.clone()).await;
        let err = manager
            .decide(&request(0, 1, SpotConfig::enabled()))
            .await
            .unwrap_err();

        assert!(matches!(err, SpotwiseError::Fatal(_)));
        assert_eq!(sink.kinds(), vec!["spot.creating", "spot.failed"]);
    }

    #[tokio::test]
    async fn test_decide_with_fallback() {
        let adapter = Arc::new(FakeAdapter {
            unavailable: true,
            ..Default::default()
        });
        let (manager, _) = manager_with(AllocationStrategy::Default, adapter).await;

        let decision = manager
            .decide_with_fallback(&request(0, 1, SpotConfig::enabled().with_fallback(true)))
            .await
            .unwrap();
        assert_eq!(
            decision,
            SpotDecision::OnDemand(OnDemandReason::Fallback(
                UnavailableReason::CapacityUnavailable
            ))
        );

        let err = manager
            .decide_with_fallback(&request(0, 1, SpotConfig::enabled().with_fallback(false)))
            .await
            .unwrap_err();
        assert!(!err.should_fallback());
    }

    #[tokio::test]
    async fn test_register_provider_replaces() {
        let manager = SpotDecisionManager::default();
        let first = Arc::new(FakeAdapter {
            unavailable: true,
            ..Default::default()
        });
        let second = Arc::new(FakeAdapter::priced(0.01));

        manager.register_provider("aws", first.clone()).await;
        manager.register_provider("aws", second.clone()).await;
        manager.register_provider("gcp", Arc::new(FakeAdapter::priced(0.01))).await;

        assert_eq!(manager.providers().await, vec!["aws", "gcp"]);
        let decision = manager.decide(&request(0, 1, SpotConfig::enabled())).await.unwrap();
        assert!(decision.proceed_with_spot());
        assert_eq!(first.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_interruption_runs_every_handler_in_order() {
        let adapter = Arc::new(FakeAdapter {
            interruption_error: Some("node already gone".to_string()),
            ..Default::default()
        });
        let (manager, sink) = manager_with(AllocationStrategy::Default, adapter.clone()).await;

        let log = Arc::new(Mutex::new(Vec::new()));
        for (name, fail) in [("cordon", false), ("drain", true), ("notify", false)] {
            manager
                .register_interruption_handler(Arc::new(RecordingHandler {
                    name: name.to_string(),
                    fail,
                    log: log.clone(),
                }))
                .await;
        }
        assert_eq!(manager.handler_count().await, 3);

        let err = manager.handle_interruption("aws", "worker-7").await.unwrap_err();
        assert!(err.to_string().contains("node already gone"));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["cordon:worker-7", "drain:worker-7", "notify:worker-7"]
        );
        assert_eq!(adapter.interruption_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            sink.kinds(),
            vec![
                "interruption.received",
                "interruption.handler_failed",
                "interruption.handled"
            ]
        );
    }

    #[tokio::test]
    async fn test_interruption_for_unregistered_provider() {
        let manager = SpotDecisionManager::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager
            .register_interruption_handler(Arc::new(RecordingHandler {
                name: "cordon".to_string(),
                fail: false,
                log: log.clone(),
            }))
            .await;

        let err = manager.handle_interruption("azure", "node-1").await.unwrap_err();
        assert!(matches!(err, SpotwiseError::ProviderNotRegistered(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_decisions() {
        let adapter = Arc::new(FakeAdapter::priced(0.01));
        let (manager, _) = manager_with(AllocationStrategy::Default, adapter.clone()).await;
        let manager = Arc::new(manager);

        let spot = SpotConfig::enabled().with_percentage(50);
        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let manager = manager.clone();
                let req = request(i, 20, spot.clone());
                tokio::spawn(async move { manager.decide(&req).await })
            })
            .collect();

        let mut spot_count = 0;
        for task in futures::future::join_all(tasks).await {
            if task.unwrap().unwrap().proceed_with_spot() {
                spot_count += 1;
            }
        }

        assert_eq!(spot_count, 10);
        assert_eq!(adapter.created.lock().unwrap().len(), 10);
    }
}
