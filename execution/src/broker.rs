// Broker Connectors
// Capability trait per broker family plus a configuration-driven registry
// mapping asset classes to a primary connector and fallbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{BrokerError, OrderIntent, OrderState};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// Broker-side view of an order, queried during reconciliation
#[derive(Debug, Clone)]
pub struct BrokerOrderStatus {
    pub broker_order_id: String,
    pub state: OrderState,
}

/// One connector per broker. Implementations wrap a REST or FIX session;
/// the router only sees this surface.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    fn id(&self) -> &str;

    /// Place an order. The intent's idempotency key is forwarded as the
    /// client order id so brokers with idempotent submission can suppress
    /// duplicates on their side too.
    async fn place_order(&self, intent: &OrderIntent) -> Result<String, BrokerError>;

    /// Look up an order by client order id. `None` means the broker has no
    /// record of it.
    async fn order_status(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrderStatus>, BrokerError>;
}

/// Primary connector plus fallbacks for one asset class. Fallbacks are
/// consulted only on connector-reported unavailability, never on a
/// business rejection.
#[derive(Debug, Clone)]
pub struct BrokerRoute {
    pub primary: String,
    pub fallbacks: Vec<String>,
}

impl BrokerRoute {
    pub fn new(primary: &str) -> Self {
        Self {
            primary: primary.to_string(),
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallback(mut self, broker_id: &str) -> Self {
        self.fallbacks.push(broker_id.to_string());
        self
    }
}

/// Configuration-driven connector registry
#[derive(Default)]
pub struct BrokerRegistry {
    connectors: HashMap<String, Arc<dyn BrokerConnector>>,
    routes: HashMap<String, BrokerRoute>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn BrokerConnector>) {
        self.connectors.insert(connector.id().to_string(), connector);
    }

    pub fn set_route(&mut self, asset_class: &str, route: BrokerRoute) {
        self.routes.insert(asset_class.to_string(), route);
    }

    pub fn get(&self, broker_id: &str) -> Option<Arc<dyn BrokerConnector>> {
        self.connectors.get(broker_id).cloned()
    }

    /// Pair instruments ("BTC/USDT") are crypto; bare tickers are equities.
    pub fn asset_class(instrument: &str) -> &'static str {
        if instrument.contains('/') {
            "crypto"
        } else {
            "equity"
        }
    }

    /// Resolve the connectors for an instrument, primary first. Route
    /// entries naming unregistered connectors are skipped.
    pub fn connectors_for(&self, instrument: &str) -> Vec<Arc<dyn BrokerConnector>> {
        let Some(route) = self.routes.get(Self::asset_class(instrument)) else {
            return Vec::new();
        };

        std::iter::once(&route.primary)
            .chain(route.fallbacks.iter())
            .filter_map(|id| self.connectors.get(id).cloned())
            .collect()
    }
}

/// In-memory connector that acknowledges everything it is given. Used for
/// paper trading and tests; failure injection hooks simulate broker faults.
pub struct PaperBroker {
    id: String,
    orders: DashMap<String, BrokerOrderStatus>,
    place_calls: AtomicU32,
    unavailable_remaining: AtomicU32,
    timeout_remaining: AtomicU32,
    reject_next: AtomicBool,
}

impl PaperBroker {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            orders: DashMap::new(),
            place_calls: AtomicU32::new(0),
            unavailable_remaining: AtomicU32::new(0),
            timeout_remaining: AtomicU32::new(0),
            reject_next: AtomicBool::new(false),
        }
    }

    /// Number of place_order calls observed
    pub fn place_calls(&self) -> u32 {
        self.place_calls.load(Ordering::SeqCst)
    }

    /// Report unavailability for the next `n` place_order calls
    pub fn fail_unavailable(&self, n: u32) {
        self.unavailable_remaining.store(n, Ordering::SeqCst);
    }

    /// Time out the next `n` place_order calls
    pub fn fail_timeout(&self, n: u32) {
        self.timeout_remaining.store(n, Ordering::SeqCst);
    }

    /// Reject the next place_order call terminally
    pub fn reject_next(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    /// Seed broker-side state, simulating an order that was filled before
    /// a coordinator crash.
    pub fn preset_order(&self, client_order_id: &str, broker_order_id: &str, state: OrderState) {
        self.orders.insert(
            client_order_id.to_string(),
            BrokerOrderStatus {
                broker_order_id: broker_order_id.to_string(),
                state,
            },
        );
    }

    fn take_fault(&self) -> Option<BrokerError> {
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Some(BrokerError::Rejected("invalid order".to_string()));
        }
        if decrement(&self.unavailable_remaining) {
            return Some(BrokerError::Unavailable("connector offline".to_string()));
        }
        if decrement(&self.timeout_remaining) {
            return Some(BrokerError::Timeout);
        }
        None
    }
}

fn decrement(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl BrokerConnector for PaperBroker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<String, BrokerError> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }

        // Idempotent on the broker side: resubmission of a known client
        // order id returns the existing broker order id.
        if let Some(existing) = self.orders.get(&intent.idempotency_key) {
            return Ok(existing.broker_order_id.clone());
        }

        let broker_order_id = format!("paper-{}", Uuid::new_v4());
        self.orders.insert(
            intent.idempotency_key.clone(),
            BrokerOrderStatus {
                broker_order_id: broker_order_id.clone(),
                state: OrderState::Acknowledged,
            },
        );

        debug!(
            "Paper broker {} filled {} {} {} as {}",
            self.id,
            intent.side.as_str(),
            intent.quantity,
            intent.instrument,
            broker_order_id
        );
        Ok(broker_order_id)
    }

    async fn order_status(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrderStatus>, BrokerError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        Ok(self.orders.get(client_order_id).map(|s| s.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderSide;
    use rust_decimal_macros::dec;

    fn test_intent(key: &str) -> OrderIntent {
        OrderIntent {
            signal_id: Uuid::new_v4(),
            instrument: "BTC/USDT".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(0.5),
            limit_price: None,
            stop_loss: dec!(49000),
            take_profit: dec!(51500),
            trailing_stop: None,
            idempotency_key: key.to_string(),
        }
    }

    #[test]
    fn test_asset_class_derivation() {
        assert_eq!(BrokerRegistry::asset_class("BTC/USDT"), "crypto");
        assert_eq!(BrokerRegistry::asset_class("AAPL"), "equity");
    }

    #[test]
    fn test_registry_resolves_primary_then_fallbacks() {
        let mut registry = BrokerRegistry::new();
        registry.register(Arc::new(PaperBroker::new("alpha")));
        registry.register(Arc::new(PaperBroker::new("beta")));
        registry.set_route("crypto", BrokerRoute::new("alpha").with_fallback("beta"));

        let connectors = registry.connectors_for("BTC/USDT");
        assert_eq!(connectors.len(), 2);
        assert_eq!(connectors[0].id(), "alpha");
        assert_eq!(connectors[1].id(), "beta");

        assert!(registry.connectors_for("AAPL").is_empty());
    }

    #[tokio::test]
    async fn test_paper_broker_idempotent_resubmission() {
        let broker = PaperBroker::new("paper");
        let intent = test_intent("key-1");

        let first = broker.place_order(&intent).await.unwrap();
        let second = broker.place_order(&intent).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_paper_broker_fault_injection() {
        let broker = PaperBroker::new("paper");
        broker.fail_unavailable(1);

        let err = broker.place_order(&test_intent("key-2")).await.unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));

        // Fault consumed; next call succeeds
        assert!(broker.place_order(&test_intent("key-2")).await.is_ok());

        // Status queries observe injected faults too
        broker.fail_unavailable(1);
        let err = broker.order_status("key-2").await.unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_order_status_lookup() {
        let broker = PaperBroker::new("paper");
        assert!(broker.order_status("missing").await.unwrap().is_none());

        broker.place_order(&test_intent("key-3")).await.unwrap();
        let status = broker.order_status("key-3").await.unwrap().unwrap();
        assert_eq!(status.state, OrderState::Acknowledged);
    }
}
