// Startup reconciliation
// A crash can leave order records in `submitted` with no broker verdict
// recorded. Before consuming new signals, every such record is resolved
// against the broker by client order id.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{LedgerError, OrderRecord, OrderState};
use tracing::{info, warn};

use crate::broker::BrokerRegistry;
use crate::ledger::ExecutionLedger;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReconcilerConfig {
    /// Status queries per record before giving up
    #[serde(default = "default_reconcile_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_reconcile_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_reconcile_attempts(),
            backoff_ms: default_reconcile_backoff_ms(),
        }
    }
}

fn default_reconcile_attempts() -> u32 {
    3
}

fn default_reconcile_backoff_ms() -> u64 {
    200
}

pub struct Reconciler {
    ledger: Arc<dyn ExecutionLedger>,
    registry: Arc<BrokerRegistry>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn ExecutionLedger>,
        registry: Arc<BrokerRegistry>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            registry,
            config,
        }
    }

    /// Resolve every open submission. Returns the number of records
    /// reconciled.
    pub async fn recover(&self) -> Result<usize, LedgerError> {
        let open = self.ledger.open_submissions().await?;
        if open.is_empty() {
            return Ok(0);
        }

        info!("Reconciling {} open submission(s) against brokers", open.len());
        let count = open.len();
        for mut record in open {
            self.resolve(&mut record).await?;
        }
        Ok(count)
    }

    async fn resolve(&self, record: &mut OrderRecord) -> Result<(), LedgerError> {
        let Some(connector) = self.registry.get(&record.broker_id) else {
            return self
                .finish(record, OrderState::Failed, "broker no longer configured")
                .await;
        };

        let mut last_error = String::from("reconciliation exhausted");
        for attempt in 1..=self.config.max_attempts {
            match connector.order_status(&record.idempotency_key).await {
                Ok(Some(status)) if status.state == OrderState::Acknowledged => {
                    record.state = OrderState::Acknowledged;
                    record.broker_order_id = Some(status.broker_order_id);
                    record.last_error = None;
                    record.updated_at = Utc::now();
                    self.ledger.upsert_order(record).await?;
                    info!(
                        "Order {} reconciled as acknowledged",
                        record.idempotency_key
                    );
                    return Ok(());
                }
                Ok(Some(status)) => {
                    // Broker knows the order but has no fill yet; ask again
                    last_error = format!("broker reports state {}", status.state);
                }
                Ok(None) => {
                    return self
                        .finish(record, OrderState::Failed, "order unknown to broker")
                        .await;
                }
                Err(e) if !e.is_retryable() => {
                    return self.finish(record, OrderState::Failed, &e.to_string()).await;
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        "Reconciliation query {}/{} for {} failed: {}",
                        attempt, self.config.max_attempts, record.idempotency_key, e
                    );
                }
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(Duration::from_millis(self.config.backoff_ms)).await;
            }
        }

        self.finish(record, OrderState::Failed, &last_error).await
    }

    async fn finish(
        &self,
        record: &mut OrderRecord,
        state: OrderState,
        error: &str,
    ) -> Result<(), LedgerError> {
        record.state = state;
        record.last_error = Some(error.to_string());
        record.updated_at = Utc::now();
        self.ledger.upsert_order(record).await?;
        warn!(
            "Order {} reconciled as {}: {}",
            record.idempotency_key, record.state, error
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerConnector, BrokerRoute, PaperBroker};
    use crate::ledger::InMemoryLedger;
    use common::{OrderIntent, OrderSide};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn submitted_record(key: &str, broker_id: &str) -> OrderRecord {
        let intent = OrderIntent {
            signal_id: Uuid::new_v4(),
            instrument: "BTC/USDT".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(0.5),
            limit_price: None,
            stop_loss: dec!(49000),
            take_profit: dec!(51500),
            trailing_stop: None,
            idempotency_key: key.to_string(),
        };
        let mut record = OrderRecord::pending(&intent, broker_id);
        record.state = OrderState::Submitted;
        record.attempts = 1;
        record
    }

    fn test_config() -> ReconcilerConfig {
        ReconcilerConfig {
            max_attempts: 3,
            backoff_ms: 1,
        }
    }

    async fn setup(broker: Arc<PaperBroker>) -> (Reconciler, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut registry = BrokerRegistry::new();
        registry.set_route("crypto", BrokerRoute::new(broker.id()));
        registry.register(broker);

        let reconciler = Reconciler::new(ledger.clone(), Arc::new(registry), test_config());
        (reconciler, ledger)
    }

    #[tokio::test]
    async fn test_filled_submission_acknowledged_after_restart() {
        let broker = Arc::new(PaperBroker::new("paper"));
        let (reconciler, ledger) = setup(broker.clone()).await;

        // The broker filled the order before the crash
        broker.preset_order("key-crash", "paper-123", OrderState::Acknowledged);
        ledger
            .upsert_order(&submitted_record("key-crash", "paper"))
            .await
            .unwrap();

        assert_eq!(reconciler.recover().await.unwrap(), 1);

        let record = ledger
            .get_by_idempotency_key("key-crash")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, OrderState::Acknowledged);
        assert_eq!(record.broker_order_id.as_deref(), Some("paper-123"));
    }

    #[tokio::test]
    async fn test_unknown_submission_fails() {
        let broker = Arc::new(PaperBroker::new("paper"));
        let (reconciler, ledger) = setup(broker).await;

        ledger
            .upsert_order(&submitted_record("key-lost", "paper"))
            .await
            .unwrap();

        reconciler.recover().await.unwrap();

        let record = ledger
            .get_by_idempotency_key("key-lost")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, OrderState::Failed);
        assert_eq!(record.last_error.as_deref(), Some("order unknown to broker"));
    }

    #[tokio::test]
    async fn test_unconfigured_broker_fails_record() {
        let broker = Arc::new(PaperBroker::new("paper"));
        let (reconciler, ledger) = setup(broker).await;

        ledger
            .upsert_order(&submitted_record("key-gone", "decommissioned"))
            .await
            .unwrap();

        reconciler.recover().await.unwrap();

        let record = ledger
            .get_by_idempotency_key("key-gone")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, OrderState::Failed);
    }

    #[tokio::test]
    async fn test_unavailable_status_queries_exhaust_to_failed() {
        let broker = Arc::new(PaperBroker::new("paper"));
        let (reconciler, ledger) = setup(broker.clone()).await;

        // Broker filled the order, but every status query fails
        broker.preset_order("key-stuck", "paper-9", OrderState::Acknowledged);
        broker.fail_unavailable(10);
        ledger
            .upsert_order(&submitted_record("key-stuck", "paper"))
            .await
            .unwrap();

        reconciler.recover().await.unwrap();

        let record = ledger
            .get_by_idempotency_key("key-stuck")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, OrderState::Failed);
        assert!(record.last_error.unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_rejected_status_query_fails_immediately() {
        let broker = Arc::new(PaperBroker::new("paper"));
        let (reconciler, ledger) = setup(broker.clone()).await;

        broker.reject_next();
        ledger
            .upsert_order(&submitted_record("key-bad", "paper"))
            .await
            .unwrap();

        reconciler.recover().await.unwrap();

        let record = ledger
            .get_by_idempotency_key("key-bad")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, OrderState::Failed);
        assert!(record.last_error.unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn test_nothing_to_reconcile() {
        let broker = Arc::new(PaperBroker::new("paper"));
        let (reconciler, _) = setup(broker).await;
        assert_eq!(reconciler.recover().await.unwrap(), 0);
    }
}
