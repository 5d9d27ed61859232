// Order Router
// Drives a validated intent to broker acknowledgment, exactly once per
// idempotency key. State machine per record:
// pending -> submitted -> { acknowledged | failed }, and
// submitted -> expired when retries run out without a broker verdict.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{BrokerError, LedgerError, OrderIntent, OrderRecord, OrderState};
use tracing::{debug, info, warn};

use crate::broker::{BrokerConnector, BrokerRegistry};
use crate::ledger::ExecutionLedger;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RouterConfig {
    /// Attempts across the whole submission, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Bound on a single broker call
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_submit_timeout_ms() -> u64 {
    10_000
}

pub struct OrderRouter {
    ledger: Arc<dyn ExecutionLedger>,
    registry: Arc<BrokerRegistry>,
    config: RouterConfig,
}

impl OrderRouter {
    pub fn new(
        ledger: Arc<dyn ExecutionLedger>,
        registry: Arc<BrokerRegistry>,
        config: RouterConfig,
    ) -> Self {
        Self {
            ledger,
            registry,
            config,
        }
    }

    /// Submit an intent. If a record already exists for its idempotency
    /// key the existing record is returned without touching the broker --
    /// this is what makes signal redelivery safe.
    pub async fn submit(&self, intent: &OrderIntent) -> Result<OrderRecord, LedgerError> {
        let connectors = self.registry.connectors_for(&intent.instrument);
        if connectors.is_empty() {
            warn!("No broker route for instrument {}", intent.instrument);
            let mut record = OrderRecord::pending(intent, "unrouted");
            record.state = OrderState::Failed;
            record.last_error = Some("no broker route for instrument".to_string());
            let (record, _) = self.ledger.create_if_absent(record).await?;
            return Ok(record);
        }

        let pending = OrderRecord::pending(intent, connectors[0].id());
        let (record, created) = self.ledger.create_if_absent(pending).await?;
        if !created {
            debug!(
                "Intent {} already routed (state: {}), returning existing record",
                record.idempotency_key, record.state
            );
            return Ok(record);
        }

        let mut record = record;
        self.drive(intent, &mut record, &connectors).await?;
        Ok(record)
    }

    /// Run the retry loop until the record reaches a terminal state.
    /// No ledger lock is held while a broker call is in flight; if the task
    /// is cancelled mid-call the record stays `submitted` for the
    /// reconciler.
    async fn drive(
        &self,
        intent: &OrderIntent,
        record: &mut OrderRecord,
        connectors: &[Arc<dyn BrokerConnector>],
    ) -> Result<(), LedgerError> {
        let mut backoff_ms = self.config.initial_backoff_ms;
        let mut timed_out_last = false;

        for attempt in 1..=self.config.max_attempts {
            record.attempts = attempt;

            // Primary first; fallbacks only after a connector reports
            // unavailability. A business rejection never falls through.
            for connector in connectors {
                record.broker_id = connector.id().to_string();
                record.state = OrderState::Submitted;
                record.updated_at = Utc::now();
                self.ledger.upsert_order(record).await?;

                let call = tokio::time::timeout(
                    Duration::from_millis(self.config.submit_timeout_ms),
                    connector.place_order(intent),
                );
                let outcome = match call.await {
                    Ok(result) => result,
                    Err(_) => Err(BrokerError::Timeout),
                };

                match outcome {
                    Ok(broker_order_id) => {
                        record.state = OrderState::Acknowledged;
                        record.broker_order_id = Some(broker_order_id);
                        record.last_error = None;
                        record.updated_at = Utc::now();
                        self.ledger.upsert_order(record).await?;
                        info!(
                            "Order {} acknowledged by {} (attempt {})",
                            record.idempotency_key, record.broker_id, attempt
                        );
                        return Ok(());
                    }
                    Err(BrokerError::Rejected(reason)) => {
                        record.state = OrderState::Failed;
                        record.last_error = Some(reason.clone());
                        record.updated_at = Utc::now();
                        self.ledger.upsert_order(record).await?;
                        warn!(
                            "Order {} rejected by {}: {}",
                            record.idempotency_key, record.broker_id, reason
                        );
                        return Ok(());
                    }
                    Err(BrokerError::Unavailable(reason)) => {
                        record.last_error = Some(reason.clone());
                        timed_out_last = false;
                        debug!(
                            "Broker {} unavailable for {}: {}",
                            record.broker_id, record.idempotency_key, reason
                        );
                        // next fallback
                    }
                    Err(BrokerError::Timeout) => {
                        record.last_error = Some("broker call timed out".to_string());
                        timed_out_last = true;
                        debug!(
                            "Broker {} timed out for {} (attempt {})",
                            record.broker_id, record.idempotency_key, attempt
                        );
                        // Retry the route from the primary; a timeout is
                        // not an unavailability verdict.
                        break;
                    }
                }
            }

            if attempt < self.config.max_attempts {
                let jitter = fastrand::u64(0..=backoff_ms / 2);
                tokio::time::sleep(Duration::from_millis(backoff_ms + jitter)).await;
                backoff_ms = (backoff_ms * 2).min(self.config.max_backoff_ms);
            }
        }

        // Retries exhausted. Timeouts mean no broker verdict was ever
        // observed, so the record expires; unavailability is a verdict and
        // fails the record.
        record.state = if timed_out_last {
            OrderState::Expired
        } else {
            OrderState::Failed
        };
        record.updated_at = Utc::now();
        self.ledger.upsert_order(record).await?;
        warn!(
            "Order {} exhausted {} attempts, final state: {}",
            record.idempotency_key, self.config.max_attempts, record.state
        );
        Ok(())
    }
}
