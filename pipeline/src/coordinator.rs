// Pipeline Coordinator
// Drives receive -> validate -> record -> submit -> publish -> ack for each
// inbound signal. Several workers can run against the same coordinator;
// correctness under duplicate delivery rests on the cache offer and the
// ledger create-if-absent, not on locks here.

use std::sync::Arc;

use common::{DecisionStatus, PipelineError};
use execution::{ExecutionLedger, OrderRouter};
use serde::{Deserialize, Serialize};
use signal_validation::SignalValidator;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::metrics::PipelineMetrics;
use crate::queue::{EventSink, InboundMessage, PipelineEvent, SignalSource};
use crate::snapshot::SnapshotProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Deliveries before a repeatedly failing message is dead-lettered
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    /// Bound on concurrent broker submissions; once saturated, workers
    /// stop consuming further signals instead of dropping them
    #[serde(default = "default_max_inflight_submissions")]
    pub max_inflight_submissions: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: default_max_delivery_attempts(),
            max_inflight_submissions: default_max_inflight_submissions(),
        }
    }
}

fn default_max_delivery_attempts() -> u32 {
    3
}

fn default_max_inflight_submissions() -> usize {
    8
}

pub struct PipelineCoordinator {
    validator: Arc<SignalValidator>,
    router: Arc<OrderRouter>,
    ledger: Arc<dyn ExecutionLedger>,
    snapshots: Arc<dyn SnapshotProvider>,
    events: Arc<dyn EventSink>,
    metrics: Arc<PipelineMetrics>,
    submit_permits: Semaphore,
    config: CoordinatorConfig,
}

impl PipelineCoordinator {
    pub fn new(
        validator: Arc<SignalValidator>,
        router: Arc<OrderRouter>,
        ledger: Arc<dyn ExecutionLedger>,
        snapshots: Arc<dyn SnapshotProvider>,
        events: Arc<dyn EventSink>,
        metrics: Arc<PipelineMetrics>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            validator,
            router,
            ledger,
            snapshots,
            events,
            metrics,
            submit_permits: Semaphore::new(config.max_inflight_submissions),
            config,
        }
    }

    /// Worker loop: runs until the inbound queue closes. Spawn once per
    /// consumer.
    pub async fn run<S: SignalSource>(&self, source: S) {
        info!("Pipeline worker started");
        while let Some(message) = source.recv().await {
            self.handle(&source, message).await;
        }
        info!("Inbound queue closed, pipeline worker stopping");
    }

    async fn handle<S: SignalSource>(&self, source: &S, message: InboundMessage) {
        match self.process(&message).await {
            Ok(()) => source.ack(&message).await,
            Err(e) => {
                if message.delivery_attempts >= self.config.max_delivery_attempts {
                    let poison = PipelineError::Poison {
                        attempts: message.delivery_attempts,
                        reason: e.to_string(),
                    };
                    error!("Dead-lettering signal {}: {}", message.signal.id, poison);
                    self.metrics.dead_letters.inc();
                    self.publish(PipelineEvent::DeadLettered {
                        signal: message.signal.clone(),
                        attempts: message.delivery_attempts,
                        reason: poison.to_string(),
                    })
                    .await;
                    source.ack(&message).await;
                } else {
                    warn!(
                        "Processing signal {} failed (delivery {}), requeueing: {}",
                        message.signal.id, message.delivery_attempts, e
                    );
                    source.nack(message).await;
                }
            }
        }
    }

    async fn process(&self, message: &InboundMessage) -> Result<(), PipelineError> {
        let signal = &message.signal;
        let timer = self.metrics.processing_duration.start_timer();
        self.metrics.signals_consumed.inc();

        let ctx = self
            .snapshots
            .snapshot(&signal.instrument)
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?;

        let decision = self.validator.validate(signal, &ctx);
        self.ledger
            .record_decision(&decision)
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?;

        let status = match (decision.status, decision.risk_assessment.rejection_reason) {
            (DecisionStatus::Accepted, _) => "accepted",
            (DecisionStatus::Rejected, Some(reason)) => reason.as_str(),
            (DecisionStatus::Rejected, None) => "rejected",
        };
        self.metrics
            .signal_validations
            .with_label_values(&[status])
            .inc();

        self.publish(PipelineEvent::DecisionMade {
            decision: decision.clone(),
        })
        .await;

        if let Some(intent) = &decision.order_intent {
            // Backpressure: hold the worker here while the connector pool
            // is saturated rather than pulling more signals.
            let _permit = self
                .submit_permits
                .acquire()
                .await
                .map_err(|e| PipelineError::Transient(e.to_string()))?;

            let record = self
                .router
                .submit(intent)
                .await
                .map_err(|e| PipelineError::Transient(e.to_string()))?;

            self.metrics
                .order_submissions
                .with_label_values(&[record.state.as_str()])
                .inc();
            self.publish(PipelineEvent::OrderResolved { record }).await;
        }

        timer.observe_duration();
        Ok(())
    }

    async fn publish(&self, event: PipelineEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish pipeline event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{signal_channel, ChannelSink};
    use crate::snapshot::StaticSnapshotProvider;
    use chrono::Utc;
    use common::{Direction, OrderState, RejectionReason, Signal};
    use execution::{BrokerRegistry, BrokerRoute, InMemoryLedger, PaperBroker, RouterConfig};
    use rust_decimal_macros::dec;
    use signal_validation::risk::MarketState;
    use signal_validation::{InMemorySignalCache, RiskEngine, RiskPolicy};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Harness {
        coordinator: Arc<PipelineCoordinator>,
        broker: Arc<PaperBroker>,
        ledger: Arc<InMemoryLedger>,
        events: mpsc::Receiver<PipelineEvent>,
    }

    fn harness(max_delivery_attempts: u32) -> Harness {
        let broker = Arc::new(PaperBroker::new("paper"));
        let ledger = Arc::new(InMemoryLedger::new());

        let mut registry = BrokerRegistry::new();
        registry.set_route("crypto", BrokerRoute::new("paper"));
        registry.register(broker.clone());

        let router = Arc::new(OrderRouter::new(
            ledger.clone(),
            Arc::new(registry),
            RouterConfig {
                max_attempts: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                submit_timeout_ms: 1_000,
            },
        ));

        let validator = Arc::new(SignalValidator::new(
            Arc::new(InMemorySignalCache::new(300)),
            RiskEngine::new(RiskPolicy::default()),
        ));

        let snapshots = Arc::new(StaticSnapshotProvider::new(dec!(100000)));
        snapshots.set_market(
            "BTC/USDT",
            MarketState {
                last_price: dec!(50000),
                atr: dec!(500),
                volatility: 0.02,
                volume_usd_24h: 5_000_000.0,
                news_blackout_until: None,
            },
        );

        let (event_tx, event_rx) = mpsc::channel(32);

        let coordinator = Arc::new(PipelineCoordinator::new(
            validator,
            router,
            ledger.clone(),
            snapshots,
            Arc::new(ChannelSink::new(event_tx)),
            Arc::new(PipelineMetrics::new().unwrap()),
            CoordinatorConfig {
                max_delivery_attempts,
                max_inflight_submissions: 4,
            },
        ));

        Harness {
            coordinator,
            broker,
            ledger,
            events: event_rx,
        }
    }

    fn test_signal(instrument: &str, score: f64, confidence: f64) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            timeframe: "1h".to_string(),
            direction: Direction::Buy,
            score,
            confidence,
            generated_at: Utc::now(),
            source_model_id: "test-model".to_string(),
        }
    }

    async fn next_event(events: &mut mpsc::Receiver<PipelineEvent>) -> PipelineEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_accepted_signal_reaches_broker() {
        let mut harness = harness(3);
        let (sender, source) = signal_channel(8);

        let coordinator = harness.coordinator.clone();
        let worker = tokio::spawn(async move { coordinator.run(source).await });

        sender
            .send(test_signal("BTC/USDT", 0.90, 0.95))
            .await
            .unwrap();

        let decision = match next_event(&mut harness.events).await {
            PipelineEvent::DecisionMade { decision } => decision,
            other => panic!("expected DecisionMade, got {:?}", other),
        };
        assert!(decision.is_accepted());

        let record = match next_event(&mut harness.events).await {
            PipelineEvent::OrderResolved { record } => record,
            other => panic!("expected OrderResolved, got {:?}", other),
        };
        assert_eq!(record.state, OrderState::Acknowledged);
        assert_eq!(harness.broker.place_calls(), 1);

        let stored = harness
            .ledger
            .get_decision(decision.signal_id)
            .await
            .unwrap();
        assert!(stored.is_some());

        worker.abort();
    }

    #[tokio::test]
    async fn test_redelivered_duplicate_produces_no_second_order() {
        let mut harness = harness(3);
        let (sender, source) = signal_channel(8);

        let coordinator = harness.coordinator.clone();
        let worker = tokio::spawn(async move { coordinator.run(source).await });

        sender
            .send(test_signal("BTC/USDT", 0.90, 0.95))
            .await
            .unwrap();
        // Redelivery: same instrument/timeframe/direction within TTL
        sender
            .send(test_signal("BTC/USDT", 0.91, 0.96))
            .await
            .unwrap();

        // First signal: decision + order
        assert!(matches!(
            next_event(&mut harness.events).await,
            PipelineEvent::DecisionMade { .. }
        ));
        assert!(matches!(
            next_event(&mut harness.events).await,
            PipelineEvent::OrderResolved { .. }
        ));

        // Second signal: rejected as duplicate, no order event
        let decision = match next_event(&mut harness.events).await {
            PipelineEvent::DecisionMade { decision } => decision,
            other => panic!("expected DecisionMade, got {:?}", other),
        };
        assert_eq!(
            decision.risk_assessment.rejection_reason,
            Some(RejectionReason::Duplicate)
        );
        assert_eq!(harness.broker.place_calls(), 1);

        worker.abort();
    }

    #[tokio::test]
    async fn test_low_confidence_rejected_without_order() {
        let mut harness = harness(3);
        let (sender, source) = signal_channel(8);

        let coordinator = harness.coordinator.clone();
        let worker = tokio::spawn(async move { coordinator.run(source).await });

        sender
            .send(test_signal("BTC/USDT", 0.90, 0.65))
            .await
            .unwrap();

        let decision = match next_event(&mut harness.events).await {
            PipelineEvent::DecisionMade { decision } => decision,
            other => panic!("expected DecisionMade, got {:?}", other),
        };
        assert_eq!(
            decision.risk_assessment.rejection_reason,
            Some(RejectionReason::LowConfidence)
        );
        assert_eq!(harness.broker.place_calls(), 0);

        worker.abort();
    }

    #[tokio::test]
    async fn test_poison_message_dead_lettered() {
        let mut harness = harness(2);
        let (sender, source) = signal_channel(8);

        let coordinator = harness.coordinator.clone();
        let worker = tokio::spawn(async move { coordinator.run(source).await });

        // No market data configured for this instrument: every delivery
        // fails with a transient error until the dead-letter threshold.
        sender
            .send(test_signal("DOGE/USDT", 0.90, 0.95))
            .await
            .unwrap();

        let (attempts, reason) = match next_event(&mut harness.events).await {
            PipelineEvent::DeadLettered {
                attempts, reason, ..
            } => (attempts, reason),
            other => panic!("expected DeadLettered, got {:?}", other),
        };
        assert_eq!(attempts, 2);
        assert!(reason.contains("poison message after 2 attempts"));
        assert!(reason.contains("no market data"));
        assert_eq!(harness.broker.place_calls(), 0);

        worker.abort();
    }
}
