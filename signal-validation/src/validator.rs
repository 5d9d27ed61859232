// Signal Validator
// Combines the dedupe cache and the risk engine into one accept/reject
// decision with a computed order intent.

use std::sync::Arc;

use chrono::Utc;
use common::{
    orders::idempotency_key, Decision, DecisionStatus, OrderIntent, OrderSide, RejectionReason,
    Signal,
};
use tracing::{debug, warn};

use crate::cache::SignalCache;
use crate::risk::{EvaluationContext, RiskEngine};

/// Produces exactly one decision per signal. Synchronous and side-effect
/// free beyond the cache write, so replaying a signal after a crash yields
/// the same decision (unless the cache entry has since expired, which is a
/// policy choice, not a correctness violation).
pub struct SignalValidator {
    cache: Arc<dyn SignalCache>,
    engine: RiskEngine,
}

impl SignalValidator {
    pub fn new(cache: Arc<dyn SignalCache>, engine: RiskEngine) -> Self {
        Self { cache, engine }
    }

    pub fn validate(&self, signal: &Signal, ctx: &EvaluationContext) -> Decision {
        // Cache first; a duplicate is recorded as a rejected decision so it
        // stays visible to audit. Cache faults fail open.
        let fresh = match self.cache.offer(signal) {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!("Signal cache unavailable, failing open: {}", e);
                true
            }
        };

        if !fresh {
            debug!(
                "Signal {} for {} suppressed as duplicate",
                signal.id,
                signal.cache_key()
            );
            return Decision::rejected(signal.id, RejectionReason::Duplicate);
        }

        let assessment = self.engine.evaluate(signal, ctx);
        if !assessment.filters_passed {
            return Decision {
                signal_id: signal.id,
                status: DecisionStatus::Rejected,
                risk_assessment: assessment,
                order_intent: None,
                decided_at: Utc::now(),
            };
        }

        let side = OrderSide::from(signal.direction);
        let quantity = assessment.max_position_size;
        let intent = OrderIntent {
            signal_id: signal.id,
            instrument: signal.instrument.clone(),
            side,
            quantity,
            limit_price: None,
            stop_loss: assessment.stop_loss_price.unwrap_or_default(),
            take_profit: assessment.take_profit_price.unwrap_or_default(),
            trailing_stop: assessment.trailing_stop,
            idempotency_key: idempotency_key(signal.id, &signal.instrument, side, quantity),
        };

        debug!(
            "Signal {} accepted: {} {} {} @ key {}",
            signal.id,
            intent.side.as_str(),
            intent.quantity,
            intent.instrument,
            intent.idempotency_key
        );

        Decision {
            signal_id: signal.id,
            status: DecisionStatus::Accepted,
            risk_assessment: assessment,
            order_intent: Some(intent),
            decided_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemorySignalCache;
    use crate::policy::RiskPolicy;
    use crate::risk::{AccountState, MarketState};
    use common::{Direction, SignalStrength};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct FailingCache;

    impl SignalCache for FailingCache {
        fn offer(&self, _signal: &Signal) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("cache store unreachable"))
        }
    }

    fn test_signal(score: f64, confidence: f64) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            instrument: "BTC/USDT".to_string(),
            timeframe: "1h".to_string(),
            direction: if score >= 0.0 {
                Direction::Buy
            } else {
                Direction::Sell
            },
            score,
            confidence,
            generated_at: Utc::now(),
            source_model_id: "test-model".to_string(),
        }
    }

    fn test_context() -> EvaluationContext {
        EvaluationContext {
            market: MarketState {
                last_price: dec!(50000),
                atr: dec!(500),
                volatility: 0.02,
                volume_usd_24h: 5_000_000.0,
                news_blackout_until: None,
            },
            account: AccountState {
                equity: dec!(100000),
            },
        }
    }

    fn validator() -> SignalValidator {
        SignalValidator::new(
            Arc::new(InMemorySignalCache::new(300)),
            RiskEngine::new(RiskPolicy::default()),
        )
    }

    #[test]
    fn test_strong_buy_accepted_with_intent() {
        let validator = validator();
        let decision = validator.validate(&test_signal(0.90, 0.95), &test_context());

        assert!(decision.is_accepted());
        assert_eq!(
            decision.risk_assessment.strength,
            Some(SignalStrength::StrongBuy)
        );
        let intent = decision.order_intent.unwrap();
        assert_eq!(intent.side, OrderSide::Buy);
        assert!(intent.quantity > rust_decimal::Decimal::ZERO);
        assert_eq!(intent.idempotency_key.len(), 64);
    }

    #[test]
    fn test_low_confidence_rejected() {
        let validator = validator();
        let decision = validator.validate(&test_signal(0.90, 0.65), &test_context());

        assert!(!decision.is_accepted());
        assert_eq!(
            decision.risk_assessment.rejection_reason,
            Some(RejectionReason::LowConfidence)
        );
        assert!(decision.order_intent.is_none());
    }

    #[test]
    fn test_duplicate_rejected_with_reason() {
        let validator = validator();
        let ctx = test_context();

        let first = validator.validate(&test_signal(0.90, 0.95), &ctx);
        assert!(first.is_accepted());

        // Same (instrument, timeframe, direction) within TTL
        let second = validator.validate(&test_signal(0.92, 0.95), &ctx);
        assert!(!second.is_accepted());
        assert_eq!(
            second.risk_assessment.rejection_reason,
            Some(RejectionReason::Duplicate)
        );
    }

    #[test]
    fn test_cache_failure_fails_open() {
        let validator = SignalValidator::new(
            Arc::new(FailingCache),
            RiskEngine::new(RiskPolicy::default()),
        );

        let decision = validator.validate(&test_signal(0.90, 0.95), &test_context());
        assert!(decision.is_accepted());
    }

    #[test]
    fn test_revalidation_same_intent_key() {
        // Replay after a crash must land on the same idempotency key
        let signal = test_signal(0.90, 0.95);
        let ctx = test_context();

        // Two validators with fresh caches model a restart
        let a = validator().validate(&signal, &ctx);
        let b = validator().validate(&signal, &ctx);

        assert_eq!(
            a.order_intent.unwrap().idempotency_key,
            b.order_intent.unwrap().idempotency_key
        );
    }
}
