use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orders::OrderIntent;

/// Trade direction carried by a signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }
}

/// AI-scored trading opportunity for an instrument/timeframe.
///
/// Immutable once created; produced by the external scorer and consumed
/// exactly once per cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub instrument: String,
    pub timeframe: String,
    pub direction: Direction,
    pub score: f64,      // -1.0 to 1.0
    pub confidence: f64, // 0.0 to 1.0
    pub generated_at: DateTime<Utc>,
    pub source_model_id: String,
}

impl Signal {
    /// Dedupe key: signals for the same instrument/timeframe/direction
    /// within the cache TTL are considered duplicates.
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.instrument,
            self.timeframe,
            self.direction.as_str()
        )
    }
}

/// Strength tier derived from the model score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalStrength {
    StrongBuy,
    Buy,
    Sell,
    StrongSell,
}

/// Reason a signal was rejected, surfaced to audit and metrics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Duplicate,
    LowConfidence,
    VolatilityOutOfRange,
    InsufficientVolume,
    NewsBlackout,
    IndecisiveScore,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Duplicate => "duplicate",
            RejectionReason::LowConfidence => "low_confidence",
            RejectionReason::VolatilityOutOfRange => "volatility_out_of_range",
            RejectionReason::InsufficientVolume => "insufficient_volume",
            RejectionReason::NewsBlackout => "news_blackout",
            RejectionReason::IndecisiveScore => "indecisive_score",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trailing stop parameters attached to an accepted assessment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrailingStop {
    /// Price at which the trailing stop activates
    pub activation_price: Decimal,
    /// Distance maintained behind the best price once active
    pub distance: Decimal,
}

/// Output of the risk engine, embedded in the resulting decision.
///
/// Derived deterministically from a signal plus the account/market
/// snapshot; never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub strength: Option<SignalStrength>,
    /// Position size cap in quantity units
    pub max_position_size: Decimal,
    /// Capital at risk between entry and stop, in account currency
    pub risk_per_trade: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub trailing_stop: Option<TrailingStop>,
    pub filters_passed: bool,
    pub rejection_reason: Option<RejectionReason>,
}

impl RiskAssessment {
    /// Assessment for a signal that failed a filter check
    pub fn rejected(reason: RejectionReason) -> Self {
        Self {
            strength: None,
            max_position_size: Decimal::ZERO,
            risk_per_trade: Decimal::ZERO,
            stop_loss_price: None,
            take_profit_price: None,
            trailing_stop: None,
            filters_passed: false,
            rejection_reason: Some(reason),
        }
    }
}

/// Accept/reject outcome for a signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Accepted,
    Rejected,
}

/// One decision per signal, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub signal_id: Uuid,
    pub status: DecisionStatus,
    pub risk_assessment: RiskAssessment,
    pub order_intent: Option<OrderIntent>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        self.status == DecisionStatus::Accepted
    }

    pub fn rejected(signal_id: Uuid, reason: RejectionReason) -> Self {
        Self {
            signal_id,
            status: DecisionStatus::Rejected,
            risk_assessment: RiskAssessment::rejected(reason),
            order_intent: None,
            decided_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_reason_display() {
        assert_eq!(RejectionReason::LowConfidence.to_string(), "low_confidence");
        assert_eq!(RejectionReason::Duplicate.to_string(), "duplicate");
    }

    #[test]
    fn test_cache_key() {
        let signal = Signal {
            id: Uuid::new_v4(),
            instrument: "BTC/USDT".to_string(),
            timeframe: "1h".to_string(),
            direction: Direction::Buy,
            score: 0.9,
            confidence: 0.95,
            generated_at: Utc::now(),
            source_model_id: "test-model".to_string(),
        };
        assert_eq!(signal.cache_key(), "BTC/USDT:1h:buy");
    }
}
