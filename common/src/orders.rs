use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::signals::{Direction, TrailingStop};

/// Order side as sent to the broker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl From<Direction> for OrderSide {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Buy => OrderSide::Buy,
            Direction::Sell => OrderSide::Sell,
        }
    }
}

/// Deterministic key guarding against duplicate order submission.
///
/// Quantity is rounded to 8 decimal places before hashing so that an
/// identical re-validation of the same signal lands on the same key.
pub fn idempotency_key(
    signal_id: Uuid,
    instrument: &str,
    side: OrderSide,
    quantity: Decimal,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signal_id.as_bytes());
    hasher.update(instrument.as_bytes());
    hasher.update(side.as_str().as_bytes());
    hasher.update(quantity.round_dp(8).normalize().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Validated order, ready for the router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub signal_id: Uuid,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// None means a market order
    pub limit_price: Option<Decimal>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub trailing_stop: Option<TrailingStop>,
    pub idempotency_key: String,
}

/// Lifecycle state of an order record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    Submitted,
    Acknowledged,
    Failed,
    Expired,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Acknowledged | OrderState::Failed | OrderState::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Submitted => "submitted",
            OrderState::Acknowledged => "acknowledged",
            OrderState::Failed => "failed",
            OrderState::Expired => "expired",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one order's signal -> broker-ack lifecycle.
///
/// Exactly one record exists per idempotency key; retries mutate this
/// record instead of creating a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub idempotency_key: String,
    pub signal_id: Uuid,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub broker_id: String,
    pub broker_order_id: Option<String>,
    pub state: OrderState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Fresh record for an intent that has never been routed
    pub fn pending(intent: &OrderIntent, broker_id: &str) -> Self {
        let now = Utc::now();
        Self {
            idempotency_key: intent.idempotency_key.clone(),
            signal_id: intent.signal_id,
            instrument: intent.instrument.clone(),
            side: intent.side,
            quantity: intent.quantity,
            broker_id: broker_id.to_string(),
            broker_order_id: None,
            state: OrderState::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
