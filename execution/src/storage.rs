// Postgres-backed execution ledger.
// Per-key atomicity comes from the primary-key constraint on
// idempotency_key plus INSERT .. ON CONFLICT.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Decision, LedgerError, OrderRecord, OrderSide, OrderState};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::ledger::ExecutionLedger;

pub struct PgLedger {
    pool: Arc<PgPool>,
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    idempotency_key: String,
    signal_id: Uuid,
    instrument: String,
    side: String,
    quantity: Decimal,
    broker_id: String,
    broker_order_id: Option<String>,
    state: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_record(self) -> Result<OrderRecord, LedgerError> {
        Ok(OrderRecord {
            idempotency_key: self.idempotency_key,
            signal_id: self.signal_id,
            instrument: self.instrument,
            side: parse_side(&self.side)?,
            quantity: self.quantity,
            broker_id: self.broker_id,
            broker_order_id: self.broker_order_id,
            state: parse_state(&self.state)?,
            attempts: self.attempts as u32,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_side(s: &str) -> Result<OrderSide, LedgerError> {
    match s {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        other => Err(LedgerError::Constraint(format!("unknown side: {other}"))),
    }
}

fn parse_state(s: &str) -> Result<OrderState, LedgerError> {
    match s {
        "pending" => Ok(OrderState::Pending),
        "submitted" => Ok(OrderState::Submitted),
        "acknowledged" => Ok(OrderState::Acknowledged),
        "failed" => Ok(OrderState::Failed),
        "expired" => Ok(OrderState::Expired),
        other => Err(LedgerError::Constraint(format!("unknown state: {other}"))),
    }
}

fn store_err(e: sqlx::Error) -> LedgerError {
    LedgerError::Unavailable(e.to_string())
}

impl PgLedger {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Bootstrap the ledger schema
    pub async fn initialize(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_records (
                idempotency_key TEXT PRIMARY KEY,
                signal_id UUID NOT NULL,
                instrument TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity NUMERIC(30, 8) NOT NULL,
                broker_id TEXT NOT NULL,
                broker_order_id TEXT,
                state TEXT NOT NULL,
                attempts INT NOT NULL,
                last_error TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_order_records_state ON order_records(state);
            CREATE INDEX IF NOT EXISTS idx_order_records_signal ON order_records(signal_id);

            CREATE TABLE IF NOT EXISTS decisions (
                signal_id UUID PRIMARY KEY,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                decided_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .execute(self.pool.as_ref())
        .await
        .map_err(store_err)?;

        info!("Execution ledger tables initialized");
        Ok(())
    }
}

#[async_trait]
impl ExecutionLedger for PgLedger {
    async fn record_decision(&self, decision: &Decision) -> Result<(), LedgerError> {
        let payload = serde_json::to_string(decision)
            .map_err(|e| LedgerError::Constraint(e.to_string()))?;
        let status = match decision.status {
            common::DecisionStatus::Accepted => "accepted",
            common::DecisionStatus::Rejected => "rejected",
        };

        // Decisions are immutable: replays hit the conflict and do nothing
        sqlx::query(
            r#"
            INSERT INTO decisions (signal_id, status, payload, decided_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (signal_id) DO NOTHING
            "#,
        )
        .bind(decision.signal_id)
        .bind(status)
        .bind(payload)
        .bind(decision.decided_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn get_decision(&self, signal_id: Uuid) -> Result<Option<Decision>, LedgerError> {
        let payload: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM decisions WHERE signal_id = $1")
                .bind(signal_id)
                .fetch_optional(self.pool.as_ref())
                .await
                .map_err(store_err)?;

        payload
            .map(|(p,)| serde_json::from_str(&p).map_err(|e| LedgerError::Constraint(e.to_string())))
            .transpose()
    }

    async fn create_if_absent(
        &self,
        record: OrderRecord,
    ) -> Result<(OrderRecord, bool), LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO order_records (
                idempotency_key, signal_id, instrument, side, quantity,
                broker_id, broker_order_id, state, attempts, last_error,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(&record.idempotency_key)
        .bind(record.signal_id)
        .bind(&record.instrument)
        .bind(record.side.as_str())
        .bind(record.quantity)
        .bind(&record.broker_id)
        .bind(&record.broker_order_id)
        .bind(record.state.as_str())
        .bind(record.attempts as i32)
        .bind(&record.last_error)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 1 {
            return Ok((record, true));
        }

        // Lost the race (or a redelivery): fetch the existing record
        let existing = self
            .get_by_idempotency_key(&record.idempotency_key)
            .await?
            .ok_or_else(|| {
                LedgerError::Constraint("record vanished after conflict".to_string())
            })?;
        Ok((existing, false))
    }

    async fn upsert_order(&self, record: &OrderRecord) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO order_records (
                idempotency_key, signal_id, instrument, side, quantity,
                broker_id, broker_order_id, state, attempts, last_error,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (idempotency_key) DO UPDATE SET
                broker_id = EXCLUDED.broker_id,
                broker_order_id = EXCLUDED.broker_order_id,
                state = EXCLUDED.state,
                attempts = EXCLUDED.attempts,
                last_error = EXCLUDED.last_error,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.idempotency_key)
        .bind(record.signal_id)
        .bind(&record.instrument)
        .bind(record.side.as_str())
        .bind(record.quantity)
        .bind(&record.broker_id)
        .bind(&record.broker_order_id)
        .bind(record.state.as_str())
        .bind(record.attempts as i32)
        .bind(&record.last_error)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<OrderRecord>, LedgerError> {
        let row: Option<OrderRow> =
            sqlx::query_as("SELECT * FROM order_records WHERE idempotency_key = $1")
                .bind(key)
                .fetch_optional(self.pool.as_ref())
                .await
                .map_err(store_err)?;

        row.map(OrderRow::into_record).transpose()
    }

    async fn open_submissions(&self) -> Result<Vec<OrderRecord>, LedgerError> {
        let rows: Vec<OrderRow> =
            sqlx::query_as("SELECT * FROM order_records WHERE state = 'submitted'")
                .fetch_all(self.pool.as_ref())
                .await
                .map_err(store_err)?;

        rows.into_iter().map(OrderRow::into_record).collect()
    }
}
