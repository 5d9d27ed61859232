// Execution Ledger
// Durable record of the signal -> decision -> order -> broker-ack
// lifecycle, and the source of truth for idempotency.

use async_trait::async_trait;
use common::{Decision, LedgerError, OrderRecord, OrderState};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// Trait for ledger backends. All operations must be atomic with respect
/// to concurrent pipeline workers; `create_if_absent` is the per-key
/// compare-and-set the router's idempotency rests on.
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// Record a decision. Decisions are immutable; re-recording the same
    /// signal id is a no-op.
    async fn record_decision(&self, decision: &Decision) -> Result<(), LedgerError>;

    async fn get_decision(&self, signal_id: Uuid) -> Result<Option<Decision>, LedgerError>;

    /// Insert the record if no record exists for its idempotency key.
    /// Returns the stored record and whether this call created it.
    async fn create_if_absent(&self, record: OrderRecord)
        -> Result<(OrderRecord, bool), LedgerError>;

    async fn upsert_order(&self, record: &OrderRecord) -> Result<(), LedgerError>;

    async fn get_by_idempotency_key(&self, key: &str)
        -> Result<Option<OrderRecord>, LedgerError>;

    /// Records left in `submitted` state, e.g. after a crash. Input to
    /// startup reconciliation.
    async fn open_submissions(&self) -> Result<Vec<OrderRecord>, LedgerError>;
}

/// In-memory ledger. Per-key atomicity comes from the DashMap entry API,
/// which holds the shard lock across the check-and-insert.
#[derive(Default)]
pub struct InMemoryLedger {
    orders: DashMap<String, OrderRecord>,
    decisions: DashMap<Uuid, Decision>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

#[async_trait]
impl ExecutionLedger for InMemoryLedger {
    async fn record_decision(&self, decision: &Decision) -> Result<(), LedgerError> {
        self.decisions
            .entry(decision.signal_id)
            .or_insert_with(|| decision.clone());
        Ok(())
    }

    async fn get_decision(&self, signal_id: Uuid) -> Result<Option<Decision>, LedgerError> {
        Ok(self.decisions.get(&signal_id).map(|d| d.clone()))
    }

    async fn create_if_absent(
        &self,
        record: OrderRecord,
    ) -> Result<(OrderRecord, bool), LedgerError> {
        match self.orders.entry(record.idempotency_key.clone()) {
            Entry::Occupied(occupied) => Ok((occupied.get().clone(), false)),
            Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
                Ok((record, true))
            }
        }
    }

    async fn upsert_order(&self, record: &OrderRecord) -> Result<(), LedgerError> {
        self.orders
            .insert(record.idempotency_key.clone(), record.clone());
        Ok(())
    }

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<OrderRecord>, LedgerError> {
        Ok(self.orders.get(key).map(|r| r.clone()))
    }

    async fn open_submissions(&self) -> Result<Vec<OrderRecord>, LedgerError> {
        Ok(self
            .orders
            .iter()
            .filter(|r| r.state == OrderState::Submitted)
            .map(|r| r.clone())
            .collect())
    }
}
