//! Order execution: broker connector registry, idempotent order routing,
//! the execution ledger and startup reconciliation.

pub mod broker;
pub mod ledger;
pub mod reconcile;
pub mod router;
pub mod storage;

pub use broker::{BrokerConnector, BrokerOrderStatus, BrokerRegistry, BrokerRoute, PaperBroker};
pub use ledger::{ExecutionLedger, InMemoryLedger};
pub use reconcile::{Reconciler, ReconcilerConfig};
pub use router::{OrderRouter, RouterConfig};
pub use storage::PgLedger;
