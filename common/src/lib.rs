pub mod error;
pub mod orders;
pub mod signals;

pub use error::{BrokerError, LedgerError, PipelineError};
pub use orders::{OrderIntent, OrderRecord, OrderSide, OrderState};
pub use signals::{
    Decision, DecisionStatus, Direction, RejectionReason, RiskAssessment, Signal, SignalStrength,
    TrailingStop,
};
