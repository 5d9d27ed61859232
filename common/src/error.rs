//! Error taxonomy shared across the pipeline.
//!
//! Business rejections are decisions, not errors; only infrastructure-level
//! faults appear here.

use thiserror::Error;

/// Failure modes reported by a broker connector
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Terminal rejection (invalid order, insufficient funds). Never retried.
    #[error("order rejected by broker: {0}")]
    Rejected(String),

    /// Connector-reported unavailability; eligible for fallback routing.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// No response within the bounded call timeout.
    #[error("broker call timed out")]
    Timeout,
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BrokerError::Rejected(_))
    }
}

/// Ledger/cache store faults (TransientInfra)
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),

    #[error("ledger constraint violated: {0}")]
    Constraint(String),
}

/// Coordinator-level failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient pipeline failure: {0}")]
    Transient(String),

    #[error("poison message after {attempts} attempts: {reason}")]
    Poison { attempts: u32, reason: String },
}
