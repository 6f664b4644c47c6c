//! Settlement error types.

use domain::DomainError;
use thiserror::Error;

use crate::state::SettlementState;

/// Errors that can occur while settling an order.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// A transfer was refused by the ledger. Applied steps were undone.
    #[error("Settlement step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: DomainError,
    },

    /// Undoing an applied step failed; the ledger may be out of balance.
    #[error("Compensation step '{step}' failed: {reason}")]
    CompensationFailed { step: String, reason: String },

    /// The plan's payouts do not add up to its total.
    #[error("Invalid settlement plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid settlement state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: &'static str,
        actual: SettlementState,
    },
}

/// Convenience type alias for settlement results.
pub type Result<T> = std::result::Result<T, SettlementError>;

impl From<SettlementError> for DomainError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::StepFailed { source, .. } => source,
            SettlementError::InvalidPlan(msg) => DomainError::Validation(msg),
            other => DomainError::InvalidState(other.to_string()),
        }
    }
}
