//! Domain error types.

use common::{OrderId, ProductKey, Username};
use thiserror::Error;

use crate::value_objects::Money;

/// Errors that can occur during marketplace operations.
///
/// Every variant maps to a stable machine-readable [`DomainError::kind`] so
/// callers across a process boundary can branch on it without parsing the
/// human-readable message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    /// Bad quantity, empty field, out-of-range value.
    #[error("{0}")]
    Validation(String),

    /// Unknown product, order or user.
    #[error("{0}")]
    NotFound(String),

    /// The order exists but belongs to another consumer.
    #[error("Order {order_id} does not belong to {username}")]
    WrongOwner { order_id: OrderId, username: Username },

    #[error("Insufficient stock for {product}: requested {requested}, available {available}")]
    InsufficientStock {
        product: ProductKey,
        requested: u32,
        available: u32,
    },

    #[error("Insufficient balance for {username}: required {required}, available {available}")]
    InsufficientBalance {
        username: Username,
        required: Money,
        available: Money,
    },

    /// Wrong order status (or session state) for the requested transition.
    #[error("{0}")]
    InvalidState(String),

    #[error("Order {0} has timed out")]
    OrderExpired(OrderId),

    #[error("{0}")]
    PermissionDenied(String),

    /// Malformed request or unknown action.
    #[error("{0}")]
    Protocol(String),

    /// The persistence collaborator failed to load or save.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Fatal invariant violation: confirm saw less stock than was frozen.
    #[error("Stock inconsistency for {product}: {detail}")]
    StockInconsistency { product: ProductKey, detail: String },
}

impl DomainError {
    /// Returns the machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "ValidationError",
            DomainError::NotFound(_) => "NotFound",
            DomainError::WrongOwner { .. } => "WrongOwner",
            DomainError::InsufficientStock { .. } => "InsufficientStock",
            DomainError::InsufficientBalance { .. } => "InsufficientBalance",
            DomainError::InvalidState(_) => "InvalidState",
            DomainError::OrderExpired(_) => "OrderExpired",
            DomainError::PermissionDenied(_) => "PermissionDenied",
            DomainError::Protocol(_) => "ProtocolError",
            DomainError::Persistence(_) => "PersistenceFailure",
            DomainError::StockInconsistency { .. } => "StockInconsistency",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        DomainError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        DomainError::NotFound(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        DomainError::PermissionDenied(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        DomainError::InvalidState(msg.into())
    }

    /// Returns true for errors that indicate corrupted ledger state rather
    /// than a rejected request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DomainError::StockInconsistency { .. })
    }
}

/// Convenience type alias for domain results.
pub type Result<T> = std::result::Result<T, DomainError>;
