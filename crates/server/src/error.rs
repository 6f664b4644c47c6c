//! Server error types.

use domain::DomainError;
use thiserror::Error;

/// Errors raised by the transport layer and the binary.
///
/// Errors inside a request never surface here; the dispatcher turns them
/// into error responses. These end a connection or the process.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request line grew past the configured limit.
    #[error("frame exceeds maximum length of {max} bytes")]
    FrameTooLong { max: usize },

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("metrics exporter: {0}")]
    Metrics(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
