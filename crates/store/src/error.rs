use domain::DomainError;
use thiserror::Error;

/// Errors that can occur when loading or saving market state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing a data file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A data file did not contain valid JSON for its collection.
    #[error("Serialization error in {path}: {source}")]
    Serialization {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backing store refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        DomainError::Persistence(err.to_string())
    }
}
