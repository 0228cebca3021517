//! Error types for the storage layer.

use agent_csi_core::CsiError;
use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A record with the same primary key already exists.
    #[error("record already exists: {0}")]
    Conflict(String),

    /// A record violates a field invariant.
    #[error("invalid record: {0}")]
    Invalid(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),
}

impl From<StoreError> for CsiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Invalid(msg) => Self::InvalidArgument(msg),
            StoreError::Database(msg) => Self::Storage(msg),
        }
    }
}
