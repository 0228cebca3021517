//! Domain error kinds shared across component boundaries.
//!
//! Each component keeps its own error enum; all of them convert into
//! [`CsiError`], which the gRPC layer maps onto status codes.

use thiserror::Error;

/// A result type using `CsiError`.
pub type Result<T> = std::result::Result<T, CsiError>;

/// Errors surfaced across component boundaries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// A request is missing a required field or carries an invalid one.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Cluster state is not ready yet (missing label, namespace or tenant).
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// A collaborator is transiently unavailable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A mount or filesystem operation failed after rollback.
    #[error("internal error: {0}")]
    Internal(String),

    /// A unique key already exists in the metadata store.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A row requested for update does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The metadata store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The vendor backend failed.
    #[error("backend error: {0}")]
    Backend(String),
}

impl CsiError {
    /// Check if the caller should retry the operation with backoff.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::FailedPrecondition(_)
                | Self::Unavailable(_)
                | Self::Internal(_)
                | Self::Storage(_)
                | Self::Backend(_)
        )
    }
}

impl From<std::io::Error> for CsiError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_not_retriable() {
        assert!(!CsiError::InvalidArgument("volume id".into()).is_retriable());
        assert!(!CsiError::Conflict("dup".into()).is_retriable());
        assert!(!CsiError::NotFound("row".into()).is_retriable());
    }

    #[test]
    fn transient_errors_are_retriable() {
        assert!(CsiError::Unavailable("tenant".into()).is_retriable());
        assert!(CsiError::FailedPrecondition("label".into()).is_retriable());
        assert!(CsiError::Backend("timeout".into()).is_retriable());
    }

    #[test]
    fn io_errors_become_internal() {
        let err: CsiError = std::io::Error::other("disk full").into();
        assert_eq!(err, CsiError::Internal("disk full".to_string()));
    }
}
