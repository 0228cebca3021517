//! Error types for the garbage collector.

use agent_csi_core::CsiError;
use agent_csi_store::StoreError;
use thiserror::Error;

/// A result type using `GcError`.
pub type Result<T> = std::result::Result<T, GcError>;

/// Errors that abort a sweep.
///
/// Failures to remove individual directories are logged and counted instead.
#[derive(Debug, Error)]
pub enum GcError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A directory could not be listed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    Cluster(#[from] kube::Error),
}

impl GcError {
    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Cluster(_) | Self::Io(_))
    }
}

impl From<GcError> for CsiError {
    fn from(err: GcError) -> Self {
        match err {
            GcError::Store(e) => e.into(),
            GcError::Io(e) => Self::Internal(e.to_string()),
            GcError::Cluster(e) => Self::Unavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_kind() {
        let err: CsiError = GcError::Store(StoreError::Database("locked".into())).into();
        assert_eq!(err, CsiError::Storage("locked".to_string()));
    }

    #[test]
    fn io_errors_are_retriable() {
        assert!(GcError::Io(std::io::Error::other("busy")).is_retriable());
        assert!(!GcError::Store(StoreError::Database("x".into())).is_retriable());
    }
}
