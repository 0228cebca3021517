//! Daemon errors and the CSI status adapter.
//!
//! Components speak [`CsiError`]; this module is the only place it is turned
//! into a gRPC [`Status`].

use agent_csi_core::CsiError;
use agent_csi_store::StoreError;
use thiserror::Error;
use tonic::{Code, Status};

/// A result type using `DriverError`.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors that stop the daemon from starting or serving.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A flag or environment value is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The metadata store could not be opened.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The Kubernetes client could not be created.
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The gRPC server failed.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A socket or directory operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The gRPC code a domain error is reported with.
#[must_use]
pub const fn status_code(err: &CsiError) -> Code {
    match err {
        CsiError::InvalidArgument(_) => Code::InvalidArgument,
        CsiError::FailedPrecondition(_) => Code::FailedPrecondition,
        CsiError::Unavailable(_) | CsiError::Backend(_) => Code::Unavailable,
        CsiError::Internal(_) | CsiError::Storage(_) => Code::Internal,
        CsiError::Conflict(_) => Code::Aborted,
        CsiError::NotFound(_) => Code::NotFound,
    }
}

/// Convert a domain error into the status returned to the orchestrator.
#[must_use]
pub fn to_status(err: &CsiError) -> Status {
    Status::new(status_code(err), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let cases = [
            (CsiError::InvalidArgument("x".into()), Code::InvalidArgument),
            (CsiError::FailedPrecondition("x".into()), Code::FailedPrecondition),
            (CsiError::Unavailable("x".into()), Code::Unavailable),
            (CsiError::Internal("x".into()), Code::Internal),
            (CsiError::Conflict("x".into()), Code::Aborted),
            (CsiError::NotFound("x".into()), Code::NotFound),
            (CsiError::Storage("x".into()), Code::Internal),
            (CsiError::Backend("x".into()), Code::Unavailable),
        ];
        for (err, code) in cases {
            assert_eq!(status_code(&err), code, "{err}");
        }
    }

    #[test]
    fn status_carries_message() {
        let status = to_status(&CsiError::Unavailable("tenant dk not provisioned".into()));
        assert_eq!(status.code(), Code::Unavailable);
        assert!(status.message().contains("tenant dk not provisioned"));
    }
}
