//! Error types for the provisioner crate.

use agent_csi_core::CsiError;
use agent_csi_store::StoreError;
use thiserror::Error;

/// Errors that can occur while reconciling a tenant.
#[derive(Error, Debug)]
pub enum ProvisionerError {
    /// The backend request failed or returned an error response.
    #[error("Backend error: {0}")]
    Backend(String),

    /// An agent could not be installed.
    #[error("Install failed: {0}")]
    Install(String),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The custom resource or its secret is unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProvisionerError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Backend(_) | Self::Kube(_) | Self::Io(_) | Self::Install(_) => true,
            Self::Store(e) => matches!(e, StoreError::Database(_)),
            Self::Config(_) => false,
        }
    }
}

impl From<zip::result::ZipError> for ProvisionerError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Install(err.to_string())
    }
}

impl From<ProvisionerError> for CsiError {
    fn from(err: ProvisionerError) -> Self {
        match err {
            ProvisionerError::Backend(msg) => Self::Backend(msg),
            ProvisionerError::Store(e) => e.into(),
            ProvisionerError::Kube(e) => Self::Unavailable(e.to_string()),
            ProvisionerError::Config(msg) => Self::FailedPrecondition(msg),
            ProvisionerError::Install(msg) => Self::Internal(msg),
            ProvisionerError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

/// A specialized Result type for provisioner operations.
pub type Result<T> = std::result::Result<T, ProvisionerError>;
