//! Records stored in the metadata database.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A tenant provisioned on this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Backend-assigned tenant identifier.
    pub tenant_uuid: String,
    /// Newest agent version installed for the tenant.
    pub latest_version: String,
    /// Name of the owning `DynaKube`.
    pub dynakube_name: String,
}

impl Tenant {
    /// Create a new tenant record.
    #[must_use]
    pub fn new(
        tenant_uuid: impl Into<String>,
        latest_version: impl Into<String>,
        dynakube_name: impl Into<String>,
    ) -> Self {
        Self {
            tenant_uuid: tenant_uuid.into(),
            latest_version: latest_version.into(),
            dynakube_name: dynakube_name.into(),
        }
    }

    /// Check that every field is non-empty.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Invalid` naming the first empty field.
    pub fn validate(&self) -> Result<()> {
        require("tenant_uuid", &self.tenant_uuid)?;
        require("latest_version", &self.latest_version)?;
        require("dynakube_name", &self.dynakube_name)
    }
}

/// One published volume, pinned to the agent version it was mounted with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Orchestrator-assigned volume handle.
    pub volume_id: String,
    /// Pod the volume is published to.
    pub pod_name: String,
    /// Agent version bound at publish time.
    pub version: String,
    /// Tenant the agent belongs to.
    pub tenant_uuid: String,
}

impl Volume {
    /// Create a new volume record.
    #[must_use]
    pub fn new(
        volume_id: impl Into<String>,
        pod_name: impl Into<String>,
        version: impl Into<String>,
        tenant_uuid: impl Into<String>,
    ) -> Self {
        Self {
            volume_id: volume_id.into(),
            pod_name: pod_name.into(),
            version: version.into(),
            tenant_uuid: tenant_uuid.into(),
        }
    }

    /// Check that every field is non-empty.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Invalid` naming the first empty field.
    pub fn validate(&self) -> Result<()> {
        require("volume_id", &self.volume_id)?;
        require("pod_name", &self.pod_name)?;
        require("version", &self.version)?;
        require("tenant_uuid", &self.tenant_uuid)
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(StoreError::Invalid(format!("{field} must not be empty")));
    }
    Ok(())
}
