//! In-memory storage for tests.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::types::{Tenant, Volume};
use crate::Store;

/// A `Store` that keeps both tables in memory.
#[derive(Default)]
pub struct MemoryStore {
    tenants: RwLock<BTreeMap<String, Tenant>>,
    volumes: RwLock<BTreeMap<String, Volume>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of volume rows.
    #[must_use]
    pub fn volume_count(&self) -> usize {
        self.volumes.read().len()
    }
}

impl Store for MemoryStore {
    fn insert_tenant(&self, tenant: &Tenant) -> Result<()> {
        tenant.validate()?;
        let mut tenants = self.tenants.write();
        if tenants.contains_key(&tenant.dynakube_name) {
            return Err(StoreError::Conflict(format!(
                "tenant for dynakube {}",
                tenant.dynakube_name
            )));
        }
        tenants.insert(tenant.dynakube_name.clone(), tenant.clone());
        Ok(())
    }

    fn update_tenant(&self, tenant: &Tenant) -> Result<()> {
        tenant.validate()?;
        match self.tenants.write().get_mut(&tenant.dynakube_name) {
            Some(existing) => {
                existing.clone_from(tenant);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "tenant for dynakube {}",
                tenant.dynakube_name
            ))),
        }
    }

    fn delete_tenant(&self, tenant_uuid: &str) -> Result<()> {
        self.tenants
            .write()
            .retain(|_, tenant| tenant.tenant_uuid != tenant_uuid);
        Ok(())
    }

    fn get_tenant(&self, dynakube_name: &str) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().get(dynakube_name).cloned())
    }

    fn list_dynakubes(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .tenants
            .read()
            .values()
            .map(|t| (t.dynakube_name.clone(), t.tenant_uuid.clone()))
            .collect())
    }

    fn insert_volume(&self, volume: &Volume) -> Result<()> {
        volume.validate()?;
        let mut volumes = self.volumes.write();
        if volumes.contains_key(&volume.volume_id) {
            return Err(StoreError::Conflict(format!("volume {}", volume.volume_id)));
        }
        volumes.insert(volume.volume_id.clone(), volume.clone());
        Ok(())
    }

    fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.volumes.write().remove(volume_id);
        Ok(())
    }

    fn get_volume(&self, volume_id: &str) -> Result<Option<Volume>> {
        Ok(self.volumes.read().get(volume_id).cloned())
    }

    fn list_volume_pods(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .volumes
            .read()
            .values()
            .map(|v| (v.volume_id.clone(), v.pod_name.clone()))
            .collect())
    }

    fn list_used_versions(&self, tenant_uuid: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .volumes
            .read()
            .values()
            .filter(|v| v.tenant_uuid == tenant_uuid)
            .map(|v| v.version.clone())
            .collect())
    }
}
