//! Entry point tying the sweeps to one store and data directory.

use std::sync::Arc;
use std::time::SystemTime;

use agent_csi_core::PathResolver;
use agent_csi_store::Store;
use tracing::{info, instrument};

use crate::binaries::sweep_binaries;
use crate::cluster::ClusterState;
use crate::error::Result;
use crate::logs::sweep_logs;
use crate::metadata::sweep_metadata;
use crate::types::{GcConfig, MetadataReport, SweepReport};

/// Runs the garbage-collection sweeps against a shared store.
pub struct GarbageCollector {
    store: Arc<dyn Store>,
    paths: PathResolver,
    config: GcConfig,
}

impl GarbageCollector {
    /// Create a collector with the default limits.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, paths: PathResolver) -> Self {
        Self::with_config(store, paths, GcConfig::default())
    }

    /// Create a collector with custom limits.
    #[must_use]
    pub fn with_config(store: Arc<dyn Store>, paths: PathResolver, config: GcConfig) -> Self {
        Self {
            store,
            paths,
            config,
        }
    }

    /// Get the sweep limits.
    #[must_use]
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Run the binary sweep, then the log sweep, for one tenant.
    ///
    /// Returns the binary report and the log report.
    ///
    /// # Errors
    ///
    /// Returns an error if either sweep cannot start.
    #[instrument(skip(self))]
    pub fn collect_tenant(
        &self,
        tenant_uuid: &str,
        latest_version: &str,
    ) -> Result<(SweepReport, SweepReport)> {
        let binaries = sweep_binaries(self.store.as_ref(), &self.paths, tenant_uuid, latest_version)?;
        let logs = sweep_logs(
            self.store.as_ref(),
            &self.paths,
            tenant_uuid,
            &self.config,
            SystemTime::now(),
        )?;

        info!(
            tenant_uuid,
            binaries_removed = binaries.removed.len(),
            volumes_removed = logs.removed.len(),
            capped = logs.capped,
            "Garbage collection finished"
        );
        Ok((binaries, logs))
    }

    /// Run the metadata correctness sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster or the store cannot be read.
    pub async fn check_metadata(&self, cluster: &dyn ClusterState) -> Result<MetadataReport> {
        let report = sweep_metadata(self.store.as_ref(), cluster).await?;
        info!(
            volumes = report.deleted_volumes.len(),
            tenants = report.deleted_tenants.len(),
            "Metadata correctness sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockClusterState;
    use agent_csi_store::{MemoryStore, Tenant, Volume};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn collect_tenant_keeps_pinned_and_latest() {
        let dir = TempDir::new().unwrap();
        let paths = PathResolver::new(dir.path());
        let store = Arc::new(MemoryStore::new());
        store.insert_volume(&Volume::new("vol-a", "pod-a", "1.0", "T1")).unwrap();
        for version in ["1.0", "1.1", "1.2"] {
            fs::create_dir_all(paths.agent_binary_dir_for_version("T1", version)).unwrap();
        }

        let gc = GarbageCollector::new(store, paths.clone());
        let (binaries, logs) = gc.collect_tenant("T1", "1.2").unwrap();

        assert_eq!(binaries.removed, vec![paths.agent_binary_dir_for_version("T1", "1.1")]);
        assert!(logs.removed.is_empty());
        assert!(paths.agent_binary_dir_for_version("T1", "1.0").exists());
        assert!(paths.agent_binary_dir_for_version("T1", "1.2").exists());
    }

    #[tokio::test]
    async fn check_metadata_uses_cluster_state() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_tenant(&Tenant::new("T1", "1.0", "dk")).unwrap();

        let gc = GarbageCollector::new(store.clone(), PathResolver::new(dir.path()));
        let report = gc.check_metadata(&MockClusterState::new()).await.unwrap();

        assert_eq!(report.deleted_tenants, vec!["T1".to_string()]);
        assert!(store.get_tenant("dk").unwrap().is_none());
    }
}
