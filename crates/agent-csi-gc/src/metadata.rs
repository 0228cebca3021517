//! Deletion of metadata rows whose cluster object is gone.

use std::collections::BTreeSet;

use agent_csi_store::Store;
use tracing::{debug, info};

use crate::cluster::ClusterState;
use crate::error::Result;
use crate::types::MetadataReport;

/// Delete volume rows whose pod no longer exists and tenant rows whose
/// `DynaKube` no longer exists.
///
/// A tenant UUID that is still used by a live `DynaKube` is kept even if
/// another, deleted `DynaKube` also pointed at it.
///
/// # Errors
///
/// Returns an error if the cluster cannot be listed or a row cannot be
/// deleted. Nothing is deleted when the cluster listing fails.
pub async fn sweep_metadata(
    store: &dyn Store,
    cluster: &dyn ClusterState,
) -> Result<MetadataReport> {
    let live_pods = cluster.live_pods().await?;
    let live_dynakubes = cluster.live_dynakubes().await?;
    let mut report = MetadataReport::default();

    for (volume_id, pod_name) in store.list_volume_pods()? {
        if live_pods.contains(&pod_name) {
            continue;
        }
        store.delete_volume(&volume_id)?;
        info!(volume_id = %volume_id, pod = %pod_name, "Deleted volume of vanished pod");
        report.deleted_volumes.push(volume_id);
    }

    let dynakubes = store.list_dynakubes()?;
    let live_uuids: BTreeSet<&String> = dynakubes
        .iter()
        .filter(|(name, _)| live_dynakubes.contains(*name))
        .map(|(_, uuid)| uuid)
        .collect();

    for (name, uuid) in &dynakubes {
        if live_dynakubes.contains(name) {
            continue;
        }
        if live_uuids.contains(uuid) {
            debug!(dynakube = %name, tenant_uuid = %uuid, "Tenant still used by another DynaKube");
            continue;
        }
        store.delete_tenant(uuid)?;
        info!(dynakube = %name, tenant_uuid = %uuid, "Deleted tenant of vanished DynaKube");
        if !report.deleted_tenants.contains(uuid) {
            report.deleted_tenants.push(uuid.clone());
        }
    }

    Ok(report)
}
