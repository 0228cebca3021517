//! Removal of agent versions nothing uses anymore.

use std::collections::BTreeSet;
use std::fs;
use std::io;

use agent_csi_core::{Flavor, PathResolver};
use agent_csi_store::Store;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::SweepReport;

/// Remove every `bin/` entry of a tenant whose version is neither bind
/// mounted by a volume nor the tenant's latest version.
///
/// Flavor siblings (`<version>-musl`) share the fate of their base version.
/// Removal failures are logged and reported; the next sweep retries them.
///
/// # Errors
///
/// Returns an error if the used versions cannot be read from the store or
/// the `bin/` directory cannot be listed.
pub fn sweep_binaries(
    store: &dyn Store,
    paths: &PathResolver,
    tenant_uuid: &str,
    latest_version: &str,
) -> Result<SweepReport> {
    let mut keep: BTreeSet<String> = store.list_used_versions(tenant_uuid)?;
    keep.insert(latest_version.to_string());

    let bin_dir = paths.agent_bin_dir(tenant_uuid);
    let entries = match fs::read_dir(&bin_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SweepReport::default()),
        Err(e) => return Err(e.into()),
    };

    let mut report = SweepReport::default();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if keep.contains(base_version(&name)) {
            debug!(tenant_uuid, version = %name, "Keeping agent binary");
            continue;
        }

        let path = entry.path();
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(tenant_uuid, version = %name, "Removed unused agent binary");
                report.removed.push(path);
            }
            Err(e) => {
                warn!(tenant_uuid, path = %path.display(), error = %e, "Failed to remove agent binary");
                report.failed.push(path);
            }
        }
    }

    Ok(report)
}

/// Strip a flavor suffix from a `bin/` entry name.
fn base_version(dir_name: &str) -> &str {
    Flavor::ALL
        .iter()
        .filter_map(|flavor| dir_name.strip_suffix(&format!("-{}", flavor.as_str())))
        .next()
        .unwrap_or(dir_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_csi_store::{MemoryStore, Volume};
    use tempfile::TempDir;

    fn setup(versions: &[&str]) -> (MemoryStore, PathResolver, TempDir) {
        let dir = TempDir::new().unwrap();
        let paths = PathResolver::new(dir.path());
        for version in versions {
            fs::create_dir_all(
                paths
                    .agent_binary_dir_for_version("T1", version)
                    .join("agent/conf"),
            )
            .unwrap();
        }
        (MemoryStore::new(), paths, dir)
    }

    #[test]
    fn keeps_used_and_latest() {
        let (store, paths, _dir) = setup(&["1.2.3", "1.2.4", "1.0.0"]);
        store
            .insert_volume(&Volume::new("vol-a", "p1", "1.2.3", "T1"))
            .unwrap();

        let report = sweep_binaries(&store, &paths, "T1", "1.2.4").unwrap();

        assert_eq!(report.removed.len(), 1);
        assert!(paths.agent_binary_dir_for_version("T1", "1.2.3").exists());
        assert!(paths.agent_binary_dir_for_version("T1", "1.2.4").exists());
        assert!(!paths.agent_binary_dir_for_version("T1", "1.0.0").exists());
    }

    #[test]
    fn unpinned_version_removed_on_next_sweep() {
        let (store, paths, _dir) = setup(&["1.2.3", "1.2.4"]);
        store
            .insert_volume(&Volume::new("vol-a", "p1", "1.2.3", "T1"))
            .unwrap();

        sweep_binaries(&store, &paths, "T1", "1.2.4").unwrap();
        assert!(paths.agent_binary_dir_for_version("T1", "1.2.3").exists());

        store.delete_volume("vol-a").unwrap();
        sweep_binaries(&store, &paths, "T1", "1.2.4").unwrap();
        assert!(!paths.agent_binary_dir_for_version("T1", "1.2.3").exists());
        assert!(paths.agent_binary_dir_for_version("T1", "1.2.4").exists());
    }

    #[test]
    fn flavor_siblings_follow_their_version() {
        let (store, paths, _dir) = setup(&["1.2.3", "1.2.3-musl", "1.0.0", "1.0.0-musl"]);

        sweep_binaries(&store, &paths, "T1", "1.2.3").unwrap();

        assert!(paths
            .agent_binary_dir_for_flavor("T1", "1.2.3", Flavor::Musl)
            .exists());
        assert!(!paths
            .agent_binary_dir_for_flavor("T1", "1.0.0", Flavor::Musl)
            .exists());
        assert!(!paths.agent_binary_dir_for_version("T1", "1.0.0").exists());
    }

    #[test]
    fn other_tenants_untouched() {
        let (store, paths, _dir) = setup(&["1.0.0"]);
        fs::create_dir_all(paths.agent_binary_dir_for_version("T2", "1.0.0")).unwrap();

        sweep_binaries(&store, &paths, "T1", "2.0.0").unwrap();

        assert!(paths.agent_binary_dir_for_version("T2", "1.0.0").exists());
    }

    #[test]
    fn interrupted_installs_are_removed() {
        let (store, paths, _dir) = setup(&["1.2.3"]);
        let bin = paths.agent_bin_dir("T1");
        fs::create_dir_all(bin.join(".image-1.2.4/agent")).unwrap();
        fs::create_dir_all(bin.join(".install-x1y2")).unwrap();

        let report = sweep_binaries(&store, &paths, "T1", "1.2.3").unwrap();

        assert_eq!(report.removed.len(), 2);
        assert!(!bin.join(".image-1.2.4").exists());
        assert!(!bin.join(".install-x1y2").exists());
        assert!(paths.agent_binary_dir_for_version("T1", "1.2.3").exists());
    }

    #[test]
    fn missing_bin_dir_is_empty_sweep() {
        let dir = TempDir::new().unwrap();
        let paths = PathResolver::new(dir.path());
        let report = sweep_binaries(&MemoryStore::new(), &paths, "T1", "1.2.3").unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[test]
    fn base_version_strips_known_flavors_only() {
        assert_eq!(base_version("1.2.3-musl"), "1.2.3");
        assert_eq!(base_version("1.2.3-default"), "1.2.3");
        assert_eq!(base_version("1.309.59.20250101-000000"), "1.309.59.20250101-000000");
    }
}
