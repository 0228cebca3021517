//! Removal of stale per-volume log and overlay trees.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use agent_csi_core::PathResolver;
use agent_csi_store::Store;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::{GcConfig, SweepReport};

/// Running totals checked against the sweep's safety caps.
#[derive(Debug, Default)]
struct Budget {
    files: u64,
    log_bytes: u64,
}

impl Budget {
    fn exhausted(&self, config: &GcConfig) -> bool {
        self.files >= config.max_files_per_sweep
            || self.log_bytes >= config.max_log_bytes_per_sweep
    }
}

/// Remove `run/<volume_id>` trees that no volume row references and whose
/// `var/` directory was last modified more than `max_volume_age` before
/// `now`.
///
/// The sweep stops once it has processed `max_files_per_sweep` files or
/// measured `max_log_bytes_per_sweep` bytes of logs; the rest is left for
/// the next sweep.
///
/// # Errors
///
/// Returns an error if the referenced volumes cannot be read from the store
/// or the `run/` directory cannot be listed.
pub fn sweep_logs(
    store: &dyn Store,
    paths: &PathResolver,
    tenant_uuid: &str,
    config: &GcConfig,
    now: SystemTime,
) -> Result<SweepReport> {
    let referenced: BTreeSet<String> = store.list_volume_pods()?.into_keys().collect();

    let run_dir = paths.agent_run_dir(tenant_uuid);
    let entries = match fs::read_dir(&run_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SweepReport::default()),
        Err(e) => return Err(e.into()),
    };

    let mut report = SweepReport::default();
    let mut budget = Budget::default();

    for entry in entries {
        if budget.exhausted(config) {
            info!(
                tenant_uuid,
                files = budget.files,
                log_bytes = budget.log_bytes,
                "Log sweep reached its limit, deferring the rest"
            );
            report.capped = true;
            break;
        }

        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let volume_id = entry.file_name().to_string_lossy().into_owned();
        if referenced.contains(&volume_id) {
            continue;
        }

        let var_dir = paths.overlay_var_dir(tenant_uuid, &volume_id);
        let modified = fs::metadata(&var_dir)
            .or_else(|_| entry.metadata())
            .and_then(|m| m.modified())?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= config.max_volume_age {
            debug!(tenant_uuid, volume_id = %volume_id, age_secs = age.as_secs(), "Volume tree too recent to remove");
            continue;
        }

        let volume_dir = entry.path();
        measure(&volume_dir, &var_dir.join("log"), &mut budget);

        match fs::remove_dir_all(&volume_dir) {
            Ok(()) => {
                info!(tenant_uuid, volume_id = %volume_id, "Removed stale volume tree");
                report.removed.push(volume_dir);
            }
            Err(e) => {
                warn!(tenant_uuid, volume_id = %volume_id, error = %e, "Failed to remove volume tree");
                report.failed.push(volume_dir);
            }
        }
    }

    Ok(report)
}

/// Count the files under `dir` and the bytes of those under `log_dir`.
fn measure(dir: &Path, log_dir: &Path, budget: &mut Budget) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_dir() {
            measure(&path, log_dir, budget);
        } else {
            budget.files += 1;
            if path.starts_with(log_dir) {
                budget.log_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
    }
}
