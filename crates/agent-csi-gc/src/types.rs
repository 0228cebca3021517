//! Configuration and reports for the garbage collector.

use std::path::PathBuf;
use std::time::Duration;

/// Limits applied by the sweeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Unreferenced volume trees whose `var/` is older than this are removed.
    pub max_volume_age: Duration,
    /// A log sweep stops after processing this many files.
    pub max_files_per_sweep: u64,
    /// A log sweep stops after measuring this many bytes of log content.
    pub max_log_bytes_per_sweep: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_volume_age: Duration::from_secs(14 * 24 * 60 * 60),
            max_files_per_sweep: 1000,
            max_log_bytes_per_sweep: 300 * 1024,
        }
    }
}

/// Outcome of one filesystem sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Directories that were removed.
    pub removed: Vec<PathBuf>,
    /// Directories whose removal failed; the next sweep retries them.
    pub failed: Vec<PathBuf>,
    /// Whether the sweep stopped early because a safety cap was hit.
    pub capped: bool,
}

/// Outcome of one metadata correctness sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataReport {
    /// Volume rows deleted because their pod is gone.
    pub deleted_volumes: Vec<String>,
    /// Tenant UUIDs deleted because their `DynaKube` is gone.
    pub deleted_tenants: Vec<String>,
}
