//! On-disk layout of the driver's data directory.
//!
//! Every component composes its paths from [`PathResolver`] so the node
//! server, the provisioner and the garbage collector agree on the layout:
//!
//! ```text
//! <root_dir>/csi.db
//! <root_dir>/<tenant_uuid>/
//!     bin/<version>[-<flavor>]/
//!     bin/<version>/agent/conf/ruxitagentproc.conf
//!     run/<volume_id>/{mapped,var,work}/
//!     run/<volume_id>/var/{log,datastorage}/<pod_uid>/
//!     support/
//!     ruxitagentproc.conf.cache
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::CsiError;

const DB_FILE: &str = "csi.db";
const BIN_DIR: &str = "bin";
const RUN_DIR: &str = "run";
const SUPPORT_DIR: &str = "support";
const MAPPED_DIR: &str = "mapped";
const VAR_DIR: &str = "var";
const WORK_DIR: &str = "work";
const LOG_DIR: &str = "log";
const DATASTORAGE_DIR: &str = "datastorage";
const PROC_CONF_CACHE: &str = "ruxitagentproc.conf.cache";

/// Name of the process-module config file inside `agent/conf`.
pub const PROC_CONF_FILE: &str = "ruxitagentproc.conf";

/// Name of the pristine copy of the process-module config file.
pub const PRISTINE_PROC_CONF_FILE: &str = "_ruxitagentproc.conf";

/// Relative location of the group-writable config tree inside an agent.
pub const AGENT_CONF_SUBDIR: &str = "agent/conf";

/// Build flavor of an agent binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Flavor {
    /// glibc build.
    #[default]
    Default,
    /// musl libc build.
    Musl,
}

impl Flavor {
    /// All known flavors.
    pub const ALL: [Self; 2] = [Self::Default, Self::Musl];

    /// The flavor name as used by the backend API and in volume contexts.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Musl => "musl",
        }
    }

    /// Suffix appended to a version directory for this flavor.
    ///
    /// The default flavor lives directly in `bin/<version>`.
    #[must_use]
    pub fn dir_suffix(&self) -> Option<String> {
        match self {
            Self::Default => None,
            Self::Musl => Some(format!("-{}", self.as_str())),
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flavor {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "default" => Ok(Self::Default),
            "musl" => Ok(Self::Musl),
            other => Err(CsiError::InvalidArgument(format!(
                "unknown flavor '{other}', expected 'default' or 'musl'"
            ))),
        }
    }
}

/// Pure mapping from `(tenant, version, volume)` tuples to filesystem paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    root_dir: PathBuf,
}

impl PathResolver {
    /// Create a resolver rooted at `root_dir`.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// The data directory every other path lives under.
    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// The metadata database file.
    #[must_use]
    pub fn metadata_db(&self) -> PathBuf {
        self.root_dir.join(DB_FILE)
    }

    /// Per-tenant environment directory.
    #[must_use]
    pub fn env_dir(&self, tenant_uuid: &str) -> PathBuf {
        self.root_dir.join(tenant_uuid)
    }

    // =========================================================================
    // Agent binaries
    // =========================================================================

    /// Directory holding every installed version of the tenant's agent.
    #[must_use]
    pub fn agent_bin_dir(&self, tenant_uuid: &str) -> PathBuf {
        self.env_dir(tenant_uuid).join(BIN_DIR)
    }

    /// Directory of one installed agent version (default flavor).
    #[must_use]
    pub fn agent_binary_dir_for_version(&self, tenant_uuid: &str, version: &str) -> PathBuf {
        self.agent_bin_dir(tenant_uuid).join(version)
    }

    /// Directory of one installed agent version in the given flavor.
    #[must_use]
    pub fn agent_binary_dir_for_flavor(
        &self,
        tenant_uuid: &str,
        version: &str,
        flavor: Flavor,
    ) -> PathBuf {
        match flavor.dir_suffix() {
            None => self.agent_binary_dir_for_version(tenant_uuid, version),
            Some(suffix) => self
                .agent_bin_dir(tenant_uuid)
                .join(format!("{version}{suffix}")),
        }
    }

    /// The group-writable config directory of an installed agent.
    #[must_use]
    pub fn agent_conf_dir(&self, tenant_uuid: &str, version: &str, flavor: Flavor) -> PathBuf {
        self.agent_binary_dir_for_flavor(tenant_uuid, version, flavor)
            .join(AGENT_CONF_SUBDIR)
    }

    /// The live process-module config file of an installed agent.
    #[must_use]
    pub fn agent_proc_conf(&self, tenant_uuid: &str, version: &str, flavor: Flavor) -> PathBuf {
        self.agent_conf_dir(tenant_uuid, version, flavor)
            .join(PROC_CONF_FILE)
    }

    /// The pristine copy of the process-module config file.
    #[must_use]
    pub fn agent_pristine_proc_conf(
        &self,
        tenant_uuid: &str,
        version: &str,
        flavor: Flavor,
    ) -> PathBuf {
        self.agent_conf_dir(tenant_uuid, version, flavor)
            .join(PRISTINE_PROC_CONF_FILE)
    }

    /// Cache of the last process-module config revision fetched for a tenant.
    #[must_use]
    pub fn process_module_cache(&self, tenant_uuid: &str) -> PathBuf {
        self.env_dir(tenant_uuid).join(PROC_CONF_CACHE)
    }

    // =========================================================================
    // Per-volume overlays
    // =========================================================================

    /// Directory holding all per-volume trees of a tenant.
    #[must_use]
    pub fn agent_run_dir(&self, tenant_uuid: &str) -> PathBuf {
        self.env_dir(tenant_uuid).join(RUN_DIR)
    }

    /// Root of one volume's tree.
    #[must_use]
    pub fn agent_run_dir_for_volume(&self, tenant_uuid: &str, volume_id: &str) -> PathBuf {
        self.agent_run_dir(tenant_uuid).join(volume_id)
    }

    /// Upper-layer overlay root of a volume.
    #[must_use]
    pub fn overlay_mapped_dir(&self, tenant_uuid: &str, volume_id: &str) -> PathBuf {
        self.agent_run_dir_for_volume(tenant_uuid, volume_id)
            .join(MAPPED_DIR)
    }

    /// Log and datastore directory of a volume.
    #[must_use]
    pub fn overlay_var_dir(&self, tenant_uuid: &str, volume_id: &str) -> PathBuf {
        self.agent_run_dir_for_volume(tenant_uuid, volume_id)
            .join(VAR_DIR)
    }

    /// Overlay work directory of a volume.
    #[must_use]
    pub fn overlay_work_dir(&self, tenant_uuid: &str, volume_id: &str) -> PathBuf {
        self.agent_run_dir_for_volume(tenant_uuid, volume_id)
            .join(WORK_DIR)
    }

    /// Per-pod log directory inside a volume.
    #[must_use]
    pub fn overlay_log_dir(&self, tenant_uuid: &str, volume_id: &str, pod_uid: &str) -> PathBuf {
        self.overlay_var_dir(tenant_uuid, volume_id)
            .join(LOG_DIR)
            .join(pod_uid)
    }

    /// Per-pod datastore directory inside a volume.
    #[must_use]
    pub fn overlay_datastorage_dir(
        &self,
        tenant_uuid: &str,
        volume_id: &str,
        pod_uid: &str,
    ) -> PathBuf {
        self.overlay_var_dir(tenant_uuid, volume_id)
            .join(DATASTORAGE_DIR)
            .join(pod_uid)
    }

    /// Tenant-scoped directory bound into support volumes.
    #[must_use]
    pub fn support_dir(&self, tenant_uuid: &str) -> PathBuf {
        self.env_dir(tenant_uuid).join(SUPPORT_DIR)
    }

    // =========================================================================
    // Mount targets inside a pod's volume
    // =========================================================================

    /// Where the agent config directory is bound inside the target.
    #[must_use]
    pub fn target_conf_dir(target_path: &Path) -> PathBuf {
        target_path.join(AGENT_CONF_SUBDIR)
    }

    /// Where the per-pod log directory is bound inside the target.
    #[must_use]
    pub fn target_log_dir(target_path: &Path) -> PathBuf {
        target_path.join(LOG_DIR)
    }

    /// Where the per-pod datastore directory is bound inside the target.
    #[must_use]
    pub fn target_datastorage_dir(target_path: &Path) -> PathBuf {
        target_path.join(DATASTORAGE_DIR)
    }

    /// Mount-point directories that must exist inside every agent tree so
    /// the writable overlays can be bound over a read-only agent.
    #[must_use]
    pub fn overlay_mount_points(binary_dir: &Path) -> [PathBuf; 2] {
        [binary_dir.join(LOG_DIR), binary_dir.join(DATASTORAGE_DIR)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new("/data")
    }

    #[test]
    fn binary_dir_is_env_dir_bin_version() {
        let paths = resolver();
        for (tenant, version) in [("t1", "1.2.3"), ("abc", "1.309.59.20250101-000000")] {
            assert_eq!(
                paths.agent_binary_dir_for_version(tenant, version),
                paths.env_dir(tenant).join("bin").join(version)
            );
        }
    }

    #[test]
    fn flavor_dirs_are_siblings() {
        let paths = resolver();
        assert_eq!(
            paths.agent_binary_dir_for_flavor("t1", "1.2.3", Flavor::Default),
            PathBuf::from("/data/t1/bin/1.2.3")
        );
        assert_eq!(
            paths.agent_binary_dir_for_flavor("t1", "1.2.3", Flavor::Musl),
            PathBuf::from("/data/t1/bin/1.2.3-musl")
        );
    }

    #[test]
    fn volume_layout() {
        let paths = resolver();
        assert_eq!(
            paths.overlay_log_dir("t1", "vol-a", "p1"),
            PathBuf::from("/data/t1/run/vol-a/var/log/p1")
        );
        assert_eq!(
            paths.overlay_datastorage_dir("t1", "vol-a", "p1"),
            PathBuf::from("/data/t1/run/vol-a/var/datastorage/p1")
        );
        assert_eq!(
            paths.overlay_work_dir("t1", "vol-a"),
            PathBuf::from("/data/t1/run/vol-a/work")
        );
        assert_eq!(
            paths.overlay_mapped_dir("t1", "vol-a"),
            PathBuf::from("/data/t1/run/vol-a/mapped")
        );
    }

    #[test]
    fn config_files() {
        let paths = resolver();
        assert_eq!(
            paths.agent_proc_conf("t1", "1.2.3", Flavor::Default),
            PathBuf::from("/data/t1/bin/1.2.3/agent/conf/ruxitagentproc.conf")
        );
        assert_eq!(
            paths.agent_pristine_proc_conf("t1", "1.2.3", Flavor::Default),
            PathBuf::from("/data/t1/bin/1.2.3/agent/conf/_ruxitagentproc.conf")
        );
        assert_eq!(
            paths.process_module_cache("t1"),
            PathBuf::from("/data/t1/ruxitagentproc.conf.cache")
        );
        assert_eq!(paths.metadata_db(), PathBuf::from("/data/csi.db"));
    }

    #[test]
    fn target_paths() {
        let target = Path::new("/t/a");
        assert_eq!(
            PathResolver::target_conf_dir(target),
            PathBuf::from("/t/a/agent/conf")
        );
        assert_eq!(PathResolver::target_log_dir(target), PathBuf::from("/t/a/log"));
        assert_eq!(
            PathResolver::target_datastorage_dir(target),
            PathBuf::from("/t/a/datastorage")
        );
    }

    #[test]
    fn flavor_parsing() {
        assert_eq!("".parse::<Flavor>().unwrap(), Flavor::Default);
        assert_eq!("default".parse::<Flavor>().unwrap(), Flavor::Default);
        assert_eq!("musl".parse::<Flavor>().unwrap(), Flavor::Musl);
        assert!(matches!(
            "arm".parse::<Flavor>(),
            Err(CsiError::InvalidArgument(_))
        ));
    }
}
