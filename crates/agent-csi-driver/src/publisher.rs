//! Resolution of a pod's volume to agent bind mounts.
//!
//! A publish maps the pod's namespace to its `DynaKube`, the `DynaKube` to
//! the tenant and its latest agent version, and binds the agent plus the
//! per-pod writable directories onto the target path:
//!
//! ```text
//! bin/<version>                            -> <target>               (ro)
//! bin/<version>/agent/conf                 -> <target>/agent/conf    (rw)
//! run/<volume>/var/log/<pod_uid>           -> <target>/log           (rw)
//! run/<volume>/var/datastorage/<pod_uid>   -> <target>/datastorage   (rw)
//! ```
//!
//! Support volumes bind a single tenant-scoped directory instead.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_csi_core::dynakube::{DEFAULT_MAX_MOUNT_ATTEMPTS, DYNAKUBE_LABEL};
use agent_csi_core::{
    bind_mount, bind_unmount, BindMount, CsiError, Flavor, Mounter, PathResolver, Result,
};
use agent_csi_store::{Store, StoreError, Tenant, Volume};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn, Span};

use crate::cluster::ClusterView;

/// Version recorded for support volumes.
pub const SUPPORT_VERSION: &str = "support";

const SUPPORT_DIR_MODE: u32 = 0o750;

/// What kind of volume a pod asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeMode {
    /// The agent plus per-pod overlays.
    #[default]
    App,
    /// A single tenant-scoped read-write directory.
    Support,
}

/// A validated publish request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// Orchestrator-assigned volume handle.
    pub volume_id: String,
    /// Where the volume becomes visible to the pod.
    pub target_path: PathBuf,
    /// Namespace of the pod.
    pub namespace: String,
    /// UID of the pod.
    pub pod_uid: String,
    /// Name recorded in the volume row.
    pub pod_name: String,
    /// Agent build to bind.
    pub flavor: Flavor,
    /// Volume kind.
    pub mode: VolumeMode,
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The volume was mounted and recorded.
    Mounted(Volume),
    /// The target was already a mount point; nothing changed.
    AlreadyMounted,
    /// The mount-attempt cap was exceeded; an empty directory was provided.
    Dummy,
}

/// Settings of the publisher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Namespaces allowed to request support volumes.
    pub support_namespaces: BTreeSet<String>,
}

/// Publishes and unpublishes agent volumes.
pub struct Publisher {
    disk: VolumeDisk,
    cluster: Arc<dyn ClusterView>,
    config: PublisherConfig,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Publisher {
    /// Create a publisher.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        paths: PathResolver,
        mounter: Arc<dyn Mounter>,
        cluster: Arc<dyn ClusterView>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            disk: VolumeDisk {
                store,
                paths,
                mounter,
            },
            cluster,
            config,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Publish a volume.
    ///
    /// Publishing onto a target that is already mounted succeeds without
    /// mounting again. Mount syscalls and store writes run on the blocking
    /// thread pool.
    ///
    /// # Errors
    ///
    /// - `FailedPrecondition` if the namespace is missing, unlabeled, or not
    ///   allowed to request a support volume
    /// - `Unavailable` if the tenant or its agent is not provisioned yet
    /// - `Internal` if mounting fails; mounts made so far are rolled back
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id))]
    pub async fn publish(&self, request: &PublishRequest) -> Result<PublishOutcome> {
        let disk = self.disk.clone();
        let target = request.target_path.clone();
        if blocking(move || Ok(disk.mounter.is_mount_point(&target)?)).await? {
            info!(target = %request.target_path.display(), "Volume already mounted");
            return Ok(PublishOutcome::AlreadyMounted);
        }

        let dynakube_name = self.resolve_dynakube(&request.namespace).await?;
        if request.mode == VolumeMode::Support
            && !self.config.support_namespaces.contains(&request.namespace)
        {
            return Err(CsiError::FailedPrecondition(format!(
                "namespace {} may not request support volumes",
                request.namespace
            )));
        }

        let max_attempts = self
            .cluster
            .dynakube(&dynakube_name)
            .await?
            .map_or(DEFAULT_MAX_MOUNT_ATTEMPTS, |dk| dk.max_mount_attempts());
        if !self.register_attempt(&request.volume_id, max_attempts) {
            info!(
                pod = %request.pod_name,
                max_attempts,
                "Reached max mount attempts, providing empty volume without agent"
            );
            let target = request.target_path.clone();
            blocking(move || Ok(fs::create_dir_all(&target)?)).await?;
            return Ok(PublishOutcome::Dummy);
        }

        let disk = self.disk.clone();
        let owned = request.clone();
        let name = dynakube_name.clone();
        let volume = blocking(move || {
            let tenant = disk.store.get_tenant(&name)?.ok_or_else(|| {
                CsiError::Unavailable(format!("tenant for dynakube {name} is not provisioned yet"))
            })?;
            match owned.mode {
                VolumeMode::App => disk.publish_app(&owned, &tenant),
                VolumeMode::Support => disk.publish_support(&owned, &tenant),
            }
        })
        .await?;
        self.attempts.lock().remove(&request.volume_id);

        info!(
            dynakube = %dynakube_name,
            tenant_uuid = %volume.tenant_uuid,
            version = %volume.version,
            pod = %volume.pod_name,
            "Volume published"
        );
        Ok(PublishOutcome::Mounted(volume))
    }

    /// Unpublish a volume.
    ///
    /// Targets that are missing or not mounted are skipped, so repeated
    /// calls succeed.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if an unmount or the target removal fails, or a
    /// store error if the row cannot be deleted.
    #[instrument(skip(self, target_path), fields(target = %target_path.display()))]
    pub async fn unpublish(&self, volume_id: &str, target_path: &Path) -> Result<()> {
        let disk = self.disk.clone();
        let id = volume_id.to_string();
        let target = target_path.to_path_buf();
        blocking(move || disk.unpublish(&id, &target)).await?;
        self.attempts.lock().remove(volume_id);

        info!("Volume unpublished");
        Ok(())
    }

    /// Count a publish attempt; `false` once the cap is exceeded.
    fn register_attempt(&self, volume_id: &str, max_attempts: u32) -> bool {
        let mut attempts = self.attempts.lock();
        let count = attempts.entry(volume_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        debug!(attempt = *count, max_attempts, "Mount attempt");
        *count <= max_attempts
    }

    async fn resolve_dynakube(&self, namespace: &str) -> Result<String> {
        let labels: BTreeMap<String, String> =
            self.cluster.namespace_labels(namespace).await?.ok_or_else(|| {
                CsiError::FailedPrecondition(format!("namespace {namespace} not found"))
            })?;
        labels
            .get(DYNAKUBE_LABEL)
            .filter(|name| !name.is_empty())
            .cloned()
            .ok_or_else(|| {
                CsiError::FailedPrecondition(format!(
                    "namespace {namespace} has no {DYNAKUBE_LABEL} label"
                ))
            })
    }
}

/// Run `work` on the blocking pool inside the caller's span.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let span = Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(work))
        .await
        .map_err(|e| CsiError::Internal(format!("volume task failed: {e}")))?
}

/// The synchronous half of the publisher.
#[derive(Clone)]
struct VolumeDisk {
    store: Arc<dyn Store>,
    paths: PathResolver,
    mounter: Arc<dyn Mounter>,
}

impl VolumeDisk {
    fn publish_app(&self, request: &PublishRequest, tenant: &Tenant) -> Result<Volume> {
        let uuid = &tenant.tenant_uuid;
        let version = &tenant.latest_version;
        let volume_id = &request.volume_id;

        let binary_dir = self
            .paths
            .agent_binary_dir_for_flavor(uuid, version, request.flavor);
        if !binary_dir.is_dir() {
            return Err(CsiError::Unavailable(format!(
                "agent {version} ({}) is not installed for tenant {uuid}",
                request.flavor
            )));
        }

        let log_dir = self.paths.overlay_log_dir(uuid, volume_id, &request.pod_uid);
        let datastorage_dir = self
            .paths
            .overlay_datastorage_dir(uuid, volume_id, &request.pod_uid);
        for dir in [
            self.paths.overlay_mapped_dir(uuid, volume_id),
            self.paths.overlay_work_dir(uuid, volume_id),
            log_dir.clone(),
            datastorage_dir.clone(),
        ] {
            fs::create_dir_all(&dir)?;
        }

        let target = &request.target_path;
        let mounts = [
            BindMount::ro(&binary_dir, target),
            BindMount::rw(
                self.paths.agent_conf_dir(uuid, version, request.flavor),
                PathResolver::target_conf_dir(target),
            ),
            BindMount::rw(log_dir, PathResolver::target_log_dir(target)),
            BindMount::rw(datastorage_dir, PathResolver::target_datastorage_dir(target)),
        ];
        if let Err(e) = bind_mount(self.mounter.as_ref(), target, &mounts) {
            self.remove_volume_tree(uuid, volume_id);
            return Err(e.into());
        }

        let volume = Volume::new(volume_id, &request.pod_name, version, uuid);
        if let Err(e) = self.record(&volume) {
            self.rollback(target);
            self.remove_volume_tree(uuid, volume_id);
            return Err(e);
        }
        Ok(volume)
    }

    fn publish_support(&self, request: &PublishRequest, tenant: &Tenant) -> Result<Volume> {
        let uuid = &tenant.tenant_uuid;
        let support_dir = self.paths.support_dir(uuid);
        DirBuilder::new()
            .recursive(true)
            .mode(SUPPORT_DIR_MODE)
            .create(&support_dir)?;

        let target = &request.target_path;
        bind_mount(
            self.mounter.as_ref(),
            target,
            &[BindMount::rw(&support_dir, target)],
        )?;

        let volume = Volume::new(&request.volume_id, &request.pod_name, SUPPORT_VERSION, uuid);
        if let Err(e) = self.record(&volume) {
            self.rollback(target);
            return Err(e);
        }
        Ok(volume)
    }

    fn unpublish(&self, volume_id: &str, target_path: &Path) -> Result<()> {
        bind_unmount(self.mounter.as_ref(), &unmount_targets(target_path))?;

        match fs::remove_dir_all(target_path) {
            Ok(()) => debug!("Removed target directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.store.delete_volume(volume_id)?;
        Ok(())
    }

    /// Insert the volume row, replacing a row left behind by a crash.
    fn record(&self, volume: &Volume) -> Result<()> {
        match self.store.insert_volume(volume) {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict(_)) => {
                warn!(volume_id = %volume.volume_id, "Replacing stale volume row");
                self.store.delete_volume(&volume.volume_id)?;
                self.store.insert_volume(volume).map_err(Into::into)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn rollback(&self, target: &Path) {
        if let Err(e) = bind_unmount(self.mounter.as_ref(), &unmount_targets(target)) {
            warn!(target = %target.display(), error = %e, "Rollback unmount failed");
            return;
        }
        if let Err(e) = fs::remove_dir_all(target) {
            warn!(target = %target.display(), error = %e, "Failed to remove target directory");
        }
    }

    fn remove_volume_tree(&self, tenant_uuid: &str, volume_id: &str) {
        let dir = self.paths.agent_run_dir_for_volume(tenant_uuid, volume_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove volume directory"),
        }
    }
}

/// Mount targets of a volume in unmount order.
fn unmount_targets(target: &Path) -> [PathBuf; 4] {
    [
        PathResolver::target_datastorage_dir(target),
        PathResolver::target_log_dir(target),
        PathResolver::target_conf_dir(target),
        target.to_path_buf(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockClusterView;
    use agent_csi_core::dynakube::MAX_MOUNT_ATTEMPTS_ANNOTATION;
    use agent_csi_core::FakeMounter;
    use agent_csi_store::MemoryStore;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: Arc<MemoryStore>,
        mounter: Arc<FakeMounter>,
        cluster: Arc<MockClusterView>,
        publisher: Publisher,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(MemoryStore::new());
            let mounter = Arc::new(FakeMounter::new());
            let cluster = Arc::new(MockClusterView::new());
            cluster.add_namespace("ns1", &[(DYNAKUBE_LABEL, "dk")]);
            cluster.add_namespace("ns2", &[]);
            cluster.add_namespace("ops", &[(DYNAKUBE_LABEL, "dk")]);
            cluster.add_dynakube("dk", &[(MAX_MOUNT_ATTEMPTS_ANNOTATION, "2")]);

            let publisher = Publisher::new(
                store.clone(),
                PathResolver::new(dir.path().join("data")),
                mounter.clone(),
                cluster.clone(),
                PublisherConfig {
                    support_namespaces: BTreeSet::from(["ops".to_string()]),
                },
            );
            Self {
                dir,
                store,
                mounter,
                cluster,
                publisher,
            }
        }

        fn paths(&self) -> PathResolver {
            PathResolver::new(self.dir.path().join("data"))
        }

        fn provision(&self, flavor: Flavor) {
            self.store.insert_tenant(&Tenant::new("T1", "1.2.3", "dk")).unwrap();
            let bin = self.paths().agent_binary_dir_for_flavor("T1", "1.2.3", flavor);
            fs::create_dir_all(bin.join("agent/conf")).unwrap();
        }

        fn request(&self, volume_id: &str, namespace: &str) -> PublishRequest {
            PublishRequest {
                volume_id: volume_id.to_string(),
                target_path: self.dir.path().join("pods").join(volume_id),
                namespace: namespace.to_string(),
                pod_uid: "p1".to_string(),
                pod_name: "p1".to_string(),
                flavor: Flavor::Default,
                mode: VolumeMode::App,
            }
        }
    }

    /// Records the thread of every mounter call.
    struct ThreadRecordingMounter {
        inner: FakeMounter,
        threads: Mutex<Vec<std::thread::ThreadId>>,
    }

    impl ThreadRecordingMounter {
        fn record(&self) {
            self.threads.lock().push(std::thread::current().id());
        }
    }

    impl Mounter for ThreadRecordingMounter {
        fn bind(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()> {
            self.record();
            self.inner.bind(source, target, read_only)
        }

        fn unmount(&self, target: &Path) -> io::Result<()> {
            self.record();
            self.inner.unmount(target)
        }

        fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
            self.record();
            self.inner.is_mount_point(path)
        }
    }

    #[tokio::test]
    async fn mount_calls_leave_the_runtime_thread() {
        let fx = Fixture::new();
        fx.provision(Flavor::Default);
        let mounter = Arc::new(ThreadRecordingMounter {
            inner: FakeMounter::new(),
            threads: Mutex::new(Vec::new()),
        });
        let publisher = Publisher::new(
            fx.store.clone(),
            fx.paths(),
            mounter.clone(),
            fx.cluster.clone(),
            PublisherConfig::default(),
        );
        let request = fx.request("vol-a", "ns1");

        publisher.publish(&request).await.unwrap();
        publisher.unpublish("vol-a", &request.target_path).await.unwrap();

        let runtime_thread = std::thread::current().id();
        let threads = mounter.threads.lock();
        assert!(threads.len() >= 9);
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test]
    async fn publish_binds_agent_and_overlays() {
        let fx = Fixture::new();
        fx.provision(Flavor::Default);
        let request = fx.request("vol-a", "ns1");

        let outcome = fx.publisher.publish(&request).await.unwrap();

        assert_eq!(
            outcome,
            PublishOutcome::Mounted(Volume::new("vol-a", "p1", "1.2.3", "T1"))
        );
        let mounts = fx.mounter.mounts();
        assert_eq!(mounts.len(), 4);
        assert!(mounts[0].read_only);
        assert_eq!(mounts[0].target, request.target_path);
        assert!(mounts[1..].iter().all(|m| !m.read_only));
        assert!(fx.paths().overlay_log_dir("T1", "vol-a", "p1").is_dir());
        assert!(fx.paths().overlay_datastorage_dir("T1", "vol-a", "p1").is_dir());
        assert!(fx.store.get_volume("vol-a").unwrap().is_some());
    }

    #[tokio::test]
    async fn publish_is_idempotent_for_mounted_target() {
        let fx = Fixture::new();
        fx.provision(Flavor::Default);
        let request = fx.request("vol-a", "ns1");

        fx.publisher.publish(&request).await.unwrap();
        let second = fx.publisher.publish(&request).await.unwrap();

        assert_eq!(second, PublishOutcome::AlreadyMounted);
        assert_eq!(fx.mounter.mounts().len(), 4);
        assert_eq!(fx.store.volume_count(), 1);
    }

    #[tokio::test]
    async fn missing_namespace_or_label_is_failed_precondition() {
        let fx = Fixture::new();
        fx.provision(Flavor::Default);

        for namespace in ["ns2", "absent"] {
            let err = fx
                .publisher
                .publish(&fx.request("vol-a", namespace))
                .await
                .unwrap_err();
            assert!(matches!(err, CsiError::FailedPrecondition(_)), "{err}");
        }
        assert!(fx.mounter.mounts().is_empty());
        assert_eq!(fx.store.volume_count(), 0);
    }

    #[tokio::test]
    async fn unprovisioned_tenant_is_unavailable() {
        let fx = Fixture::new();

        let err = fx.publisher.publish(&fx.request("vol-a", "ns1")).await.unwrap_err();

        assert!(matches!(err, CsiError::Unavailable(_)));
    }

    #[tokio::test]
    async fn missing_flavor_is_unavailable() {
        let fx = Fixture::new();
        fx.provision(Flavor::Default);
        let mut request = fx.request("vol-a", "ns1");
        request.flavor = Flavor::Musl;

        let err = fx.publisher.publish(&request).await.unwrap_err();
        assert!(matches!(err, CsiError::Unavailable(_)));

        fs::create_dir_all(fx.paths().agent_binary_dir_for_flavor("T1", "1.2.3", Flavor::Musl))
            .unwrap();
        fx.publisher.publish(&request).await.unwrap();
        assert_eq!(
            fx.mounter.mounts()[0].source,
            fx.paths().agent_binary_dir_for_flavor("T1", "1.2.3", Flavor::Musl)
        );
    }

    #[tokio::test]
    async fn failed_mount_rolls_back_everything() {
        let fx = Fixture::new();
        fx.provision(Flavor::Default);
        let request = fx.request("vol-a", "ns1");
        fx.mounter.fail_on(PathResolver::target_log_dir(&request.target_path));

        let err = fx.publisher.publish(&request).await.unwrap_err();

        assert!(matches!(err, CsiError::Internal(_)));
        assert!(fx.mounter.mounts().is_empty());
        assert!(!request.target_path.exists());
        assert!(!fx.paths().agent_run_dir_for_volume("T1", "vol-a").exists());
        assert_eq!(fx.store.volume_count(), 0);
    }

    #[tokio::test]
    async fn exceeding_attempts_provides_dummy_volume() {
        let fx = Fixture::new();
        let request = fx.request("vol-a", "ns1");

        // The annotation allows two attempts.
        for _ in 0..2 {
            assert!(fx.publisher.publish(&request).await.is_err());
        }
        let outcome = fx.publisher.publish(&request).await.unwrap();

        assert_eq!(outcome, PublishOutcome::Dummy);
        assert!(request.target_path.is_dir());
        assert!(fx.mounter.mounts().is_empty());
        assert_eq!(fx.store.volume_count(), 0);

        fx.publisher.unpublish("vol-a", &request.target_path).await.unwrap();
        assert!(!request.target_path.exists());
    }

    #[tokio::test]
    async fn success_resets_attempts() {
        let fx = Fixture::new();
        let request = fx.request("vol-a", "ns1");
        assert!(fx.publisher.publish(&request).await.is_err());

        fx.provision(Flavor::Default);
        fx.publisher.publish(&request).await.unwrap();
        fx.publisher.unpublish("vol-a", &request.target_path).await.unwrap();

        assert!(fx.publisher.attempts.lock().is_empty());
    }

    #[tokio::test]
    async fn default_attempt_cap_without_dynakube_object() {
        let fx = Fixture::new();
        fx.cluster.add_namespace("ns3", &[(DYNAKUBE_LABEL, "other")]);
        let request = fx.request("vol-b", "ns3");

        for _ in 0..DEFAULT_MAX_MOUNT_ATTEMPTS {
            assert!(fx.publisher.publish(&request).await.is_err());
        }
        assert_eq!(
            fx.publisher.publish(&request).await.unwrap(),
            PublishOutcome::Dummy
        );
    }

    #[tokio::test]
    async fn unpublish_twice_succeeds() {
        let fx = Fixture::new();
        fx.provision(Flavor::Default);
        let request = fx.request("vol-a", "ns1");
        fx.publisher.publish(&request).await.unwrap();

        fx.publisher.unpublish("vol-a", &request.target_path).await.unwrap();
        assert!(fx.mounter.mounts().is_empty());
        assert!(!request.target_path.exists());
        assert!(fx.store.get_volume("vol-a").unwrap().is_none());

        fx.publisher.unpublish("vol-a", &request.target_path).await.unwrap();
    }

    #[tokio::test]
    async fn failed_unmount_keeps_row_and_target() {
        let fx = Fixture::new();
        fx.provision(Flavor::Default);
        let request = fx.request("vol-a", "ns1");
        fx.publisher.publish(&request).await.unwrap();
        fx.mounter.fail_unmounts(true);

        let err = fx.publisher.unpublish("vol-a", &request.target_path).await.unwrap_err();

        assert!(matches!(err, CsiError::Internal(_)));
        assert!(request.target_path.exists());
        assert!(fx.store.get_volume("vol-a").unwrap().is_some());
    }

    #[tokio::test]
    async fn support_volume_binds_support_dir() {
        let fx = Fixture::new();
        fx.provision(Flavor::Default);
        let mut request = fx.request("vol-s", "ops");
        request.mode = VolumeMode::Support;

        let outcome = fx.publisher.publish(&request).await.unwrap();

        assert_eq!(
            outcome,
            PublishOutcome::Mounted(Volume::new("vol-s", "p1", SUPPORT_VERSION, "T1"))
        );
        let mounts = fx.mounter.mounts();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].source, fx.paths().support_dir("T1"));
        assert!(!mounts[0].read_only);

        fx.publisher.unpublish("vol-s", &request.target_path).await.unwrap();
        assert!(fx.mounter.mounts().is_empty());
    }

    #[tokio::test]
    async fn support_volume_outside_allow_list_is_rejected() {
        let fx = Fixture::new();
        fx.provision(Flavor::Default);
        let mut request = fx.request("vol-s", "ns1");
        request.mode = VolumeMode::Support;

        let err = fx.publisher.publish(&request).await.unwrap_err();

        assert!(matches!(err, CsiError::FailedPrecondition(_)));
        assert!(fx.mounter.mounts().is_empty());
    }

    #[tokio::test]
    async fn stale_row_is_replaced() {
        let fx = Fixture::new();
        fx.provision(Flavor::Default);
        fx.store
            .insert_volume(&Volume::new("vol-a", "old-pod", "1.0.0", "T1"))
            .unwrap();

        fx.publisher.publish(&fx.request("vol-a", "ns1")).await.unwrap();

        let row = fx.store.get_volume("vol-a").unwrap().unwrap();
        assert_eq!(row.version, "1.2.3");
        assert_eq!(row.pod_name, "p1");
    }
}
