//! One reconcile of one tenant.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use agent_csi_core::paths::PROC_CONF_FILE;
use agent_csi_core::{DynaKube, Flavor, PathResolver};
use agent_csi_store::{Store, StoreError, Tenant};
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::backend::AgentBackend;
use crate::cache::ProcessModuleCache;
use crate::error::{ProvisionerError, Result};
use crate::image::{image_version, ImageInstaller};
use crate::installer::{install_zip, prepare_agent_dir};
use crate::procconf::apply_to_conf_dir;
use crate::types::{ProvisionerConfig, ReconcileOutcome};

/// Materializes a tenant's latest agent and its configuration on disk.
pub struct Provisioner {
    store: Arc<dyn Store>,
    paths: PathResolver,
    config: ProvisionerConfig,
    images: Arc<dyn ImageInstaller>,
}

impl Provisioner {
    /// Create a provisioner.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        paths: PathResolver,
        config: ProvisionerConfig,
        images: Arc<dyn ImageInstaller>,
    ) -> Self {
        Self {
            store,
            paths,
            config,
            images,
        }
    }

    /// Get the provisioner config.
    #[must_use]
    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Reconcile the tenant of `dynakube` against `backend`.
    ///
    /// The tenant row's latest version is written only after the agent is
    /// completely installed, so an interrupted reconcile is redone by the
    /// next one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend, the store, the installation or the
    /// config update fails.
    #[instrument(skip_all, fields(dynakube = %dynakube.name_any()))]
    pub async fn reconcile(
        &self,
        dynakube: &DynaKube,
        backend: &dyn AgentBackend,
    ) -> Result<ReconcileOutcome> {
        let dynakube_name = dynakube.name_any();

        let info = backend.get_connection_info().await?;
        let tenant_uuid = info.tenant_uuid;
        if tenant_uuid.is_empty() {
            return Err(ProvisionerError::Backend(
                "connection info has an empty tenant UUID".to_string(),
            ));
        }

        let existing = self.store.get_tenant(&dynakube_name)?;
        if let Some(tenant) = &existing {
            if tenant.tenant_uuid != tenant_uuid {
                info!(old = %tenant.tenant_uuid, new = %tenant_uuid, "Tenant UUID changed");
                self.store.update_tenant(&Tenant::new(
                    &tenant_uuid,
                    &tenant.latest_version,
                    &dynakube_name,
                ))?;
            }
        }

        let version = match dynakube.code_modules_image() {
            Some(image) => self.install_from_image(&tenant_uuid, image).await?,
            None => {
                self.install_from_zip(&tenant_uuid, dynakube.pinned_version(), backend)
                    .await?
            }
        };

        self.record_latest_version(&Tenant::new(&tenant_uuid, &version, &dynakube_name), existing.is_some())?;

        let config_revision = self
            .update_process_module_config(&tenant_uuid, &version, dynakube.host_group(), backend)
            .await?;

        info!(tenant_uuid = %tenant_uuid, version = %version, config_revision, "Reconciled tenant");
        Ok(ReconcileOutcome {
            tenant_uuid,
            version,
            config_revision,
        })
    }

    fn record_latest_version(&self, tenant: &Tenant, exists: bool) -> Result<()> {
        if exists {
            return Ok(self.store.update_tenant(tenant)?);
        }
        match self.store.insert_tenant(tenant) {
            Err(StoreError::Conflict(_)) => Ok(self.store.update_tenant(tenant)?),
            other => Ok(other?),
        }
    }

    async fn install_from_zip(
        &self,
        tenant_uuid: &str,
        pinned_version: Option<&str>,
        backend: &dyn AgentBackend,
    ) -> Result<String> {
        let version = match pinned_version {
            Some(version) => version.to_string(),
            None => backend.get_latest_agent_version(Flavor::Default).await?,
        };
        if version.is_empty() {
            return Err(ProvisionerError::Backend("backend returned an empty version".to_string()));
        }

        for &flavor in &self.config.flavors {
            let target = self
                .paths
                .agent_binary_dir_for_flavor(tenant_uuid, &version, flavor);
            install_zip(backend, flavor, pinned_version, &target).await?;
        }
        Ok(version)
    }

    async fn install_from_image(&self, tenant_uuid: &str, image: &str) -> Result<String> {
        let version = image_version(image)?;
        let target = self.paths.agent_binary_dir_for_version(tenant_uuid, &version);
        if target.exists() {
            debug!(path = %target.display(), "Agent image already installed");
            return Ok(version);
        }

        let staging = self
            .paths
            .agent_bin_dir(tenant_uuid)
            .join(format!(".image-{version}"));
        remove_dir_if_exists(&staging)?;
        fs::create_dir_all(&staging)?;

        let installed = match self.images.install_image(image, &staging).await {
            Ok(()) => prepare_agent_dir(&staging),
            Err(e) => Err(e),
        };
        if let Err(e) = installed {
            remove_dir_if_exists(&staging)?;
            return Err(e);
        }

        fs::rename(&staging, &target)?;
        info!(image, path = %target.display(), "Installed agent from image");
        Ok(version)
    }

    async fn update_process_module_config(
        &self,
        tenant_uuid: &str,
        version: &str,
        host_group: Option<&str>,
        backend: &dyn AgentBackend,
    ) -> Result<u64> {
        let cache_path = self.paths.process_module_cache(tenant_uuid);
        let mut cache = ProcessModuleCache::load(&cache_path);

        match backend.get_process_module_config(cache.revision).await? {
            Some(config) => {
                info!(old = cache.revision, new = config.revision, "Process-module config changed");
                cache = ProcessModuleCache::from_config(&config);
                fs::create_dir_all(self.paths.env_dir(tenant_uuid))?;
                cache.store(&cache_path)?;
            }
            None => debug!(revision = cache.revision, "Process-module config unchanged"),
        }

        let mut config = cache.to_config();
        if let Some(host_group) = host_group {
            config.add_host_group(host_group);
        }
        let map = config.to_map();

        for flavor in Flavor::ALL {
            let conf_dir = self.paths.agent_conf_dir(tenant_uuid, version, flavor);
            if conf_dir.join(PROC_CONF_FILE).exists() {
                apply_to_conf_dir(&conf_dir, &map)?;
            }
        }
        Ok(cache.revision)
    }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
