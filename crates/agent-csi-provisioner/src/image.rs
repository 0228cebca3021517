//! Installation of agents from code-modules images.

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::error::{ProvisionerError, Result};
use crate::job::{build_job, BACKOFF_LIMIT};
use crate::types::ProvisionerConfig;

/// Derive the agent version directory name from an image reference.
///
/// The version is the digest (with `:` replaced by `-`) when the reference
/// has one, its tag otherwise.
///
/// # Errors
///
/// Returns `ProvisionerError::Config` if the image has neither.
pub fn image_version(image: &str) -> Result<String> {
    if let Some((_, digest)) = image.split_once('@') {
        if !digest.is_empty() {
            return Ok(digest.replace(':', "-"));
        }
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    match last_segment.split_once(':') {
        Some((_, tag)) if !tag.is_empty() => Ok(tag.to_string()),
        _ => Err(ProvisionerError::Config(format!(
            "image '{image}' has neither a tag nor a digest"
        ))),
    }
}

/// Installs an agent tree from a code-modules image.
#[async_trait]
pub trait ImageInstaller: Send + Sync {
    /// Copy `image`'s agent tree into `target_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails or does not finish in time.
    async fn install_image(&self, image: &str, target_dir: &Path) -> Result<()>;
}

/// `ImageInstaller` running a bootstrapper job on this node.
///
/// The data directory must be mounted at the same path on the host and in
/// the daemon's container, since the job mounts `target_dir` from the host.
pub struct JobImageInstaller {
    client: Client,
    config: ProvisionerConfig,
}

impl JobImageInstaller {
    /// Create an installer running jobs in `config.namespace` on
    /// `config.node_name`.
    #[must_use]
    pub fn new(client: Client, config: ProvisionerConfig) -> Self {
        Self { client, config }
    }

    fn jobs_api(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    async fn wait_for_job(&self, api: &Api<Job>, name: &str) -> Result<()> {
        loop {
            if let Some(job) = api.get_opt(name).await? {
                let status = job.status.unwrap_or_default();
                if status.succeeded.unwrap_or(0) >= 1 {
                    return Ok(());
                }
                let failed = status.failed.unwrap_or(0);
                if failed > BACKOFF_LIMIT {
                    return Err(ProvisionerError::Install(format!(
                        "bootstrapper job {name} failed {failed} times"
                    )));
                }
                debug!(job = %name, failed, "Waiting for bootstrapper job");
            } else {
                return Err(ProvisionerError::Install(format!(
                    "bootstrapper job {name} disappeared"
                )));
            }
            tokio::time::sleep(self.config.job_poll_interval).await;
        }
    }
}

#[async_trait]
impl ImageInstaller for JobImageInstaller {
    async fn install_image(&self, image: &str, target_dir: &Path) -> Result<()> {
        let job = build_job(
            image,
            target_dir,
            &self.config.namespace,
            &self.config.node_name,
        );
        let name = job.metadata.name.clone().unwrap_or_default();
        let api = self.jobs_api();

        match api.create(&PostParams::default(), &job).await {
            Ok(_) => info!(job = %name, image, "Created bootstrapper job"),
            Err(kube::Error::Api(err)) if err.code == 409 => {
                info!(job = %name, "Bootstrapper job already exists, waiting for it");
            }
            Err(e) => return Err(e.into()),
        }

        let outcome =
            match tokio::time::timeout(self.config.job_timeout, self.wait_for_job(&api, &name)).await
            {
                Ok(result) => result,
                Err(_) => Err(ProvisionerError::Install(format!(
                    "bootstrapper job {name} timed out after {:?}",
                    self.config.job_timeout
                ))),
            };

        match api.delete(&name, &DeleteParams::background()).await {
            Ok(_) => debug!(job = %name, "Deleted bootstrapper job"),
            Err(kube::Error::Api(err)) if err.code == 404 => {}
            Err(e) => warn!(job = %name, error = %e, "Failed to delete bootstrapper job"),
        }

        outcome
    }
}

/// Mock image installer for testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::fs;
    use std::path::{Path, PathBuf};

    use agent_csi_core::paths::{AGENT_CONF_SUBDIR, PROC_CONF_FILE};
    use parking_lot::Mutex;

    use super::{async_trait, ImageInstaller, ProvisionerError, Result};

    /// An installer that writes a minimal agent tree.
    #[derive(Default)]
    pub struct MockImageInstaller {
        installs: Mutex<Vec<(String, PathBuf)>>,
        fail: Mutex<bool>,
    }

    impl MockImageInstaller {
        /// Create a new mock installer.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every install fail.
        pub fn set_fail(&self, fail: bool) {
            *self.fail.lock() = fail;
        }

        /// Every `(image, target_dir)` installed so far.
        #[must_use]
        pub fn installs(&self) -> Vec<(String, PathBuf)> {
            self.installs.lock().clone()
        }
    }

    #[async_trait]
    impl ImageInstaller for MockImageInstaller {
        async fn install_image(&self, image: &str, target_dir: &Path) -> Result<()> {
            if *self.fail.lock() {
                return Err(ProvisionerError::Install("bootstrapper failed".to_string()));
            }
            self.installs
                .lock()
                .push((image.to_string(), target_dir.to_path_buf()));

            let conf_dir = target_dir.join(AGENT_CONF_SUBDIR);
            fs::create_dir_all(&conf_dir)?;
            fs::write(conf_dir.join(PROC_CONF_FILE), "[general]\n")?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_from_tag() {
        assert_eq!(image_version("registry.io/dt/codemodules:1.2.3").unwrap(), "1.2.3");
        assert_eq!(image_version("registry.io:5000/codemodules:1.2.3").unwrap(), "1.2.3");
    }

    #[test]
    fn version_from_digest() {
        assert_eq!(
            image_version("registry.io/codemodules@sha256:abcd").unwrap(),
            "sha256-abcd"
        );
        assert_eq!(
            image_version("registry.io/codemodules:1.2.3@sha256:abcd").unwrap(),
            "sha256-abcd"
        );
    }

    #[test]
    fn version_requires_tag_or_digest() {
        assert!(image_version("registry.io:5000/codemodules").is_err());
        assert!(image_version("codemodules:").is_err());
    }
}
