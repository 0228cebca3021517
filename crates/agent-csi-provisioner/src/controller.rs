//! Watch-driven reconcile workers, one per `DynaKube`.
//!
//! Every `DynaKube` gets a mailbox and a worker task. Watch events post to
//! the mailbox; the worker reconciles, runs the tenant's garbage collection
//! and sleeps until the next event or its requeue delay. A reconcile of one
//! tenant therefore never overlaps another reconcile of the same tenant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agent_csi_core::DynaKube;
use agent_csi_gc::GarbageCollector;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::runtime::watcher::{self, watcher, Config as WatcherConfig};
use kube::{Client, ResourceExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::backend::HttpAgentBackend;
use crate::error::{ProvisionerError, Result};
use crate::provisioner::Provisioner;
use crate::types::ReconcileOutcome;

/// Secret keys holding the backend token, in order of preference.
pub const TOKEN_KEYS: [&str; 2] = ["paasToken", "apiToken"];

/// Read the backend token from a tenant's token secret.
///
/// # Errors
///
/// Returns `ProvisionerError::Config` if the secret has no usable token.
pub fn token_from_secret(secret: &Secret) -> Result<String> {
    let name = secret.name_any();
    let data = secret.data.as_ref();
    for key in TOKEN_KEYS {
        if let Some(bytes) = data.and_then(|d| d.get(key)) {
            let token = String::from_utf8(bytes.0.clone())
                .map_err(|_| ProvisionerError::Config(format!("secret {name}: {key} is not UTF-8")))?;
            let token = token.trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        }
    }
    Err(ProvisionerError::Config(format!(
        "secret {name} holds neither {} nor {}",
        TOKEN_KEYS[0], TOKEN_KEYS[1]
    )))
}

struct Worker {
    dynakubes: Api<DynaKube>,
    secrets: Api<Secret>,
    provisioner: Arc<Provisioner>,
    gc: Arc<GarbageCollector>,
}

impl Worker {
    /// Reconcile once; `None` means the `DynaKube` is gone.
    async fn reconcile(&self, name: &str) -> Result<Option<ReconcileOutcome>> {
        let Some(dynakube) = self.dynakubes.get_opt(name).await? else {
            return Ok(None);
        };

        let secret_name = dynakube.tokens_secret_name();
        let secret = self.secrets.get_opt(&secret_name).await?.ok_or_else(|| {
            ProvisionerError::Config(format!("token secret {secret_name} not found"))
        })?;
        let backend = HttpAgentBackend::new(&dynakube.spec.api_url, token_from_secret(&secret)?)?;

        let outcome = self.provisioner.reconcile(&dynakube, &backend).await?;
        Ok(Some(outcome))
    }

    async fn collect_garbage(&self, outcome: &ReconcileOutcome) {
        let gc = Arc::clone(&self.gc);
        let tenant_uuid = outcome.tenant_uuid.clone();
        let version = outcome.version.clone();
        let result =
            tokio::task::spawn_blocking(move || gc.collect_tenant(&tenant_uuid, &version)).await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(tenant_uuid = %outcome.tenant_uuid, error = %e, "Garbage collection failed"),
            Err(e) => error!(tenant_uuid = %outcome.tenant_uuid, error = %e, "Garbage collection task panicked"),
        }
    }

    async fn run(self: Arc<Self>, name: String, mut mailbox: mpsc::Receiver<()>) {
        debug!(dynakube = %name, "Starting reconcile worker");
        let config = self.provisioner.config();
        loop {
            let delay: Duration = match self.reconcile(&name).await {
                Ok(Some(outcome)) => {
                    self.collect_garbage(&outcome).await;
                    config.requeue_after
                }
                Ok(None) => {
                    info!(dynakube = %name, "DynaKube removed, stopping reconcile worker");
                    return;
                }
                Err(e) => {
                    warn!(
                        dynakube = %name,
                        error = %e,
                        retriable = e.is_retriable(),
                        "Reconcile failed, will retry"
                    );
                    config.requeue_after_error
                }
            };

            tokio::select! {
                message = mailbox.recv() => {
                    if message.is_none() {
                        return;
                    }
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Watches `DynaKube`s and drives a reconcile worker for each.
pub struct Controller {
    worker: Arc<Worker>,
}

impl Controller {
    /// Create a controller for the `DynaKube`s in the provisioner's namespace.
    #[must_use]
    pub fn new(client: Client, provisioner: Arc<Provisioner>, gc: Arc<GarbageCollector>) -> Self {
        let namespace = provisioner.config().namespace.clone();
        Self {
            worker: Arc::new(Worker {
                dynakubes: Api::namespaced(client.clone(), &namespace),
                secrets: Api::namespaced(client, &namespace),
                provisioner,
                gc,
            }),
        }
    }

    fn dispatch(&self, workers: &mut HashMap<String, mpsc::Sender<()>>, name: String) {
        if let Some(mailbox) = workers.get(&name) {
            match mailbox.try_send(()) {
                // A full mailbox already holds a pending reconcile.
                Ok(()) | Err(TrySendError::Full(())) => return,
                Err(TrySendError::Closed(())) => {}
            }
        }

        let (mailbox, inbox) = mpsc::channel(1);
        workers.insert(name.clone(), mailbox);
        tokio::spawn(Arc::clone(&self.worker).run(name, inbox));
    }

    /// Run the watch loop.
    ///
    /// This method runs indefinitely and should be spawned as a background
    /// task. Watch errors are logged and the watch reconnects.
    pub async fn run(self) {
        let mut workers = HashMap::new();
        let watch = watcher(self.worker.dynakubes.clone(), WatcherConfig::default());
        futures::pin_mut!(watch);

        info!(
            namespace = %self.worker.provisioner.config().namespace,
            "Starting DynaKube reconcile loop"
        );

        while let Some(event) = watch.next().await {
            match event {
                Ok(
                    watcher::Event::Apply(dk)
                    | watcher::Event::InitApply(dk)
                    | watcher::Event::Delete(dk),
                ) => {
                    self.dispatch(&mut workers, dk.name_any());
                }
                Ok(watcher::Event::Init) => {
                    info!("Watcher initialized, starting reconciliation");
                }
                Ok(watcher::Event::InitDone) => {
                    info!("Initial reconciliation complete");
                }
                Err(e) => {
                    error!(error = %e, "Watcher error, will retry");
                }
            }
            workers.retain(|_, mailbox| !mailbox.is_closed());
        }

        warn!("DynaKube reconcile loop exited unexpectedly");
    }
}
