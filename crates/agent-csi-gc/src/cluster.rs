//! What the cluster currently knows about, for the metadata sweep.

use std::collections::BTreeSet;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use agent_csi_core::DynaKube;

use crate::error::Result;

/// Read-only view of the cluster objects metadata rows refer to.
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Names and UIDs of the pods scheduled on this node.
    ///
    /// # Errors
    ///
    /// Returns an error if the pods cannot be listed.
    async fn live_pods(&self) -> Result<BTreeSet<String>>;

    /// Names of the `DynaKube` resources that exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the resources cannot be listed.
    async fn live_dynakubes(&self) -> Result<BTreeSet<String>>;
}

/// `ClusterState` backed by the Kubernetes API.
pub struct KubeClusterState {
    client: Client,
    namespace: String,
    node_name: String,
}

impl KubeClusterState {
    /// Create a view of `node_name`'s pods and the `DynaKube`s in `namespace`.
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            node_name: node_name.into(),
        }
    }
}

#[async_trait]
impl ClusterState for KubeClusterState {
    async fn live_pods(&self) -> Result<BTreeSet<String>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", self.node_name));
        let list = pods.list(&params).await?;

        let mut live = BTreeSet::new();
        for pod in list {
            if let Some(uid) = pod.uid() {
                live.insert(uid);
            }
            live.insert(pod.name_any());
        }
        debug!(node = %self.node_name, count = live.len(), "Listed live pods");
        Ok(live)
    }

    async fn live_dynakubes(&self) -> Result<BTreeSet<String>> {
        let dynakubes: Api<DynaKube> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = dynakubes.list(&ListParams::default()).await?;
        Ok(list.iter().map(ResourceExt::name_any).collect())
    }
}

/// Mock cluster state for testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::{async_trait, BTreeSet, ClusterState, Result};
    use parking_lot::Mutex;

    /// A `ClusterState` whose contents the test controls.
    #[derive(Default)]
    pub struct MockClusterState {
        pods: Mutex<BTreeSet<String>>,
        dynakubes: Mutex<BTreeSet<String>>,
    }

    impl MockClusterState {
        /// Create an empty cluster.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a live pod.
        pub fn add_pod(&self, name: &str) {
            self.pods.lock().insert(name.to_string());
        }

        /// Add a live `DynaKube`.
        pub fn add_dynakube(&self, name: &str) {
            self.dynakubes.lock().insert(name.to_string());
        }

        /// Remove a `DynaKube`.
        pub fn remove_dynakube(&self, name: &str) {
            self.dynakubes.lock().remove(name);
        }
    }

    #[async_trait]
    impl ClusterState for MockClusterState {
        async fn live_pods(&self) -> Result<BTreeSet<String>> {
            Ok(self.pods.lock().clone())
        }

        async fn live_dynakubes(&self) -> Result<BTreeSet<String>> {
            Ok(self.dynakubes.lock().clone())
        }
    }
}
