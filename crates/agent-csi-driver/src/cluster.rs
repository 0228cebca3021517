//! Cluster lookups made while publishing a volume.

use std::collections::BTreeMap;

use agent_csi_core::{CsiError, DynaKube, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::Api;
use kube::{Client, ResourceExt};

/// Read-only view of the objects a publish depends on.
#[async_trait]
pub trait ClusterView: Send + Sync {
    /// Labels of a namespace, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `CsiError::Unavailable` if the API server cannot be reached.
    async fn namespace_labels(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>>;

    /// A `DynaKube` by name, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `CsiError::Unavailable` if the API server cannot be reached.
    async fn dynakube(&self, name: &str) -> Result<Option<DynaKube>>;
}

/// `ClusterView` backed by the Kubernetes API.
pub struct KubeClusterView {
    namespaces: Api<Namespace>,
    dynakubes: Api<DynaKube>,
}

impl KubeClusterView {
    /// Create a view reading `DynaKube`s from `namespace`.
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            namespaces: Api::all(client.clone()),
            dynakubes: Api::namespaced(client, namespace),
        }
    }
}

fn unavailable(err: &kube::Error) -> CsiError {
    CsiError::Unavailable(format!("kubernetes API: {err}"))
}

#[async_trait]
impl ClusterView for KubeClusterView {
    async fn namespace_labels(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>> {
        let found = self
            .namespaces
            .get_opt(namespace)
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(found.map(|ns| ns.labels().clone()))
    }

    async fn dynakube(&self, name: &str) -> Result<Option<DynaKube>> {
        self.dynakubes.get_opt(name).await.map_err(|e| unavailable(&e))
    }
}

/// Mock cluster view for testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::{BTreeMap, HashMap};

    use agent_csi_core::{DynaKube, DynaKubeSpec};
    use kube::api::ObjectMeta;
    use parking_lot::Mutex;

    use super::{async_trait, ClusterView, Result};

    /// A `ClusterView` whose contents the test controls.
    #[derive(Default)]
    pub struct MockClusterView {
        namespaces: Mutex<HashMap<String, BTreeMap<String, String>>>,
        dynakubes: Mutex<HashMap<String, DynaKube>>,
    }

    impl MockClusterView {
        /// Create an empty cluster.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a namespace with the given labels.
        pub fn add_namespace(&self, name: &str, labels: &[(&str, &str)]) {
            let labels = labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect();
            self.namespaces.lock().insert(name.to_string(), labels);
        }

        /// Add a `DynaKube` with the given annotations.
        pub fn add_dynakube(&self, name: &str, annotations: &[(&str, &str)]) {
            let mut dynakube = DynaKube::new(name, DynaKubeSpec::default());
            dynakube.metadata = ObjectMeta {
                name: Some(name.to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            };
            self.dynakubes.lock().insert(name.to_string(), dynakube);
        }
    }

    #[async_trait]
    impl ClusterView for MockClusterView {
        async fn namespace_labels(
            &self,
            namespace: &str,
        ) -> Result<Option<BTreeMap<String, String>>> {
            Ok(self.namespaces.lock().get(namespace).cloned())
        }

        async fn dynakube(&self, name: &str) -> Result<Option<DynaKube>> {
            Ok(self.dynakubes.lock().get(name).cloned())
        }
    }
}
