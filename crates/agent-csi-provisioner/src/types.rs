//! Types for the provisioner crate.

use std::time::Duration;

use agent_csi_core::Flavor;
use serde::{Deserialize, Serialize};

/// Tenant identity returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// The tenant UUID; names the tenant's environment directory.
    #[serde(rename = "tenantUUID")]
    pub tenant_uuid: String,
    /// Token the agents authenticate with.
    #[serde(rename = "tenantToken", default)]
    pub tenant_token: String,
    /// Comma-separated endpoints the agents report to.
    #[serde(rename = "communicationEndpoints", default)]
    pub communication_endpoints: String,
}

/// Configuration for the provisioner and its reconcile workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Namespace holding the `DynaKube`s, their secrets and bootstrapper jobs.
    pub namespace: String,
    /// Node the daemon runs on; bootstrapper jobs are pinned to it.
    pub node_name: String,
    /// Agent flavors installed for every tenant.
    pub flavors: Vec<Flavor>,
    /// Delay before the next reconcile after a success.
    pub requeue_after: Duration,
    /// Delay before the next reconcile after a failure.
    pub requeue_after_error: Duration,
    /// Upper bound on one bootstrapper job run.
    pub job_timeout: Duration,
    /// How often a bootstrapper job's status is polled.
    pub job_poll_interval: Duration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            namespace: "dynatrace".to_string(),
            node_name: String::new(),
            flavors: vec![Flavor::Default],
            requeue_after: Duration::from_secs(5 * 60),
            requeue_after_error: Duration::from_secs(15),
            job_timeout: Duration::from_secs(10 * 60),
            job_poll_interval: Duration::from_secs(5),
        }
    }
}

impl ProvisionerConfig {
    /// Create a config for the given namespace and node.
    #[must_use]
    pub fn new(namespace: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            node_name: node_name.into(),
            ..Default::default()
        }
    }

    /// Replace the installed flavors.
    ///
    /// The default flavor is always installed.
    #[must_use]
    pub fn with_flavors(mut self, flavors: impl IntoIterator<Item = Flavor>) -> Self {
        let mut flavors: Vec<Flavor> = flavors.into_iter().collect();
        if !flavors.contains(&Flavor::Default) {
            flavors.insert(0, Flavor::Default);
        }
        flavors.dedup();
        self.flavors = flavors;
        self
    }
}

/// Result of one successful reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Tenant the `DynaKube` resolved to.
    pub tenant_uuid: String,
    /// Version recorded as the tenant's latest.
    pub version: String,
    /// Process-module config revision now on disk.
    pub config_revision: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.requeue_after, Duration::from_secs(300));
        assert_eq!(config.requeue_after_error, Duration::from_secs(15));
        assert_eq!(config.job_timeout, Duration::from_secs(600));
        assert_eq!(config.flavors, vec![Flavor::Default]);
    }

    #[test]
    fn default_flavor_always_installed() {
        let config = ProvisionerConfig::new("ns", "node-1").with_flavors([Flavor::Musl]);
        assert_eq!(config.flavors, vec![Flavor::Default, Flavor::Musl]);
    }

    #[test]
    fn connection_info_field_names() {
        let info: ConnectionInfo = serde_json::from_str(
            r#"{"tenantUUID":"abc123","tenantToken":"tok","communicationEndpoints":"https://a,https://b"}"#,
        )
        .unwrap();
        assert_eq!(info.tenant_uuid, "abc123");
        assert_eq!(info.communication_endpoints, "https://a,https://b");
    }
}
