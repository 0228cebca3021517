//! The `DynaKube` custom resource.
//!
//! One `DynaKube` declares one tenant: where its backend lives, which secret
//! holds its tokens, and how its agents are distributed. The resource name
//! is the join key between the cluster and the metadata store.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Namespace label naming the `DynaKube` that instruments the namespace.
pub const DYNAKUBE_LABEL: &str = "dynakube";

/// Annotation capping how often a pod's volume mount is attempted.
pub const MAX_MOUNT_ATTEMPTS_ANNOTATION: &str = "feature.dynatrace.com/max-csi-mount-attempts";

/// Mount attempts allowed when the annotation is absent or malformed.
pub const DEFAULT_MAX_MOUNT_ATTEMPTS: u32 = 10;

/// Desired state of a monitored tenant.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "dynatrace.com",
    version = "v1beta1",
    kind = "DynaKube",
    namespaced,
    doc = "A tenant whose agents are provisioned onto every node"
)]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeSpec {
    /// Backend API URL, e.g. `https://abc123.live.dynatrace.com/api`.
    pub api_url: String,
    /// Name of the secret holding the backend tokens.
    ///
    /// Defaults to the resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<String>,
    /// Host group injected into the process-module config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_group: Option<String>,
    /// How the agent code modules are distributed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_modules: Option<CodeModulesSpec>,
}

/// Distribution settings for the agent code modules.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CodeModulesSpec {
    /// Container image whose filesystem is the agent tree.
    ///
    /// When set, the image flow replaces the ZIP download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Agent version to install instead of the latest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DynaKube {
    /// Name of the secret holding this tenant's backend tokens.
    #[must_use]
    pub fn tokens_secret_name(&self) -> String {
        self.spec
            .tokens
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.name_any())
    }

    /// The configured host group, if non-empty.
    #[must_use]
    pub fn host_group(&self) -> Option<&str> {
        self.spec.host_group.as_deref().filter(|g| !g.is_empty())
    }

    /// The code-modules image, if the image flow is requested.
    #[must_use]
    pub fn code_modules_image(&self) -> Option<&str> {
        self.spec
            .code_modules
            .as_ref()
            .and_then(|cm| cm.image.as_deref())
            .filter(|image| !image.is_empty())
    }

    /// A pinned agent version, if any.
    #[must_use]
    pub fn pinned_version(&self) -> Option<&str> {
        self.spec
            .code_modules
            .as_ref()
            .and_then(|cm| cm.version.as_deref())
            .filter(|version| !version.is_empty())
    }

    /// Maximum mount attempts for volumes of this tenant.
    #[must_use]
    pub fn max_mount_attempts(&self) -> u32 {
        self.annotations()
            .get(MAX_MOUNT_ATTEMPTS_ANNOTATION)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_MOUNT_ATTEMPTS)
    }
}
