//! The CSI Identity and Node gRPC services.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use agent_csi_core::{CsiError, Flavor};
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::config::{DRIVER_NAME, DRIVER_VERSION};
use crate::csi::identity_server::Identity;
use crate::csi::node_server::Node;
use crate::csi::volume_capability::AccessType;
use crate::csi::{
    BoolValue, GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse, GetPluginInfoRequest,
    GetPluginInfoResponse, NodeExpandVolumeRequest, NodeExpandVolumeResponse,
    NodeGetCapabilitiesRequest, NodeGetCapabilitiesResponse, NodeGetInfoRequest,
    NodeGetInfoResponse, NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse,
    NodePublishVolumeRequest, NodePublishVolumeResponse, NodeStageVolumeRequest,
    NodeStageVolumeResponse, NodeUnpublishVolumeRequest, NodeUnpublishVolumeResponse,
    NodeUnstageVolumeRequest, NodeUnstageVolumeResponse, ProbeRequest, ProbeResponse,
};
use crate::error::to_status;
use crate::publisher::{PublishRequest, Publisher, VolumeMode};

/// Volume-context key naming the pod's namespace.
pub const CONTEXT_NAMESPACE: &str = "namespace";
/// Volume-context key naming the pod's UID.
pub const CONTEXT_POD_UID: &str = "pod_uid";
/// Volume-context key selecting the agent flavor.
pub const CONTEXT_FLAVOR: &str = "flavor";
/// Volume-context key selecting the volume kind.
pub const CONTEXT_FORMAT: &str = "format";

const KUBELET_NAMESPACE: &str = "csi.storage.k8s.io/pod.namespace";
const KUBELET_POD_UID: &str = "csi.storage.k8s.io/pod.uid";
const KUBELET_POD_NAME: &str = "csi.storage.k8s.io/pod.name";
const FORMAT_SUPPORT: &str = "support";

fn context_value<'a>(context: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| context.get(*key))
        .map(String::as_str)
        .find(|value| !value.is_empty())
}

/// Validate a `NodePublishVolume` request.
///
/// Checks run in a fixed order and the first failure is reported.
///
/// # Errors
///
/// Returns `CsiError::InvalidArgument` naming the offending field.
pub fn parse_publish_request(request: &NodePublishVolumeRequest) -> Result<PublishRequest, CsiError> {
    let capability = request
        .volume_capability
        .as_ref()
        .ok_or_else(|| CsiError::InvalidArgument("volume capability missing".into()))?;
    match capability.access_type {
        Some(AccessType::Mount(_)) => {}
        Some(AccessType::Block(_)) => {
            return Err(CsiError::InvalidArgument(
                "block access type is not supported".into(),
            ))
        }
        None => {
            return Err(CsiError::InvalidArgument(
                "volume capability has no access type".into(),
            ))
        }
    }
    if request.volume_id.is_empty() {
        return Err(CsiError::InvalidArgument("volume id missing".into()));
    }
    if request.target_path.is_empty() {
        return Err(CsiError::InvalidArgument("target path missing".into()));
    }

    let context = &request.volume_context;
    let namespace = context_value(context, &[CONTEXT_NAMESPACE, KUBELET_NAMESPACE])
        .ok_or_else(|| CsiError::InvalidArgument("volume context has no pod namespace".into()))?;
    let pod_uid = context_value(context, &[CONTEXT_POD_UID, KUBELET_POD_UID])
        .ok_or_else(|| CsiError::InvalidArgument("volume context has no pod uid".into()))?;
    let flavor: Flavor = context_value(context, &[CONTEXT_FLAVOR])
        .unwrap_or_default()
        .parse()?;
    let mode = match context_value(context, &[CONTEXT_FORMAT]) {
        Some(FORMAT_SUPPORT) => VolumeMode::Support,
        _ => VolumeMode::App,
    };

    Ok(PublishRequest {
        volume_id: request.volume_id.clone(),
        target_path: PathBuf::from(&request.target_path),
        namespace: namespace.to_string(),
        pod_uid: pod_uid.to_string(),
        pod_name: context_value(context, &[KUBELET_POD_NAME])
            .unwrap_or(pod_uid)
            .to_string(),
        flavor,
        mode,
    })
}

/// The CSI Identity service.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityService;

#[tonic::async_trait]
impl Identity for IdentityService {
    async fn get_plugin_info(
        &self,
        _request: Request<GetPluginInfoRequest>,
    ) -> Result<Response<GetPluginInfoResponse>, Status> {
        debug!("GetPluginInfo");
        Ok(Response::new(GetPluginInfoResponse {
            name: DRIVER_NAME.to_string(),
            vendor_version: DRIVER_VERSION.to_string(),
            manifest: HashMap::new(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        debug!("GetPluginCapabilities");
        Ok(Response::new(GetPluginCapabilitiesResponse {
            capabilities: Vec::new(),
        }))
    }

    async fn probe(
        &self,
        _request: Request<ProbeRequest>,
    ) -> Result<Response<ProbeResponse>, Status> {
        debug!("Probe");
        Ok(Response::new(ProbeResponse {
            ready: Some(BoolValue { value: true }),
        }))
    }
}

/// The CSI Node service.
pub struct NodeService {
    node_id: String,
    publisher: Arc<Publisher>,
}

impl NodeService {
    /// Create the service for `node_id`.
    #[must_use]
    pub fn new(node_id: impl Into<String>, publisher: Arc<Publisher>) -> Self {
        Self {
            node_id: node_id.into(),
            publisher,
        }
    }
}

fn failed(method: &str, err: &CsiError) -> Status {
    warn!(method, error = %err, "CSI call failed");
    to_status(err)
}

#[tonic::async_trait]
impl Node for NodeService {
    async fn node_stage_volume(
        &self,
        _request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        Err(Status::unimplemented("NodeStageVolume is not supported"))
    }

    async fn node_unstage_volume(
        &self,
        _request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        Err(Status::unimplemented("NodeUnstageVolume is not supported"))
    }

    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        let request = request.into_inner();
        debug!(volume_id = %request.volume_id, target = %request.target_path, "NodePublishVolume");

        let publish = parse_publish_request(&request).map_err(|e| failed("NodePublishVolume", &e))?;
        let outcome = self
            .publisher
            .publish(&publish)
            .await
            .map_err(|e| failed("NodePublishVolume", &e))?;

        debug!(volume_id = %publish.volume_id, ?outcome, "NodePublishVolume done");
        Ok(Response::new(NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        let request = request.into_inner();
        debug!(volume_id = %request.volume_id, target = %request.target_path, "NodeUnpublishVolume");

        if request.volume_id.is_empty() {
            return Err(to_status(&CsiError::InvalidArgument("volume id missing".into())));
        }
        if request.target_path.is_empty() {
            return Err(to_status(&CsiError::InvalidArgument("target path missing".into())));
        }

        self.publisher
            .unpublish(&request.volume_id, &PathBuf::from(&request.target_path))
            .await
            .map_err(|e| failed("NodeUnpublishVolume", &e))?;

        debug!(volume_id = %request.volume_id, "NodeUnpublishVolume done");
        Ok(Response::new(NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        _request: Request<NodeGetVolumeStatsRequest>,
    ) -> Result<Response<NodeGetVolumeStatsResponse>, Status> {
        Err(Status::unimplemented("NodeGetVolumeStats is not supported"))
    }

    async fn node_expand_volume(
        &self,
        _request: Request<NodeExpandVolumeRequest>,
    ) -> Result<Response<NodeExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("NodeExpandVolume is not supported"))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        debug!("NodeGetCapabilities");
        Ok(Response::new(NodeGetCapabilitiesResponse {
            capabilities: Vec::new(),
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        debug!("NodeGetInfo");
        Ok(Response::new(NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            max_volumes_per_node: 0,
            accessible_topology: None,
        }))
    }
}
