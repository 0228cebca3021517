//! Bootstrapper job builder.
//!
//! A bootstrapper job runs the code-modules image on this node and copies
//! the agent tree out of it into a host directory.

use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, PodSpec, PodTemplateSpec, SecurityContext, Toleration,
    Volume, VolumeMount,
};
use kube::api::ObjectMeta;

/// Retries before a bootstrapper job counts as failed.
pub const BACKOFF_LIMIT: i32 = 2;

/// Where the target directory is mounted inside the bootstrapper.
pub const AGENT_MOUNT_PATH: &str = "/mnt/agent";

/// Where code-modules images keep the agent tree.
pub const IMAGE_AGENT_DIR: &str = "/opt/dynatrace/oneagent";

const VOLUME_NAME: &str = "agent-bin";

/// Name of the bootstrapper job for `image` on `node_name`.
///
/// The name is stable for one image and node, so a job left behind by an
/// interrupted reconcile is picked up instead of duplicated.
#[must_use]
pub fn job_name(image: &str, node_name: &str) -> String {
    let digest = blake3::hash(format!("{image}\n{node_name}").as_bytes());
    let hex = hex::encode(digest.as_bytes());
    format!("codemodules-{}", &hex[..12])
}

/// Build the bootstrapper job copying `image`'s agent tree to `target_dir`.
///
/// `target_dir` is a path on the host of `node_name`.
#[must_use]
pub fn build_job(image: &str, target_dir: &Path, namespace: &str, node_name: &str) -> Job {
    let name = job_name(image, node_name);

    Job {
        metadata: build_metadata(&name, namespace),
        spec: Some(JobSpec {
            backoff_limit: Some(BACKOFF_LIMIT),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels()),
                    ..Default::default()
                }),
                spec: Some(build_pod_spec(image, target_dir, node_name)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "codemodules-bootstrapper".to_string());
    labels.insert("app.kubernetes.io/managed-by".to_string(), "agent-csi-driver".to_string());
    labels
}

fn build_metadata(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels()),
        ..Default::default()
    }
}

fn build_pod_spec(image: &str, target_dir: &Path, node_name: &str) -> PodSpec {
    PodSpec {
        node_name: Some(node_name.to_string()),
        restart_policy: Some("Never".to_string()),
        containers: vec![build_container(image)],
        volumes: Some(vec![Volume {
            name: VOLUME_NAME.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: target_dir.to_string_lossy().into_owned(),
                type_: Some("DirectoryOrCreate".to_string()),
            }),
            ..Default::default()
        }]),
        tolerations: Some(vec![Toleration {
            operator: Some("Exists".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn build_container(image: &str) -> Container {
    Container {
        name: "bootstrapper".to_string(),
        image: Some(image.to_string()),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("cp -a {IMAGE_AGENT_DIR}/. {AGENT_MOUNT_PATH}/"),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: VOLUME_NAME.to_string(),
            mount_path: AGENT_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_name_is_stable_and_short() {
        let a = job_name("registry/codemodules:1.2.3", "node-1");
        assert_eq!(a, job_name("registry/codemodules:1.2.3", "node-1"));
        assert_ne!(a, job_name("registry/codemodules:1.2.3", "node-2"));
        assert!(a.starts_with("codemodules-"));
        assert_eq!(a.len(), "codemodules-".len() + 12);
    }

    #[test]
    fn job_is_pinned_and_mounts_target() {
        let job = build_job(
            "registry/codemodules:1.2.3",
            Path::new("/data/T1/bin/1.2.3"),
            "dynatrace",
            "node-1",
        );

        assert_eq!(job.metadata.namespace.as_deref(), Some("dynatrace"));
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(2));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.node_name.as_deref(), Some("node-1"));
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));

        let volume = &pod.volumes.unwrap()[0];
        assert_eq!(
            volume.host_path.as_ref().map(|h| h.path.as_str()),
            Some("/data/T1/bin/1.2.3")
        );

        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("registry/codemodules:1.2.3"));
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].mount_path,
            AGENT_MOUNT_PATH
        );
    }
}
