//! CSI node plugin bind mounting tenant agents into application pods.
//!
//! This crate provides the node-facing half of the agent CSI driver:
//!
//! - The CSI Identity and Node gRPC services
//! - The publisher resolving a pod's volume to agent bind mounts
//! - Command-line configuration of the daemon
//! - The `/healthz` endpoint
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          kubelet                             │
//! │                  (CSI gRPC, UNIX socket)                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     agent-csi-driver                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐   │
//! │  │  Identity   │ │    Node     │ │     Publisher       │   │
//! │  │  Service    │ │   Service   │ │  (mount attempts)   │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │ Metadata │   │  Bind    │   │ Cluster  │
//!        │  Store   │   │  Mounts  │   │   View   │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! The daemon binary additionally runs the provisioner's reconcile loop and
//! the startup metadata sweep.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use agent_csi_core::{PathResolver, SystemMounter};
//! use agent_csi_driver::{serve, Endpoint, KubeClusterView, NodeService, Publisher, PublisherConfig};
//! use agent_csi_store::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open("/data/csi.db")?);
//! let client = kube::Client::try_default().await?;
//! let publisher = Publisher::new(
//!     store,
//!     PathResolver::new("/data"),
//!     Arc::new(SystemMounter),
//!     Arc::new(KubeClusterView::new(client, "dynatrace")),
//!     PublisherConfig::default(),
//! );
//!
//! let endpoint: Endpoint = "unix:///csi/csi.sock".parse()?;
//! let node = NodeService::new("node-1", Arc::new(publisher));
//! serve(&endpoint, 20, node, async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod health;
pub mod node;
pub mod publisher;
pub mod server;

/// Generated CSI protocol types and service stubs.
#[allow(missing_docs, clippy::all, clippy::pedantic)]
pub mod csi {
    tonic::include_proto!("csi.v1");
}

pub use cluster::{ClusterView, KubeClusterView};
pub use config::{Args, Endpoint, DRIVER_NAME, DRIVER_VERSION};
pub use error::{status_code, to_status, DriverError, Result};
pub use node::{parse_publish_request, IdentityService, NodeService};
pub use publisher::{PublishOutcome, PublishRequest, Publisher, PublisherConfig, VolumeMode};
pub use server::serve;

#[cfg(any(test, feature = "test-utils"))]
pub use cluster::mock::MockClusterView;
