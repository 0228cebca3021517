//! Agent provisioning for the agent CSI driver.
//!
//! This crate keeps each tenant's agent binaries and configuration on the
//! node up to date. For every `DynaKube` it:
//!
//! - Resolves the tenant through the backend's connection info
//! - Installs the desired agent version, from a ZIP download or from a
//!   code-modules image via a bootstrapper job
//! - Records the version as the tenant's latest in the metadata store
//! - Merges the backend's process-module config into `ruxitagentproc.conf`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Controller (DynaKube watch)                   │
//! │        one mailbox + worker per DynaKube, requeue timers         │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Provisioner                             │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────────┐   │
//! │  │  ZIP        │ │  Image      │ │  Process-module config  │   │
//! │  │  installer  │ │  installer  │ │  merge + cache          │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                 │                     │
//!          ▼                 ▼                     ▼
//!   ┌─────────────┐   ┌─────────────┐       ┌──────────────┐
//!   │ AgentBackend│   │ Bootstrapper│       │    Store     │
//!   │   (HTTP)    │   │  Job (K8s)  │       │   (SQLite)   │
//!   └─────────────┘   └─────────────┘       └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use agent_csi_core::{DynaKube, PathResolver};
//! use agent_csi_provisioner::{
//!     HttpAgentBackend, JobImageInstaller, Provisioner, ProvisionerConfig,
//! };
//! use agent_csi_store::SqliteStore;
//!
//! # async fn example(dynakube: DynaKube) -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let config = ProvisionerConfig::new("dynatrace", "node-1");
//! let store = Arc::new(SqliteStore::open("/data/csi.db")?);
//! let images = Arc::new(JobImageInstaller::new(client, config.clone()));
//!
//! let provisioner = Provisioner::new(store, PathResolver::new("/data"), config, images);
//! let backend = HttpAgentBackend::new(&dynakube.spec.api_url, "paas-token")?;
//!
//! let outcome = provisioner.reconcile(&dynakube, &backend).await?;
//! println!("tenant {} runs {}", outcome.tenant_uuid, outcome.version);
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! With the `test-utils` feature, [`MockBackend`] and [`MockImageInstaller`]
//! stand in for the backend and the cluster.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod cache;
pub mod controller;
pub mod error;
pub mod image;
pub mod installer;
pub mod job;
pub mod procconf;
pub mod provisioner;
pub mod types;

pub use backend::{AgentBackend, HttpAgentBackend};
pub use cache::ProcessModuleCache;
pub use controller::Controller;
pub use error::{ProvisionerError, Result};
pub use image::{image_version, ImageInstaller, JobImageInstaller};
pub use installer::{extract_zip, install_zip};
pub use procconf::{merge, ProcessModuleConfig, ProcessModuleMap, ProcessModuleProperty};
pub use provisioner::Provisioner;
pub use types::{ConnectionInfo, ProvisionerConfig, ReconcileOutcome};

#[cfg(any(test, feature = "test-utils"))]
pub use backend::mock::MockBackend;
#[cfg(any(test, feature = "test-utils"))]
pub use image::mock::MockImageInstaller;
