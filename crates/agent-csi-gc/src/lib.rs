//! Garbage collection for the agent CSI driver.
//!
//! Published volumes pin agent versions, and unpublished volumes leave log
//! trees behind. This crate reclaims both without ever touching what a live
//! volume still references.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │   GarbageCollector   │
//!                 └──────────────────────┘
//!          ┌───────────────┼────────────────┐
//!          ▼               ▼                ▼
//!   ┌─────────────┐ ┌─────────────┐ ┌──────────────────┐
//!   │  binaries   │ │    logs     │ │     metadata     │
//!   │ bin/<ver>   │ │ run/<vol>   │ │ rows vs cluster  │
//!   └─────────────┘ └─────────────┘ └──────────────────┘
//!          │               │                │
//!          └───────┬───────┘                ▼
//!                  ▼                 ┌──────────────┐
//!            ┌──────────┐            │ ClusterState │
//!            │  Store   │            │    (K8s)     │
//!            └──────────┘            └──────────────┘
//! ```
//!
//! - **Binary sweep**: removes `bin/<version>` directories that are neither
//!   the tenant's latest version nor bind mounted by a volume row.
//! - **Log sweep**: removes `run/<volume_id>` trees with no volume row once
//!   they are older than the configured age, bounded per sweep.
//! - **Metadata sweep**: deletes volume rows of vanished pods and tenant rows
//!   of vanished `DynaKube`s.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use agent_csi_core::PathResolver;
//! use agent_csi_gc::GarbageCollector;
//! use agent_csi_store::SqliteStore;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open("/data/csi.db")?);
//! let gc = GarbageCollector::new(store, PathResolver::new("/data"));
//!
//! let (binaries, logs) = gc.collect_tenant("abc12345", "1.2.3")?;
//! println!("removed {} versions, {} volume trees", binaries.removed.len(), logs.removed.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod binaries;
pub mod cluster;
pub mod collector;
pub mod error;
pub mod logs;
pub mod metadata;
pub mod types;

pub use binaries::sweep_binaries;
pub use cluster::{ClusterState, KubeClusterState};
pub use collector::GarbageCollector;
pub use error::{GcError, Result};
pub use logs::sweep_logs;
pub use metadata::sweep_metadata;
pub use types::{GcConfig, MetadataReport, SweepReport};

#[cfg(any(test, feature = "test-utils"))]
pub use cluster::mock::MockClusterState;
