//! `SQLite` metadata store for the agent CSI driver.
//!
//! This crate persists the two facts that cannot be reconstructed from the
//! filesystem: which tenant each `DynaKube` resolves to, and which agent
//! version each published volume is pinned to.
//!
//! # Architecture
//!
//! The database is a single file under the driver's data directory with two
//! tables:
//!
//! - `tenants`: one row per `DynaKube`, keyed by the resource name
//! - `volumes`: one row per live bind mount, keyed by volume ID
//!
//! Uniqueness is enforced by the primary keys. All writes come from one
//! process, so the store serializes access behind a single connection.
//!
//! # Example
//!
//! ```no_run
//! use agent_csi_store::{SqliteStore, Store, Tenant};
//!
//! let store = SqliteStore::open("/tmp/csi.db").unwrap();
//!
//! store.insert_tenant(&Tenant::new("T1", "1.2.3", "dk")).unwrap();
//! let tenant = store.get_tenant("dk").unwrap();
//! assert_eq!(tenant.map(|t| t.latest_version).as_deref(), Some("1.2.3"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod schema;
pub mod sqlite;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
pub use types::{Tenant, Volume};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;

use std::collections::{BTreeMap, BTreeSet};

/// The storage trait defining all metadata operations.
///
/// Every operation is individually atomic. Implementations are shared by the
/// node server, the provisioner and the garbage collector.
pub trait Store: Send + Sync {
    // =========================================================================
    // Tenant Operations
    // =========================================================================

    /// Insert a tenant record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if a tenant for the same `DynaKube`
    /// already exists.
    fn insert_tenant(&self, tenant: &Tenant) -> Result<()>;

    /// Update the UUID and latest version of the tenant for a `DynaKube`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no tenant exists for the `DynaKube`.
    fn update_tenant(&self, tenant: &Tenant) -> Result<()>;

    /// Delete every tenant row with the given UUID.
    ///
    /// Deleting a missing tenant is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_tenant(&self, tenant_uuid: &str) -> Result<()>;

    /// Get the tenant for a `DynaKube`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_tenant(&self, dynakube_name: &str) -> Result<Option<Tenant>>;

    /// Map every known `DynaKube` name to its tenant UUID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_dynakubes(&self) -> Result<BTreeMap<String, String>>;

    // =========================================================================
    // Volume Operations
    // =========================================================================

    /// Insert a volume record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the volume ID already exists.
    fn insert_volume(&self, volume: &Volume) -> Result<()>;

    /// Delete a volume record.
    ///
    /// Deleting a missing volume is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_volume(&self, volume_id: &str) -> Result<()>;

    /// Get a volume by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_volume(&self, volume_id: &str) -> Result<Option<Volume>>;

    /// Map every published volume's ID to the name of its pod.
    ///
    /// One pod can own several volumes, so pod names may repeat.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_volume_pods(&self) -> Result<BTreeMap<String, String>>;

    /// Versions of a tenant's agent that are currently bind mounted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_used_versions(&self, tenant_uuid: &str) -> Result<BTreeSet<String>>;
}
