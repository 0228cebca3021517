//! `SQLite` storage implementation.
//!
//! This module provides the `SqliteStore` implementation of the `Store` trait.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::schema::all_tables;
use crate::types::{Tenant, Volume};
use crate::Store;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed storage implementation.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at the given path and create the schema.
    ///
    /// Opening an existing database is idempotent; existing rows are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(path.as_ref(), flags).map_err(db_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;

        for statement in all_tables() {
            conn.execute_batch(statement).map_err(db_err)?;
        }

        debug!(path = %path.as_ref().display(), "Opened metadata database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        for statement in all_tables() {
            conn.execute_batch(statement).map_err(db_err)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn db_err(err: rusqlite::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

/// Map a primary-key violation to `Conflict`, everything else to `Database`.
fn insert_err(err: rusqlite::Error, what: String) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict(what)
        }
        other => db_err(other),
    }
}

impl Store for SqliteStore {
    // =========================================================================
    // Tenant Operations
    // =========================================================================

    fn insert_tenant(&self, tenant: &Tenant) -> Result<()> {
        tenant.validate()?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO tenants (UUID, LatestVersion, Dynakube) VALUES (?1, ?2, ?3)",
                params![
                    tenant.tenant_uuid,
                    tenant.latest_version,
                    tenant.dynakube_name
                ],
            )
            .map_err(|e| insert_err(e, format!("tenant for dynakube {}", tenant.dynakube_name)))?;
        Ok(())
    }

    fn update_tenant(&self, tenant: &Tenant) -> Result<()> {
        tenant.validate()?;
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE tenants SET LatestVersion = ?1, UUID = ?2 WHERE Dynakube = ?3",
                params![
                    tenant.latest_version,
                    tenant.tenant_uuid,
                    tenant.dynakube_name
                ],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "tenant for dynakube {}",
                tenant.dynakube_name
            )));
        }
        Ok(())
    }

    fn delete_tenant(&self, tenant_uuid: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM tenants WHERE UUID = ?1", params![tenant_uuid])
            .map_err(db_err)?;
        Ok(())
    }

    fn get_tenant(&self, dynakube_name: &str) -> Result<Option<Tenant>> {
        self.conn
            .lock()
            .query_row(
                "SELECT UUID, LatestVersion, Dynakube FROM tenants WHERE Dynakube = ?1",
                params![dynakube_name],
                |row| {
                    Ok(Tenant {
                        tenant_uuid: row.get(0)?,
                        latest_version: row.get(1)?,
                        dynakube_name: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn list_dynakubes(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT Dynakube, UUID FROM tenants")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<_>>().map_err(db_err)
    }

    // =========================================================================
    // Volume Operations
    // =========================================================================

    fn insert_volume(&self, volume: &Volume) -> Result<()> {
        volume.validate()?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO volumes (ID, PodName, Version, TenantUUID) VALUES (?1, ?2, ?3, ?4)",
                params![
                    volume.volume_id,
                    volume.pod_name,
                    volume.version,
                    volume.tenant_uuid
                ],
            )
            .map_err(|e| insert_err(e, format!("volume {}", volume.volume_id)))?;
        Ok(())
    }

    fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM volumes WHERE ID = ?1", params![volume_id])
            .map_err(db_err)?;
        Ok(())
    }

    fn get_volume(&self, volume_id: &str) -> Result<Option<Volume>> {
        self.conn
            .lock()
            .query_row(
                "SELECT ID, PodName, Version, TenantUUID FROM volumes WHERE ID = ?1",
                params![volume_id],
                |row| {
                    Ok(Volume {
                        volume_id: row.get(0)?,
                        pod_name: row.get(1)?,
                        version: row.get(2)?,
                        tenant_uuid: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn list_volume_pods(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT ID, PodName FROM volumes")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<_>>().map_err(db_err)
    }

    fn list_used_versions(&self, tenant_uuid: &str) -> Result<BTreeSet<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT Version FROM volumes WHERE TenantUUID = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![tenant_uuid], |row| row.get(0))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<_>>().map_err(db_err)
    }
}
