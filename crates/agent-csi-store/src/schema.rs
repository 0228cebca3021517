//! Table definitions.
//!
//! The on-disk format is shared with earlier driver releases, so table and
//! column names are fixed.

/// Tenant table, keyed by the owning `DynaKube` name.
pub const CREATE_TENANTS: &str = "CREATE TABLE IF NOT EXISTS tenants (
    UUID TEXT,
    LatestVersion TEXT NOT NULL,
    Dynakube TEXT NOT NULL,
    PRIMARY KEY (Dynakube)
);";

/// Volume table, keyed by the orchestrator-assigned volume ID.
pub const CREATE_VOLUMES: &str = "CREATE TABLE IF NOT EXISTS volumes (
    ID TEXT,
    PodName TEXT NOT NULL,
    Version TEXT NOT NULL,
    TenantUUID TEXT NOT NULL,
    PRIMARY KEY (ID)
);";

/// Returns every statement needed to initialize an empty database.
#[must_use]
pub fn all_tables() -> [&'static str; 2] {
    [CREATE_TENANTS, CREATE_VOLUMES]
}
