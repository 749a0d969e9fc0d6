// src/db/schema.rs

//! Database schema definitions and migrations for Alp
//!
//! This module defines the SQLite schema for all core tables and provides
//! a migration system to evolve the schema over time.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    // Apply migrations in order
    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::InitError(format!("Unknown migration version: {}", version))),
    }
}

/// Initial schema - Version 1
///
/// - packages: the catalog, replaced wholesale on refresh
/// - installed: one record per installed package
/// - settings: key/value configuration
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        -- Packages: catalog entries from the repository index
        CREATE TABLE packages (
            name TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            description TEXT,
            author TEXT,
            license TEXT,
            category TEXT,
            dependencies TEXT NOT NULL DEFAULT '[]',
            source TEXT NOT NULL DEFAULT '',
            main TEXT,
            added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX idx_packages_category ON packages(category);

        -- Installed: snapshot of metadata at install time
        CREATE TABLE installed (
            name TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            description TEXT,
            author TEXT,
            license TEXT,
            category TEXT,
            dependencies TEXT NOT NULL DEFAULT '[]',
            source TEXT NOT NULL DEFAULT '',
            main TEXT,
            installed_at TEXT NOT NULL,
            checksum TEXT NOT NULL,
            install_source TEXT NOT NULL CHECK(install_source IN ('remote', 'local'))
        );

        -- Settings: configuration and bookkeeping values
        CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: Trust tracking
///
/// Adds trust annotations to catalog entries, provenance flags to installed
/// records and the certificate store.
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        ALTER TABLE packages ADD COLUMN cert_type TEXT;
        ALTER TABLE packages ADD COLUMN cert_author TEXT;
        ALTER TABLE packages ADD COLUMN cert_valid INTEGER;
        ALTER TABLE packages ADD COLUMN cert_message TEXT;

        ALTER TABLE installed ADD COLUMN certified INTEGER NOT NULL DEFAULT 0;
        ALTER TABLE installed ADD COLUMN cert_type TEXT;

        -- Certificates: embedded bundle certificates accepted at install time
        CREATE TABLE certificates (
            package_name TEXT PRIMARY KEY,
            cert_id TEXT NOT NULL,
            author TEXT NOT NULL,
            cert_type TEXT NOT NULL CHECK(cert_type IN ('official', 'custom')),
            issued_at TEXT NOT NULL,
            signature TEXT NOT NULL,
            stored_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        ",
    )?;

    info!("Schema version 2 applied successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        (temp_file, conn)
    }

    #[test]
    fn test_schema_version_tracking() {
        let (_temp, conn) = create_test_db();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, 0);

        migrate(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_creates_all_tables() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in ["certificates", "installed", "packages", "schema_version", "settings"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let (_temp, conn) = create_test_db();

        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_installed_source_constraint() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO installed (name, version, installed_at, checksum, install_source)
             VALUES ('x', '1.0', 'now', 'abc', 'ftp')",
            [],
        );
        assert!(result.is_err());
    }
}
