// src/db/models.rs

//! Data models for Alp database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::{Error, Result};
use crate::packages::{PackageMetadata, TrustAnnotation};
use crate::trust::{Certificate, CertificateType};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

/// Where an installed package came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallSource {
    Remote,
    Local,
}

impl InstallSource {
    pub fn as_str(&self) -> &str {
        match self {
            InstallSource::Remote => "remote",
            InstallSource::Local => "local",
        }
    }
}

impl FromStr for InstallSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "remote" => Ok(InstallSource::Remote),
            "local" => Ok(InstallSource::Local),
            _ => Err(format!("Invalid install source: {}", s)),
        }
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn dependencies_to_json(deps: &[String]) -> Result<String> {
    serde_json::to_string(deps)
        .map_err(|e| Error::ParseError(format!("Failed to encode dependencies: {}", e)))
}

/// Read the nine metadata columns starting at column 0
fn metadata_from_row(row: &Row) -> rusqlite::Result<PackageMetadata> {
    let deps_json: String = row.get(6)?;
    let dependencies: Vec<String> = serde_json::from_str(&deps_json)
        .map_err(|e| conversion_error(6, format!("Invalid dependency list: {}", e)))?;

    Ok(PackageMetadata {
        name: row.get(0)?,
        version: row.get(1)?,
        description: row.get(2)?,
        author: row.get(3)?,
        license: row.get(4)?,
        category: row.get(5)?,
        dependencies,
        source: row.get(7)?,
        main: row.get(8)?,
        trust: None,
    })
}

/// A package known to the catalog
#[derive(Debug, Clone)]
pub struct CatalogPackage {
    pub metadata: PackageMetadata,
    pub added_at: Option<String>,
}

impl CatalogPackage {
    pub fn new(metadata: PackageMetadata) -> Self {
        Self {
            metadata,
            added_at: None,
        }
    }

    /// Insert this package into the catalog
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        let m = &self.metadata;
        let trust = m.trust.as_ref();
        conn.execute(
            "INSERT INTO packages (name, version, description, author, license, category,
                                   dependencies, source, main,
                                   cert_type, cert_author, cert_valid, cert_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                &m.name,
                &m.version,
                &m.description,
                &m.author,
                &m.license,
                &m.category,
                dependencies_to_json(&m.dependencies)?,
                &m.source,
                &m.main,
                trust.map(|t| t.cert_type.as_str()),
                trust.map(|t| t.cert_author.as_str()),
                trust.map(|t| t.cert_valid as i32),
                trust.map(|t| t.cert_message.as_str()),
            ],
        )?;
        Ok(())
    }

    /// List all catalog packages
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT name, version, description, author, license, category, dependencies, source, main,
                    cert_type, cert_author, cert_valid, cert_message, added_at
             FROM packages ORDER BY name",
        )?;

        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Delete every catalog entry (used when refreshing)
    pub fn delete_all(conn: &Connection) -> Result<()> {
        conn.execute("DELETE FROM packages", [])?;
        Ok(())
    }

    /// Convert a database row to a CatalogPackage
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let mut metadata = metadata_from_row(row)?;

        let cert_type: Option<String> = row.get(9)?;
        metadata.trust = match cert_type {
            Some(cert_type) => Some(TrustAnnotation {
                cert_type,
                cert_author: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
                cert_valid: row.get::<_, Option<i32>>(11)?.unwrap_or(0) != 0,
                cert_message: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Self {
            metadata,
            added_at: row.get(13)?,
        })
    }
}

/// Record of an installed package
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub metadata: PackageMetadata,
    pub installed_at: String,
    /// SHA-256 of the install script that ran
    pub checksum: String,
    pub certified: bool,
    pub cert_type: Option<String>,
    pub install_source: InstallSource,
}

impl InstalledPackage {
    /// Create a new record stamped with the current time
    pub fn new(metadata: PackageMetadata, checksum: String, install_source: InstallSource) -> Self {
        let mut metadata = metadata;
        metadata.trust = None;
        Self {
            metadata,
            installed_at: chrono::Utc::now().to_rfc3339(),
            checksum,
            certified: false,
            cert_type: None,
            install_source,
        }
    }

    /// Insert or replace the record for this package
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        let m = &self.metadata;
        conn.execute(
            "INSERT OR REPLACE INTO installed
             (name, version, description, author, license, category, dependencies, source, main,
              installed_at, checksum, install_source, certified, cert_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                &m.name,
                &m.version,
                &m.description,
                &m.author,
                &m.license,
                &m.category,
                dependencies_to_json(&m.dependencies)?,
                &m.source,
                &m.main,
                &self.installed_at,
                &self.checksum,
                self.install_source.as_str(),
                self.certified as i32,
                &self.cert_type,
            ],
        )?;
        Ok(())
    }

    /// Find an installed package by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT name, version, description, author, license, category, dependencies, source, main,
                    installed_at, checksum, install_source, certified, cert_type
             FROM installed WHERE name = ?1",
        )?;

        let package = stmt.query_row([name], Self::from_row).optional()?;

        Ok(package)
    }

    pub fn is_installed(conn: &Connection, name: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM installed WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// List all installed packages
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT name, version, description, author, license, category, dependencies, source, main,
                    installed_at, checksum, install_source, certified, cert_type
             FROM installed ORDER BY name",
        )?;

        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Delete the record for a package
    pub fn delete(conn: &Connection, name: &str) -> Result<()> {
        conn.execute("DELETE FROM installed WHERE name = ?1", [name])?;
        Ok(())
    }

    /// Convert a database row to an InstalledPackage
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let source_str: String = row.get(11)?;
        let install_source = source_str
            .parse::<InstallSource>()
            .map_err(|e| conversion_error(11, e))?;

        Ok(Self {
            metadata: metadata_from_row(row)?,
            installed_at: row.get(9)?,
            checksum: row.get(10)?,
            install_source,
            certified: row.get::<_, i32>(12)? != 0,
            cert_type: row.get(13)?,
        })
    }
}

/// Certificate accepted at install time
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub certificate: Certificate,
    pub stored_at: Option<String>,
}

impl StoredCertificate {
    /// Store (or replace) the certificate for its package
    pub fn save(conn: &Connection, certificate: &Certificate) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO certificates
             (package_name, cert_id, author, cert_type, issued_at, signature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &certificate.package_name,
                &certificate.cert_id,
                &certificate.author,
                certificate.cert_type.as_str(),
                &certificate.issued_at,
                &certificate.signature,
            ],
        )?;
        Ok(())
    }

    /// Find the certificate stored for a package
    pub fn find_by_package(conn: &Connection, package_name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT package_name, cert_id, author, cert_type, issued_at, signature, stored_at
             FROM certificates WHERE package_name = ?1",
        )?;

        let cert = stmt.query_row([package_name], Self::from_row).optional()?;

        Ok(cert)
    }

    /// List all stored certificates
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT package_name, cert_id, author, cert_type, issued_at, signature, stored_at
             FROM certificates ORDER BY package_name",
        )?;

        let certs = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(certs)
    }

    pub fn delete(conn: &Connection, package_name: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM certificates WHERE package_name = ?1",
            [package_name],
        )?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let type_str: String = row.get(3)?;
        let cert_type = type_str
            .parse::<CertificateType>()
            .map_err(|e| conversion_error(3, e))?;

        Ok(Self {
            certificate: Certificate {
                package_name: row.get(0)?,
                cert_id: row.get(1)?,
                author: row.get(2)?,
                cert_type,
                issued_at: row.get(4)?,
                signature: row.get(5)?,
            },
            stored_at: row.get(6)?,
        })
    }
}

/// Key/value setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

impl Setting {
    pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            [key, value],
        )?;
        Ok(())
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;

        let settings = stmt
            .query_map([], |row| {
                Ok(Self {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(settings)
    }
}
