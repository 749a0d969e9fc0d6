// src/catalog.rs

//! The package catalog
//!
//! An in-memory view of the `packages` table keyed by name. It is loaded
//! once per command and written back as a whole after a refresh.

use crate::db::{self, models::CatalogPackage};
use crate::error::Result;
use crate::packages::PackageMetadata;
use rusqlite::Connection;
use std::collections::BTreeMap;
use tracing::debug;

/// Maximum number of near matches offered for an unknown name
const MAX_SUGGESTIONS: usize = 5;

/// Known packages, ordered by name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    packages: BTreeMap<String, PackageMetadata>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every catalog row
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut catalog = Self::new();
        for row in CatalogPackage::list_all(conn)? {
            catalog.insert(row.metadata);
        }
        debug!("Loaded catalog with {} packages", catalog.len());
        Ok(catalog)
    }

    /// Replace the stored catalog with this one in a single transaction
    pub fn save(&self, conn: &Connection) -> Result<()> {
        db::transaction(conn, |tx| {
            CatalogPackage::delete_all(tx)?;
            for metadata in self.packages.values() {
                CatalogPackage::new(metadata.clone()).insert(tx)?;
            }
            Ok(())
        })
    }

    /// Add or replace a package; a later entry with the same name wins
    pub fn insert(&mut self, metadata: PackageMetadata) {
        self.packages.insert(metadata.name.clone(), metadata);
    }

    pub fn get(&self, name: &str) -> Option<&PackageMetadata> {
        self.packages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageMetadata> {
        self.packages.values()
    }

    /// Case-insensitive keyword search over names and descriptions
    pub fn search(&self, keyword: &str) -> Vec<&PackageMetadata> {
        self.packages.values().filter(|m| m.matches(keyword)).collect()
    }

    /// Packages in a category; entries without one count as `misc`
    pub fn in_category(&self, category: &str) -> Vec<&PackageMetadata> {
        self.packages
            .values()
            .filter(|m| m.category_or_default().eq_ignore_ascii_case(category))
            .collect()
    }

    /// Names offered when `name` is unknown
    pub fn suggestions(&self, name: &str) -> Vec<String> {
        self.search(name)
            .into_iter()
            .map(|m| m.name.clone())
            .take(MAX_SUGGESTIONS)
            .collect()
    }
}
