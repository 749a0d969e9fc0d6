// src/lib.rs

//! Alp Package Manager
//!
//! Script-driven package manager: packages are a README carrying
//! `key = value` metadata plus an install and an uninstall script, fetched
//! from their source repository or shipped as a single-file `.alp` bundle.
//!
//! # Architecture
//!
//! - Database-first: catalog, installed records, certificates and settings
//!   in SQLite, no config files
//! - Dependency order computed depth-first with cycle detection
//! - Bundles: versioned JSON archives with an integrity checksum and an
//!   optional embedded certificate
//! - Trust files (`alp.cerf`) published next to a package's source
//! - Scripts run through a pluggable runner under a wall-clock limit

pub mod catalog;
pub mod config;
pub mod db;
mod error;
pub mod filesystem;
pub mod lifecycle;
pub mod packages;
pub mod repository;
pub mod resolver;
pub mod runner;
pub mod trust;
pub mod version;

pub use error::{Error, Result};
