// src/config.rs

//! Typed configuration backed by the `settings` table
//!
//! Every key has a default, so an empty database yields a usable config.
//! Keys not listed here (such as `last_sync`) are bookkeeping and are
//! ignored.

use crate::db::models::Setting;
use crate::error::{Error, Result};
use crate::repository::DEFAULT_INDEX_URL;
use rusqlite::Connection;
use std::time::Duration;
use tracing::warn;

/// Recognised setting keys
pub const KEYS: &[&str] = &[
    "auto_update",
    "update_interval",
    "cache_size",
    "check_dependencies",
    "verify_packages",
    "keep_cache",
    "script_timeout",
    "index_url",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Refresh a stale catalog before install and upgrade
    pub auto_update: bool,
    /// Catalog freshness window in seconds
    pub update_interval: u64,
    /// Download cache ceiling in MiB
    pub cache_size: u64,
    /// Install declared dependencies first
    pub check_dependencies: bool,
    /// Ask before running unsigned or invalid packages
    pub verify_packages: bool,
    /// Keep downloaded scripts in the cache
    pub keep_cache: bool,
    /// Wall-clock limit for one script, in seconds
    pub script_timeout: u64,
    pub index_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_update: true,
            update_interval: 3600,
            cache_size: 1000,
            check_dependencies: true,
            verify_packages: true,
            keep_cache: false,
            script_timeout: 300,
            index_url: DEFAULT_INDEX_URL.to_string(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::ConfigError(format!(
            "{} expects true or false, got '{}'",
            key, value
        ))),
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        Error::ConfigError(format!(
            "{} expects a non-negative integer, got '{}'",
            key, value
        ))
    })
}

impl Config {
    /// Read the config, falling back to defaults for absent or bad values
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut config = Self::default();
        for setting in Setting::list_all(conn)? {
            if !KEYS.contains(&setting.key.as_str()) {
                continue;
            }
            if let Err(e) = config.apply(&setting.key, &setting.value) {
                warn!("Ignoring stored setting: {}", e);
            }
        }
        Ok(config)
    }

    /// Validate and store one setting
    pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
        let mut probe = Self::default();
        probe.apply(key, value)?;
        Setting::set(conn, key, value.trim())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "auto_update" => self.auto_update = parse_bool(key, value)?,
            "update_interval" => self.update_interval = parse_u64(key, value)?,
            "cache_size" => self.cache_size = parse_u64(key, value)?,
            "check_dependencies" => self.check_dependencies = parse_bool(key, value)?,
            "verify_packages" => self.verify_packages = parse_bool(key, value)?,
            "keep_cache" => self.keep_cache = parse_bool(key, value)?,
            "script_timeout" => {
                let secs = parse_u64(key, value)?;
                if secs == 0 {
                    return Err(Error::ConfigError(
                        "script_timeout must be at least 1 second".to_string(),
                    ));
                }
                self.script_timeout = secs;
            }
            "index_url" => {
                let url = value.trim();
                if url.is_empty() {
                    return Err(Error::ConfigError("index_url cannot be empty".to_string()));
                }
                self.index_url = url.to_string();
            }
            _ => {
                return Err(Error::ConfigError(format!(
                    "Unknown setting '{}' (known: {})",
                    key,
                    KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Key/value pairs in display order
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("auto_update", self.auto_update.to_string()),
            ("update_interval", self.update_interval.to_string()),
            ("cache_size", self.cache_size.to_string()),
            ("check_dependencies", self.check_dependencies.to_string()),
            ("verify_packages", self.verify_packages.to_string()),
            ("keep_cache", self.keep_cache.to_string()),
            ("script_timeout", self.script_timeout.to_string()),
            ("index_url", self.index_url.clone()),
        ]
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout)
    }

    pub fn cache_ceiling_bytes(&self) -> u64 {
        self.cache_size.saturating_mul(1024 * 1024)
    }
}
