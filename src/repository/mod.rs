// src/repository/mod.rs

//! Repository access and catalog refresh
//!
//! This module provides functionality for:
//! - Fetching the repository index and per-package README/trust files
//! - Downloading install scripts with retry support
//! - Rebuilding the catalog from the index
//! - Deciding when the catalog is stale

use crate::catalog::Catalog;
use crate::db::models::Setting;
use crate::error::{Error, Result};
use crate::packages::PackageMetadata;
use crate::packages::traits::README_FILE;
use crate::trust::cerf::{CERF_FILE, RepoTrustFile};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use rusqlite::Connection;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Default repository index
pub const DEFAULT_INDEX_URL: &str =
    "https://github.com/ATOMGAMERAGA/alp-repo/raw/refs/heads/main/repo.alp";

/// Settings key holding the last successful refresh time
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed downloads
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Network collaborator used by the catalog refresh and remote installs
pub trait Fetcher {
    /// Fetch a text document; `Ok(None)` when the server reports it missing
    fn fetch_text(&self, url: &str) -> Result<Option<String>>;

    /// Download `url` into `dest`
    fn download_file(&self, url: &str, dest: &Path) -> Result<()>;
}

/// HTTP client wrapper with retry support
pub struct RepositoryClient {
    client: Client,
    max_retries: u32,
}

impl RepositoryClient {
    /// Create a new repository client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("Alp-PackageManager/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Send a GET request, retrying transport failures with linear backoff
    fn get_with_retry(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to fetch {} after {} attempts: {}",
                            url, attempt, e
                        )));
                    }
                    warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

impl Fetcher for RepositoryClient {
    fn fetch_text(&self, url: &str) -> Result<Option<String>> {
        debug!("Fetching {}", url);
        let response = self.get_with_retry(url)?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Not found: {}", url);
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let text = response
            .text()
            .map_err(|e| Error::DownloadError(format!("Failed to read body of {}: {}", url, e)))?;
        Ok(Some(text))
    }

    fn download_file(&self, url: &str, dest_path: &Path) -> Result<()> {
        info!("Downloading {} to {}", url, dest_path.display());

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut response = self.get_with_retry(url)?;
        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        // Write to temporary file first
        let temp_path = dest_path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        io::copy(&mut response, &mut file)
            .map_err(|e| Error::DownloadError(format!("Failed to write downloaded data: {}", e)))?;

        // Atomic rename from temp to final destination
        fs::rename(&temp_path, dest_path)?;

        debug!("Downloaded to {}", dest_path.display());
        Ok(())
    }
}

/// URL of `file` at a package source
///
/// GitHub repository pages map to raw content on the `main` branch; any
/// other locator is treated as a directory URL.
pub fn raw_file_url(source: &str, file: &str) -> String {
    let base = source.trim().trim_end_matches('/');
    match base.strip_prefix("https://github.com/") {
        Some(repo) => format!(
            "https://raw.githubusercontent.com/{}/refs/heads/main/{}",
            repo, file
        ),
        None => format!("{}/{}", base, file),
    }
}

/// Source locators listed in an index document
pub fn parse_index(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Fetch metadata and trust annotation for one source locator
pub fn fetch_package(fetcher: &dyn Fetcher, source: &str) -> Result<Option<PackageMetadata>> {
    let readme = match fetcher.fetch_text(&raw_file_url(source, README_FILE))? {
        Some(text) => text,
        None => {
            warn!("README.md not found: {}", source);
            return Ok(None);
        }
    };

    let mut metadata = match PackageMetadata::from_readme(&readme) {
        Ok(meta) => meta,
        Err(e) => {
            warn!("Skipping {}: {}", source, e);
            return Ok(None);
        }
    };
    metadata.source = source.to_string();

    metadata.trust = match fetcher.fetch_text(&raw_file_url(source, CERF_FILE)) {
        Ok(Some(text)) => match RepoTrustFile::parse(&text) {
            Ok(cerf) => Some(cerf.annotation(&metadata.name)),
            Err(e) => {
                warn!("Unreadable trust file for {}: {}", metadata.name, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("Trust file probe failed for {}: {}", metadata.name, e);
            None
        }
    };

    Ok(Some(metadata))
}

/// Rebuild the catalog from the repository index
///
/// Locators whose README cannot be fetched or parsed are skipped. The
/// catalog table is replaced as a whole.
pub fn sync_catalog(conn: &Connection, fetcher: &dyn Fetcher, index_url: &str) -> Result<usize> {
    info!("Refreshing catalog from {}", index_url);

    let index = fetcher
        .fetch_text(index_url)?
        .ok_or_else(|| Error::DownloadError(format!("Repository index not found: {}", index_url)))?;

    let mut catalog = Catalog::new();
    for source in parse_index(&index) {
        match fetch_package(fetcher, &source) {
            Ok(Some(metadata)) => {
                debug!("Catalog entry {} {}", metadata.name, metadata.version);
                catalog.insert(metadata);
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping {}: {}", source, e),
        }
    }

    catalog.save(conn)?;
    Setting::set(conn, LAST_SYNC_KEY, &current_timestamp())?;

    info!("Catalog refreshed: {} packages", catalog.len());
    Ok(catalog.len())
}

/// Check if the catalog needs a refresh
pub fn needs_sync(last_sync: Option<&str>, interval_secs: u64) -> bool {
    match last_sync {
        None => true, // Never synced
        Some(last_sync) => match parse_timestamp(last_sync) {
            Ok(last_sync_time) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);

                let age_seconds = now.saturating_sub(last_sync_time);
                age_seconds > interval_secs
            }
            Err(_) => true, // If we can't parse timestamp, force sync
        },
    }
}

/// Refresh only if the stored `last_sync` is older than `interval_secs`
///
/// Returns `Some(count)` when a refresh happened.
pub fn sync_if_stale(
    conn: &Connection,
    fetcher: &dyn Fetcher,
    index_url: &str,
    interval_secs: u64,
) -> Result<Option<usize>> {
    let last_sync = Setting::get(conn, LAST_SYNC_KEY)?;
    if !needs_sync(last_sync.as_deref(), interval_secs) {
        debug!("Catalog is fresh, skipping refresh");
        return Ok(None);
    }
    sync_catalog(conn, fetcher, index_url).map(Some)
}

/// Get current timestamp as ISO 8601 string
pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Parse ISO 8601 timestamp to Unix seconds
pub fn parse_timestamp(timestamp: &str) -> Result<u64> {
    use chrono::DateTime;

    let dt = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| Error::ParseError(format!("Invalid timestamp: {}", e)))?;

    Ok(dt.timestamp().max(0) as u64)
}
