// src/filesystem.rs

//! State directory layout and file helpers
//!
//! ```text
//! <root>/alp.db            state database
//! <root>/cache/            downloaded scripts
//! <root>/installed/<name>/ per-package files kept after install
//! ```

use crate::error::{Error, Result};
use crate::packages::metadata::validate_package_name;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Paths of an Alp state root
#[derive(Debug, Clone)]
pub struct AlpPaths {
    root: PathBuf,
}

impl AlpPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.alp`
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::InitError("Cannot determine home directory".to_string()))?;
        Ok(Self::new(home.join(".alp")))
    }

    /// Create the directory skeleton
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.root.clone(), self.cache_dir(), self.installed_dir()] {
            fs::create_dir_all(&dir).map_err(|e| {
                Error::InitError(format!("Failed to create directory {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("alp.db")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn installed_dir(&self) -> PathBuf {
        self.root.join("installed")
    }

    /// `installed/<name>`; refuses names that would leave `installed/`
    pub fn package_dir(&self, name: &str) -> Result<PathBuf> {
        validate_package_name(name)?;
        Ok(self.installed_dir().join(name))
    }
}

/// Whether a materialized file gets the executable bit
pub fn is_executable_name(file_name: &str, main: Option<&str>) -> bool {
    file_name.ends_with(".sh") || main == Some(file_name)
}

/// Write a file, creating parents, optionally marking it executable
pub fn write_file(path: &Path, contents: &[u8], executable: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    if executable {
        set_executable(path)?;
    }
    Ok(())
}

#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Total size of regular files below `path` (0 if it does not exist)
pub fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(ft) if ft.is_dir() => dir_size(&entry.path()),
            Ok(ft) if ft.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        })
        .sum()
}

/// Remove a directory tree, logging instead of failing
pub fn remove_dir_best_effort(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_dir_all(path) {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Empty the cache directory, returning the number of bytes freed
pub fn clean_cache(cache_dir: &Path) -> Result<u64> {
    let freed = dir_size(cache_dir);
    if cache_dir.exists() {
        fs::remove_dir_all(cache_dir)?;
    }
    fs::create_dir_all(cache_dir)?;
    Ok(freed)
}

/// Delete oldest cache files until the cache fits in `ceiling_bytes`
///
/// Returns the number of files removed.
pub fn prune_cache(cache_dir: &Path, ceiling_bytes: u64) -> Result<usize> {
    let mut total = dir_size(cache_dir);
    if total <= ceiling_bytes {
        return Ok(0);
    }

    let mut files: Vec<(SystemTime, u64, PathBuf)> = fs::read_dir(cache_dir)?
        .flatten()
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, meta.len(), entry.path()))
        })
        .collect();
    files.sort_by_key(|(modified, _, _)| *modified);

    let mut removed = 0;
    for (_, size, path) in files {
        if total <= ceiling_bytes {
            break;
        }
        debug!("Pruning cache file {}", path.display());
        fs::remove_file(&path)?;
        total = total.saturating_sub(size);
        removed += 1;
    }
    Ok(removed)
}
