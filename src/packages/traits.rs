// src/packages/traits.rs

//! Common interface for installable package sources

use crate::db::models::InstallSource;
use crate::error::{Error, Result};
use crate::packages::PackageMetadata;
use crate::trust::{Certificate, TrustStatus};
use std::path::{Path, PathBuf};

/// Install script file name
pub const INSTALL_SCRIPT: &str = "alp.sh";

/// Uninstall script file name
pub const UNINSTALL_SCRIPT: &str = "alp_u.sh";

/// Readme carrying `key = value` metadata
pub const README_FILE: &str = "README.md";

/// File name a payload is written under inside the package directory
///
/// Only the last component of `declared` is used. It must not collide with
/// the scripts or the readme, which are written to the same directory.
pub fn payload_file_name(declared: &str) -> Result<String> {
    let name = Path::new(declared)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidMetadata(format!("invalid payload file name '{}'", declared)))?;
    if [INSTALL_SCRIPT, UNINSTALL_SCRIPT, README_FILE].contains(&name) {
        return Err(Error::InvalidMetadata(format!(
            "payload file name '{}' is reserved",
            declared
        )));
    }
    Ok(name.to_string())
}

/// Files written to a package directory before the install script runs
#[derive(Debug, Clone)]
pub struct MaterializedFiles {
    pub install_script: PathBuf,
    pub uninstall_script: Option<PathBuf>,
    pub readme: Option<PathBuf>,
    /// Payload path and its declared file name
    pub main: Option<(PathBuf, String)>,
}

/// Something the lifecycle manager can install: a remote package or a bundle
pub trait PackageSource {
    /// Metadata of the package being installed
    fn metadata(&self) -> &PackageMetadata;

    /// Where the package came from
    fn install_source(&self) -> InstallSource;

    /// Trust verdict for the package, computed from its trust artifact
    fn trust_status(&self) -> TrustStatus;

    /// Embedded certificate to persist after a certified install
    fn certificate(&self) -> Option<&Certificate> {
        None
    }

    /// Raw bytes of the install script
    fn install_script(&self) -> Result<Vec<u8>>;

    /// Write scripts and payload into `dir`
    fn materialize(&self, dir: &Path) -> Result<MaterializedFiles>;
}
