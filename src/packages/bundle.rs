// src/packages/bundle.rs

//! Self-contained local package archives (`.alp` bundles)
//!
//! A bundle is a single JSON document:
//!
//! ```text
//! format_version  "1.0" | "1.1" (adds payload) | "1.2" (adds certificate)
//! metadata        PackageMetadata extracted from the README
//! files           base64 install/uninstall scripts, readme text, payload
//! certificate     optional embedded Certificate
//! compiled_at     RFC 3339 timestamp
//! checksum        SHA-256 of the compact document with checksum = ""
//! ```
//!
//! Decoding does not reject a checksum mismatch; callers decide what a
//! mismatch means (see [`Bundle::verify_checksum`]).

use crate::db::models::InstallSource;
use crate::error::{Error, Result};
use crate::filesystem::{is_executable_name, write_file};
use crate::packages::metadata::validate_package_name;
use crate::packages::traits::{
    INSTALL_SCRIPT, MaterializedFiles, PackageSource, README_FILE, UNINSTALL_SCRIPT,
    payload_file_name,
};
use crate::packages::PackageMetadata;
use crate::trust::{Certificate, TrustStatus, digest_bytes};
use base64::prelude::{BASE64_STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// File extension of bundle files
pub const BUNDLE_EXTENSION: &str = "alp";

/// Bundle format versions this implementation reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormatVersion {
    V1_0,
    V1_1,
    V1_2,
}

impl FormatVersion {
    /// Version written by [`Bundle::encode`]
    pub const CURRENT: FormatVersion = FormatVersion::V1_2;

    pub fn as_str(&self) -> &str {
        match self {
            FormatVersion::V1_0 => "1.0",
            FormatVersion::V1_1 => "1.1",
            FormatVersion::V1_2 => "1.2",
        }
    }

    pub fn supports_payload(&self) -> bool {
        *self >= FormatVersion::V1_1
    }

    pub fn supports_certificate(&self) -> bool {
        *self >= FormatVersion::V1_2
    }
}

impl FromStr for FormatVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1.0" => Ok(FormatVersion::V1_0),
            "1.1" => Ok(FormatVersion::V1_1),
            "1.2" => Ok(FormatVersion::V1_2),
            _ => Err(Error::UnsupportedFormat(format!("unknown format_version '{}'", s))),
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a bundle is signed at encode time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signing {
    None,
    Custom { author: String },
    Official { password: String },
}

/// Embedded files of a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFiles {
    /// Base64 install script
    pub install: String,
    /// Base64 uninstall script
    pub uninstall: String,
    /// Readme text
    pub readme: String,
    /// Base64 payload file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_name: Option<String>,
}

/// A decoded or freshly encoded bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub format_version: String,
    pub metadata: PackageMetadata,
    pub files: BundleFiles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
    pub compiled_at: String,
    #[serde(default)]
    pub checksum: String,
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD
        .decode(value)
        .map_err(|e| Error::UnsupportedFormat(format!("invalid base64 in {}: {}", field, e)))
}

impl Bundle {
    /// Build a bundle from a package source directory
    ///
    /// The directory must contain `alp.sh`, `alp_u.sh` and `README.md`; all
    /// absent files are reported together.
    pub fn encode(dir: &Path, signing: &Signing) -> Result<Self> {
        debug!("Encoding bundle from {}", dir.display());

        let missing: Vec<String> = [INSTALL_SCRIPT, UNINSTALL_SCRIPT, README_FILE]
            .iter()
            .filter(|name| !dir.join(name).is_file())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingFiles(missing));
        }

        let readme = fs::read_to_string(dir.join(README_FILE))?;
        let metadata = PackageMetadata::from_readme(&readme)?;
        let install = fs::read(dir.join(INSTALL_SCRIPT))?;
        let uninstall = fs::read(dir.join(UNINSTALL_SCRIPT))?;

        let (main, main_name) = match &metadata.main {
            Some(main) => {
                let name = payload_file_name(main)?;
                let path = dir.join(&name);
                if path.is_file() {
                    let payload = fs::read(&path)?;
                    debug!("Embedding payload {} ({} bytes)", name, payload.len());
                    (Some(BASE64_STANDARD.encode(payload)), Some(name))
                } else {
                    warn!("Payload {} declared but not found in {}", name, dir.display());
                    (None, None)
                }
            }
            None => (None, None),
        };

        let certificate = match signing {
            Signing::None => None,
            Signing::Custom { author } => Some(Certificate::issue_custom(&metadata.name, author)?),
            Signing::Official { password } => {
                Some(Certificate::issue_official(&metadata.name, password)?)
            }
        };

        let mut bundle = Self {
            format_version: FormatVersion::CURRENT.as_str().to_string(),
            metadata,
            files: BundleFiles {
                install: BASE64_STANDARD.encode(install),
                uninstall: BASE64_STANDARD.encode(uninstall),
                readme,
                main,
                main_name,
            },
            certificate,
            compiled_at: chrono::Utc::now().to_rfc3339(),
            checksum: String::new(),
        };
        bundle.checksum = bundle.compute_checksum()?;

        info!(
            "Encoded bundle {} {} ({})",
            bundle.metadata.name,
            bundle.metadata.version,
            if bundle.certificate.is_some() { "signed" } else { "unsigned" }
        );
        Ok(bundle)
    }

    /// Parse and validate a bundle document
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bundle: Bundle = serde_json::from_slice(bytes)
            .map_err(|e| Error::UnsupportedFormat(format!("malformed bundle: {}", e)))?;

        let version: FormatVersion = bundle.format_version.parse()?;
        if !version.supports_payload()
            && (bundle.files.main.is_some() || bundle.files.main_name.is_some())
        {
            return Err(Error::UnsupportedFormat(format!(
                "payload requires format 1.1, bundle declares {}",
                version
            )));
        }
        if !version.supports_certificate() && bundle.certificate.is_some() {
            return Err(Error::UnsupportedFormat(format!(
                "certificate requires format 1.2, bundle declares {}",
                version
            )));
        }
        if bundle.files.main.is_some() != bundle.files.main_name.is_some() {
            return Err(Error::UnsupportedFormat(
                "payload and payload name must appear together".to_string(),
            ));
        }
        validate_package_name(&bundle.metadata.name)?;
        if let Some(main_name) = &bundle.files.main_name {
            payload_file_name(main_name)?;
        }

        decode_b64("install script", &bundle.files.install)?;
        decode_b64("uninstall script", &bundle.files.uninstall)?;
        if let Some(main) = &bundle.files.main {
            decode_b64("payload", main)?;
        }

        if !bundle.verify_checksum() {
            warn!(
                "Checksum mismatch in bundle {} {}",
                bundle.metadata.name, bundle.metadata.version
            );
        }

        Ok(bundle)
    }

    /// Read and decode a bundle file
    pub fn read(path: &Path) -> Result<Self> {
        debug!("Reading bundle {}", path.display());
        let bytes = fs::read(path)?;
        Self::decode(&bytes)
    }

    /// Serialized (pretty) document
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| Error::UnsupportedFormat(format!("cannot serialize bundle: {}", e)))
    }

    /// Write the bundle to `path`
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_bytes()?)?;
        info!("Wrote bundle to {}", path.display());
        Ok(())
    }

    /// `<name>-<version>.alp`
    pub fn default_file_name(&self) -> PathBuf {
        PathBuf::from(format!(
            "{}-{}.{}",
            self.metadata.name, self.metadata.version, BUNDLE_EXTENSION
        ))
    }

    /// Checksum over the compact document with the checksum field cleared
    pub fn compute_checksum(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.checksum.clear();
        let canonical = serde_json::to_vec(&unsigned)
            .map_err(|e| Error::UnsupportedFormat(format!("cannot serialize bundle: {}", e)))?;
        Ok(digest_bytes(&canonical))
    }

    pub fn verify_checksum(&self) -> bool {
        self.compute_checksum()
            .map(|computed| computed == self.checksum)
            .unwrap_or(false)
    }

    pub fn uninstall_script(&self) -> Result<Vec<u8>> {
        decode_b64("uninstall script", &self.files.uninstall)
    }

    /// Payload name and bytes, if the bundle carries one
    pub fn payload(&self) -> Result<Option<(String, Vec<u8>)>> {
        match (&self.files.main_name, &self.files.main) {
            (Some(name), Some(data)) => {
                Ok(Some((payload_file_name(name)?, decode_b64("payload", data)?)))
            }
            _ => Ok(None),
        }
    }
}

impl PackageSource for Bundle {
    fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    fn install_source(&self) -> InstallSource {
        InstallSource::Local
    }

    /// A checksum mismatch overrides any certificate verdict
    fn trust_status(&self) -> TrustStatus {
        if !self.verify_checksum() {
            return TrustStatus::Invalid {
                reason: "bundle checksum mismatch".to_string(),
            };
        }
        match &self.certificate {
            Some(cert) => cert.status(&self.metadata.name),
            None => TrustStatus::Unsigned,
        }
    }

    fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    fn install_script(&self) -> Result<Vec<u8>> {
        decode_b64("install script", &self.files.install)
    }

    fn materialize(&self, dir: &Path) -> Result<MaterializedFiles> {
        let main_name = self.files.main_name.as_deref();

        let install_script = dir.join(INSTALL_SCRIPT);
        write_file(
            &install_script,
            &self.install_script()?,
            is_executable_name(INSTALL_SCRIPT, main_name),
        )?;

        let uninstall_script = dir.join(UNINSTALL_SCRIPT);
        write_file(
            &uninstall_script,
            &self.uninstall_script()?,
            is_executable_name(UNINSTALL_SCRIPT, main_name),
        )?;

        let readme = dir.join(README_FILE);
        write_file(&readme, self.files.readme.as_bytes(), false)?;

        let main = match self.payload()? {
            Some((name, bytes)) => {
                let path = dir.join(&name);
                write_file(&path, &bytes, is_executable_name(&name, Some(&name)))?;
                Some((path, name))
            }
            None => None,
        };

        debug!("Materialized bundle {} into {}", self.metadata.name, dir.display());
        Ok(MaterializedFiles {
            install_script,
            uninstall_script: Some(uninstall_script),
            readme: Some(readme),
            main,
        })
    }
}
