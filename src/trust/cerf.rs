// src/trust/cerf.rs

//! Repository trust files (`alp.cerf`)

use super::{OFFICIAL_AUTHOR, TrustStatus, authorize_official, digest, now_timestamp, random_token};
use crate::error::{Error, Result};
use crate::packages::TrustAnnotation;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// File name probed at a package's source
pub const CERF_FILE: &str = "alp.cerf";

/// Format tag written into every trust file
pub const CERF_FORMAT: &str = "alp-cerf/1";

/// Magic constant, also part of the signed content
pub const CERF_MAGIC: &str = "ALP-CERF";

/// Trust level declared by a trust file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CerfType {
    Official,
    Dev,
    Normal,
}

impl CerfType {
    pub fn as_str(&self) -> &str {
        match self {
            CerfType::Official => "official",
            CerfType::Dev => "dev",
            CerfType::Normal => "normal",
        }
    }

    /// Map a requested label at issuance time; unknown labels become `normal`
    pub fn normalize(label: &str) -> Self {
        label.trim().to_lowercase().parse().unwrap_or(CerfType::Normal)
    }
}

impl FromStr for CerfType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "official" => Ok(CerfType::Official),
            "dev" => Ok(CerfType::Dev),
            "normal" => Ok(CerfType::Normal),
            _ => Err(format!("Invalid trust file type: {}", s)),
        }
    }
}

/// Standalone signed trust declaration for a package
///
/// Fields are kept as plain strings so that a document with missing or
/// unknown values still parses and is rejected by [`RepoTrustFile::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTrustFile {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub magic: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, rename = "type")]
    pub cert_type: String,
    #[serde(default)]
    pub issued_at: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub signature: String,
}

impl RepoTrustFile {
    /// Issue a trust file
    ///
    /// `official` needs the signing password and forces the reserved author;
    /// unknown type labels are issued as `normal`.
    pub fn issue(package: &str, author: &str, type_label: &str, password: Option<&str>) -> Result<Self> {
        let cert_type = CerfType::normalize(type_label);
        let author = match cert_type {
            CerfType::Official => {
                authorize_official(password.unwrap_or_default())?;
                OFFICIAL_AUTHOR.to_string()
            }
            CerfType::Dev | CerfType::Normal => {
                let author = author.trim();
                if author.is_empty() {
                    return Err(Error::TrustInvalid("trust file author is empty".to_string()));
                }
                if author == OFFICIAL_AUTHOR {
                    return Err(Error::Unauthorized);
                }
                author.to_string()
            }
        };

        let mut cerf = Self {
            format: CERF_FORMAT.to_string(),
            magic: CERF_MAGIC.to_string(),
            package: package.to_string(),
            author,
            cert_type: cert_type.as_str().to_string(),
            issued_at: now_timestamp(),
            token: random_token(),
            signature: String::new(),
        };
        cerf.signature = cerf.expected_signature();
        Ok(cerf)
    }

    /// Parse a trust file document
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::TrustInvalid(format!("malformed trust file: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::TrustInvalid(format!("cannot serialize trust file: {}", e)))
    }

    fn expected_signature(&self) -> String {
        digest(&[
            self.package.as_str(),
            self.author.as_str(),
            self.cert_type.as_str(),
            self.issued_at.as_str(),
            self.token.as_str(),
            self.magic.as_str(),
        ])
    }

    /// Check mandatory fields, magic, type label and signature
    pub fn verify(&self) -> Result<CerfType> {
        let fields = [
            ("format", &self.format),
            ("magic", &self.magic),
            ("package", &self.package),
            ("author", &self.author),
            ("type", &self.cert_type),
            ("issued_at", &self.issued_at),
            ("token", &self.token),
            ("signature", &self.signature),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(Error::TrustInvalid(format!(
                "trust file missing fields: {}",
                missing.join(", ")
            )));
        }

        if self.magic != CERF_MAGIC {
            return Err(Error::TrustInvalid(format!("bad magic '{}'", self.magic)));
        }

        let cert_type: CerfType = self.cert_type.parse().map_err(Error::TrustInvalid)?;

        if self.expected_signature() != self.signature {
            return Err(Error::TrustInvalid(format!(
                "trust file signature mismatch for {}",
                self.package
            )));
        }

        let official_author = self.author == OFFICIAL_AUTHOR;
        match cert_type {
            CerfType::Official if !official_author => {
                return Err(Error::TrustInvalid(format!(
                    "official trust file not issued by {}",
                    OFFICIAL_AUTHOR
                )));
            }
            CerfType::Dev | CerfType::Normal if official_author => {
                return Err(Error::TrustInvalid(format!(
                    "{} trust file claims the reserved author {}",
                    cert_type.as_str(),
                    OFFICIAL_AUTHOR
                )));
            }
            _ => {}
        }

        debug!("Trust file for {} verified ({})", self.package, cert_type.as_str());
        Ok(cert_type)
    }

    /// Human-facing verdict for installing `package_name`
    pub fn status(&self, package_name: &str) -> TrustStatus {
        if self.package != package_name {
            return TrustStatus::Invalid {
                reason: format!("trust file issued for {}, not {}", self.package, package_name),
            };
        }
        match self.verify() {
            Ok(CerfType::Official) => TrustStatus::Official,
            Ok(CerfType::Dev) => TrustStatus::Dev {
                author: self.author.clone(),
            },
            Ok(CerfType::Normal) => TrustStatus::Normal {
                author: self.author.clone(),
            },
            Err(e) => TrustStatus::Invalid {
                reason: e.to_string(),
            },
        }
    }

    /// Catalog annotation derived from this file
    pub fn annotation(&self, package_name: &str) -> TrustAnnotation {
        let status = self.status(package_name);
        TrustAnnotation {
            cert_type: self.cert_type.clone(),
            cert_author: self.author.clone(),
            cert_valid: status.is_trusted(),
            cert_message: status.to_string(),
        }
    }
}

/// Verdict for a package given its (optional, possibly unparsable) trust file text
pub fn status_from_text(package_name: &str, text: Option<&str>) -> TrustStatus {
    match text {
        None => TrustStatus::Unsigned,
        Some(text) => match RepoTrustFile::parse(text) {
            Ok(cerf) => cerf.status(package_name),
            Err(e) => TrustStatus::Invalid {
                reason: e.to_string(),
            },
        },
    }
}
