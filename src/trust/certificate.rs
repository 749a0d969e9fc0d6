// src/trust/certificate.rs

//! Certificates embedded in bundles

use super::{OFFICIAL_AUTHOR, TrustStatus, authorize_official, digest, now_timestamp, random_token};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Certificate type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    Official,
    Custom,
}

impl CertificateType {
    pub fn as_str(&self) -> &str {
        match self {
            CertificateType::Official => "official",
            CertificateType::Custom => "custom",
        }
    }
}

impl FromStr for CertificateType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "official" => Ok(CertificateType::Official),
            "custom" => Ok(CertificateType::Custom),
            _ => Err(format!("Invalid certificate type: {}", s)),
        }
    }
}

/// Provenance record carried inside a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub cert_id: String,
    pub package_name: String,
    pub author: String,
    #[serde(rename = "type")]
    pub cert_type: CertificateType,
    pub issued_at: String,
    pub signature: String,
}

impl Certificate {
    fn issue(package_name: &str, author: &str, cert_type: CertificateType) -> Self {
        let issued_at = now_timestamp();
        let signature = digest(&[package_name, author, issued_at.as_str()]);
        Self {
            cert_id: random_token(),
            package_name: package_name.to_string(),
            author: author.to_string(),
            cert_type,
            issued_at,
            signature,
        }
    }

    /// Issue a certificate signed by `author`
    pub fn issue_custom(package_name: &str, author: &str) -> Result<Self> {
        let author = author.trim();
        if author.is_empty() {
            return Err(Error::TrustInvalid("certificate author is empty".to_string()));
        }
        if author == OFFICIAL_AUTHOR {
            return Err(Error::Unauthorized);
        }
        Ok(Self::issue(package_name, author, CertificateType::Custom))
    }

    /// Issue an official certificate; requires the signing password
    pub fn issue_official(package_name: &str, password: &str) -> Result<Self> {
        authorize_official(password)?;
        Ok(Self::issue(package_name, OFFICIAL_AUTHOR, CertificateType::Official))
    }

    /// Recompute the signature and check the type/author pairing
    pub fn verify(&self) -> Result<()> {
        let expected = digest(&[
            self.package_name.as_str(),
            self.author.as_str(),
            self.issued_at.as_str(),
        ]);
        if expected != self.signature {
            return Err(Error::TrustInvalid(format!(
                "certificate signature mismatch for {}",
                self.package_name
            )));
        }

        let official_author = self.author == OFFICIAL_AUTHOR;
        match self.cert_type {
            CertificateType::Official if !official_author => Err(Error::TrustInvalid(format!(
                "official certificate not issued by {}",
                OFFICIAL_AUTHOR
            ))),
            CertificateType::Custom if official_author => Err(Error::TrustInvalid(format!(
                "custom certificate claims the reserved author {}",
                OFFICIAL_AUTHOR
            ))),
            _ => Ok(()),
        }
    }

    /// Verify a certificate found in the bundle of `package_name`
    pub fn verify_for(&self, package_name: &str) -> Result<()> {
        if self.package_name != package_name {
            return Err(Error::TrustInvalid(format!(
                "certificate issued for {}, not {}",
                self.package_name, package_name
            )));
        }
        self.verify()
    }

    /// Human-facing verdict
    pub fn status(&self, package_name: &str) -> TrustStatus {
        match self.verify_for(package_name) {
            Ok(()) => match self.cert_type {
                CertificateType::Official => TrustStatus::Official,
                CertificateType::Custom => TrustStatus::Custom {
                    author: self.author.clone(),
                },
            },
            Err(e) => TrustStatus::Invalid {
                reason: e.to_string(),
            },
        }
    }
}
