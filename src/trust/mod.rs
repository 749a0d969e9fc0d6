// src/trust/mod.rs

//! Provenance checks for packages
//!
//! Two independent trust artifacts exist:
//! - [`Certificate`]: embedded in a bundle, signs package name, author and
//!   issue time
//! - [`RepoTrustFile`]: an `alp.cerf` file published next to a package's
//!   source, independent of any particular bundle
//!
//! Signatures are SHA-256 digests over the concatenated fields. "Official"
//! status is gated by a shared secret whose digest is compiled in; anyone who
//! knows the secret can mint official artifacts.

pub mod cerf;
pub mod certificate;

pub use cerf::{CerfType, RepoTrustFile};
pub use certificate::{Certificate, CertificateType};

use crate::error::{Error, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

/// Author identity stamped on every official artifact
pub const OFFICIAL_AUTHOR: &str = "Alp Official";

/// SHA-256 of the official signing password
const OFFICIAL_PASSWORD_SHA256: &str =
    "4d3e78ca9cd115c11cf5a6b1b0945c796c5921d89e253df889e95716bcc59637";

/// SHA-256 over the concatenation of `parts`, lowercase hex
pub fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of raw bytes, lowercase hex
pub fn digest_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Check the official signing password
pub fn authorize_official(password: &str) -> Result<()> {
    if digest(&[password]) == OFFICIAL_PASSWORD_SHA256 {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

/// 16 random bytes as hex
pub(crate) fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Verdict rendered to the user before a script runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustStatus {
    Official,
    Custom { author: String },
    Dev { author: String },
    Normal { author: String },
    Unsigned,
    Invalid { reason: String },
}

impl TrustStatus {
    /// Whether installation may proceed without confirmation
    pub fn is_trusted(&self) -> bool {
        !matches!(self, TrustStatus::Unsigned | TrustStatus::Invalid { .. })
    }

    /// Short label used in stored records
    pub fn label(&self) -> &'static str {
        match self {
            TrustStatus::Official => "official",
            TrustStatus::Custom { .. } => "custom",
            TrustStatus::Dev { .. } => "dev",
            TrustStatus::Normal { .. } => "normal",
            TrustStatus::Unsigned => "unsigned",
            TrustStatus::Invalid { .. } => "invalid",
        }
    }

    /// Author the artifact vouches for, if any
    pub fn author(&self) -> Option<&str> {
        match self {
            TrustStatus::Official => Some(OFFICIAL_AUTHOR),
            TrustStatus::Custom { author }
            | TrustStatus::Dev { author }
            | TrustStatus::Normal { author } => Some(author),
            TrustStatus::Unsigned | TrustStatus::Invalid { .. } => None,
        }
    }
}

impl fmt::Display for TrustStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustStatus::Official => write!(f, "Official package (signed by {})", OFFICIAL_AUTHOR),
            TrustStatus::Custom { author } => write!(f, "Custom certificate by {}", author),
            TrustStatus::Dev { author } => write!(f, "Developer trust file by {}", author),
            TrustStatus::Normal { author } => write!(f, "Signed trust file by {}", author),
            TrustStatus::Unsigned => write!(f, "Unsigned package"),
            TrustStatus::Invalid { reason } => write!(f, "INVALID signature: {}", reason),
        }
    }
}
