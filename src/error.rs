// src/error.rs

use thiserror::Error;

/// Core error types for Alp
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State initialization error
    #[error("Failed to initialize: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Package name unknown to the catalog; carries near matches
    #[error("Package not found: {name}")]
    NotFound { name: String, suggestions: Vec<String> },

    /// Package has no installed record
    #[error("Package is not installed: {0}")]
    NotInstalled(String),

    /// Bundle source directory lacks required files
    #[error("Missing required files: {}", .0.join(", "))]
    MissingFiles(Vec<String>),

    /// Unknown bundle format version or malformed bundle document
    #[error("Unsupported bundle format: {0}")]
    UnsupportedFormat(String),

    /// README metadata lacks mandatory keys
    #[error("Invalid package metadata: {0}")]
    InvalidMetadata(String),

    /// Signature, magic or field check failed
    #[error("Trust verification failed: {0}")]
    TrustInvalid(String),

    /// User declined to continue after a trust downgrade
    #[error("Installation of {0} aborted: untrusted package not confirmed")]
    TrustRejected(String),

    /// Official signing password did not match
    #[error("Official signing refused: password does not match")]
    Unauthorized,

    /// Script returned non-zero, timed out, or could not be started
    #[error("Script for {package} failed: {reason}")]
    ExecutionFailed { package: String, reason: String },

    /// A transitive dependency could not be installed
    #[error("Dependency {dependency} of {package} could not be installed: {reason}")]
    DependencyUnresolved {
        package: String,
        dependency: String,
        reason: String,
    },

    /// Dependency graph contains a cycle
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// Network download failed
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Malformed timestamps and similar values
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Unknown setting key or invalid value
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Interrupted between packages
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias using Alp's Error type
pub type Result<T> = std::result::Result<T, Error>;
