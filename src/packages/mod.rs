// src/packages/mod.rs

//! Package sources for Alp
//!
//! Packages reach the lifecycle manager either from a remote repository
//! ([`remote::RemotePackage`]) or from a local `.alp` archive
//! ([`bundle::Bundle`]). Both implement the `PackageSource` trait.

pub mod bundle;
pub mod metadata;
pub mod remote;
pub mod traits;

pub use bundle::{Bundle, Signing};
pub use metadata::{PackageMetadata, TrustAnnotation};
pub use remote::RemotePackage;
pub use traits::PackageSource;
