// src/packages/remote.rs

//! Packages fetched from their repository source

use crate::db::models::InstallSource;
use crate::error::Result;
use crate::filesystem::{is_executable_name, write_file};
use crate::packages::metadata::validate_package_name;
use crate::packages::traits::{
    INSTALL_SCRIPT, MaterializedFiles, PackageSource, UNINSTALL_SCRIPT, payload_file_name,
};
use crate::packages::PackageMetadata;
use crate::repository::{Fetcher, raw_file_url};
use crate::trust::TrustStatus;
use crate::trust::cerf::{CERF_FILE, status_from_text};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// A catalog package whose scripts have been downloaded
#[derive(Debug, Clone)]
pub struct RemotePackage {
    metadata: PackageMetadata,
    install_script: Vec<u8>,
    uninstall_script: Option<Vec<u8>>,
    payload: Option<(String, Vec<u8>)>,
    trust: TrustStatus,
}

/// Download `file` from the package source through the cache
fn fetch_into_cache(
    fetcher: &dyn Fetcher,
    source: &str,
    file: &str,
    cache_path: &Path,
    keep_cache: bool,
) -> Result<Vec<u8>> {
    fetcher.download_file(&raw_file_url(source, file), cache_path)?;
    let bytes = fs::read(cache_path)?;
    if !keep_cache {
        if let Err(e) = fs::remove_file(cache_path) {
            debug!("Could not drop cached {}: {}", cache_path.display(), e);
        }
    }
    Ok(bytes)
}

impl RemotePackage {
    /// Download the install script (required), the uninstall script and
    /// payload (optional) and probe the trust file
    pub fn fetch(
        fetcher: &dyn Fetcher,
        metadata: &PackageMetadata,
        cache_dir: &Path,
        keep_cache: bool,
    ) -> Result<Self> {
        let name = &metadata.name;
        let source = &metadata.source;
        validate_package_name(name)?;

        let install_script = fetch_into_cache(
            fetcher,
            source,
            INSTALL_SCRIPT,
            &cache_dir.join(format!("{}_install.sh", name)),
            keep_cache,
        )?;

        let uninstall_script = match fetch_into_cache(
            fetcher,
            source,
            UNINSTALL_SCRIPT,
            &cache_dir.join(format!("{}_uninstall.sh", name)),
            keep_cache,
        ) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("No uninstall script for {}: {}", name, e);
                None
            }
        };

        let payload = match &metadata.main {
            Some(main) => {
                let cache_path = cache_dir.join(format!("{}_{}", name, payload_file_name(main)?));
                match fetch_into_cache(fetcher, source, main, &cache_path, keep_cache) {
                    Ok(bytes) => Some((main.clone(), bytes)),
                    Err(e) => {
                        warn!("Payload {} for {} unavailable: {}", main, name, e);
                        None
                    }
                }
            }
            None => None,
        };

        let cerf_text = match fetcher.fetch_text(&raw_file_url(source, CERF_FILE)) {
            Ok(text) => text,
            Err(e) => {
                warn!("Trust file probe failed for {}: {}", name, e);
                None
            }
        };
        let trust = status_from_text(name, cerf_text.as_deref());

        Ok(Self {
            metadata: metadata.clone(),
            install_script,
            uninstall_script,
            payload,
            trust,
        })
    }
}

impl PackageSource for RemotePackage {
    fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    fn install_source(&self) -> InstallSource {
        InstallSource::Remote
    }

    fn trust_status(&self) -> TrustStatus {
        self.trust.clone()
    }

    fn install_script(&self) -> Result<Vec<u8>> {
        Ok(self.install_script.clone())
    }

    fn materialize(&self, dir: &Path) -> Result<MaterializedFiles> {
        let main_name = self.payload.as_ref().map(|(name, _)| name.as_str());

        let install_script = dir.join(INSTALL_SCRIPT);
        write_file(
            &install_script,
            &self.install_script,
            is_executable_name(INSTALL_SCRIPT, main_name),
        )?;

        let uninstall_script = match &self.uninstall_script {
            Some(bytes) => {
                let path = dir.join(UNINSTALL_SCRIPT);
                write_file(&path, bytes, is_executable_name(UNINSTALL_SCRIPT, main_name))?;
                Some(path)
            }
            None => None,
        };

        let main = match &self.payload {
            Some((name, bytes)) => {
                let path = dir.join(payload_file_name(name)?);
                write_file(&path, bytes, is_executable_name(name, main_name))?;
                Some((path, name.clone()))
            }
            None => None,
        };

        Ok(MaterializedFiles {
            install_script,
            uninstall_script,
            readme: None,
            main,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::repository::tests::MapFetcher;
    use crate::trust::RepoTrustFile;
    use tempfile::tempdir;

    fn metadata() -> PackageMetadata {
        let mut meta = PackageMetadata::new("hello", "1.0");
        meta.source = "https://src.test/hello".to_string();
        meta
    }

    #[test]
    fn test_fetch_scripts_and_trust() {
        let cerf = RepoTrustFile::issue("hello", "jane", "normal", None).unwrap();
        let fetcher = MapFetcher::default()
            .with("https://src.test/hello/alp.sh", "#!/bin/sh\nexit 0\n")
            .with("https://src.test/hello/alp_u.sh", "#!/bin/sh\nexit 0\n")
            .with("https://src.test/hello/alp.cerf", &cerf.to_json().unwrap());
        let cache = tempdir().unwrap();

        let pkg = RemotePackage::fetch(&fetcher, &metadata(), cache.path(), false).unwrap();
        assert_eq!(pkg.install_script().unwrap(), b"#!/bin/sh\nexit 0\n");
        assert_eq!(
            pkg.trust_status(),
            TrustStatus::Normal {
                author: "jane".to_string()
            }
        );
        assert!(!cache.path().join("hello_install.sh").exists());

        let out = tempdir().unwrap();
        let files = pkg.materialize(out.path()).unwrap();
        assert!(files.install_script.is_file());
        assert!(files.uninstall_script.unwrap().is_file());
    }

    #[test]
    fn test_fetch_without_optional_files() {
        let fetcher = MapFetcher::default().with("https://src.test/hello/alp.sh", "echo hi\n");
        let cache = tempdir().unwrap();

        let pkg = RemotePackage::fetch(&fetcher, &metadata(), cache.path(), true).unwrap();
        assert_eq!(pkg.trust_status(), TrustStatus::Unsigned);
        assert!(cache.path().join("hello_install.sh").exists());

        let out = tempdir().unwrap();
        let files = pkg.materialize(out.path()).unwrap();
        assert!(files.uninstall_script.is_none());
        assert!(files.main.is_none());
    }

    #[test]
    fn test_fetch_rejects_payload_shadowing_install_script() {
        let fetcher = MapFetcher::default()
            .with("https://src.test/hello/alp.sh", "#!/bin/sh\nexit 0\n")
            .with("https://src.test/hello/sub/alp.sh", "#!/bin/sh\necho swapped\n");
        let cache = tempdir().unwrap();
        let mut meta = metadata();
        meta.main = Some("sub/alp.sh".to_string());

        assert!(matches!(
            RemotePackage::fetch(&fetcher, &meta, cache.path(), false),
            Err(Error::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_fetch_rejects_path_like_name() {
        let fetcher = MapFetcher::default().with("https://src.test/hello/alp.sh", "echo hi\n");
        let cache = tempdir().unwrap();
        let mut meta = metadata();
        meta.name = "../escape".to_string();

        assert!(matches!(
            RemotePackage::fetch(&fetcher, &meta, cache.path(), false),
            Err(Error::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_fetch_requires_install_script() {
        let fetcher = MapFetcher::default();
        let cache = tempdir().unwrap();
        assert!(RemotePackage::fetch(&fetcher, &metadata(), cache.path(), false).is_err());
    }
}
