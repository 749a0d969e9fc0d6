// tests/integration_test.rs

//! Integration tests for Alp
//!
//! These tests verify end-to-end functionality across modules: catalog
//! refresh from a directory-backed repository, real shell scripts, bundles
//! and the state database.

use alp::catalog::Catalog;
use alp::config::Config;
use alp::db;
use alp::db::models::{InstallSource, InstalledPackage, StoredCertificate};
use alp::filesystem::AlpPaths;
use alp::lifecycle::{DenyAll, InstallOutcome, Manager, Prompt};
use alp::packages::{Bundle, Signing};
use alp::repository::{self, Fetcher};
use alp::runner::ShellRunner;
use alp::trust::{RepoTrustFile, digest_bytes};
use alp::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir, tempdir};

const BASE_URL: &str = "https://src.test";

/// Serves `https://src.test/<path>` from a local directory
struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    fn path_for(&self, url: &str) -> Option<PathBuf> {
        url.strip_prefix(BASE_URL)
            .map(|rest| self.root.join(rest.trim_start_matches('/')))
    }
}

impl Fetcher for DirFetcher {
    fn fetch_text(&self, url: &str) -> Result<Option<String>> {
        match self.path_for(url) {
            Some(path) if path.is_file() => Ok(Some(fs::read_to_string(path)?)),
            _ => Ok(None),
        }
    }

    fn download_file(&self, url: &str, dest: &Path) -> Result<()> {
        let path = self
            .path_for(url)
            .filter(|p| p.is_file())
            .ok_or_else(|| Error::DownloadError(format!("HTTP 404 Not Found from {}", url)))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(path, dest)?;
        Ok(())
    }
}

struct Yes;

impl Prompt for Yes {
    fn confirm(&self, _message: &str) -> bool {
        true
    }
}

/// A state root, a repository directory and a log the scripts append to
struct Fixture {
    _state: TempDir,
    repo: TempDir,
    paths: AlpPaths,
    log: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let state = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let paths = AlpPaths::new(state.path().join("alp"));
        paths.ensure().unwrap();
        let log = repo.path().join("script.log");
        Fixture {
            _state: state,
            repo,
            paths,
            log,
        }
    }

    fn fetcher(&self) -> DirFetcher {
        DirFetcher {
            root: self.repo.path().to_path_buf(),
        }
    }

    fn install_script(&self, body: &str) -> String {
        format!(
            "#!/bin/sh\necho \"install $ALP_PACKAGE $ALP_VERSION\" >> '{}'\n{}",
            self.log.display(),
            body
        )
    }

    fn uninstall_script(&self) -> String {
        format!(
            "#!/bin/sh\necho \"remove $ALP_PACKAGE\" >> '{}'\n",
            self.log.display()
        )
    }

    /// Publish a package under `<repo>/<name>/`
    fn publish(&self, name: &str, version: &str, deps: &[&str], body: &str) {
        let dir = self.repo.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("README.md"),
            format!(
                "# {name}\n\nname = {name}\nver = {version}\ndes = The {name} package\ndeps = [{}]\n",
                deps.join(", ")
            ),
        )
        .unwrap();
        fs::write(dir.join("alp.sh"), self.install_script(body)).unwrap();
        fs::write(dir.join("alp_u.sh"), self.uninstall_script()).unwrap();
    }

    fn write_index(&self, names: &[&str]) {
        let mut index = String::from("# test repository\n");
        for name in names {
            index.push_str(&format!("{}/{}\n", BASE_URL, name));
        }
        fs::write(self.repo.path().join("index"), index).unwrap();
    }

    fn index_url(&self) -> String {
        format!("{}/index", BASE_URL)
    }

    fn config(&self) -> Config {
        Config {
            auto_update: false,
            index_url: self.index_url(),
            ..Config::default()
        }
    }

    fn log_lines(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Bundle source directory with the given README
    fn bundle_source(&self, readme: &str) -> PathBuf {
        let dir = self.repo.path().join("bundle-src");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("README.md"), readme).unwrap();
        fs::write(dir.join("alp.sh"), self.install_script("")).unwrap();
        fs::write(dir.join("alp_u.sh"), self.uninstall_script()).unwrap();
        dir
    }
}

#[test]
fn test_database_lifecycle() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_path_buf();

    // Remove the temp file so init can create it
    drop(temp_file);

    db::init(&db_path).expect("Database initialization should succeed");
    assert!(db_path.exists(), "Database file should exist after initialization");

    let conn = db::open(&db_path).expect("Opening database should succeed");
    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[cfg(unix)]
#[test]
fn test_refresh_install_and_remove_workflow() {
    let fx = Fixture::new();
    fx.publish("app", "1.0", &["lib"], "");
    fx.publish("lib", "0.5", &[], "touch \"$ALP_PACKAGE_DIR/built\"\n");
    fx.write_index(&["app", "lib", "missing"]);

    let conn = db::open_or_init(&fx.paths.db_path()).unwrap();
    let fetcher = fx.fetcher();
    let count = repository::sync_catalog(&conn, &fetcher, &fx.index_url()).unwrap();
    assert_eq!(count, 2, "Locators without a README are skipped");

    let runner = ShellRunner::new();
    let manager = Manager::new(&conn, &fx.paths, fx.config(), &fetcher, &runner, &Yes).unwrap();

    assert_eq!(manager.install("app").unwrap(), InstallOutcome::Installed);
    assert_eq!(fx.log_lines(), vec!["install lib 0.5", "install app 1.0"]);
    assert!(fx.paths.package_dir("lib").unwrap().join("built").exists());

    let record = InstalledPackage::find_by_name(&conn, "app").unwrap().unwrap();
    assert_eq!(record.install_source, InstallSource::Remote);
    assert_eq!(
        record.checksum,
        digest_bytes(fx.install_script("").as_bytes()),
        "Checksum covers the script that ran"
    );

    manager.remove("app").unwrap();
    assert_eq!(fx.log_lines().last().map(String::as_str), Some("remove app"));
    assert!(!InstalledPackage::is_installed(&conn, "app").unwrap());
    assert!(InstalledPackage::is_installed(&conn, "lib").unwrap());
    assert!(!fx.paths.package_dir("app").unwrap().exists());
}

#[cfg(unix)]
#[test]
fn test_failing_script_is_not_recorded() {
    let fx = Fixture::new();
    fx.publish("broken", "1.0", &[], "echo 'cannot build' >&2\nexit 4\n");
    fx.write_index(&["broken"]);

    let conn = db::open_or_init(&fx.paths.db_path()).unwrap();
    let fetcher = fx.fetcher();
    repository::sync_catalog(&conn, &fetcher, &fx.index_url()).unwrap();

    let runner = ShellRunner::new();
    let manager = Manager::new(&conn, &fx.paths, fx.config(), &fetcher, &runner, &Yes).unwrap();

    match manager.install("broken") {
        Err(Error::ExecutionFailed { package, reason }) => {
            assert_eq!(package, "broken");
            assert!(reason.contains("cannot build"), "reason was {}", reason);
        }
        other => panic!("expected ExecutionFailed, got {:?}", other),
    }
    assert!(!InstalledPackage::is_installed(&conn, "broken").unwrap());
}

#[cfg(unix)]
#[test]
fn test_script_timeout_fails_install() {
    let fx = Fixture::new();
    fx.publish("slow", "1.0", &[], "exec sleep 5\n");
    fx.write_index(&["slow"]);

    let conn = db::open_or_init(&fx.paths.db_path()).unwrap();
    let fetcher = fx.fetcher();
    repository::sync_catalog(&conn, &fetcher, &fx.index_url()).unwrap();

    let config = Config {
        script_timeout: 1,
        ..fx.config()
    };
    let runner = ShellRunner::new();
    let manager = Manager::new(&conn, &fx.paths, config, &fetcher, &runner, &Yes).unwrap();

    assert!(matches!(
        manager.install("slow"),
        Err(Error::ExecutionFailed { reason, .. }) if reason == "timed out"
    ));
    assert!(!InstalledPackage::is_installed(&conn, "slow").unwrap());
}

#[cfg(unix)]
#[test]
fn test_trust_file_skips_confirmation() {
    let fx = Fixture::new();
    fx.publish("signed", "1.0", &[], "");
    fx.write_index(&["signed"]);
    let cerf = RepoTrustFile::issue("signed", "jane", "dev", None).unwrap();
    fs::write(
        fx.repo.path().join("signed").join("alp.cerf"),
        cerf.to_json().unwrap(),
    )
    .unwrap();

    let conn = db::open_or_init(&fx.paths.db_path()).unwrap();
    let fetcher = fx.fetcher();
    repository::sync_catalog(&conn, &fetcher, &fx.index_url()).unwrap();

    let catalog = Catalog::load(&conn).unwrap();
    let trust = catalog.get("signed").unwrap().trust.clone().unwrap();
    assert!(trust.cert_valid);

    // DenyAll would refuse an unsigned package; a valid trust file needs no prompt
    let runner = ShellRunner::new();
    let manager =
        Manager::new(&conn, &fx.paths, fx.config(), &fetcher, &runner, &DenyAll).unwrap();
    manager.install("signed").unwrap();

    let record = InstalledPackage::find_by_name(&conn, "signed").unwrap().unwrap();
    assert!(record.certified);
    assert_eq!(record.cert_type.as_deref(), Some("dev"));
}

#[cfg(unix)]
#[test]
fn test_unsigned_bundle_without_confirmation_is_rejected() {
    let fx = Fixture::new();
    let src = fx.bundle_source("name = tool\nver = 1.0\n");
    let bundle = Bundle::encode(&src, &Signing::None).unwrap();
    let path = fx.repo.path().join(bundle.default_file_name());
    bundle.write_to(&path).unwrap();

    let conn = db::open_or_init(&fx.paths.db_path()).unwrap();
    let fetcher = fx.fetcher();
    let runner = ShellRunner::new();
    let manager =
        Manager::new(&conn, &fx.paths, fx.config(), &fetcher, &runner, &DenyAll).unwrap();

    assert!(matches!(
        manager.install_bundle(&path),
        Err(Error::TrustRejected(_))
    ));
    assert!(!InstalledPackage::is_installed(&conn, "tool").unwrap());
    assert!(fx.log_lines().is_empty(), "No script ran");
}

#[cfg(unix)]
#[test]
fn test_certified_bundle_with_payload() {
    let fx = Fixture::new();
    let src = fx.bundle_source("name = tool\nver = 2.1\nmain = tool.bin\n");
    fs::write(src.join("tool.bin"), "#!/bin/sh\necho tool\n").unwrap();
    fs::write(
        src.join("alp.sh"),
        fx.install_script("[ -x \"$ALP_MAIN_PATH\" ] || exit 9\n[ \"$ALP_MAIN_NAME\" = tool.bin ] || exit 8\n"),
    )
    .unwrap();

    let bundle = Bundle::encode(
        &src,
        &Signing::Custom {
            author: "jane".to_string(),
        },
    )
    .unwrap();
    let path = fx.repo.path().join("tool.alp");
    bundle.write_to(&path).unwrap();

    let conn = db::open_or_init(&fx.paths.db_path()).unwrap();
    let fetcher = fx.fetcher();
    let runner = ShellRunner::new();
    let manager =
        Manager::new(&conn, &fx.paths, fx.config(), &fetcher, &runner, &DenyAll).unwrap();

    manager.install_bundle(&path).unwrap();
    assert_eq!(fx.log_lines(), vec!["install tool 2.1"]);

    let record = InstalledPackage::find_by_name(&conn, "tool").unwrap().unwrap();
    assert_eq!(record.install_source, InstallSource::Local);
    assert_eq!(record.cert_type.as_deref(), Some("custom"));
    assert!(StoredCertificate::find_by_package(&conn, "tool").unwrap().is_some());

    // Removing drops the stored certificate and runs the kept uninstall script
    manager.remove("tool").unwrap();
    assert_eq!(fx.log_lines().last().map(String::as_str), Some("remove tool"));
    assert!(StoredCertificate::find_by_package(&conn, "tool").unwrap().is_none());
}

#[cfg(unix)]
#[test]
fn test_tampered_bundle_needs_confirmation() {
    let fx = Fixture::new();
    let src = fx.bundle_source("name = tool\nver = 1.0\n");
    let mut bundle = Bundle::encode(
        &src,
        &Signing::Custom {
            author: "jane".to_string(),
        },
    )
    .unwrap();
    bundle.metadata.version = "9.9".to_string();
    let path = fx.repo.path().join("tool.alp");
    bundle.write_to(&path).unwrap();

    // Decoding never rejects on checksum
    let decoded = Bundle::read(&path).unwrap();
    assert!(!decoded.verify_checksum());

    let conn = db::open_or_init(&fx.paths.db_path()).unwrap();
    let fetcher = fx.fetcher();
    let runner = ShellRunner::new();

    let refusing =
        Manager::new(&conn, &fx.paths, fx.config(), &fetcher, &runner, &DenyAll).unwrap();
    assert!(matches!(
        refusing.install_bundle(&path),
        Err(Error::TrustRejected(_))
    ));

    let accepting = Manager::new(&conn, &fx.paths, fx.config(), &fetcher, &runner, &Yes).unwrap();
    accepting.install_bundle(&path).unwrap();
    let record = InstalledPackage::find_by_name(&conn, "tool").unwrap().unwrap();
    assert!(!record.certified);
    assert!(StoredCertificate::find_by_package(&conn, "tool").unwrap().is_none());
}

#[test]
fn test_pack_requires_all_files() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("alp.sh"), "echo hi\n").unwrap();
    fs::write(dir.path().join("README.md"), "name = x\nver = 1\n").unwrap();

    match Bundle::encode(dir.path(), &Signing::None) {
        Err(Error::MissingFiles(files)) => assert_eq!(files, vec!["alp_u.sh"]),
        other => panic!("expected MissingFiles, got {:?}", other),
    }
}

#[cfg(unix)]
#[test]
fn test_upgrade_workflow() {
    let fx = Fixture::new();
    fx.publish("app", "1.9", &[], "");
    fx.write_index(&["app"]);

    let conn = db::open_or_init(&fx.paths.db_path()).unwrap();
    let fetcher = fx.fetcher();
    repository::sync_catalog(&conn, &fetcher, &fx.index_url()).unwrap();

    let runner = ShellRunner::new();
    {
        let manager =
            Manager::new(&conn, &fx.paths, fx.config(), &fetcher, &runner, &Yes).unwrap();
        manager.install("app").unwrap();

        // Same version: nothing happens
        let report = manager.upgrade(None).unwrap();
        assert!(report.upgraded.is_empty());
        assert_eq!(report.up_to_date, 1);
    }

    fx.publish("app", "2.0", &[], "");
    repository::sync_catalog(&conn, &fetcher, &fx.index_url()).unwrap();

    let manager = Manager::new(&conn, &fx.paths, fx.config(), &fetcher, &runner, &Yes).unwrap();
    let report = manager.upgrade(Some("app")).unwrap();
    assert_eq!(
        report.upgraded,
        vec![("app".to_string(), "1.9".to_string(), "2.0".to_string())]
    );
    assert_eq!(
        fx.log_lines(),
        vec!["install app 1.9", "remove app", "install app 2.0"]
    );
    let record = InstalledPackage::find_by_name(&conn, "app").unwrap().unwrap();
    assert_eq!(record.metadata.version, "2.0");
}
