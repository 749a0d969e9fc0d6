// src/lifecycle.rs

//! Install, remove, upgrade
//!
//! Each package moves through resolving, fetching or extracting, a trust
//! check, script execution and finally recording. Any stage can fail the
//! package; nothing is recorded unless its install script succeeded.
//! Side effects go through the injected collaborators so the manager can
//! be driven without a network or a shell.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::db;
use crate::db::models::{InstallSource, InstalledPackage, StoredCertificate};
use crate::error::{Error, Result};
use crate::filesystem::{AlpPaths, prune_cache, remove_dir_best_effort};
use crate::packages::traits::{INSTALL_SCRIPT, UNINSTALL_SCRIPT};
use crate::packages::{Bundle, PackageMetadata, PackageSource, RemotePackage};
use crate::repository::{self, Fetcher, raw_file_url};
use crate::resolver::Resolver;
use crate::runner::ScriptRunner;
use crate::trust::{TrustStatus, digest_bytes};
use crate::version;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Asks the user a yes/no question
pub trait Prompt {
    fn confirm(&self, message: &str) -> bool;
}

/// Answers every question with "no"; used when stdin is not a terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl Prompt for DenyAll {
    fn confirm(&self, message: &str) -> bool {
        debug!("No terminal, declining: {}", message);
        false
    }
}

/// Shared cancellation flag, checked between packages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-package lifecycle stage, used as a log field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    FetchingOrExtracting,
    TrustCheck,
    Executing,
    Recorded,
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Stage::Resolving => "resolving",
            Stage::FetchingOrExtracting => "fetching",
            Stage::TrustCheck => "trust-check",
            Stage::Executing => "executing",
            Stage::Recorded => "recorded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalled,
}

/// What an upgrade run did
#[derive(Debug, Default)]
pub struct UpgradeReport {
    /// (name, old version, new version)
    pub upgraded: Vec<(String, String, String)>,
    /// (name, reason); these packages are no longer installed
    pub failed: Vec<(String, String)>,
    pub up_to_date: usize,
    pub cancelled: bool,
}

/// Result of comparing an installed script against its recorded checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    Unchanged,
    Changed { recorded: String, actual: String },
    /// The install script is no longer on disk
    Unavailable,
}

/// Drives package lifecycles against one state root
pub struct Manager<'a> {
    conn: &'a Connection,
    paths: &'a AlpPaths,
    catalog: Catalog,
    config: Config,
    fetcher: &'a dyn Fetcher,
    runner: &'a dyn ScriptRunner,
    prompt: &'a dyn Prompt,
    cancel: CancelToken,
}

impl<'a> Manager<'a> {
    /// Create a manager, loading the stored catalog
    pub fn new(
        conn: &'a Connection,
        paths: &'a AlpPaths,
        config: Config,
        fetcher: &'a dyn Fetcher,
        runner: &'a dyn ScriptRunner,
        prompt: &'a dyn Prompt,
    ) -> Result<Self> {
        Ok(Self {
            conn,
            paths,
            catalog: Catalog::load(conn)?,
            config,
            fetcher,
            runner,
            prompt,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Refresh the catalog from the index; without `force` only when stale
    pub fn refresh_catalog(&mut self, force: bool) -> Result<Option<usize>> {
        let refreshed = if force {
            Some(repository::sync_catalog(
                self.conn,
                self.fetcher,
                &self.config.index_url,
            )?)
        } else {
            repository::sync_if_stale(
                self.conn,
                self.fetcher,
                &self.config.index_url,
                self.config.update_interval,
            )?
        };
        if refreshed.is_some() {
            self.catalog = Catalog::load(self.conn)?;
        }
        Ok(refreshed)
    }

    /// Refresh a stale catalog when `auto_update` is on; failures only warn
    pub fn auto_refresh(&mut self) {
        if !self.config.auto_update {
            return;
        }
        if let Err(e) = self.refresh_catalog(false) {
            warn!("Catalog refresh failed, using cached catalog: {}", e);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Install a catalog package and whatever it depends on
    pub fn install(&self, name: &str) -> Result<InstallOutcome> {
        if InstalledPackage::is_installed(self.conn, name)? {
            info!("{} is already installed", name);
            return Ok(InstallOutcome::AlreadyInstalled);
        }
        if !self.catalog.contains(name) {
            return Err(Error::NotFound {
                name: name.to_string(),
                suggestions: self.catalog.suggestions(name),
            });
        }

        if self.config.check_dependencies {
            info!(stage = Stage::Resolving.as_str(), package = name, "Resolving dependencies");
            let resolver = Resolver::new(&self.catalog);
            if let Some(dep) = resolver.missing(name)?.into_iter().next() {
                return Err(Error::DependencyUnresolved {
                    package: name.to_string(),
                    dependency: dep,
                    reason: "not in the catalog".to_string(),
                });
            }
            let order = resolver.resolve(name)?;
            for dep in order.iter().filter(|n| n.as_str() != name) {
                self.install_dependency(name, dep)?;
            }
        }

        self.check_cancelled()?;
        self.install_remote(name)?;
        Ok(InstallOutcome::Installed)
    }

    fn install_dependency(&self, package: &str, dep: &str) -> Result<()> {
        self.check_cancelled()?;
        if InstalledPackage::is_installed(self.conn, dep)? {
            debug!("Dependency {} already installed", dep);
            return Ok(());
        }
        info!("Installing dependency {} of {}", dep, package);
        self.install_remote(dep).map_err(|e| Error::DependencyUnresolved {
            package: package.to_string(),
            dependency: dep.to_string(),
            reason: e.to_string(),
        })
    }

    fn install_remote(&self, name: &str) -> Result<()> {
        let metadata = self.catalog.get(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
            suggestions: Vec::new(),
        })?;
        info!(
            stage = Stage::FetchingOrExtracting.as_str(),
            package = name,
            "Downloading {} {}",
            name,
            metadata.version
        );
        let package = RemotePackage::fetch(
            self.fetcher,
            metadata,
            &self.paths.cache_dir(),
            self.config.keep_cache,
        )?;
        self.install_source(&package)
    }

    /// Install a local `.alp` bundle
    ///
    /// Declared dependencies are installed from the catalog first.
    pub fn install_bundle(&self, path: &Path) -> Result<InstallOutcome> {
        info!(
            stage = Stage::FetchingOrExtracting.as_str(),
            "Reading bundle {}",
            path.display()
        );
        let bundle = Bundle::read(path)?;
        let name = bundle.metadata.name.clone();

        if InstalledPackage::is_installed(self.conn, &name)? {
            info!("{} is already installed", name);
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        if self.config.check_dependencies {
            for dep in &bundle.metadata.dependencies {
                self.check_cancelled()?;
                if InstalledPackage::is_installed(self.conn, dep)? {
                    continue;
                }
                self.install(dep).map_err(|e| Error::DependencyUnresolved {
                    package: name.clone(),
                    dependency: dep.clone(),
                    reason: e.to_string(),
                })?;
            }
        }

        self.check_cancelled()?;
        self.install_source(&bundle)?;
        Ok(InstallOutcome::Installed)
    }

    /// Trust check, script execution and recording for one package
    pub fn install_source(&self, source: &dyn PackageSource) -> Result<()> {
        let metadata = source.metadata();
        let name = metadata.name.as_str();

        let trust = source.trust_status();
        info!(stage = Stage::TrustCheck.as_str(), package = name, "{}", trust);
        if !trust.is_trusted() {
            if self.config.verify_packages {
                let question = format!("{} is {}. Install anyway?", name, trust);
                if !self.prompt.confirm(&question) {
                    return Err(Error::TrustRejected(name.to_string()));
                }
            } else {
                warn!("Installing {} without trust confirmation: {}", name, trust);
            }
        }

        let dir = self.paths.package_dir(name)?;
        if dir.exists() {
            debug!("Clearing stale directory {}", dir.display());
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        let files = match source.materialize(&dir) {
            Ok(files) => files,
            Err(e) => {
                remove_dir_best_effort(&dir);
                return Err(e);
            }
        };

        let mut env = package_env(metadata, &dir);
        if let Some((path, main_name)) = &files.main {
            env.insert("ALP_MAIN_PATH".to_string(), path.display().to_string());
            env.insert("ALP_MAIN_NAME".to_string(), main_name.clone());
        }

        info!(stage = Stage::Executing.as_str(), package = name, "Running install script");
        let output = self
            .runner
            .run(&files.install_script, &env, self.config.script_timeout());
        let failure = match output {
            Ok(out) if out.success() => {
                if !out.stdout.is_empty() {
                    debug!("{} install output:\n{}", name, out.stdout);
                }
                None
            }
            Ok(out) => {
                if !out.stderr.is_empty() {
                    debug!("{} install errors:\n{}", name, out.stderr);
                }
                Some(out.failure_reason())
            }
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            remove_dir_best_effort(&dir);
            return Err(Error::ExecutionFailed {
                package: name.to_string(),
                reason,
            });
        }

        // Hash what ran, not what the source claims
        let executed = match fs::read(&files.install_script) {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_dir_best_effort(&dir);
                return Err(e.into());
            }
        };
        let mut record = InstalledPackage::new(
            metadata.clone(),
            digest_bytes(&executed),
            source.install_source(),
        );
        if trust.is_trusted() {
            record.certified = true;
            record.cert_type = Some(trust.label().to_string());
        }

        db::transaction(self.conn, |tx| {
            record.upsert(tx)?;
            if let (true, Some(cert)) = (trust.is_trusted(), source.certificate()) {
                StoredCertificate::save(tx, cert)?;
            }
            Ok(())
        })?;
        info!(
            stage = Stage::Recorded.as_str(),
            package = name,
            "Installed {} {}",
            name,
            metadata.version
        );

        match prune_cache(&self.paths.cache_dir(), self.config.cache_ceiling_bytes()) {
            Ok(0) => {}
            Ok(n) => debug!("Pruned {} cached files", n),
            Err(e) => warn!("Cache pruning failed: {}", e),
        }
        Ok(())
    }

    /// Remove an installed package
    ///
    /// The uninstall script is best effort; the package directory and its
    /// records are deleted even when it fails.
    pub fn remove(&self, name: &str) -> Result<()> {
        let record = InstalledPackage::find_by_name(self.conn, name)?
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;
        let dir = self.paths.package_dir(name)?;

        match self.uninstall_script(&record, &dir) {
            Ok(Some(script)) => {
                let env = package_env(&record.metadata, &dir);
                match self.runner.run(&script, &env, self.config.script_timeout()) {
                    Ok(out) if out.success() => debug!("Uninstall script for {} succeeded", name),
                    Ok(out) => warn!("Uninstall script for {} failed: {}", name, out.failure_reason()),
                    Err(e) => warn!("Uninstall script for {} failed: {}", name, e),
                }
            }
            Ok(None) => warn!("No uninstall script for {}, removing record only", name),
            Err(e) => warn!("Could not obtain uninstall script for {}: {}", name, e),
        }

        remove_dir_best_effort(&dir);

        db::transaction(self.conn, |tx| {
            InstalledPackage::delete(tx, name)?;
            StoredCertificate::delete(tx, name)
        })?;

        info!("Removed {} {}", name, record.metadata.version);
        Ok(())
    }

    /// Locate the uninstall script, downloading it for remote installs
    fn uninstall_script(
        &self,
        record: &InstalledPackage,
        dir: &Path,
    ) -> Result<Option<std::path::PathBuf>> {
        let local = dir.join(UNINSTALL_SCRIPT);
        if local.is_file() {
            return Ok(Some(local));
        }
        if record.install_source != InstallSource::Remote || record.metadata.source.is_empty() {
            return Ok(None);
        }
        fs::create_dir_all(dir)?;
        self.fetcher
            .download_file(&raw_file_url(&record.metadata.source, UNINSTALL_SCRIPT), &local)?;
        Ok(Some(local))
    }

    /// Upgrade one package, or every installed package when `target` is None
    pub fn upgrade(&self, target: Option<&str>) -> Result<UpgradeReport> {
        let records = match target {
            Some(name) => vec![
                InstalledPackage::find_by_name(self.conn, name)?
                    .ok_or_else(|| Error::NotInstalled(name.to_string()))?,
            ],
            None => InstalledPackage::list_all(self.conn)?,
        };

        let mut report = UpgradeReport::default();
        for record in records {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let name = record.metadata.name.clone();
            let installed = record.metadata.version.clone();
            let Some(available) = self.catalog.get(&name).map(|m| m.version.clone()) else {
                debug!("{} is not in the catalog, skipping", name);
                report.up_to_date += 1;
                continue;
            };

            if !version::is_newer(&available, &installed) {
                report.up_to_date += 1;
                continue;
            }

            info!("Upgrading {} {} -> {}", name, installed, available);
            if let Err(e) = self.remove(&name) {
                report.failed.push((name, e.to_string()));
                continue;
            }
            match self.install(&name) {
                Ok(_) => report.upgraded.push((name, installed, available)),
                Err(e) => {
                    warn!("{} was removed but the new version failed: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Compare the kept install script with the recorded checksum
    pub fn verify(&self, name: &str) -> Result<Drift> {
        let record = InstalledPackage::find_by_name(self.conn, name)?
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;
        let script = self.paths.package_dir(name)?.join(INSTALL_SCRIPT);
        if !script.is_file() {
            return Ok(Drift::Unavailable);
        }
        let actual = digest_bytes(&fs::read(&script)?);
        if actual == record.checksum {
            Ok(Drift::Unchanged)
        } else {
            Ok(Drift::Changed {
                recorded: record.checksum,
                actual,
            })
        }
    }

    /// Trust verdict of a stored certificate, if the package has one
    pub fn stored_trust(&self, name: &str) -> Result<Option<TrustStatus>> {
        Ok(StoredCertificate::find_by_package(self.conn, name)?
            .map(|stored| stored.certificate.status(name)))
    }
}

/// Environment handed to install and uninstall scripts
fn package_env(metadata: &PackageMetadata, dir: &Path) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("ALP_PACKAGE".to_string(), metadata.name.clone());
    env.insert("ALP_VERSION".to_string(), metadata.version.clone());
    env.insert("ALP_PACKAGE_DIR".to_string(), dir.display().to_string());
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::Signing;
    use crate::packages::traits::MaterializedFiles;
    use crate::repository::tests::MapFetcher;
    use crate::runner::ScriptOutput;
    use crate::trust::Certificate;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    /// Records every script it is asked to run and exits with `exit`
    struct FakeRunner {
        exit: i32,
        runs: RefCell<Vec<(PathBuf, Vec<u8>, BTreeMap<String, String>)>>,
    }

    impl FakeRunner {
        fn exiting(exit: i32) -> Self {
            Self {
                exit,
                runs: RefCell::new(Vec::new()),
            }
        }

        fn scripts(&self) -> Vec<String> {
            self.runs
                .borrow()
                .iter()
                .map(|(path, _, env)| {
                    format!(
                        "{}:{}",
                        env.get("ALP_PACKAGE").cloned().unwrap_or_default(),
                        path.file_name().unwrap().to_string_lossy()
                    )
                })
                .collect()
        }
    }

    impl ScriptRunner for FakeRunner {
        fn run(
            &self,
            script: &Path,
            env: &BTreeMap<String, String>,
            _timeout: Duration,
        ) -> Result<ScriptOutput> {
            let bytes = fs::read(script)?;
            self.runs
                .borrow_mut()
                .push((script.to_path_buf(), bytes, env.clone()));
            Ok(ScriptOutput {
                status: Some(self.exit),
                stderr: if self.exit == 0 { String::new() } else { "boom\n".to_string() },
                ..Default::default()
            })
        }
    }

    /// In-memory source; `written` lands on disk while `reported` is what
    /// the source claims its install script is
    struct StubSource {
        metadata: PackageMetadata,
        reported: Vec<u8>,
        written: Vec<u8>,
    }

    impl PackageSource for StubSource {
        fn metadata(&self) -> &PackageMetadata {
            &self.metadata
        }

        fn install_source(&self) -> InstallSource {
            InstallSource::Local
        }

        fn trust_status(&self) -> TrustStatus {
            TrustStatus::Custom {
                author: "jane".to_string(),
            }
        }

        fn install_script(&self) -> Result<Vec<u8>> {
            Ok(self.reported.clone())
        }

        fn materialize(&self, dir: &Path) -> Result<MaterializedFiles> {
            let install_script = dir.join(INSTALL_SCRIPT);
            fs::write(&install_script, &self.written)?;
            Ok(MaterializedFiles {
                install_script,
                uninstall_script: None,
                readme: None,
                main: None,
            })
        }
    }

    struct Answer(bool);

    impl Prompt for Answer {
        fn confirm(&self, _message: &str) -> bool {
            self.0
        }
    }

    struct Env {
        _root: TempDir,
        paths: AlpPaths,
        conn: Connection,
    }

    fn setup(packages: &[(&str, &str, &[&str])]) -> Env {
        let root = tempdir().unwrap();
        let paths = AlpPaths::new(root.path());
        paths.ensure().unwrap();
        let conn = db::open_or_init(&paths.db_path()).unwrap();

        let mut catalog = Catalog::new();
        for (name, version, deps) in packages {
            let mut meta = PackageMetadata::new(*name, *version);
            meta.dependencies = deps.iter().map(|d| d.to_string()).collect();
            meta.source = format!("https://src.test/{}", name);
            catalog.insert(meta);
        }
        catalog.save(&conn).unwrap();

        Env {
            _root: root,
            paths,
            conn,
        }
    }

    fn fetcher_for(names: &[&str]) -> MapFetcher {
        let mut fetcher = MapFetcher::default();
        for name in names {
            fetcher = fetcher
                .with(
                    &format!("https://src.test/{}/alp.sh", name),
                    &format!("#!/bin/sh\necho install {}\n", name),
                )
                .with(
                    &format!("https://src.test/{}/alp_u.sh", name),
                    &format!("#!/bin/sh\necho remove {}\n", name),
                );
        }
        fetcher
    }

    fn config() -> Config {
        Config {
            auto_update: false,
            ..Config::default()
        }
    }

    fn bundle_file(dir: &Path, signing: &Signing) -> PathBuf {
        let src = dir.join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join(INSTALL_SCRIPT), "#!/bin/sh\necho local\n").unwrap();
        fs::write(src.join(UNINSTALL_SCRIPT), "#!/bin/sh\necho bye\n").unwrap();
        fs::write(src.join("README.md"), "name = local\nver = 0.3\n").unwrap();
        let bundle = Bundle::encode(&src, signing).unwrap();
        let path = dir.join(bundle.default_file_name());
        bundle.write_to(&path).unwrap();
        path
    }

    #[test]
    fn test_install_resolves_dependencies_first() {
        let env = setup(&[("x", "1.0", &["y"]), ("y", "1.0", &[])]);
        let fetcher = fetcher_for(&["x", "y"]);
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        assert_eq!(manager.install("x").unwrap(), InstallOutcome::Installed);
        assert_eq!(runner.scripts(), vec!["y:alp.sh", "x:alp.sh"]);
        assert!(InstalledPackage::is_installed(&env.conn, "y").unwrap());

        let record = InstalledPackage::find_by_name(&env.conn, "x").unwrap().unwrap();
        assert_eq!(record.install_source, InstallSource::Remote);
        assert_eq!(record.checksum, digest_bytes(b"#!/bin/sh\necho install x\n"));
        assert!(!record.certified);

        // Idempotent
        assert_eq!(manager.install("x").unwrap(), InstallOutcome::AlreadyInstalled);
        assert_eq!(runner.runs.borrow().len(), 2);
    }

    #[test]
    fn test_install_unknown_package_suggests() {
        let env = setup(&[("editor", "1.0", &[])]);
        let fetcher = MapFetcher::default();
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        match manager.install("edit") {
            Err(Error::NotFound { suggestions, .. }) => assert_eq!(suggestions, vec!["editor"]),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_dependency_aborts_install() {
        let env = setup(&[("x", "1.0", &["ghost"])]);
        let fetcher = fetcher_for(&["x"]);
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        assert!(matches!(
            manager.install("x"),
            Err(Error::DependencyUnresolved { dependency, .. }) if dependency == "ghost"
        ));
        assert!(!InstalledPackage::is_installed(&env.conn, "x").unwrap());
        assert!(runner.runs.borrow().is_empty());
    }

    #[test]
    fn test_unsigned_bundle_declined_records_nothing() {
        let env = setup(&[]);
        let fetcher = MapFetcher::default();
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(false);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        let work = tempdir().unwrap();
        let path = bundle_file(work.path(), &Signing::None);

        assert!(matches!(
            manager.install_bundle(&path),
            Err(Error::TrustRejected(name)) if name == "local"
        ));
        assert!(!InstalledPackage::is_installed(&env.conn, "local").unwrap());
        assert!(runner.runs.borrow().is_empty());
    }

    #[test]
    fn test_certified_bundle_installs_and_stores_certificate() {
        let env = setup(&[]);
        let fetcher = MapFetcher::default();
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(false);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        let work = tempdir().unwrap();
        let path = bundle_file(
            work.path(),
            &Signing::Custom {
                author: "jane".to_string(),
            },
        );

        assert_eq!(manager.install_bundle(&path).unwrap(), InstallOutcome::Installed);

        let record = InstalledPackage::find_by_name(&env.conn, "local").unwrap().unwrap();
        assert_eq!(record.install_source, InstallSource::Local);
        assert!(record.certified);
        assert_eq!(record.cert_type.as_deref(), Some("custom"));

        let (_, executed, _) = runner.runs.borrow()[0].clone();
        assert_eq!(record.checksum, digest_bytes(&executed));
        assert_eq!(manager.verify("local").unwrap(), Drift::Unchanged);

        let stored: Certificate = StoredCertificate::find_by_package(&env.conn, "local")
            .unwrap()
            .unwrap()
            .certificate;
        assert!(stored.verify().is_ok());
        assert_eq!(
            manager.stored_trust("local").unwrap(),
            Some(TrustStatus::Custom {
                author: "jane".to_string()
            })
        );
    }

    #[test]
    fn test_script_failure_records_nothing() {
        let env = setup(&[("x", "1.0", &[])]);
        let fetcher = fetcher_for(&["x"]);
        let runner = FakeRunner::exiting(2);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        match manager.install("x") {
            Err(Error::ExecutionFailed { package, reason }) => {
                assert_eq!(package, "x");
                assert_eq!(reason, "exit status 2: boom");
            }
            other => panic!("expected ExecutionFailed, got {:?}", other),
        }
        assert!(!InstalledPackage::is_installed(&env.conn, "x").unwrap());
        assert!(!env.paths.package_dir("x").unwrap().exists());
    }

    #[test]
    fn test_remove_runs_uninstall_and_deletes_record() {
        let env = setup(&[("x", "1.0", &[])]);
        let fetcher = fetcher_for(&["x"]);
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        manager.install("x").unwrap();
        manager.remove("x").unwrap();

        assert_eq!(runner.scripts(), vec!["x:alp.sh", "x:alp_u.sh"]);
        assert!(!InstalledPackage::is_installed(&env.conn, "x").unwrap());
        assert!(!env.paths.package_dir("x").unwrap().exists());
        assert!(matches!(manager.remove("x"), Err(Error::NotInstalled(_))));
    }

    #[test]
    fn test_remove_tolerates_failing_uninstall() {
        let env = setup(&[]);
        let record = InstalledPackage::new(
            PackageMetadata::new("x", "1.0"),
            "abc".to_string(),
            InstallSource::Local,
        );
        record.upsert(&env.conn).unwrap();
        let dir = env.paths.package_dir("x").unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(UNINSTALL_SCRIPT), "exit 1\n").unwrap();

        let fetcher = MapFetcher::default();
        let runner = FakeRunner::exiting(1);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        manager.remove("x").unwrap();
        assert!(!InstalledPackage::is_installed(&env.conn, "x").unwrap());
        assert!(!dir.exists());
    }

    #[test]
    fn test_upgrade_newer_version_reinstalls() {
        let env = setup(&[("x", "2.0", &[])]);
        let mut meta = PackageMetadata::new("x", "1.9");
        meta.source = "https://src.test/x".to_string();
        InstalledPackage::new(meta, "old".to_string(), InstallSource::Remote)
            .upsert(&env.conn)
            .unwrap();

        let fetcher = fetcher_for(&["x"]);
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        let report = manager.upgrade(None).unwrap();
        assert_eq!(
            report.upgraded,
            vec![("x".to_string(), "1.9".to_string(), "2.0".to_string())]
        );
        assert_eq!(runner.scripts(), vec!["x:alp_u.sh", "x:alp.sh"]);
        let record = InstalledPackage::find_by_name(&env.conn, "x").unwrap().unwrap();
        assert_eq!(record.metadata.version, "2.0");
    }

    #[test]
    fn test_upgrade_same_version_is_noop() {
        let env = setup(&[("x", "1.9", &[])]);
        InstalledPackage::new(
            PackageMetadata::new("x", "1.9"),
            "old".to_string(),
            InstallSource::Remote,
        )
        .upsert(&env.conn)
        .unwrap();

        let fetcher = fetcher_for(&["x"]);
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        let report = manager.upgrade(Some("x")).unwrap();
        assert!(report.upgraded.is_empty());
        assert_eq!(report.up_to_date, 1);
        assert!(runner.runs.borrow().is_empty());
    }

    #[test]
    fn test_unknown_dependency_stops_before_any_install() {
        let env = setup(&[("x", "1.0", &["y", "ghost"]), ("y", "1.0", &[])]);
        let fetcher = fetcher_for(&["x", "y"]);
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        assert!(matches!(
            manager.install("x"),
            Err(Error::DependencyUnresolved { dependency, .. }) if dependency == "ghost"
        ));
        assert!(!InstalledPackage::is_installed(&env.conn, "y").unwrap());
        assert!(runner.runs.borrow().is_empty());
    }

    #[test]
    fn test_bundle_with_path_like_name_leaves_outside_dirs_alone() {
        let outer = tempdir().unwrap();
        let victim = outer.path().join("victim");
        fs::create_dir_all(&victim).unwrap();
        fs::write(victim.join("precious.txt"), "keep").unwrap();

        let paths = AlpPaths::new(outer.path().join("state"));
        paths.ensure().unwrap();
        let conn = db::open_or_init(&paths.db_path()).unwrap();
        let fetcher = MapFetcher::default();
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let manager = Manager::new(&conn, &paths, config(), &fetcher, &runner, &prompt).unwrap();

        let work = tempdir().unwrap();
        let path = bundle_file(
            work.path(),
            &Signing::Custom {
                author: "mallory".to_string(),
            },
        );
        let mut bundle = Bundle::read(&path).unwrap();
        bundle.metadata.name = "../../victim".to_string();
        bundle.checksum = bundle.compute_checksum().unwrap();
        fs::write(&path, bundle.to_bytes().unwrap()).unwrap();

        assert!(matches!(
            manager.install_bundle(&path),
            Err(Error::InvalidMetadata(_))
        ));
        assert!(victim.join("precious.txt").exists());
        assert!(runner.runs.borrow().is_empty());
    }

    #[test]
    fn test_source_with_path_like_name_is_refused() {
        let env = setup(&[]);
        let fetcher = MapFetcher::default();
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        let source = StubSource {
            metadata: PackageMetadata::new("../escape", "1.0"),
            reported: b"echo hi\n".to_vec(),
            written: b"echo hi\n".to_vec(),
        };
        assert!(matches!(
            manager.install_source(&source),
            Err(Error::InvalidMetadata(_))
        ));
        assert!(!env.paths.root().join("escape").exists());
        assert!(runner.runs.borrow().is_empty());
    }

    #[test]
    fn test_checksum_covers_script_that_ran() {
        let env = setup(&[]);
        let fetcher = MapFetcher::default();
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        let source = StubSource {
            metadata: PackageMetadata::new("stub", "1.0"),
            reported: b"#!/bin/sh\necho original\n".to_vec(),
            written: b"#!/bin/sh\necho swapped\n".to_vec(),
        };
        manager.install_source(&source).unwrap();

        let runs = runner.runs.borrow();
        assert_eq!(runs[0].1, b"#!/bin/sh\necho swapped\n");
        let record = InstalledPackage::find_by_name(&env.conn, "stub").unwrap().unwrap();
        assert_eq!(record.checksum, digest_bytes(&runs[0].1));
    }

    #[test]
    fn test_cancel_stops_between_packages() {
        let env = setup(&[("x", "1.0", &["y"]), ("y", "1.0", &[])]);
        let fetcher = fetcher_for(&["x", "y"]);
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let cancel = CancelToken::new();
        let manager = Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt)
            .unwrap()
            .with_cancel(cancel.clone());

        cancel.cancel();
        assert!(matches!(
            manager.install("x"),
            Err(Error::Cancelled) | Err(Error::DependencyUnresolved { .. })
        ));
        assert!(runner.runs.borrow().is_empty());
    }

    #[test]
    fn test_verify_detects_drift() {
        let env = setup(&[("x", "1.0", &[])]);
        let fetcher = fetcher_for(&["x"]);
        let runner = FakeRunner::exiting(0);
        let prompt = Answer(true);
        let manager =
            Manager::new(&env.conn, &env.paths, config(), &fetcher, &runner, &prompt).unwrap();

        manager.install("x").unwrap();
        assert_eq!(manager.verify("x").unwrap(), Drift::Unchanged);

        fs::write(env.paths.package_dir("x").unwrap().join(INSTALL_SCRIPT), "echo changed\n").unwrap();
        assert!(matches!(manager.verify("x").unwrap(), Drift::Changed { .. }));

        fs::remove_file(env.paths.package_dir("x").unwrap().join(INSTALL_SCRIPT)).unwrap();
        assert_eq!(manager.verify("x").unwrap(), Drift::Unavailable);
    }
}
