// src/main.rs

use alp::catalog::Catalog;
use alp::config::Config;
use alp::db::models::{InstalledPackage, Setting, StoredCertificate};
use alp::filesystem::{AlpPaths, clean_cache, dir_size};
use alp::lifecycle::{CancelToken, Drift, InstallOutcome, Manager, Prompt};
use alp::packages::bundle::BUNDLE_EXTENSION;
use alp::packages::{Bundle, PackageSource, Signing};
use alp::repository::{LAST_SYNC_KEY, RepositoryClient};
use alp::runner::ShellRunner;
use alp::trust::cerf::CERF_FILE;
use alp::trust::{RepoTrustFile, TrustStatus};
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use dialoguer::{Confirm, Input, Password, Select};
use rusqlite::Connection;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "alp")]
#[command(author, version, about = "Script-driven package manager with bundles and trust files", long_about = None)]
struct Cli {
    /// State directory (default: ~/.alp)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the Alp state directory and database
    Init,
    /// Refresh the package catalog from the repository index
    Update {
        /// Refresh even if the catalog is still fresh
        #[arg(short, long)]
        force: bool,
    },
    /// Install a catalog package or a local .alp bundle
    Install {
        /// Package name or path to a bundle
        target: String,
    },
    /// Remove an installed package
    Remove {
        /// Package name to remove
        package_name: String,
    },
    /// Upgrade installed packages that have a newer catalog version
    Upgrade {
        /// Package name (upgrades all if omitted)
        package_name: Option<String>,
    },
    /// List catalog packages
    List {
        /// Only show this category
        category: Option<String>,
    },
    /// List installed packages
    Installed,
    /// Search the catalog by name and description
    Search {
        /// Keyword (case-insensitive)
        keyword: String,
    },
    /// Show package details
    Info {
        /// Package name
        package_name: String,
    },
    /// Show catalog and disk usage statistics
    Stats,
    /// Empty the download cache
    Clean,
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    /// Build a .alp bundle from a package directory
    Pack {
        /// Directory containing alp.sh, alp_u.sh and README.md
        dir: PathBuf,
        /// Output file (default: <name>-<version>.alp)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Embedded certificate (asked interactively if omitted)
        #[arg(long, value_enum)]
        sign: Option<SignMode>,
        /// Author for a custom certificate
        #[arg(long)]
        author: Option<String>,
    },
    /// Show the contents and trust status of a bundle
    Inspect {
        /// Bundle file
        file: PathBuf,
    },
    /// Issue a repository trust file for a package
    Cerf {
        /// Package name
        package_name: String,
        /// Author the trust file vouches for
        #[arg(long)]
        author: String,
        /// Trust type: official, dev or normal
        #[arg(long = "type", default_value = "normal")]
        cert_type: String,
        /// Output file (default: alp.cerf)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Verify a repository trust file
    VerifyCerf {
        /// Trust file
        file: PathBuf,
    },
    /// Check an installed package's script against its recorded checksum
    Verify {
        /// Package name
        package_name: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Change a setting
    Set { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SignMode {
    None,
    Custom,
    Official,
}

/// Confirmation prompts on the terminal; "no" when there is none
struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> bool {
        if !std::io::stdin().is_terminal() {
            warn!("{} (no terminal, answering no)", message);
            return false;
        }
        Confirm::new()
            .with_prompt(message)
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

fn state_paths(root: Option<PathBuf>) -> Result<AlpPaths> {
    let paths = match root {
        Some(root) => AlpPaths::new(root),
        None => AlpPaths::from_home()?,
    };
    paths.ensure()?;
    Ok(paths)
}

fn open_state(paths: &AlpPaths) -> Result<Connection> {
    Ok(alp::db::open_or_init(&paths.db_path())?)
}

fn is_bundle_path(target: &str) -> bool {
    let path = Path::new(target);
    path.extension().is_some_and(|ext| ext == BUNDLE_EXTENSION) || path.is_file()
}

fn print_not_found(err: &alp::Error) {
    if let alp::Error::NotFound { name, suggestions } = err {
        if suggestions.is_empty() {
            println!("No package named '{}' and no similar packages.", name);
        } else {
            println!("No package named '{}'. Did you mean:", name);
            for suggestion in suggestions {
                println!("  {}", suggestion);
            }
        }
    }
}

fn ask_signing(sign: Option<SignMode>, author: Option<String>) -> Result<Signing> {
    let interactive = std::io::stdin().is_terminal();
    let mode = match sign {
        Some(mode) => mode,
        None if interactive => {
            let choices = ["No certificate", "Custom certificate", "Official certificate"];
            match Select::new()
                .with_prompt("Sign the bundle?")
                .items(&choices)
                .default(0)
                .interact()?
            {
                1 => SignMode::Custom,
                2 => SignMode::Official,
                _ => SignMode::None,
            }
        }
        None => SignMode::None,
    };

    match mode {
        SignMode::None => Ok(Signing::None),
        SignMode::Custom => {
            let author = match author {
                Some(author) => author,
                None if interactive => Input::<String>::new()
                    .with_prompt("Certificate author")
                    .interact_text()?,
                None => anyhow::bail!("--author is required for a custom certificate"),
            };
            Ok(Signing::Custom { author })
        }
        SignMode::Official => Ok(Signing::Official {
            password: ask_password()?,
        }),
    }
}

fn ask_password() -> Result<String> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("Official signing needs a terminal to enter the password");
    }
    Ok(Password::new()
        .with_prompt("Official signing password")
        .interact()?)
}

/// Cancellation token flipped by Ctrl-C; checked between packages
fn cancel_on_interrupt() -> CancelToken {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("Interrupt received, stopping after the current package");
        handler_token.cancel();
    }) {
        warn!("Could not install interrupt handler: {}", e);
    }
    cancel
}

fn print_trust(label: &str, status: &TrustStatus) {
    let marker = if status.is_trusted() { "ok" } else { "!!" };
    println!("  {:<12} [{}] {}", label, marker, status);
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init) => {
            let paths = state_paths(cli.root)?;
            info!("Initializing Alp state at: {}", paths.root().display());
            alp::db::init(&paths.db_path())?;
            println!("Alp initialized at: {}", paths.root().display());
            Ok(())
        }
        Some(Commands::Update { force }) => {
            let paths = state_paths(cli.root)?;
            let conn = open_state(&paths)?;
            let config = Config::load(&conn)?;
            let client = RepositoryClient::new()?;
            let runner = ShellRunner::new();
            let mut manager = Manager::new(&conn, &paths, config, &client, &runner, &TerminalPrompt)?;

            match manager.refresh_catalog(force)? {
                Some(count) => println!("Catalog refreshed: {} package(s)", count),
                None => println!("Catalog is up to date (use --force to refresh anyway)"),
            }
            Ok(())
        }
        Some(Commands::Install { target }) => {
            let paths = state_paths(cli.root)?;
            let conn = open_state(&paths)?;
            let config = Config::load(&conn)?;
            let client = RepositoryClient::new()?;
            let runner = ShellRunner::new();

            let cancel = cancel_on_interrupt();
            let mut manager = Manager::new(&conn, &paths, config, &client, &runner, &TerminalPrompt)?
                .with_cancel(cancel);

            let outcome = if is_bundle_path(&target) {
                manager.install_bundle(Path::new(&target))
            } else {
                manager.auto_refresh();
                manager.install(&target)
            };

            match outcome {
                Ok(InstallOutcome::Installed) => {
                    println!("Installed {}", target);
                    Ok(())
                }
                Ok(InstallOutcome::AlreadyInstalled) => {
                    println!("{} is already installed", target);
                    Ok(())
                }
                Err(e) => {
                    print_not_found(&e);
                    Err(e.into())
                }
            }
        }
        Some(Commands::Remove { package_name }) => {
            let paths = state_paths(cli.root)?;
            let conn = open_state(&paths)?;
            let config = Config::load(&conn)?;
            let client = RepositoryClient::new()?;
            let runner = ShellRunner::new();
            let manager = Manager::new(&conn, &paths, config, &client, &runner, &TerminalPrompt)?;

            manager.remove(&package_name)?;
            println!("Removed {}", package_name);
            Ok(())
        }
        Some(Commands::Upgrade { package_name }) => {
            let paths = state_paths(cli.root)?;
            let conn = open_state(&paths)?;
            let config = Config::load(&conn)?;
            let client = RepositoryClient::new()?;
            let runner = ShellRunner::new();

            let cancel = cancel_on_interrupt();
            let mut manager = Manager::new(&conn, &paths, config, &client, &runner, &TerminalPrompt)?
                .with_cancel(cancel);
            manager.auto_refresh();

            let report = manager.upgrade(package_name.as_deref())?;
            for (name, from, to) in &report.upgraded {
                println!("Upgraded {} {} -> {}", name, from, to);
            }
            for (name, reason) in &report.failed {
                println!("Failed {}: {} (package is no longer installed)", name, reason);
            }
            println!(
                "{} upgraded, {} failed, {} up to date",
                report.upgraded.len(),
                report.failed.len(),
                report.up_to_date
            );
            if report.cancelled {
                anyhow::bail!("Upgrade cancelled");
            }
            if !report.failed.is_empty() {
                anyhow::bail!("{} package(s) failed to upgrade", report.failed.len());
            }
            Ok(())
        }
        Some(Commands::List { category }) => {
            let paths = state_paths(cli.root)?;
            let conn = open_state(&paths)?;
            let catalog = Catalog::load(&conn)?;

            let packages = match &category {
                Some(category) => catalog.in_category(category),
                None => catalog.iter().collect(),
            };
            if packages.is_empty() {
                println!("No packages found. Run 'alp update' to refresh the catalog.");
                return Ok(());
            }

            println!("Available packages:");
            for meta in &packages {
                let marker = if InstalledPackage::is_installed(&conn, &meta.name)? {
                    " [installed]"
                } else {
                    ""
                };
                println!(
                    "  {} {} ({}) - {}{}",
                    meta.name,
                    meta.version,
                    meta.category_or_default(),
                    meta.description_or_default(),
                    marker
                );
            }
            println!("\nTotal: {} package(s)", packages.len());
            Ok(())
        }
        Some(Commands::Installed) => {
            let paths = state_paths(cli.root)?;
            let conn = open_state(&paths)?;
            let records = InstalledPackage::list_all(&conn)?;

            if records.is_empty() {
                println!("No packages installed.");
                return Ok(());
            }

            println!("Installed packages:");
            for record in &records {
                let date = record.installed_at.get(..10).unwrap_or(&record.installed_at);
                let trust = record.cert_type.as_deref().unwrap_or("unsigned");
                let size = paths
                    .package_dir(&record.metadata.name)
                    .map(|dir| dir_size(&dir))
                    .unwrap_or(0);
                println!(
                    "  {} {} [{}, {}] installed {} ({} bytes)",
                    record.metadata.name,
                    record.metadata.version,
                    record.install_source.as_str(),
                    trust,
                    date,
                    size
                );
            }
            println!("\nTotal: {} package(s)", records.len());
            Ok(())
        }
        Some(Commands::Search { keyword }) => {
            let paths = state_paths(cli.root)?;
            let conn = open_state(&paths)?;
            let catalog = Catalog::load(&conn)?;

            let matches = catalog.search(&keyword);
            if matches.is_empty() {
                println!("No packages match '{}'.", keyword);
                return Ok(());
            }
            for meta in &matches {
                println!("  {} {} - {}", meta.name, meta.version, meta.description_or_default());
            }
            println!("\nFound {} package(s)", matches.len());
            Ok(())
        }
        Some(Commands::Info { package_name }) => {
            let paths = state_paths(cli.root)?;
            let conn = open_state(&paths)?;
            let catalog = Catalog::load(&conn)?;
            let record = InstalledPackage::find_by_name(&conn, &package_name)?;

            let meta = match (catalog.get(&package_name), &record) {
                (Some(meta), _) => meta.clone(),
                (None, Some(record)) => record.metadata.clone(),
                (None, None) => {
                    let err = alp::Error::NotFound {
                        name: package_name.clone(),
                        suggestions: catalog.suggestions(&package_name),
                    };
                    print_not_found(&err);
                    return Err(err.into());
                }
            };

            println!("Package: {}", meta.name);
            println!("  Version:     {}", meta.version);
            println!("  Description: {}", meta.description_or_default());
            println!("  Author:      {}", meta.author.as_deref().unwrap_or("unknown"));
            println!("  License:     {}", meta.license_or_default());
            println!("  Category:    {}", meta.category_or_default());
            if !meta.source.is_empty() {
                println!("  Source:      {}", meta.source);
            }
            if let Some(main) = &meta.main {
                println!("  Payload:     {}", main);
            }
            if meta.dependencies.is_empty() {
                println!("  Dependencies: none");
            } else {
                println!("  Dependencies:");
                for dep in &meta.dependencies {
                    let mark = if InstalledPackage::is_installed(&conn, dep)? { "x" } else { " " };
                    println!("    [{}] {}", mark, dep);
                }
            }
            if let Some(trust) = &meta.trust {
                let state = if trust.cert_valid { "valid" } else { "INVALID" };
                println!(
                    "  Trust file:  {} by {} ({}): {}",
                    trust.cert_type, trust.cert_author, state, trust.cert_message
                );
            }
            match &record {
                Some(record) => {
                    println!(
                        "  Installed:   {} from {} on {}",
                        record.metadata.version,
                        record.install_source.as_str(),
                        record.installed_at
                    );
                    println!("  Checksum:    {}", record.checksum);
                }
                None => println!("  Installed:   no"),
            }
            Ok(())
        }
        Some(Commands::Stats) => {
            let paths = state_paths(cli.root)?;
            let conn = open_state(&paths)?;
            let catalog = Catalog::load(&conn)?;
            let installed = InstalledPackage::list_all(&conn)?;
            let certificates = StoredCertificate::list_all(&conn)?;
            let last_sync = Setting::get(&conn, LAST_SYNC_KEY)?;

            println!("Alp statistics:");
            println!("  Catalog packages:   {}", catalog.len());
            println!("  Installed packages: {}", installed.len());
            println!("  Certificates:       {}", certificates.len());
            println!("  Installed size:     {} bytes", dir_size(&paths.installed_dir()));
            println!("  Cache size:         {} bytes", dir_size(&paths.cache_dir()));
            println!(
                "  Last refresh:       {}",
                last_sync.as_deref().unwrap_or("never")
            );
            Ok(())
        }
        Some(Commands::Clean) => {
            let paths = state_paths(cli.root)?;
            let freed = clean_cache(&paths.cache_dir())?;
            println!("Cache cleaned, {} bytes freed", freed);
            Ok(())
        }
        Some(Commands::Config { action }) => {
            let paths = state_paths(cli.root)?;
            let conn = open_state(&paths)?;
            match action {
                Some(ConfigAction::Set { key, value }) => {
                    Config::set(&conn, &key, &value)?;
                    println!("{} = {}", key, value.trim());
                }
                None => {
                    println!("Settings:");
                    for (key, value) in Config::load(&conn)?.entries() {
                        println!("  {:<20} {}", key, value);
                    }
                }
            }
            Ok(())
        }
        Some(Commands::Pack {
            dir,
            output,
            sign,
            author,
        }) => {
            let signing = ask_signing(sign, author)?;
            let bundle = Bundle::encode(&dir, &signing)?;
            let output = output.unwrap_or_else(|| bundle.default_file_name());
            bundle
                .write_to(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            println!(
                "Packed {} {} into {}",
                bundle.metadata.name,
                bundle.metadata.version,
                output.display()
            );
            println!("  Checksum: {}", bundle.checksum);
            if let Some(cert) = &bundle.certificate {
                println!("  Certificate: {} ({})", cert.cert_type.as_str(), cert.author);
            }
            Ok(())
        }
        Some(Commands::Inspect { file }) => {
            let bundle = Bundle::read(&file)?;
            let meta = &bundle.metadata;

            println!("Bundle: {}", file.display());
            println!("  Format:      {}", bundle.format_version);
            println!("  Package:     {} {}", meta.name, meta.version);
            println!("  Description: {}", meta.description_or_default());
            println!("  License:     {}", meta.license_or_default());
            println!("  Category:    {}", meta.category_or_default());
            if !meta.dependencies.is_empty() {
                println!("  Depends on:  {}", meta.dependencies.join(", "));
            }
            if let Some(main) = &bundle.files.main_name {
                println!("  Payload:     {}", main);
            }
            println!("  Compiled:    {}", bundle.compiled_at);
            let checksum_state = if bundle.verify_checksum() { "ok" } else { "MISMATCH" };
            println!("  Checksum:    {} ({})", bundle.checksum, checksum_state);
            if let Some(cert) = &bundle.certificate {
                print_trust("Certificate", &cert.status(&meta.name));
            }
            print_trust("Trust", &bundle.trust_status());
            Ok(())
        }
        Some(Commands::Cerf {
            package_name,
            author,
            cert_type,
            output,
        }) => {
            let password = if cert_type.trim().eq_ignore_ascii_case("official") {
                Some(ask_password()?)
            } else {
                None
            };
            let cerf = RepoTrustFile::issue(&package_name, &author, &cert_type, password.as_deref())?;
            let output = output.unwrap_or_else(|| PathBuf::from(CERF_FILE));
            std::fs::write(&output, cerf.to_json()?)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            println!(
                "Issued {} trust file for {} by {}: {}",
                cerf.cert_type,
                cerf.package,
                cerf.author,
                output.display()
            );
            Ok(())
        }
        Some(Commands::VerifyCerf { file }) => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let cerf = RepoTrustFile::parse(&text)?;
            let status = cerf.status(&cerf.package);

            println!("Trust file: {}", file.display());
            println!("  Package: {}", cerf.package);
            println!("  Issued:  {}", cerf.issued_at);
            print_trust("Status", &status);
            if let TrustStatus::Invalid { reason } = status {
                anyhow::bail!("Trust file is invalid: {}", reason);
            }
            Ok(())
        }
        Some(Commands::Verify { package_name }) => {
            let paths = state_paths(cli.root)?;
            let conn = open_state(&paths)?;
            let config = Config::load(&conn)?;
            let client = RepositoryClient::new()?;
            let runner = ShellRunner::new();
            let manager = Manager::new(&conn, &paths, config, &client, &runner, &TerminalPrompt)?;

            if let Some(status) = manager.stored_trust(&package_name)? {
                print_trust("Certificate", &status);
            }
            match manager.verify(&package_name)? {
                Drift::Unchanged => {
                    println!("{}: install script matches the recorded checksum", package_name);
                    Ok(())
                }
                Drift::Changed { recorded, actual } => {
                    println!("{}: install script has changed", package_name);
                    println!("  Recorded: {}", recorded);
                    println!("  Actual:   {}", actual);
                    anyhow::bail!("Drift detected for {}", package_name)
                }
                Drift::Unavailable => {
                    println!("{}: install script is no longer on disk, nothing to compare", package_name);
                    Ok(())
                }
            }
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "alp", &mut std::io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("Alp Package Manager v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'alp --help' for usage information");
            Ok(())
        }
    }
}
