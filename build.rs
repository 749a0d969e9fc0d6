// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn root_arg() -> Arg {
    Arg::new("root")
        .short('r')
        .long("root")
        .value_name("PATH")
        .global(true)
        .help("State directory (default: ~/.alp)")
}

fn build_cli() -> Command {
    Command::new("alp")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Alp Contributors")
        .about("Script-driven package manager with bundles and trust files")
        .subcommand_required(false)
        .arg(root_arg())
        .subcommand(Command::new("init").about("Initialize the Alp state directory and database"))
        .subcommand(
            Command::new("update")
                .about("Refresh the package catalog from the repository index")
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Refresh even if the catalog is still fresh"),
                ),
        )
        .subcommand(
            Command::new("install")
                .about("Install a catalog package or a local .alp bundle")
                .arg(Arg::new("target").required(true).help("Package name or path to a bundle")),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove an installed package")
                .arg(Arg::new("package_name").required(true).help("Package name to remove")),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade installed packages that have a newer catalog version")
                .arg(Arg::new("package_name").help("Package name (upgrades all if omitted)")),
        )
        .subcommand(
            Command::new("list")
                .about("List catalog packages")
                .arg(Arg::new("category").help("Only show this category")),
        )
        .subcommand(Command::new("installed").about("List installed packages"))
        .subcommand(
            Command::new("search")
                .about("Search the catalog by name and description")
                .arg(Arg::new("keyword").required(true).help("Keyword (case-insensitive)")),
        )
        .subcommand(
            Command::new("info")
                .about("Show package details")
                .arg(Arg::new("package_name").required(true).help("Package name")),
        )
        .subcommand(Command::new("stats").about("Show catalog and disk usage statistics"))
        .subcommand(Command::new("clean").about("Empty the download cache"))
        .subcommand(
            Command::new("config")
                .about("Show or change settings")
                .subcommand(
                    Command::new("set")
                        .about("Change a setting")
                        .arg(Arg::new("key").required(true))
                        .arg(Arg::new("value").required(true)),
                ),
        )
        .subcommand(
            Command::new("pack")
                .about("Build a .alp bundle from a package directory")
                .arg(
                    Arg::new("dir")
                        .required(true)
                        .help("Directory containing alp.sh, alp_u.sh and README.md"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Output file (default: <name>-<version>.alp)"),
                )
                .arg(
                    Arg::new("sign")
                        .long("sign")
                        .value_parser(["none", "custom", "official"])
                        .help("Embedded certificate (asked interactively if omitted)"),
                )
                .arg(Arg::new("author").long("author").help("Author for a custom certificate")),
        )
        .subcommand(
            Command::new("inspect")
                .about("Show the contents and trust status of a bundle")
                .arg(Arg::new("file").required(true).help("Bundle file")),
        )
        .subcommand(
            Command::new("cerf")
                .about("Issue a repository trust file for a package")
                .arg(Arg::new("package_name").required(true).help("Package name"))
                .arg(
                    Arg::new("author")
                        .long("author")
                        .required(true)
                        .help("Author the trust file vouches for"),
                )
                .arg(
                    Arg::new("type")
                        .long("type")
                        .default_value("normal")
                        .help("Trust type: official, dev or normal"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Output file (default: alp.cerf)"),
                ),
        )
        .subcommand(
            Command::new("verify-cerf")
                .about("Verify a repository trust file")
                .arg(Arg::new("file").required(true).help("Trust file")),
        )
        .subcommand(
            Command::new("verify")
                .about("Check an installed package's script against its recorded checksum")
                .arg(Arg::new("package_name").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("alp.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
