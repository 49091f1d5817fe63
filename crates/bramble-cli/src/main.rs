#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;

use bramble_core::config::{effective_registry, LockfileVersion, SaveKind};
use bramble_core::Config;
use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bramble")]
#[command(author, version, about = "An npm-compatible package manager", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted logs (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Override the registry URL
    #[arg(long, global = true, value_name = "URL")]
    registry: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install dependencies from package.json and the lockfile
    Install {
        /// Lockfile version to write when creating a fresh lockfile
        #[arg(long, value_parser = parse_lockfile_version)]
        lockfile_version: Option<LockfileVersion>,
    },

    /// Clean install: wipe node_modules and install from the lockfile
    Ci,

    /// Add packages and record them in package.json
    Add {
        /// Package specs (name, name@range, alias@npm:name@range)
        #[arg(required = true)]
        specs: Vec<String>,

        /// Save to devDependencies
        #[arg(long, conflicts_with_all = ["save_optional", "save_peer"])]
        save_dev: bool,

        /// Save to optionalDependencies
        #[arg(long, conflicts_with_all = ["save_dev", "save_peer"])]
        save_optional: bool,

        /// Save to peerDependencies
        #[arg(long, conflicts_with_all = ["save_dev", "save_optional"])]
        save_peer: bool,

        /// Install without modifying package.json
        #[arg(long)]
        no_save: bool,
    },

    /// Remove packages from package.json and the tree
    Remove {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Update packages to the newest satisfying versions
    Update {
        /// Package names (all packages when omitted)
        names: Vec<String>,
    },

    /// List installed packages
    List,
}

fn parse_lockfile_version(input: &str) -> Result<LockfileVersion, String> {
    match input {
        "1" => Ok(LockfileVersion::V1),
        "2" => Ok(LockfileVersion::V2),
        "3" => Ok(LockfileVersion::V3),
        other => Err(format!("unsupported lockfile version '{other}' (expected 1, 2, or 3)")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    let cwd = match cli.cwd {
        Some(path) => path,
        None => std::env::current_dir()
            .map_err(|e| miette::miette!("Cannot determine working directory: {e}"))?,
    };

    let registry = cli
        .registry
        .unwrap_or_else(|| effective_registry(&cwd));
    let mut config = Config::new(cwd).with_registry(registry);

    match cli.command {
        Commands::Install { lockfile_version } => {
            if let Some(version) = lockfile_version {
                config = config.with_lockfile_version(version);
            }
            commands::install::run(&config, false)
        }
        Commands::Ci => commands::install::run(&config, true),
        Commands::Add {
            specs,
            save_dev,
            save_optional,
            save_peer,
            no_save,
        } => {
            if save_dev {
                config = config.with_save_kind(SaveKind::Dev);
            } else if save_optional {
                config = config.with_save_kind(SaveKind::Optional);
            } else if save_peer {
                config = config.with_save_kind(SaveKind::Peer);
            }
            if no_save {
                config = config.with_no_save();
            }
            commands::add::run(&config, &specs)
        }
        Commands::Remove { names } => commands::remove::run(&config, &names),
        Commands::Update { names } => commands::update::run(&config, &names),
        Commands::List => commands::list::run(&config),
    }
}
