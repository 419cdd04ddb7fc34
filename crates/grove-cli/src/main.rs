#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;

use clap::{Parser, ValueEnum};
use grove_core::config::CONFIG_FILE_NAME;
use grove_core::pkg::{DepKind, PkgError};
use grove_core::Config;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "grove")]
#[command(author, version, about = "Dependency resolution and lockfile reconciliation for npm projects", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v INFO, -vv DEBUG, -vvv TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Operate on the global install prefix
    #[arg(short, long, global = true)]
    global: bool,

    /// Registry base URL
    #[arg(long, global = true, value_name = "URL")]
    registry: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Resolve dependencies and write the lockfile
    Install {
        /// Fail on any dependency that cannot be resolved
        #[arg(long)]
        strict: bool,

        /// Fail on peer dependency conflicts
        #[arg(long)]
        strict_peer_deps: bool,

        /// Dependency types to leave out of the tree
        #[arg(long, value_enum, value_name = "TYPE")]
        omit: Vec<Omit>,
    },

    /// Clean install exactly what the lockfile says
    Ci {
        /// Do not run lifecycle scripts
        #[arg(long)]
        ignore_scripts: bool,
    },

    /// Write npm-shrinkwrap.json from the lockfile or installed tree
    Shrinkwrap,

    /// Report installed packages with newer versions available
    Outdated {
        /// Only check these packages
        names: Vec<String>,

        /// Check dependencies of every installed package
        #[arg(long)]
        all: bool,

        /// Dependency types to skip
        #[arg(long, value_enum, value_name = "TYPE")]
        omit: Vec<Omit>,
    },

    /// Work out which two package versions to compare
    Diff {
        /// Package spec, version or directory to compare (at most twice)
        #[arg(long = "diff", value_name = "SPEC")]
        specs: Vec<String>,

        /// Dist-tag compared against when no --diff is given
        #[arg(long)]
        tag: Option<String>,

        /// Limit the comparison to these paths
        files: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Omit {
    Dev,
    Optional,
    Peer,
    Prod,
}

impl Omit {
    fn kinds(self) -> &'static [DepKind] {
        match self {
            Self::Dev => &[DepKind::Dev],
            Self::Optional => &[DepKind::Optional],
            Self::Peer => &[DepKind::Peer, DepKind::PeerOptional],
            Self::Prod => &[DepKind::Prod],
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = Config::new(cwd.clone())
        .with_env()
        .with_file(&cwd.join(CONFIG_FILE_NAME))
        .into_diagnostic()?
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json)
        .with_global(cli.global);
    if let Some(registry) = cli.registry {
        config = config.with_registry(registry);
    }

    logging::init(config.verbosity, config.json_logs);

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let json = cli.json;
    Ok(match runtime.block_on(dispatch(cli.command, config, json)) {
        Ok(code) => code,
        Err(err) => {
            commands::report_error(&err, json);
            ExitCode::FAILURE
        }
    })
}

async fn dispatch(command: Commands, mut config: Config, json: bool) -> Result<ExitCode, PkgError> {
    match command {
        Commands::Install {
            strict,
            strict_peer_deps,
            omit,
        } => {
            config.strict |= strict;
            let mut config = config.with_strict_peer_deps(strict_peer_deps);
            for kind in omit {
                match kind {
                    Omit::Dev => config.include_dev = false,
                    Omit::Optional => config.include_optional = false,
                    Omit::Peer => config.include_peer = false,
                    // prod dependencies are always installed
                    Omit::Prod => {}
                }
            }
            commands::install::run(&config, json).await
        }
        Commands::Ci { ignore_scripts } => {
            let ignore = ignore_scripts || config.ignore_scripts;
            commands::ci::run(&config.with_ignore_scripts(ignore), json)
        }
        Commands::Shrinkwrap => commands::shrinkwrap::run(&config, json),
        Commands::Outdated { names, all, omit } => {
            let mut options = config.outdated_options();
            options.all = all;
            options.names = names;
            options.omit = omit.iter().flat_map(|o| o.kinds().iter().copied()).collect();
            commands::outdated::run(&config, options, json).await
        }
        Commands::Diff { specs, tag, files } => {
            let tag = tag.unwrap_or_else(|| config.default_tag.clone());
            commands::diff::run(&config, &specs, &files, &tag, json).await
        }
    }
}
