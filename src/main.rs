#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![warn(rust_2024_compatibility)]
#![warn(deprecated_safe)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;

use authz_engine::config::LoadOptionsBuilder;
use authz_engine::rights::Rights;
use authz_engine::Authz;

#[derive(Debug, Parser)]
#[clap(author, version, about = "Path-based access-control engine")]
struct Opts {
    #[clap(subcommand)]
    command: Commands,

    /// Increase log verbosity (stacks: -v, -vv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Decide whether a user may access a path in a repository
    Check {
        #[clap(long, value_parser)]
        config: PathBuf,
        /// Second config source containing only a [groups] section
        #[clap(long, value_parser)]
        groups: Option<PathBuf>,
        #[clap(long)]
        repo: String,
        /// Path to check, or omitted to ask "access anywhere in this repo"
        #[clap(long)]
        path: Option<String>,
        /// Omit for an anonymous query
        #[clap(long)]
        user: Option<String>,
        /// Any combination of 'r' and 'w'
        #[clap(long, value_parser = parse_rights)]
        rights: Rights,
        #[clap(long)]
        recursive: bool,
    },
    /// Load and validate a configuration file without running a query
    Validate {
        #[clap(long, value_parser)]
        config: PathBuf,
        #[clap(long, value_parser)]
        groups: Option<PathBuf>,
    },
}

fn parse_rights(value: &str) -> std::result::Result<Rights, String> {
    Rights::parse(value).map_err(|bad_char| format!("illegal rights character '{bad_char}'"))
}

fn run_check(
    config: PathBuf,
    groups: Option<PathBuf>,
    repo: String,
    path: Option<String>,
    user: Option<String>,
    rights: Rights,
    recursive: bool,
) -> Result<bool> {
    let opts = LoadOptionsBuilder::default().groups_path(groups).build()?;
    let authz = Authz::load(&config, &opts, None).context("failed to load configuration")?;
    let decision = authz
        .check_access_explained(&repo, path.as_deref(), user.as_deref(), rights, recursive)
        .context("query failed")?;
    println!("{}", decision.reason);
    Ok(decision.allowed)
}

fn run_validate(config: PathBuf, groups: Option<PathBuf>) -> Result<()> {
    let opts = LoadOptionsBuilder::default().groups_path(groups).build()?;
    let authz = Authz::load(&config, &opts, None).context("configuration is invalid")?;
    let loaded = authz.config().sections().count();
    info!("configuration is valid ({loaded} section(s))");
    Ok(())
}

fn main() -> ExitCode {
    let opts = Opts::parse();

    let default_level = match opts.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let result = match opts.command {
        Commands::Check {
            config,
            groups,
            repo,
            path,
            user,
            rights,
            recursive,
        } => run_check(config, groups, repo, path, user, rights, recursive).map(|allowed| {
            if allowed {
                println!("allow");
                ExitCode::from(0)
            } else {
                println!("deny");
                ExitCode::from(1)
            }
        }),
        Commands::Validate { config, groups } => run_validate(config, groups).map(|()| ExitCode::from(0)),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
