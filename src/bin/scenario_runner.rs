#![forbid(unsafe_code)]
#![warn(clippy::all)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use csv::ReaderBuilder;
use rand::seq::SliceRandom;
use serde::Deserialize;

use authz_engine::config::LoadOptionsBuilder;
use authz_engine::rights::Rights;
use authz_engine::Authz;

/// Runs a CSV-described batch of allow/deny scenarios against a single
/// configuration file and reports any mismatches.
#[derive(Debug, Parser)]
#[clap(author, version, about = "Batch scenario runner for an authz config")]
struct Opts {
    /// Path to the authz configuration under test
    #[clap(long)]
    config: PathBuf,

    /// CSV file with one row per scenario
    #[clap(long)]
    scenarios: PathBuf,

    /// Run only a random sample of N scenarios (useful against a huge fixture)
    #[clap(long)]
    sample: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    id: String,
    repo: String,
    /// Empty cell means an anonymous query
    user: String,
    /// Empty cell means "access anywhere" (path absent)
    path: String,
    rights: String,
    recursive: bool,
    expected: String,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let load_opts = LoadOptionsBuilder::default().build()?;
    let authz = Authz::load(&opts.config, &load_opts, None).context("failed to load configuration")?;

    let mut reader = ReaderBuilder::new()
        .from_path(&opts.scenarios)
        .with_context(|| format!("failed to open {}", opts.scenarios.display()))?;

    let mut scenarios: Vec<Scenario> = reader
        .deserialize()
        .collect::<std::result::Result<_, _>>()
        .context("failed to parse scenario CSV")?;

    if let Some(n) = opts.sample {
        let mut rng = rand::thread_rng();
        scenarios.shuffle(&mut rng);
        scenarios.truncate(n);
    }

    let mut failures = 0usize;
    for scenario in &scenarios {
        let user = (!scenario.user.is_empty()).then_some(scenario.user.as_str());
        let path = (!scenario.path.is_empty()).then_some(scenario.path.as_str());
        let rights = Rights::parse(&scenario.rights)
            .map_err(|c| anyhow::anyhow!("scenario {}: illegal rights character '{c}'", scenario.id))?;
        let expected = match scenario.expected.to_lowercase().as_str() {
            "allow" => true,
            "deny" => false,
            other => anyhow::bail!("scenario {}: expected must be 'allow' or 'deny', got '{other}'", scenario.id),
        };

        let actual = authz
            .check_access(&scenario.repo, path, user, rights, scenario.recursive)
            .with_context(|| format!("scenario {} failed to evaluate", scenario.id))?;

        if actual != expected {
            failures += 1;
            eprintln!(
                "FAIL {}: repo={} user={:?} path={:?} rights={} recursive={} expected={} actual={}",
                scenario.id, scenario.repo, user, path, rights, scenario.recursive, expected, actual
            );
        }
    }

    println!("{} scenario(s) run, {} failure(s)", scenarios.len(), failures);
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
