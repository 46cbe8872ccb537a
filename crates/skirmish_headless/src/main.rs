//! Headless Skirmish runner.
//!
//! # Usage
//!
//! ```bash
//! # Run a scenario, optionally recording a replay
//! cargo run -p skirmish_headless -- run --scenario duel.ron --record duel.skrp
//!
//! # Verify a replay against the rules it was played with
//! cargo run -p skirmish_headless -- replay --file duel.skrp --scenario duel.ron
//!
//! # Run the same seed several times and compare hashes
//! cargo run -p skirmish_headless -- verify --scenario duel.ron --runs 8
//!
//! # Run many seeds in parallel
//! cargo run -p skirmish_headless -- batch --scenario duel.ron --count 100
//!
//! # Check a rules or scenario file
//! cargo run -p skirmish_headless -- validate --rules rules.ron
//!
//! # Play a scenario through a relay
//! cargo run -p skirmish_headless -- join --address 127.0.0.1:7777 --scenario duel.ron --host
//! ```
//!
//! Reports are JSON lines on stdout; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skirmish_core::rules::Ruleset;
use skirmish_headless::{
    run_batch, run_networked, verify_determinism, verify_replay, BatchConfig, RunOptions, Scenario,
    ScenarioRunner,
};
use skirmish_server::client::NetworkConnection;

#[derive(Parser)]
#[command(name = "skirmish_headless")]
#[command(about = "Headless Skirmish runner for CI and replay verification")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario with every client simulated locally
    Run {
        /// Scenario file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Record a replay to this file
        #[arg(long)]
        record: Option<PathBuf>,

        /// Write sync reports here when a desync is detected
        #[arg(long)]
        sync_reports: Option<PathBuf>,

        /// Override the session seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Replay a recording and compare against its hashes
    Replay {
        /// Replay file
        #[arg(short, long)]
        file: PathBuf,

        /// Rules file the game was played with
        #[arg(long, conflicts_with = "scenario")]
        rules: Option<PathBuf>,

        /// Scenario whose rules the game was played with
        #[arg(long)]
        scenario: Option<PathBuf>,
    },

    /// Run the same seed several times and compare final hashes
    Verify {
        /// Scenario file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Number of runs
        #[arg(short, long, default_value = "5")]
        runs: u32,

        /// Maximum parallel runs (0 = auto)
        #[arg(short, long, default_value = "0")]
        parallel: usize,
    },

    /// Run a scenario over a range of seeds
    Batch {
        /// Scenario file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Number of runs
        #[arg(short, long, default_value = "16")]
        count: u32,

        /// First seed
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Maximum parallel runs (0 = auto)
        #[arg(short, long, default_value = "0")]
        parallel: usize,

        /// Also write the full results as JSON here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a rules or scenario file
    Validate {
        /// Rules file
        #[arg(long, conflicts_with = "scenario", required_unless_present = "scenario")]
        rules: Option<PathBuf>,

        /// Scenario file
        #[arg(long)]
        scenario: Option<PathBuf>,
    },

    /// Play a scenario through a relay server
    Join {
        /// Relay address
        #[arg(short, long, default_value = "127.0.0.1:7777")]
        address: String,

        /// Scenario file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Display name
        #[arg(short, long, default_value = "headless")]
        name: String,

        /// Propose the scenario's session once joined
        #[arg(long)]
        host: bool,

        /// Give up after this many seconds without progress
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the reports.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(2)
        }
    }
}

/// Execute a command. `Ok(false)` means it ran but the check failed.
fn run(command: Commands) -> Result<bool, Box<dyn std::error::Error>> {
    match command {
        Commands::Run {
            scenario,
            record,
            sync_reports,
            seed,
        } => {
            let mut scenario = Scenario::load(scenario)?;
            if let Some(seed) = seed {
                scenario = scenario.with_seed(seed);
            }
            let options = RunOptions {
                record,
                sync_report_dir: sync_reports,
            };
            let report = ScenarioRunner::new(scenario, options)?.run()?;
            print_json(&report)?;
            Ok(report.peers_agree)
        }
        Commands::Replay {
            file,
            rules,
            scenario,
        } => {
            let rules = match (rules, scenario) {
                (Some(path), _) => Arc::new(Ruleset::load(path)?),
                (None, Some(path)) => Scenario::load(path)?.load_rules()?,
                (None, None) => return Err("replay needs --rules or --scenario".into()),
            };
            let report = verify_replay(&file, rules)?;
            print_json(&report)?;
            Ok(report.verified)
        }
        Commands::Verify {
            scenario,
            runs,
            parallel,
        } => {
            let report = verify_determinism(&Scenario::load(scenario)?, runs, parallel)?;
            print_json(&report)?;
            Ok(report.deterministic)
        }
        Commands::Batch {
            scenario,
            count,
            seed,
            parallel,
            output,
        } => {
            let config = BatchConfig {
                runs: count,
                seed_start: seed,
                parallel,
            };
            let results = run_batch(&Scenario::load(scenario)?, &config)?;
            for run in &results.runs {
                print_json(run)?;
            }
            if let Some(path) = output {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, serde_json::to_string_pretty(&results)?)?;
            }
            Ok(results.desyncs == 0 && results.failures == 0)
        }
        Commands::Validate { rules, scenario } => {
            if let Some(path) = rules {
                let rules = Ruleset::load(&path)?;
                tracing::info!(path = %path.display(), actors = rules.actors.len(), "Rules valid");
            }
            if let Some(path) = scenario {
                let scenario = Scenario::load(&path)?;
                scenario.validate()?;
                tracing::info!(
                    path = %path.display(),
                    actors = scenario.session.map.actors.len(),
                    orders = scenario.orders.len(),
                    "Scenario valid"
                );
            }
            Ok(true)
        }
        Commands::Join {
            address,
            scenario,
            name,
            host,
            timeout,
        } => {
            let scenario = Scenario::load(scenario)?;
            let timeout = Duration::from_secs(timeout);
            let connection = NetworkConnection::connect(&address, &name, timeout)?;
            let report = run_networked(&scenario, connection, host, timeout)?;
            print_json(&report)?;
            Ok(report.peers_agree)
        }
    }
}
