//! Batch runs for determinism and regression checks.
//!
//! Runs many independent copies of a scenario in parallel using rayon. Each
//! run owns its worlds, so runs share nothing but the scenario.

use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::runner::{RunOptions, RunReport, ScenarioRunner};
use crate::scenario::Scenario;

/// Configuration for a batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of runs
    pub runs: u32,
    /// Seed of the first run; run `i` uses `seed_start + i`
    pub seed_start: u64,
    /// Maximum parallel runs (0 = use rayon default)
    pub parallel: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            runs: 16,
            seed_start: 0,
            parallel: 0,
        }
    }
}

/// One run of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRun {
    /// Seed used
    pub seed: u64,
    /// Report, if the run completed
    pub report: Option<RunReport>,
    /// Error message, if it did not
    pub error: Option<String>,
}

/// Results from a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    /// Scenario name
    pub scenario: String,
    /// Runs in seed order
    pub runs: Vec<BatchRun>,
    /// Runs whose peers disagreed
    pub desyncs: usize,
    /// Runs that failed outright
    pub failures: usize,
    /// Total runtime
    pub duration_seconds: f64,
}

fn pool(parallel: usize) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new().num_threads(parallel).build()
}

fn run_one(scenario: &Scenario) -> Result<RunReport, String> {
    ScenarioRunner::new(scenario.clone(), RunOptions::default())
        .and_then(|runner| runner.run())
        .map_err(|e| e.to_string())
}

/// Run `scenario` once per seed.
pub fn run_batch(
    scenario: &Scenario,
    config: &BatchConfig,
) -> Result<BatchResults, rayon::ThreadPoolBuildError> {
    let start = Instant::now();
    info!(
        scenario = %scenario.name,
        runs = config.runs,
        seed_start = config.seed_start,
        "Starting batch"
    );

    let runs: Vec<BatchRun> = pool(config.parallel)?.install(|| {
        (0..config.runs)
            .into_par_iter()
            .map(|i| {
                let seed = config.seed_start.wrapping_add(u64::from(i));
                match run_one(&scenario.with_seed(seed)) {
                    Ok(report) => BatchRun {
                        seed,
                        report: Some(report),
                        error: None,
                    },
                    Err(e) => {
                        warn!(seed, error = %e, "Run failed");
                        BatchRun {
                            seed,
                            report: None,
                            error: Some(e),
                        }
                    }
                }
            })
            .collect()
    });

    let desyncs = runs
        .iter()
        .filter(|r| r.report.as_ref().is_some_and(|r| !r.peers_agree))
        .count();
    let failures = runs.iter().filter(|r| r.error.is_some()).count();
    let duration_seconds = start.elapsed().as_secs_f64();
    info!(
        runs = runs.len(),
        desyncs,
        failures,
        "Batch complete in {duration_seconds:.1}s"
    );

    Ok(BatchResults {
        scenario: scenario.name.clone(),
        runs,
        desyncs,
        failures,
        duration_seconds,
    })
}

/// Same scenario, same seed, run several times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminismReport {
    /// Seed used
    pub seed: u64,
    /// Final hash of each run, `None` where a run failed
    pub hashes: Vec<Option<u64>>,
    /// Whether every run completed with the same hash
    pub deterministic: bool,
}

/// Run `scenario` `runs` times in parallel and compare the final hashes.
pub fn verify_determinism(
    scenario: &Scenario,
    runs: u32,
    parallel: usize,
) -> Result<DeterminismReport, rayon::ThreadPoolBuildError> {
    let hashes: Vec<Option<u64>> = pool(parallel)?.install(|| {
        (0..runs)
            .into_par_iter()
            .map(|_| run_one(scenario).ok().map(|r| r.final_hash))
            .collect()
    });
    let deterministic = hashes.iter().all(Option::is_some) && hashes.windows(2).all(|w| w[0] == w[1]);
    if !deterministic {
        warn!(seed = scenario.session.seed, ?hashes, "Runs diverged");
    }
    Ok(DeterminismReport {
        seed: scenario.session.seed,
        hashes,
        deterministic,
    })
}
