//! Headless scenario runner for CI and replay verification.
//!
//! Runs scenarios without rendering, with every client simulated locally or
//! joined to a relay over the network. Reports go to stdout as JSON lines,
//! logs to stderr.
//!
//! - **Determinism checks**: run a scenario many times and compare hashes
//! - **Replay verification**: replay a recording and compare against its hashes
//! - **Network smoke tests**: play a scripted game through a relay
//!
//! # Example
//!
//! ```bash
//! # Run a scenario and record it
//! cargo run -p skirmish_headless -- run --scenario duel.ron --record duel.skrp
//!
//! # Check the recording reproduces
//! cargo run -p skirmish_headless -- replay --file duel.skrp --scenario duel.ron
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod batch;
pub mod runner;
pub mod scenario;

pub use batch::{run_batch, verify_determinism, BatchConfig, BatchResults, DeterminismReport};
pub use runner::{run_networked, verify_replay, ReplayReport, RunError, RunOptions, RunReport, ScenarioRunner};
pub use scenario::{RulesSource, Scenario, ScenarioError, ScriptedDisconnect, ScriptedOrder};
