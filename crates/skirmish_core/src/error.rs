//! Error types for the game simulation.

use thiserror::Error;

use crate::actor::ActorId;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for all simulation and lockstep errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// Invalid actor reference.
    #[error("Actor not found: {0}")]
    ActorNotFound(ActorId),

    /// Actor type missing from the ruleset.
    #[error("Unknown actor type: {0}")]
    UnknownActorType(String),

    /// Order rejected before it reached the simulation.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path to the file that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// Lockstep protocol violation that cannot be tolerated.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Desync detected in multiplayer.
    #[error("Desync detected at frame {frame}: local hash {local_hash:#018x}, remote hash {remote_hash:#018x}")]
    DesyncDetected {
        /// Frame where desync occurred.
        frame: u32,
        /// Local simulation hash.
        local_hash: u64,
        /// Remote simulation hash.
        remote_hash: u64,
    },

    /// Replay data could not be decoded.
    #[error("Replay is corrupt: {0}")]
    ReplayCorrupt(String),

    /// Replay ended before its end record.
    #[error("Replay is truncated: {0}")]
    ReplayTruncated(String),

    /// Replay written by an incompatible engine version.
    #[error("Replay version mismatch: expected {expected}, got {found}")]
    ReplayVersion {
        /// Version this build reads.
        expected: u32,
        /// Version found in the file.
        found: u32,
    },

    /// Binary encoding or decoding failure.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    /// Underlying IO failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),
}
