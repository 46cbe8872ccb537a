//! Error types for the relay server and network client.

use thiserror::Error;

use skirmish_core::error::GameError;

/// Result type alias using [`ServerError`].
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors raised by the relay and the network connection.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame payload failed to encode or decode.
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Config file could not be parsed.
    #[error("Invalid server config: {0}")]
    Config(String),

    /// Peer broke the relay protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server refused the client.
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// No answer within the allowed time.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The connection is gone.
    #[error("Connection closed")]
    Closed,
}

impl From<ServerError> for GameError {
    fn from(error: ServerError) -> Self {
        match error {
            ServerError::Io(e) => Self::Io(e),
            ServerError::Codec(e) => Self::Serialization(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}
