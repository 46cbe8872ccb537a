//! # Skirmish Relay Server
//!
//! Lockstep relay for multiplayer games.
//!
//! The server runs no simulation. It assigns client ids, forwards order
//! packets to every client and sync hashes to every other client, and turns
//! departed or silent clients into disconnect notices so the remaining peers
//! can keep playing.
//!
//! [`client::NetworkConnection`] is the client side: it implements the core
//! [`Connection`](skirmish_core::connection::Connection) trait with the socket
//! driven on a background runtime.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod client;
pub mod error;
pub mod protocol;
pub mod relay;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skirmish_core::settings::DEFAULT_ORDER_LATENCY;

pub use error::{Result, ServerError};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_address: String,
    /// Port to listen on. 0 picks a free port.
    pub port: u16,
    /// Maximum clients per game.
    pub max_players: u8,
    /// A client silent for longer than this is dropped.
    pub ack_timeout_ms: u64,
    /// Order latency handed to every client at game start.
    pub order_latency: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 7777,
            max_players: 8,
            ack_timeout_ms: 5000,
            order_latency: DEFAULT_ORDER_LATENCY,
        }
    }
}

impl ServerConfig {
    /// Parse a RON config.
    pub fn from_ron(source: &str) -> Result<Self> {
        let config: Self = ron::from_str(source).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a RON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        Self::from_ron(&source).map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))
    }

    /// Reject values a game could not be relayed with.
    pub fn validate(&self) -> Result<()> {
        if self.order_latency == 0 {
            return Err(ServerError::Config(
                "order_latency must be at least one frame".to_string(),
            ));
        }
        if self.max_players == 0 {
            return Err(ServerError::Config("max_players must be positive".to_string()));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ServerError::Config("ack_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// `bind_address:port`.
    #[must_use]
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// [`Self::ack_timeout_ms`] as a duration.
    #[must_use]
    pub const fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = ServerConfig::from_ron("(port: 9000, ack_timeout_ms: 250)").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_players, 8);
        assert_eq!(config.ack_timeout(), Duration::from_millis(250));
        assert_eq!(config.socket_address(), "0.0.0.0:9000");
    }

    #[test]
    fn test_bad_config_rejected() {
        assert!(matches!(
            ServerConfig::from_ron("(port: \"seven\")"),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn test_zero_latency_rejected() {
        assert!(matches!(
            ServerConfig::from_ron("(order_latency: 0)"),
            Err(ServerError::Config(_))
        ));
        let config = ServerConfig {
            order_latency: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.ron");
        std::fs::write(&path, "(max_players: 2)").unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap().max_players, 2);
    }
}
