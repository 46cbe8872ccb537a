//! Skirmish lockstep relay server.
//!
//! ```bash
//! cargo run -p skirmish_server -- --config server.ron --port 7777
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skirmish_server::relay::RelayServer;
use skirmish_server::ServerConfig;

#[derive(Parser)]
#[command(name = "skirmish_server")]
#[command(about = "Lockstep relay for Skirmish multiplayer games")]
#[command(version)]
struct Cli {
    /// RON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the maximum number of players
    #[arg(long)]
    max_players: Option<u8>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(max_players) = cli.max_players {
        config.max_players = max_players;
    }

    tracing::info!(
        max_players = config.max_players,
        order_latency = config.order_latency,
        "Starting Skirmish relay server"
    );
    RelayServer::bind(config).await?.run().await?;
    Ok(())
}
