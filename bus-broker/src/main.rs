//! tandem-broker binary entry point.
//!
//! Usage:
//! ```bash
//! tandem-broker --config broker.toml
//! tandem-broker --help
//! ```

use anyhow::Context;
use bus_broker::{BrokerServer, Config};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Loopback relay for the Tandem bus.
#[derive(Debug, Parser)]
#[command(name = "tandem-broker", version, about)]
struct Args {
    /// Path to the TOML config file. Missing file means defaults.
    #[arg(long, default_value = "broker.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let server = BrokerServer::start(config)
        .await
        .context("starting broker")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown requested");
    server.shutdown().await;
    Ok(())
}
