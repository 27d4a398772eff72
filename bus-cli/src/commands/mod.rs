//! CLI command implementations.

pub mod health;
pub mod listen;
pub mod send;

use anyhow::{Context, Result};
use bus_client::{ConnectionStatus, Connector};
use std::time::Duration;

/// Connect and wait until the broker has accepted us.
pub async fn connect(connector: &Connector, timeout: Duration) -> Result<()> {
    connector.connect();
    tokio::time::timeout(
        timeout,
        connector.wait_for_status(ConnectionStatus::Connected),
    )
    .await
    .with_context(|| format!("could not reach broker within {}s", timeout.as_secs()))??;
    Ok(())
}
