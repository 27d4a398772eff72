//! Query broker health.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Body of the broker's `/health` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Overall status.
    pub status: String,
    /// Broker version.
    pub version: String,
    /// Identified connections.
    pub active_connections: usize,
    /// Seconds since the broker started.
    pub uptime_seconds: u64,
}

/// Run the health command.
pub async fn run(http: &str) -> Result<()> {
    let report = fetch(http).await?;
    println!("=== tandem-broker {} ===", http);
    println!("  Status:      {}", report.status);
    println!("  Version:     {}", report.version);
    println!("  Connections: {}", report.active_connections);
    println!("  Uptime:      {}s", report.uptime_seconds);
    Ok(())
}

/// GET `/health` from the broker at `addr` (`host:port` or a full URL).
pub async fn fetch(addr: &str) -> Result<HealthReport> {
    let url = health_url(addr);
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("could not reach {url}"))?
        .error_for_status()
        .context("broker reported an error")?;
    response.json().await.context("unexpected health response")
}

fn health_url(addr: &str) -> String {
    let base = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    format!("{}/health", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_broker::{BrokerServer, Config};

    #[test]
    fn builds_health_url() {
        assert_eq!(health_url("127.0.0.1:3004"), "http://127.0.0.1:3004/health");
        assert_eq!(
            health_url("http://localhost:3004/"),
            "http://localhost:3004/health"
        );
    }

    #[tokio::test]
    async fn fetches_from_running_broker() {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1:0".to_string();
        let server = BrokerServer::start(config).await.unwrap();

        let report = fetch(&server.local_addr().to_string()).await.unwrap();
        assert_eq!(report.status, "ok");
        assert_eq!(report.active_connections, 0);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_broker_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(fetch(&addr.to_string()).await.is_err());
    }
}
