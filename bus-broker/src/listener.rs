//! Binding the broker to its port and shutting it down.

use crate::config::Config;
use crate::error::Result;
use crate::http::build_router;
use crate::server::{Broker, CLOSE_GOING_AWAY};
use crate::stats::spawn_stats_task;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A running broker: listener task, stats task and shared state.
#[derive(Debug)]
pub struct BrokerServer {
    broker: Arc<Broker>,
    local_addr: SocketAddr,
    server: JoinHandle<()>,
    stats: JoinHandle<()>,
}

impl BrokerServer {
    /// Validate `config`, bind, and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the port cannot be bound.
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()?).await?;
        let local_addr = listener.local_addr()?;

        let stats_config = config.stats.clone();
        let broker = Arc::new(Broker::new(config));
        let stats = spawn_stats_task(Arc::clone(&broker), stats_config);

        let app = build_router(Arc::clone(&broker));
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Server error: {}", e);
            }
        });

        tracing::info!("tandem-broker listening on {}", local_addr);
        Ok(Self {
            broker,
            local_addr,
            server,
            stats,
        })
    }

    /// The bound address (useful when the config asked for port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL clients connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Shared broker state.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Stop accepting, close every client connection and end background
    /// tasks.
    pub async fn shutdown(self) {
        self.server.abort();
        self.stats.abort();
        let _ = self.server.await;
        let _ = self.stats.await;

        self.broker.close_all(CLOSE_GOING_AWAY, "broker shutting down");
        tracing::info!("tandem-broker stopped");
    }
}
