//! HTTP surface of tandem-broker.
//!
//! One loopback port serves the bus (WebSocket upgrade on `/`), health
//! checks and metrics.

pub mod health;
mod metrics;
mod ws;

use crate::server::Broker;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the router with all endpoints.
pub fn build_router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(broker))
}
