//! Health check endpoint.

use crate::server::Broker;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of identified connections.
    pub active_connections: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

impl HealthStatus {
    /// Read the current health of `broker`. No side effects.
    pub fn of(broker: &Broker) -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_connections: broker.active_connections(),
            uptime_seconds: broker.uptime_seconds(),
        }
    }
}

/// Health check handler.
pub async fn health_handler(Extension(broker): Extension<Arc<Broker>>) -> Json<HealthStatus> {
    Json(HealthStatus::of(&broker))
}
