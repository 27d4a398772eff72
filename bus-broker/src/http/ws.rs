//! WebSocket upgrade for the bus itself.

use crate::server::Broker;
use crate::session::Session;
use axum::extract::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::Extension;
use std::sync::Arc;

/// GET / - upgrade to a bus connection.
pub async fn ws_handler(
    Extension(broker): Extension<Arc<Broker>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let session = Session::new(broker);
    ws.on_upgrade(move |socket| session.run(socket))
}
