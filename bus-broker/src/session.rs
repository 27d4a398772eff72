//! Per-connection session management.
//!
//! Each WebSocket gets a Session: it waits for `identify`, registers with
//! the broker, then reads frames until the socket ends. Writes go through a
//! separate writer task fed by a channel, so a slow peer never blocks the
//! reader of another connection.

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{self, Route};
use crate::server::{Broker, ConnectionHandle, Outbound};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bus_types::{ClientId, CLOSE_POLICY_VIOLATION};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A per-connection session.
pub struct Session {
    broker: Arc<Broker>,
    id: u64,
}

impl Session {
    /// Create a session for a freshly accepted connection.
    pub fn new(broker: Arc<Broker>) -> Self {
        let id = broker.accept_connection();
        Self { broker, id }
    }

    /// Connection id assigned at accept.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run the session until the socket closes.
    pub async fn run(self, socket: WebSocket) {
        let (sink, mut stream) = socket.split();
        let (tx, rx) = mpsc::channel(self.broker.config().limits.outbound_buffer);
        let writer = tokio::spawn(write_loop(sink, rx));
        let handle = ConnectionHandle::new(self.id, tx);

        tracing::debug!("Connection {} accepted", self.id);

        let timeout = self.broker.config().limits.identify_timeout();
        let client_id = match tokio::time::timeout(timeout, self.await_identify(&mut stream)).await
        {
            Ok(Ok(client_id)) => client_id,
            Ok(Err(ProtocolError::Closed)) => {
                tracing::debug!("Connection {} closed before identify", self.id);
                drop(handle);
                let _ = writer.await;
                return;
            }
            Ok(Err(e)) => {
                self.reject(handle, e);
                let _ = writer.await;
                return;
            }
            Err(_) => {
                self.reject(
                    handle,
                    ProtocolError::IdentifyTimeout(timeout.as_secs()),
                );
                let _ = writer.await;
                return;
            }
        };

        tracing::info!("{} connected (connection {})", client_id, self.id);
        self.broker.register(client_id, handle.clone());

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => self.handle_text(client_id, &handle, &text),
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(
                        "Ignoring {}-byte binary frame from {}",
                        data.len(),
                        client_id
                    );
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong control frames are answered by the WebSocket layer
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Connection {} read error: {}", self.id, e);
                    break;
                }
            }
        }

        if self.broker.unregister(client_id, self.id) {
            tracing::info!("{} disconnected (connection {})", client_id, self.id);
        } else {
            tracing::debug!("Superseded connection {} for {} ended", self.id, client_id);
        }
        drop(handle);
        let _ = writer.await;
    }

    /// Read until the first text frame and require it to be `identify`.
    async fn await_identify(
        &self,
        stream: &mut SplitStream<WebSocket>,
    ) -> ProtocolResult<ClientId> {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let limit = self.broker.config().limits.max_message_size;
                    let raw = protocol::parse_frame(&text, limit)?;
                    self.broker.metrics().record_message(&raw.kind);
                    return protocol::parse_identify(raw);
                }
                Some(Ok(Message::Close(_))) | None => return Err(ProtocolError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ProtocolError::WebSocket(e.to_string())),
            }
        }
    }

    fn reject(&self, handle: ConnectionHandle, error: ProtocolError) {
        tracing::warn!("Rejecting connection {}: {}", self.id, error);
        self.broker
            .metrics()
            .identify_failures
            .fetch_add(1, Ordering::Relaxed);
        handle.close(CLOSE_POLICY_VIOLATION, "identify required");
    }

    /// Validate, count and route one text frame. Bad frames are dropped;
    /// the sender stays connected.
    fn handle_text(&self, client_id: ClientId, reply: &ConnectionHandle, text: &str) {
        let limit = self.broker.config().limits.max_message_size;
        let raw = match protocol::parse_frame(text, limit) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Dropping frame from {}: {}", client_id, e);
                self.broker
                    .metrics()
                    .errors_total
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        self.broker.metrics().record_message(&raw.kind);
        tracing::debug!("{} from {} ({})", raw.kind, client_id, raw.message_id);

        match protocol::route(text, raw, client_id) {
            Ok(Route::Reply(frame)) => {
                if let Err(e) = reply.send(frame) {
                    tracing::debug!("Reply to {} not queued: {:?}", client_id, e);
                }
            }
            Ok(Route::Relay { to, frame }) => {
                self.broker.forward(to, frame);
            }
            Ok(Route::Ignore) => {}
            Err(e) => {
                tracing::warn!("Dropping frame from {}: {}", client_id, e);
                self.broker
                    .metrics()
                    .errors_total
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Drain a connection's outbound channel into its socket.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(text) => {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                return;
            }
        }
    }
    let _ = sink.close().await;
}
