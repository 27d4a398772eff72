//! Mock transport for testing.
//!
//! Plays the broker's side of a connection in memory: tests queue inbound
//! frames, inspect what the connector sent, and inject failures.

use super::{Transport, TransportError};
use async_trait::async_trait;
use bus_types::{BusError, Envelope, MessageType};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Mock transport for testing.
///
/// Clones share state, so a test keeps one handle while the connector owns
/// another.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_url: Option<String>,
    connect_attempts: usize,
    refuse_connections: Option<String>,
    sent_frames: Vec<String>,
    inbound: VecDeque<String>,
    send_failure: Option<(usize, String)>,
    superseded: bool,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a frame to be returned by `recv()`.
    pub fn push_inbound(&self, frame: impl Into<String>) {
        self.lock().inbound.push_back(frame.into());
        self.notify.notify_waiters();
    }

    /// Queue an envelope to be returned by `recv()`.
    pub fn push_envelope(&self, envelope: &Envelope) -> Result<(), BusError> {
        self.push_inbound(envelope.to_json()?);
        Ok(())
    }

    /// All frames that were sent, oldest first.
    pub fn sent_frames(&self) -> Vec<String> {
        self.lock().sent_frames.clone()
    }

    /// All sent frames that parse as envelopes.
    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.sent_frames()
            .iter()
            .filter_map(|f| Envelope::from_json(f).ok())
            .collect()
    }

    /// Sent envelopes of one type.
    pub fn sent_of_type(&self, message_type: MessageType) -> Vec<Envelope> {
        self.sent_envelopes()
            .into_iter()
            .filter(|e| e.message_type() == message_type)
            .collect()
    }

    /// Forget the frames sent so far.
    pub fn clear_sent(&self) {
        self.lock().sent_frames.clear();
    }

    /// The URL of the last successful connect.
    pub fn connected_url(&self) -> Option<String> {
        self.lock().connected_url.clone()
    }

    /// Number of `connect()` calls, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Make every `connect()` fail with `error` until called with `None`.
    pub fn refuse_connections(&self, error: Option<&str>) {
        self.lock().refuse_connections = error.map(str::to_string);
    }

    /// Make the `n`-th upcoming `send()` (1-based) fail and drop the
    /// connection.
    pub fn fail_nth_send(&self, n: usize, error: &str) {
        self.lock().send_failure = Some((n.max(1), error.to_string()));
    }

    /// Simulate the broker dropping the connection.
    pub fn drop_connection(&self) {
        self.lock().connected = false;
        self.notify.notify_waiters();
    }

    /// Simulate the broker closing this connection because another one
    /// identified with the same client id.
    pub fn supersede(&self) {
        let mut inner = self.lock();
        inner.connected = false;
        inner.superseded = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Clear all state (frames, queue, connection, failures).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.connect_attempts += 1;

        if let Some(error) = inner.refuse_connections.clone() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.superseded = false;
        inner.connected_url = Some(url.to_string());
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        if let Some((n, error)) = inner.send_failure.take() {
            if n == 1 {
                inner.connected = false;
                drop(inner);
                self.notify.notify_waiters();
                return Err(TransportError::SendFailed(error));
            }
            inner.send_failure = Some((n - 1, error));
        }

        inner.sent_frames.push(frame.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        loop {
            // Register before checking so a push between check and await
            // is not missed
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if !inner.connected {
                    return Err(if inner.superseded {
                        TransportError::Superseded
                    } else {
                        TransportError::ConnectionClosed
                    });
                }
                if let Some(frame) = inner.inbound.pop_front() {
                    return Ok(frame);
                }
            }
            notified.await;
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_types::{ClientId, Heartbeat, Message};
    use std::time::Duration;

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_connects() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect("ws://127.0.0.1:3004").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(
            transport.connected_url(),
            Some("ws://127.0.0.1:3004".to_string())
        );
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn mock_transport_records_sent_frames() {
        let transport = MockTransport::new();
        transport.connect("ws://bus").await.unwrap();

        transport.send("frame 1").await.unwrap();
        transport.send("frame 2").await.unwrap();

        assert_eq!(transport.sent_frames(), vec!["frame 1", "frame 2"]);
    }

    #[tokio::test]
    async fn recv_returns_queued_frames_in_order() {
        let transport = MockTransport::new();
        transport.connect("ws://bus").await.unwrap();

        transport.push_inbound("a");
        transport.push_inbound("b");

        assert_eq!(transport.recv().await.unwrap(), "a");
        assert_eq!(transport.recv().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn recv_waits_for_a_frame() {
        let transport = MockTransport::new();
        transport.connect("ws://bus").await.unwrap();

        let pusher = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pusher.push_inbound("late");
        });

        assert_eq!(transport.recv().await.unwrap(), "late");
    }

    #[tokio::test]
    async fn drop_connection_wakes_pending_recv() {
        let transport = MockTransport::new();
        transport.connect("ws://bus").await.unwrap();

        let dropper = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            dropper.drop_connection();
        });

        let result = transport.recv().await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        assert!(!transport.is_connected());
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.send("data").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn refused_connections_fail_until_cleared() {
        let transport = MockTransport::new();
        transport.refuse_connections(Some("connection refused"));

        assert!(matches!(
            transport.connect("ws://bus").await,
            Err(TransportError::ConnectionFailed(_))
        ));
        assert!(transport.connect("ws://bus").await.is_err());

        transport.refuse_connections(None);
        transport.connect("ws://bus").await.unwrap();
        assert_eq!(transport.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn nth_send_failure_drops_connection() {
        let transport = MockTransport::new();
        transport.connect("ws://bus").await.unwrap();
        transport.fail_nth_send(2, "broken pipe");

        transport.send("one").await.unwrap();
        let result = transport.send("two").await;

        assert!(matches!(result, Err(TransportError::SendFailed(_))));
        assert!(!transport.is_connected());
        assert_eq!(transport.sent_frames(), vec!["one"]);
    }

    // ===========================================
    // Envelope Helper Tests
    // ===========================================

    #[tokio::test]
    async fn sent_of_type_filters_envelopes() {
        let transport = MockTransport::new();
        transport.connect("ws://bus").await.unwrap();

        let ping = Envelope::new(ClientId::Editor, Message::Ping(Heartbeat::default()));
        transport.send(&ping.to_json().unwrap()).await.unwrap();
        transport.send("not json").await.unwrap();

        assert_eq!(transport.sent_frames().len(), 2);
        assert_eq!(transport.sent_of_type(MessageType::Ping).len(), 1);
        assert!(transport.sent_of_type(MessageType::Pong).is_empty());
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.connect("ws://bus").await.unwrap();
        assert!(transport2.is_connected());

        transport2.reset();
        assert!(!transport1.is_connected());
        assert!(transport1.sent_frames().is_empty());
    }
}
