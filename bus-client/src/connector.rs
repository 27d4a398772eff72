//! Connector - the resilient client end of the bus.
//!
//! A [`Connector`] is a cheap, cloneable handle to a background task that
//! owns the connection. The task drives the pure state machine from
//! bus-core and performs the I/O its actions ask for.
//!
//! # Architecture
//!
//! ```text
//! Host ──send/on/connect──▶ Connector (handle)
//!                               │ mpsc commands
//!                               ▼
//!                        ConnectorTask ──▶ Transport ──▶ Broker
//!                               │
//!                    bus-core (state machine, queue)
//! ```
//!
//! Everything the task owns (queue, handlers, timers) is touched only from
//! its own loop, so no locks are needed. Hosts never see errors: `send`
//! always succeeds from their point of view, and connection health is
//! published as a [`ConnectionStatus`] on a watch channel.
//!
//! # Example
//!
//! ```ignore
//! let connector = Connector::websocket(ConnectorConfig::new(ClientId::Editor));
//! connector.on(MessageType::FileOpen, |env| println!("open {:?}", env.message));
//! connector.connect();
//! connector.send(Message::Ping(Heartbeat::default()));
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bus_core::{
    Action, BackoffPolicy, ConnectionState, ConnectionStatus, Event, OutboundQueue,
    DEFAULT_QUEUE_CAPACITY,
};
use bus_types::{ClientId, Envelope, Heartbeat, Identify, Message, MessageType};
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::handlers::{Handler, HandlerRegistry};
use crate::transport::{Transport, TransportError, WebSocketTransport};
use crate::ClientError;

/// Default broker URL.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:3004";

/// Configuration for a [`Connector`].
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Broker WebSocket URL.
    pub url: String,
    /// Identity announced to the broker.
    pub client_id: ClientId,
    /// Reconnect backoff.
    pub backoff: BackoffPolicy,
    /// Interval between pings while connected.
    pub ping_interval: Duration,
    /// How long to wait for a pong before declaring the connection dead.
    pub pong_timeout: Duration,
    /// Upper bound on opening the transport.
    pub connect_timeout: Duration,
    /// Outbound queue capacity.
    pub queue_capacity: usize,
}

impl ConnectorConfig {
    /// Default ping interval (30 seconds).
    pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
    /// Default pong timeout (10 seconds).
    pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default connect timeout (5 seconds).
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a configuration with defaults for the given identity.
    pub fn new(client_id: ClientId) -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            client_id,
            backoff: BackoffPolicy::default(),
            ping_interval: Self::DEFAULT_PING_INTERVAL,
            pong_timeout: Self::DEFAULT_PONG_TIMEOUT,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the broker URL.
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the ping interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the pong timeout.
    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

enum Command {
    Connect,
    Disconnect,
    Shutdown,
    Send(Envelope),
    On(MessageType, Handler),
    OnAny(Handler),
}

/// Handle to a running connector task.
///
/// Clones share the same task. The task stops on [`Connector::shutdown`] or
/// when every handle is dropped. Handlers registered with [`Connector::on`]
/// live inside the task, so a handler that replies should capture a
/// [`WeakConnector`] rather than a clone.
#[derive(Clone)]
pub struct Connector {
    client_id: ClientId,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    queued: Arc<AtomicUsize>,
}

impl Connector {
    /// Spawn a connector task over the given transport.
    ///
    /// Must be called from within a tokio runtime. The connector starts
    /// `Disconnected`; call [`connect`](Self::connect) to go online.
    pub fn spawn<T: Transport + 'static>(config: ConnectorConfig, transport: T) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let queued = Arc::new(AtomicUsize::new(0));
        let client_id = config.client_id;

        let task = ConnectorTask {
            queue: OutboundQueue::new(config.queue_capacity),
            config,
            transport: Arc::new(transport),
            state: ConnectionState::new(),
            handlers: HandlerRegistry::new(),
            commands: commands_rx,
            status: status_tx,
            queued: Arc::clone(&queued),
            connecting: None,
            reconnect_at: None,
            next_ping: None,
            pong_deadline: None,
        };
        tokio::spawn(task.run());

        Self {
            client_id,
            commands: commands_tx,
            status: status_rx,
            queued,
        }
    }

    /// Spawn a connector over a WebSocket transport.
    pub fn websocket(config: ConnectorConfig) -> Self {
        Self::spawn(config, WebSocketTransport::new())
    }

    /// The identity this connector announces.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Start connecting (and reconnecting on failure).
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the connection and stop reconnecting. Queued envelopes are
    /// kept for the next `connect()`.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Disconnect and end the background task.
    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    /// Send a message to the peer.
    ///
    /// Never fails: when not connected the envelope waits in the outbound
    /// queue, evicting the oldest entry if the queue is full.
    pub fn send(&self, message: Message) {
        self.command(Command::Send(Envelope::new(self.client_id, message)));
    }

    /// Send a message given its wire type name and raw payload.
    ///
    /// A known type whose payload does not match its schema is dropped
    /// and logged.
    pub fn send_raw(&self, kind: &str, payload: serde_json::Value) {
        match Message::from_parts(kind, payload) {
            Ok(message) => self.send(message),
            Err(e) => warn!(kind, error = %e, "dropping outbound message with invalid payload"),
        }
    }

    /// Subscribe to one message type. Handlers run on the connector task
    /// in arrival order.
    pub fn on<F>(&self, message_type: MessageType, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.command(Command::On(message_type, Box::new(handler)));
    }

    /// Subscribe to every inbound message.
    pub fn on_any<F>(&self, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.command(Command::OnAny(Box::new(handler)));
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Number of envelopes waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Wait until the connector reports `status`.
    pub async fn wait_for_status(&self, status: ConnectionStatus) -> Result<(), ClientError> {
        let mut rx = self.status.clone();
        rx.wait_for(|s| *s == status)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Stopped("connector"))
    }

    /// Wait until the background task has ended.
    pub async fn closed(&self) {
        let mut rx = self.status.clone();
        while rx.changed().await.is_ok() {}
    }

    /// A handle that does not keep the task alive.
    pub fn downgrade(&self) -> WeakConnector {
        WeakConnector {
            client_id: self.client_id,
            commands: self.commands.downgrade(),
            status: self.status.clone(),
            queued: Arc::clone(&self.queued),
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(client = %self.client_id, "connector task has stopped, command ignored");
        }
    }
}

/// Non-owning [`Connector`] handle, for use inside handlers.
#[derive(Clone)]
pub struct WeakConnector {
    client_id: ClientId,
    commands: mpsc::WeakUnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    queued: Arc<AtomicUsize>,
}

impl WeakConnector {
    /// The connector, if its task is still running.
    pub fn upgrade(&self) -> Option<Connector> {
        Some(Connector {
            client_id: self.client_id,
            commands: self.commands.upgrade()?,
            status: self.status.clone(),
            queued: Arc::clone(&self.queued),
        })
    }

    /// Send through the connector if it is still running.
    pub fn send(&self, message: Message) {
        match self.upgrade() {
            Some(connector) => connector.send(message),
            None => debug!(client = %self.client_id, "connector dropped, message ignored"),
        }
    }
}

impl std::fmt::Debug for WeakConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakConnector")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("client_id", &self.client_id)
            .field("status", &self.status())
            .field("queued", &self.queued())
            .finish()
    }
}

enum LoopEvent {
    Command(Option<Command>),
    ConnectFinished(Result<(), TransportError>),
    Frame(Result<String, TransportError>),
    ReconnectDue,
    PingDue,
    PongOverdue,
}

struct ConnectorTask<T> {
    config: ConnectorConfig,
    transport: Arc<T>,
    state: ConnectionState,
    queue: OutboundQueue,
    handlers: HandlerRegistry,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    queued: Arc<AtomicUsize>,
    connecting: Option<BoxFuture<'static, Result<(), TransportError>>>,
    reconnect_at: Option<Instant>,
    next_ping: Option<Instant>,
    pong_deadline: Option<Instant>,
}

impl<T: Transport + 'static> ConnectorTask<T> {
    async fn run(mut self) {
        debug!(client = %self.config.client_id, url = %self.config.url, "connector task started");

        loop {
            let connected = self.state.is_connected();
            let event = tokio::select! {
                command = self.commands.recv() => LoopEvent::Command(command),
                result = finish_connect(&mut self.connecting), if self.connecting.is_some() => {
                    LoopEvent::ConnectFinished(result)
                }
                frame = self.transport.recv(), if connected => LoopEvent::Frame(frame),
                _ = sleep_opt(self.pong_deadline), if self.pong_deadline.is_some() => {
                    LoopEvent::PongOverdue
                }
                _ = sleep_opt(self.next_ping), if self.next_ping.is_some() => LoopEvent::PingDue,
                _ = sleep_opt(self.reconnect_at), if self.reconnect_at.is_some() => {
                    LoopEvent::ReconnectDue
                }
            };

            if !self.handle(event).await {
                break;
            }
        }

        debug!(client = %self.config.client_id, "connector task stopped");
    }

    /// Returns false when the task should end.
    async fn handle(&mut self, event: LoopEvent) -> bool {
        match event {
            LoopEvent::Command(None) | LoopEvent::Command(Some(Command::Shutdown)) => {
                self.step(Event::DisconnectRequested).await;
                return false;
            }
            LoopEvent::Command(Some(command)) => self.handle_command(command).await,
            LoopEvent::ConnectFinished(result) => {
                self.connecting = None;
                match result {
                    Ok(()) => self.step(Event::ConnectSucceeded).await,
                    Err(e) => {
                        self.transport.close().await.ok();
                        self.step(Event::ConnectFailed {
                            error: e.to_string(),
                        })
                        .await;
                    }
                }
            }
            LoopEvent::Frame(Ok(frame)) => self.handle_frame(&frame).await,
            LoopEvent::Frame(Err(TransportError::Superseded)) => {
                warn!(
                    client = %self.config.client_id,
                    "replaced by a newer connection, not reconnecting"
                );
                self.step(Event::DisconnectRequested).await;
            }
            LoopEvent::Frame(Err(e)) => self.connection_lost(e.to_string()).await,
            LoopEvent::ReconnectDue => {
                self.reconnect_at = None;
                self.step(Event::ReconnectTimer).await;
            }
            LoopEvent::PingDue => self.send_ping().await,
            LoopEvent::PongOverdue => {
                warn!(timeout = ?self.config.pong_timeout, "no pong from broker");
                self.connection_lost("pong timeout".to_string()).await;
            }
        }
        true
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.step(Event::ConnectRequested).await,
            Command::Disconnect => self.step(Event::DisconnectRequested).await,
            Command::Send(envelope) => self.send_or_queue(envelope).await,
            Command::On(message_type, handler) => self.handlers.on(message_type, handler),
            Command::OnAny(handler) => self.handlers.on_any(handler),
            Command::Shutdown => {}
        }
    }

    /// Feed an event to the state machine and execute the resulting
    /// actions, including any follow-up events they produce.
    async fn step(&mut self, event: Event) {
        let mut pending = Some(event);
        while let Some(event) = pending.take() {
            let state = std::mem::take(&mut self.state);
            let (next, actions) = state.on_event(event, &self.config.backoff);
            self.state = next;

            for action in actions {
                if let Some(follow_up) = self.apply(action).await {
                    pending = Some(follow_up);
                }
            }
        }
    }

    async fn apply(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::Connect => {
                self.connecting = Some(self.open());
            }
            Action::Disconnect => {
                self.connecting = None;
                if let Err(e) = self.transport.close().await {
                    debug!(error = %e, "error closing transport");
                }
            }
            Action::StartHeartbeat => {
                self.next_ping = Some(Instant::now() + self.config.ping_interval);
                self.pong_deadline = None;
            }
            Action::StopHeartbeat => {
                self.next_ping = None;
                self.pong_deadline = None;
            }
            Action::DrainQueue => return self.drain().await,
            Action::StartReconnectTimer {
                attempt,
                delay,
                error,
            } => {
                warn!(attempt, ?delay, %error, "connection failed, will retry");
                self.reconnect_at = Some(Instant::now() + delay);
            }
            Action::CancelReconnect => {
                self.reconnect_at = None;
            }
            Action::GiveUp { attempts, error } => {
                error!(attempts, %error, "giving up on broker connection");
            }
            Action::SetStatus(status) => {
                info!(client = %self.config.client_id, %status, "connection status changed");
                self.status.send_replace(status);
            }
        }
        None
    }

    /// Open the transport and identify, bounded by the connect timeout.
    fn open(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        let transport = Arc::clone(&self.transport);
        let url = self.config.url.clone();
        let timeout = self.config.connect_timeout;
        let client_id = self.config.client_id;
        let identify = Envelope::new(client_id, Message::Identify(Identify { client_id }));

        Box::pin(async move {
            let frame = identify
                .to_json()
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
            tokio::time::timeout(timeout, async {
                transport.connect(&url).await?;
                transport.send(&frame).await
            })
            .await
            .map_err(|_| TransportError::Timeout)?
        })
    }

    async fn write(&mut self, envelope: &Envelope) -> Result<(), ClientError> {
        let frame = envelope.to_json()?;
        self.transport.send(&frame).await?;
        debug!(
            message_type = %envelope.message_type(),
            message_id = %envelope.message_id,
            "sent"
        );
        Ok(())
    }

    async fn send_or_queue(&mut self, envelope: Envelope) {
        if !self.state.is_connected() {
            self.enqueue(envelope);
            return;
        }

        match self.write(&envelope).await {
            Ok(()) => {}
            Err(ClientError::Transport(e)) => {
                self.enqueue(envelope);
                self.connection_lost(e.to_string()).await;
            }
            Err(e) => warn!(error = %e, "dropping envelope that failed to encode"),
        }
    }

    fn enqueue(&mut self, envelope: Envelope) {
        debug!(message_type = %envelope.message_type(), "queued while offline");
        if let Some(evicted) = self.queue.push(envelope) {
            warn!(
                message_type = %evicted.message_type(),
                message_id = %evicted.message_id,
                capacity = self.queue.capacity(),
                "outbound queue full, dropped oldest envelope"
            );
        }
        self.sync_queued();
    }

    async fn drain(&mut self) -> Option<Event> {
        let mut sent = 0usize;
        while let Some(envelope) = self.queue.pop() {
            match self.write(&envelope).await {
                Ok(()) => sent += 1,
                Err(ClientError::Transport(e)) => {
                    self.queue.requeue(envelope);
                    self.sync_queued();
                    self.transport.close().await.ok();
                    warn!(sent, remaining = self.queue.len(), "drain interrupted");
                    return Some(Event::ConnectionLost {
                        reason: e.to_string(),
                    });
                }
                Err(e) => warn!(error = %e, "dropping envelope that failed to encode"),
            }
        }
        self.sync_queued();
        if sent > 0 {
            info!(sent, "drained outbound queue");
        }
        None
    }

    async fn handle_frame(&mut self, frame: &str) {
        let envelope = match Envelope::from_json(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match &envelope.message {
            Message::Ping(_) => {
                let pong = Envelope::new(
                    self.config.client_id,
                    Message::Pong(Heartbeat::default()),
                );
                if let Err(e) = self.write(&pong).await {
                    self.connection_lost(e.to_string()).await;
                }
            }
            Message::Pong(_) => {
                self.pong_deadline = None;
            }
            _ => {
                let handled = self.handlers.dispatch(&envelope);
                if handled == 0 {
                    debug!(message_type = %envelope.message_type(), "no handler for message");
                }
            }
        }
    }

    async fn send_ping(&mut self) {
        self.next_ping = Some(Instant::now() + self.config.ping_interval);
        let ping = Envelope::new(self.config.client_id, Message::Ping(Heartbeat::default()));

        match self.write(&ping).await {
            Ok(()) => {
                if self.pong_deadline.is_none() {
                    self.pong_deadline = Some(Instant::now() + self.config.pong_timeout);
                }
            }
            Err(e) => self.connection_lost(e.to_string()).await,
        }
    }

    async fn connection_lost(&mut self, reason: String) {
        self.transport.close().await.ok();
        self.step(Event::ConnectionLost { reason }).await;
    }

    fn sync_queued(&self) {
        self.queued.store(self.queue.len(), Ordering::SeqCst);
    }
}

async fn finish_connect(
    connecting: &mut Option<BoxFuture<'static, Result<(), TransportError>>>,
) -> Result<(), TransportError> {
    match connecting {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
