//! End-to-end tests: a real broker on an ephemeral loopback port with real
//! WebSocket connectors.

use bus_broker::{BrokerServer, Config};
use bus_client::{
    ConnectionStatus, Connector, ConnectorConfig, CoordinatorConfig, SyncCoordinator,
};
use bus_core::{BackoffPolicy, LearningStore, MemoryStore, RecordFilter};
use bus_types::{
    ClientId, Envelope, FileOpen, FileOpenStatus, FileOpened, Identify, LearningRecord, Message,
    MessageType, RecordKind, TaskStarted, CLOSE_POLICY_VIOLATION,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const WAIT: Duration = Duration::from_secs(5);

// ===========================================
// Helpers
// ===========================================

fn test_config(bind: &str) -> Config {
    let mut config = Config::default();
    config.server.bind_address = bind.to_string();
    config
}

async fn start_broker() -> BrokerServer {
    BrokerServer::start(test_config("127.0.0.1:0")).await.unwrap()
}

fn connector(server_url: &str, client_id: ClientId) -> Connector {
    let backoff = BackoffPolicy {
        base: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        max_attempts: 50,
    };
    Connector::websocket(
        ConnectorConfig::new(client_id)
            .with_url(server_url)
            .with_backoff(backoff),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

async fn within<T>(future: impl Future<Output = T>) -> T {
    timeout(WAIT, future).await.expect("timed out")
}

/// Connect and wait until the broker has registered the identity.
async fn online(server: &BrokerServer, connector: &Connector) {
    connector.connect();
    within(connector.wait_for_status(ConnectionStatus::Connected))
        .await
        .unwrap();
    let broker = Arc::clone(server.broker());
    let client_id = connector.client_id();
    wait_until(move || broker.is_connected(client_id)).await;
}

fn collect(connector: &Connector, message_type: MessageType) -> mpsc::UnboundedReceiver<Envelope> {
    let (tx, rx) = mpsc::unbounded_channel();
    connector.on(message_type, move |envelope| {
        let _ = tx.send(envelope.clone());
    });
    rx
}

fn task(n: usize) -> Message {
    Message::TaskStarted(TaskStarted {
        task_id: format!("task-{n}"),
        title: format!("Task {n}"),
        started_at: None,
    })
}

fn task_id(envelope: &Envelope) -> String {
    match &envelope.message {
        Message::TaskStarted(t) => t.task_id.clone(),
        other => panic!("expected task_started, got {other:?}"),
    }
}

fn identify_frame(client_id: ClientId) -> String {
    Envelope::new(client_id, Message::Identify(Identify { client_id }))
        .to_json()
        .unwrap()
}

// ===========================================
// Relay
// ===========================================

#[tokio::test]
async fn file_open_round_trip() {
    let server = start_broker().await;
    let agent = connector(&server.url(), ClientId::Agent);
    let editor = connector(&server.url(), ClientId::Editor);

    let mut opens = collect(&editor, MessageType::FileOpen);
    let replier = editor.downgrade();
    editor.on(MessageType::FileOpen, move |envelope| {
        if let Message::FileOpen(open) = &envelope.message {
            replier.send(Message::FileOpened(FileOpened {
                file_path: open.file_path.clone(),
                status: FileOpenStatus::Opened,
                error: None,
            }));
        }
    });
    let mut opened = collect(&agent, MessageType::FileOpened);

    online(&server, &agent).await;
    online(&server, &editor).await;

    agent.send(Message::FileOpen(FileOpen {
        file_path: "C:/test.ts".into(),
        line_number: Some(42),
        column_number: None,
    }));

    let request = within(opens.recv()).await.unwrap();
    assert_eq!(request.source, Some(ClientId::Agent));

    let reply = within(opened.recv()).await.unwrap();
    assert_eq!(reply.source, Some(ClientId::Editor));
    assert_eq!(
        reply.message,
        Message::FileOpened(FileOpened {
            file_path: "C:/test.ts".into(),
            status: FileOpenStatus::Opened,
            error: None,
        })
    );

    // The editor's handler fired exactly once
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(opens.try_recv().is_err());

    let stats = server.broker().stats();
    assert_eq!(stats.messages_by_type.get("file_open"), Some(&1));
    assert_eq!(stats.messages_by_type.get("file_opened"), Some(&1));
    server.shutdown().await;
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let server = start_broker().await;
    let agent = connector(&server.url(), ClientId::Agent);
    let editor = connector(&server.url(), ClientId::Editor);
    let mut inbound = collect(&editor, MessageType::TaskStarted);

    online(&server, &agent).await;
    online(&server, &editor).await;

    for n in 0..50 {
        agent.send(task(n));
    }

    for n in 0..50 {
        let envelope = within(inbound.recv()).await.unwrap();
        assert_eq!(task_id(&envelope), format!("task-{n}"));
    }
    server.shutdown().await;
}

#[tokio::test]
async fn unknown_types_relay_opaquely() {
    let server = start_broker().await;
    let agent = connector(&server.url(), ClientId::Agent);
    let editor = connector(&server.url(), ClientId::Editor);
    let mut inbound = collect(&editor, MessageType::Unknown("selection_changed".into()));

    online(&server, &agent).await;
    online(&server, &editor).await;

    agent.send_raw("selection_changed", json!({"start": 3, "end": 9}));

    let envelope = within(inbound.recv()).await.unwrap();
    assert_eq!(
        envelope.message,
        Message::Unknown {
            kind: "selection_changed".into(),
            payload: json!({"start": 3, "end": 9}),
        }
    );
    server.shutdown().await;
}

#[tokio::test]
async fn messages_to_absent_peer_are_dropped() {
    let server = start_broker().await;
    let agent = connector(&server.url(), ClientId::Agent);
    online(&server, &agent).await;

    agent.send(task(1));
    let broker = Arc::clone(server.broker());
    wait_until(move || broker.stats().messages_by_type.get("task_started") == Some(&1)).await;

    // A late peer does not receive anything the broker saw before it joined
    let editor = connector(&server.url(), ClientId::Editor);
    let mut inbound = collect(&editor, MessageType::TaskStarted);
    online(&server, &editor).await;
    agent.send(task(2));

    let envelope = within(inbound.recv()).await.unwrap();
    assert_eq!(task_id(&envelope), "task-2");
    server.shutdown().await;
}

// ===========================================
// Connection management
// ===========================================

#[tokio::test]
async fn one_active_connection_per_client() {
    let server = start_broker().await;
    let agent = connector(&server.url(), ClientId::Agent);
    let first = connector(&server.url(), ClientId::Editor);
    let second = connector(&server.url(), ClientId::Editor);
    let mut first_inbound = collect(&first, MessageType::TaskStarted);
    let mut second_inbound = collect(&second, MessageType::TaskStarted);

    online(&server, &agent).await;
    online(&server, &first).await;
    second.connect();
    within(second.wait_for_status(ConnectionStatus::Connected))
        .await
        .unwrap();

    // The replaced connection stays down instead of fighting back
    within(first.wait_for_status(ConnectionStatus::Disconnected))
        .await
        .unwrap();
    assert_eq!(server.broker().active_connections(), 2);

    agent.send(task(7));
    let envelope = within(second_inbound.recv()).await.unwrap();
    assert_eq!(task_id(&envelope), "task-7");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(first_inbound.try_recv().is_err());
    assert_eq!(first.status(), ConnectionStatus::Disconnected);
    server.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_do_not_disconnect_sender() {
    let server = start_broker().await;
    let editor = connector(&server.url(), ClientId::Editor);
    let mut inbound = collect(&editor, MessageType::FileOpen);
    online(&server, &editor).await;

    let (mut raw, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();
    raw.send(WsMessage::Text(identify_frame(ClientId::Agent)))
        .await
        .unwrap();
    let broker = Arc::clone(server.broker());
    wait_until(move || broker.is_connected(ClientId::Agent)).await;

    raw.send(WsMessage::Text("not json".into())).await.unwrap();
    raw.send(WsMessage::Text(r#"{"type":"file_open"}"#.into()))
        .await
        .unwrap();
    raw.send(WsMessage::Binary(vec![1, 2, 3])).await.unwrap();
    // No source: the broker stamps the identified sender
    raw.send(WsMessage::Text(
        r#"{"type":"file_open","payload":{"filePath":"a.rs"},"timestamp":1,"messageId":"m1"}"#
            .into(),
    ))
    .await
    .unwrap();

    let envelope = within(inbound.recv()).await.unwrap();
    assert_eq!(envelope.source, Some(ClientId::Agent));
    assert_eq!(envelope.message_id.as_str(), "m1");
    assert!(server.broker().is_connected(ClientId::Agent));
    server.shutdown().await;
}

#[tokio::test]
async fn broker_answers_ping_with_pong() {
    let server = start_broker().await;
    let (mut raw, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();
    raw.send(WsMessage::Text(identify_frame(ClientId::Editor)))
        .await
        .unwrap();
    raw.send(WsMessage::Text(
        r#"{"type":"ping","source":"editor","payload":{},"timestamp":1,"messageId":"p1"}"#.into(),
    ))
    .await
    .unwrap();

    let reply = loop {
        match within(raw.next()).await {
            Some(Ok(WsMessage::Text(text))) => break Envelope::from_json(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("connection ended: {other:?}"),
        }
    };
    assert_eq!(reply.message_type(), MessageType::Pong);
    assert_eq!(reply.source, None);
    server.shutdown().await;
}

#[tokio::test]
async fn connector_health_check_survives_without_peer() {
    let server = start_broker().await;
    let agent = Connector::websocket(
        ConnectorConfig::new(ClientId::Agent)
            .with_url(&server.url())
            .with_ping_interval(Duration::from_millis(50))
            .with_pong_timeout(Duration::from_millis(500)),
    );
    online(&server, &agent).await;

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(agent.status(), ConnectionStatus::Connected);

    let pings = server.broker().stats().messages_by_type.get("ping").copied();
    assert!(pings.unwrap_or(0) >= 5);
    server.shutdown().await;
}

#[tokio::test]
async fn first_message_must_identify() {
    let server = start_broker().await;
    let (mut raw, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();
    raw.send(WsMessage::Text(
        r#"{"type":"ping","payload":{},"timestamp":1,"messageId":"p1"}"#.into(),
    ))
    .await
    .unwrap();

    let code = loop {
        match within(raw.next()).await {
            Some(Ok(WsMessage::Close(Some(frame)))) => break u16::from(frame.code),
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    };
    assert_eq!(code, CLOSE_POLICY_VIOLATION);
    assert_eq!(server.broker().active_connections(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn silent_connection_times_out() {
    let mut config = test_config("127.0.0.1:0");
    config.limits.identify_timeout_secs = 1;
    let server = BrokerServer::start(config).await.unwrap();
    let (mut raw, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();

    let code = loop {
        match within(raw.next()).await {
            Some(Ok(WsMessage::Close(Some(frame)))) => break u16::from(frame.code),
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    };
    assert_eq!(code, CLOSE_POLICY_VIOLATION);
    server.shutdown().await;
}

// ===========================================
// Degradation & stats
// ===========================================

#[tokio::test]
async fn queued_messages_deliver_after_broker_restart() {
    let server = start_broker().await;
    let addr = server.local_addr();
    let agent = connector(&server.url(), ClientId::Agent);
    let editor = connector(&server.url(), ClientId::Editor);
    let mut inbound = collect(&editor, MessageType::TaskStarted);
    online(&server, &agent).await;
    online(&server, &editor).await;

    server.shutdown().await;
    within(agent.wait_for_status(ConnectionStatus::Reconnecting))
        .await
        .unwrap();

    // Park the sender so it cannot drain before the peer is back
    agent.disconnect();
    within(agent.wait_for_status(ConnectionStatus::Disconnected))
        .await
        .unwrap();
    for n in 0..3 {
        agent.send(task(n));
    }
    let queued = agent.clone();
    wait_until(move || queued.queued() == 3).await;

    let server = BrokerServer::start(test_config(&addr.to_string()))
        .await
        .unwrap();
    let broker = Arc::clone(server.broker());
    wait_until(move || broker.is_connected(ClientId::Editor)).await;

    online(&server, &agent).await;
    for n in 0..3 {
        let envelope = within(inbound.recv()).await.unwrap();
        assert_eq!(task_id(&envelope), format!("task-{n}"));
    }
    assert_eq!(agent.queued(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn stats_broadcast_reaches_clients() {
    let mut config = test_config("127.0.0.1:0");
    config.stats.broadcast_interval_secs = 1;
    let server = BrokerServer::start(config).await.unwrap();
    let agent = connector(&server.url(), ClientId::Agent);
    let mut stats = collect(&agent, MessageType::Stats);
    online(&server, &agent).await;

    let envelope = within(stats.recv()).await.unwrap();
    assert_eq!(envelope.source, None);
    let Message::Stats(stats) = envelope.message else {
        panic!("expected stats payload");
    };
    assert_eq!(stats.active_connections, 1);
    assert!(stats.total_connections >= 1);
    server.shutdown().await;
}

// ===========================================
// Sync coordinators over the bus
// ===========================================

#[tokio::test]
async fn learning_records_sync_between_peers() {
    let server = start_broker().await;
    let agent = connector(&server.url(), ClientId::Agent);
    let editor = connector(&server.url(), ClientId::Editor);

    let agent_sync = SyncCoordinator::spawn(
        agent.clone(),
        Arc::new(MemoryStore::new()),
        CoordinatorConfig::default().with_debounce(Duration::from_millis(50)),
    );
    let editor_store = MemoryStore::new();
    let _editor_sync = SyncCoordinator::spawn(
        editor.clone(),
        Arc::new(editor_store.clone()),
        CoordinatorConfig::default(),
    );

    online(&server, &agent).await;
    online(&server, &editor).await;

    for n in 0..5 {
        agent_sync.record_changed(LearningRecord::new(
            format!("k{n}"),
            RecordKind::Knowledge,
            1_000 + n,
            json!({"note": n}),
        ));
    }

    let store = editor_store.clone();
    wait_until(move || store.len() == 5).await;

    let records = editor_store
        .list_records(RecordFilter::all().with_origin(ClientId::Agent))
        .unwrap();
    assert_eq!(records.len(), 5);

    // Five changes in one window travel as one envelope
    let stats = server.broker().stats();
    assert_eq!(stats.messages_by_type.get("learning_update"), Some(&1));
    server.shutdown().await;
}
