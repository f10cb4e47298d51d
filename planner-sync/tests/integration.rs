//! Integration tests for end-to-end WebSocket synchronization.
//!
//! These tests start a real server and connect real clients,
//! verifying the full sync pipeline.

use std::sync::Arc;

use planner_core::edit::{DocumentEdit, UiEdit};
use planner_core::model::Document;
use planner_sync::channel::{RemoteChannel, RemoteSignal, WriteMeta};
use planner_sync::client::{ClientConfig, ConnectionState, SyncClient};
use planner_sync::local::MemoryStore;
use planner_sync::protocol::{ClientId, Envelope, MessageType, RoomId, SyncMessage};
use planner_sync::server::{ServerConfig, SyncServer};
use planner_sync::session::{SessionConfig, SyncSession};
use planner_sync::ChannelError;

use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return the port.
async fn start_test_server() -> u16 {
    start_server_with(|_| {}).await
}

async fn start_server_with(tweak: impl FnOnce(&mut ServerConfig)) -> u16 {
    let port = free_port().await;
    let mut config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        max_peers_per_room: 10,
        broadcast_capacity: 64,
        heartbeat_interval_secs: 30,
        storage_path: None,
        echo_to_author: true,
    };
    tweak(&mut config);
    let server = SyncServer::new(config).unwrap();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Run an in-memory server on `port`, keeping a handle to stop it.
async fn serve_on(port: u16) -> Arc<SyncServer> {
    let server = Arc::new(
        SyncServer::new(ServerConfig {
            bind_addr: format!("127.0.0.1:{port}"),
            ..ServerConfig::default()
        })
        .unwrap(),
    );
    let running = server.clone();
    tokio::spawn(async move {
        running.run().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    server
}

async fn wait_for_state(client: &SyncClient, wanted: ConnectionState) {
    timeout(Duration::from_secs(5), async {
        while client.connection_state().await != wanted {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("client never reached {wanted:?}"));
}

async fn connect(port: u16) -> SyncClient {
    SyncClient::connect(
        format!("ws://127.0.0.1:{port}"),
        ClientId::generate(),
        ClientConfig::for_testing(),
    )
    .await
    .unwrap()
}

fn meta(client: &SyncClient, ms: u64) -> WriteMeta {
    WriteMeta {
        client_id: client.client_id().clone(),
        updated_at_ms: ms,
    }
}

async fn next_signal(sub: &mut planner_sync::Subscription) -> RemoteSignal {
    timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("signal within timeout")
        .expect("feed open")
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_client_connects() {
    let port = start_test_server().await;
    let client = connect(port).await;
    assert_eq!(client.connection_state().await, ConnectionState::Connected);
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_subscribe_empty_room_gets_missing() {
    let port = start_test_server().await;
    let client = connect(port).await;

    let mut sub = client.subscribe(&RoomId::new("empty")).await.unwrap();
    assert_eq!(next_signal(&mut sub).await, RemoteSignal::Missing);
}

#[tokio::test]
async fn test_write_is_acked_and_relayed_to_everyone() {
    let port = start_test_server().await;
    let room = RoomId::new("SGA");
    let alice = connect(port).await;
    let bob = connect(port).await;

    let mut alice_sub = alice.subscribe(&room).await.unwrap();
    let mut bob_sub = bob.subscribe(&room).await.unwrap();
    next_signal(&mut alice_sub).await;
    next_signal(&mut bob_sub).await;

    let mut doc = Document::seed();
    doc.total_budget = 1234.0;
    alice.write(&room, &doc, meta(&alice, 500)).await.unwrap();

    for sub in [&mut alice_sub, &mut bob_sub] {
        match next_signal(sub).await {
            RemoteSignal::Envelope(env) => {
                assert_eq!(env.state.total_budget, 1234.0);
                assert_eq!(env.meta.updated_at_ms, 500);
                assert_eq!(&env.meta.updated_by, alice.client_id());
            }
            other => panic!("expected envelope, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_late_subscriber_gets_snapshot() {
    let port = start_test_server().await;
    let room = RoomId::new("late");
    let alice = connect(port).await;
    alice.write(&room, &Document::seed(), meta(&alice, 42)).await.unwrap();

    let bob = connect(port).await;
    let mut sub = bob.subscribe(&room).await.unwrap();
    match next_signal(&mut sub).await {
        RemoteSignal::Envelope(env) => assert_eq!(env.meta.updated_at_ms, 42),
        other => panic!("expected snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let port = start_test_server().await;
    let alice = connect(port).await;
    let bob = connect(port).await;

    let mut bob_sub = bob.subscribe(&RoomId::new("other")).await.unwrap();
    next_signal(&mut bob_sub).await;

    alice
        .write(&RoomId::new("SGA"), &Document::seed(), meta(&alice, 1))
        .await
        .unwrap();

    let nothing = timeout(Duration::from_millis(200), bob_sub.recv()).await;
    assert!(nothing.is_err(), "other room must not see the write");
}

#[tokio::test]
async fn test_invalid_envelope_is_nacked() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let bogus = SyncMessage {
        msg_type: MessageType::Write,
        client_id: "raw".into(),
        room: "SGA".into(),
        seq: 7,
        payload: br#"{"nothing": true}"#.to_vec(),
    };
    ws.send(Message::Binary(bogus.encode().unwrap().into()))
        .await
        .unwrap();

    let reply = loop {
        match timeout(Duration::from_secs(2), ws.next()).await.unwrap() {
            Some(Ok(Message::Binary(data))) => break SyncMessage::decode(&data).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    };
    assert_eq!(reply.msg_type, MessageType::Nack);
    assert_eq!(reply.seq, 7);
    assert!(!reply.nack_reason().unwrap().is_empty());
}

#[tokio::test]
async fn test_no_echo_mode_skips_author() {
    let port = start_server_with(|c| c.echo_to_author = false).await;
    let room = RoomId::new("quiet");
    let alice = connect(port).await;

    let mut sub = alice.subscribe(&room).await.unwrap();
    next_signal(&mut sub).await;
    alice.write(&room, &Document::seed(), meta(&alice, 5)).await.unwrap();

    let echo = timeout(Duration::from_millis(200), sub.recv()).await;
    assert!(echo.is_err(), "author must not receive its own write");
}

#[tokio::test]
async fn test_full_room_is_refused() {
    let port = start_server_with(|c| c.max_peers_per_room = 1).await;
    let room = RoomId::new("tiny");
    let alice = connect(port).await;
    let bob = connect(port).await;

    let mut alice_sub = alice.subscribe(&room).await.unwrap();
    next_signal(&mut alice_sub).await;

    let mut bob_sub = bob.subscribe(&room).await.unwrap();
    let nothing = timeout(Duration::from_millis(200), bob_sub.recv()).await;
    assert!(nothing.is_err(), "refused subscriber gets no snapshot");
}

#[tokio::test]
async fn test_connect_refused_without_server() {
    let port = free_port().await;
    let result = SyncClient::connect(
        format!("ws://127.0.0.1:{port}"),
        ClientId::generate(),
        ClientConfig::for_testing(),
    )
    .await;
    assert!(matches!(result, Err(ChannelError::Connect(_))));
}

#[tokio::test]
async fn test_sessions_converge_over_websocket() {
    let port = start_test_server().await;
    let config = SessionConfig {
        room: RoomId::new("converge"),
        ..SessionConfig::for_testing()
    };

    let first = Arc::new(connect(port).await);
    let (alice, _a) = SyncSession::spawn(
        first.clone(),
        MemoryStore::new(),
        first.client_id().clone(),
        config.clone(),
    )
    .await
    .unwrap();
    // let the seed land
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = Arc::new(connect(port).await);
    let (bob, _b) = SyncSession::spawn(
        second.clone(),
        MemoryStore::new(),
        second.client_id().clone(),
        config,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    alice.edit(DocumentEdit::SetTotalBudget(777.0)).await.unwrap();
    bob.edit(UiEdit::SetActiveSlide(3)).await.unwrap();

    let mut watch = bob.subscribe();
    timeout(Duration::from_secs(3), async {
        while watch.borrow().document.total_budget != 777.0 {
            watch.changed().await.unwrap();
        }
    })
    .await
    .expect("bob sees alice's edit");

    let bob_state = bob.state();
    assert_eq!(bob_state.document, alice.state().document);
    assert_eq!(bob_state.ui.active_slide, 3);
    assert_eq!(alice.state().ui.active_slide, 0);

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_envelope_bytes_relayed_verbatim() {
    let port = start_test_server().await;
    let room = RoomId::new("verbatim");
    let url = format!("ws://127.0.0.1:{port}");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let envelope = Envelope::new(Document::seed(), ClientId::generate(), 9);
    let mut value: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
    value["state"]["futureField"] = serde_json::json!("kept");
    let payload = serde_json::to_vec(&value).unwrap();

    let writer = ClientId::generate();
    let write = SyncMessage {
        msg_type: MessageType::Write,
        client_id: writer.to_string(),
        room: room.to_string(),
        seq: 1,
        payload: payload.clone(),
    };
    ws.send(Message::Binary(write.encode().unwrap().into())).await.unwrap();
    ws.send(Message::Binary(SyncMessage::subscribe(&writer, &room).encode().unwrap().into()))
        .await
        .unwrap();

    let snapshot = loop {
        match timeout(Duration::from_secs(2), ws.next()).await.unwrap() {
            Some(Ok(Message::Binary(data))) => {
                let msg = SyncMessage::decode(&data).unwrap();
                if msg.msg_type == MessageType::Snapshot {
                    break msg;
                }
            }
            Some(Ok(_)) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    };
    assert_eq!(snapshot.payload, payload);
}

#[tokio::test]
async fn test_session_survives_server_restart() {
    let port = free_port().await;
    let room = RoomId::new("restart");
    let config = SessionConfig {
        room: room.clone(),
        ..SessionConfig::for_testing()
    };

    let first = serve_on(port).await;
    let client = Arc::new(connect(port).await);
    let (session, _join) = SyncSession::spawn(
        client.clone(),
        MemoryStore::new(),
        client.client_id().clone(),
        config,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    first.shutdown();
    wait_for_state(&client, ConnectionState::Reconnecting).await;

    let _second = serve_on(port).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    // a local edit after the restart reaches the new server
    session.edit(DocumentEdit::SetTotalBudget(888.0)).await.unwrap();
    let peer = connect(port).await;
    let mut sub = peer.subscribe(&room).await.unwrap();
    let landed = timeout(Duration::from_secs(3), async {
        loop {
            if let RemoteSignal::Envelope(env) = next_signal(&mut sub).await {
                if env.state.total_budget == 888.0 {
                    return env;
                }
            }
        }
    })
    .await
    .expect("edit written after reconnect");
    assert_eq!(&landed.meta.updated_by, client.client_id());

    // and the resubscribed feed delivers the peer's write
    let mut doc = landed.state.clone();
    doc.total_budget = 777.0;
    peer.write(&room, &doc, meta(&peer, landed.meta.updated_at_ms + 1))
        .await
        .unwrap();

    let mut watch = session.subscribe();
    timeout(Duration::from_secs(3), async {
        while watch.borrow().document.total_budget != 777.0 {
            watch.changed().await.unwrap();
        }
    })
    .await
    .expect("peer write arrives after reconnect");

    session.shutdown().await.unwrap();
}
