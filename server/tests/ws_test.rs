//! Integration tests for WebSocket auth, keepalive, delivery and presence.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use dmhub_server::config::WsConfig;
use dmhub_server::db::store::{MessageStore, SqliteStore};
use dmhub_server::dm::message::Message;
use dmhub_server::ws::hub::HubHandle;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &[u8] = b"integration-test-secret-0123456789";

struct TestServer {
    addr: SocketAddr,
    base_url: String,
    hub: HubHandle,
    store: SqliteStore,
    _tmp_dir: tempfile::TempDir,
}

/// Helper: start the server on a random port.
async fn start_test_server(ws: WsConfig) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = dmhub_server::db::init_db(&data_dir).expect("Failed to init DB");
    let store = SqliteStore::new(db.clone());
    let (presence, _worker) = dmhub_server::presence::spawn_presence_worker(
        std::sync::Arc::new(store.clone()),
        64,
    );
    let (state, _hub_task) = dmhub_server::state::AppState::new(db, SECRET, presence, ws);
    let hub = state.hub.clone();

    let app = dmhub_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        base_url: format!("http://{}", addr),
        hub,
        store,
        _tmp_dir: tmp_dir,
    }
}

fn token_for(user_id: &str) -> String {
    dmhub_server::auth::jwt::issue_token(SECRET, user_id, 900).unwrap()
}

/// Connect as `user_id` and wait until the hub has registered the session.
async fn connect(server: &TestServer, user_id: &str) -> WsStream {
    let url = format!("ws://{}/ws?token={}", server.addr, token_for(user_id));
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect to WebSocket");
    wait_until(|| server.hub.is_online(user_id)).await;
    ws
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 2s");
}

async fn send(ws: &mut WsStream, body: serde_json::Value) {
    ws.send(WsMessage::Text(body.to_string().into())).await.unwrap();
}

/// Next delivered message, skipping control frames. None on timeout or close.
async fn next_message(ws: &mut WsStream, wait: Duration) -> Option<Message> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Ok(Some(Ok(WsMessage::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).expect("Message JSON"));
            }
            Ok(Some(Ok(WsMessage::Ping(_)))) | Ok(Some(Ok(WsMessage::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// True once the server has closed the stream.
async fn closed_within(ws: &mut WsStream, wait: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Ok(Some(Ok(WsMessage::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return true,
            Ok(Some(Ok(_))) => continue,
            Err(_) => return false,
        }
    }
}

#[tokio::test]
async fn test_message_delivered_to_receiver_and_echoed_to_sender() {
    let server = start_test_server(WsConfig::default()).await;
    let mut alice = connect(&server, "alice").await;
    let mut bob = connect(&server, "bob").await;

    send(&mut alice, json!({"receiver_id": "bob", "content": "hi", "type": "text"})).await;

    let received = next_message(&mut bob, Duration::from_secs(2))
        .await
        .expect("bob should receive the message");
    assert_eq!(received.sender_id, "alice");
    assert_eq!(received.receiver_id, "bob");
    assert_eq!(received.content, "hi");
    assert!(!received.read);

    let echo = next_message(&mut alice, Duration::from_secs(2))
        .await
        .expect("alice should receive the echo");
    assert_eq!(echo, received);
}

#[tokio::test]
async fn test_offline_receiver_still_persists_and_echoes() {
    let server = start_test_server(WsConfig::default()).await;
    let mut alice = connect(&server, "alice").await;
    let mut carol = connect(&server, "carol").await;

    send(&mut alice, json!({"receiver_id": "bob", "content": "later", "type": "text"})).await;

    let echo = next_message(&mut alice, Duration::from_secs(2))
        .await
        .expect("alice should receive the echo");
    assert_eq!(echo.receiver_id, "bob");

    // Bystanders get nothing
    assert!(next_message(&mut carol, Duration::from_millis(300)).await.is_none());

    // The echo implies the insert already happened
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/messages?user_id=alice", server.base_url))
        .bearer_auth(token_for("bob"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let stored: Message = serde_json::from_value(body["messages"][0].clone()).unwrap();
    assert_eq!(stored, echo);
}

#[tokio::test]
async fn test_invalid_messages_are_dropped_silently() {
    let server = start_test_server(WsConfig::default()).await;
    let mut alice = connect(&server, "alice").await;
    let mut bob = connect(&server, "bob").await;

    send(&mut alice, json!({"receiver_id": "bob", "content": "", "type": "text"})).await;
    send(&mut alice, json!({"receiver_id": "alice", "content": "me", "type": "text"})).await;
    send(&mut alice, json!({"receiver_id": "bob", "content": "x", "type": "video"})).await;

    assert!(next_message(&mut alice, Duration::from_millis(500)).await.is_none());
    assert!(next_message(&mut bob, Duration::from_millis(100)).await.is_none());

    // The connection survives and still delivers
    send(&mut alice, json!({"receiver_id": "bob", "content": "ok", "type": "text"})).await;
    let received = next_message(&mut bob, Duration::from_secs(2)).await.unwrap();
    assert_eq!(received.content, "ok");
}

#[tokio::test]
async fn test_undecodable_frame_closes_connection() {
    let server = start_test_server(WsConfig::default()).await;
    let mut alice = connect(&server, "alice").await;

    alice
        .send(WsMessage::Text("not json".to_string().into()))
        .await
        .unwrap();

    assert!(closed_within(&mut alice, Duration::from_secs(2)).await);
    wait_until(|| !server.hub.is_online("alice")).await;
}

#[tokio::test]
async fn test_disconnect_records_offline_presence() {
    let server = start_test_server(WsConfig::default()).await;
    let mut alice = connect(&server, "alice").await;

    wait_until(|| {
        server
            .store
            .presence("alice")
            .unwrap()
            .is_some_and(|row| row.online)
    })
    .await;
    let connected_at = server.store.presence("alice").unwrap().unwrap().last_seen;

    alice.close(None).await.unwrap();

    wait_until(|| !server.hub.is_online("alice")).await;
    wait_until(|| {
        server
            .store
            .presence("alice")
            .unwrap()
            .is_some_and(|row| !row.online)
    })
    .await;
    let row = server.store.presence("alice").unwrap().unwrap();
    assert!(row.last_seen >= connected_at);
}

#[tokio::test]
async fn test_missing_or_invalid_token_closes_without_payload() {
    let server = start_test_server(WsConfig::default()).await;

    for url in [
        format!("ws://{}/ws", server.addr),
        format!("ws://{}/ws?token=invalid_jwt_token", server.addr),
        format!(
            "ws://{}/ws?token={}",
            server.addr,
            dmhub_server::auth::jwt::issue_token(b"some-other-secret", "alice", 900).unwrap()
        ),
        format!(
            "ws://{}/ws?token={}",
            server.addr,
            dmhub_server::auth::jwt::issue_token(SECRET, "alice", -300).unwrap()
        ),
    ] {
        let (mut ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("WebSocket should upgrade even with a bad token");
        assert!(
            closed_within(&mut ws, Duration::from_secs(1)).await,
            "socket left open for {}",
            url
        );
    }

    assert_eq!(server.hub.connection_count(), 0);
}

#[tokio::test]
async fn test_second_login_replaces_first_session() {
    let server = start_test_server(WsConfig::default()).await;
    let mut first = connect(&server, "alice").await;
    let mut second = connect(&server, "alice").await;
    let mut bob = connect(&server, "bob").await;

    assert!(closed_within(&mut first, Duration::from_secs(2)).await);
    assert_eq!(server.hub.online_users(), vec!["alice", "bob"]);

    send(&mut bob, json!({"receiver_id": "alice", "content": "which one?", "type": "text"})).await;
    let received = next_message(&mut second, Duration::from_secs(2)).await.unwrap();
    assert_eq!(received.content, "which one?");
}

#[tokio::test]
async fn test_server_pings_and_pong_keeps_connection_alive() {
    let ws_config = WsConfig {
        ping_interval_secs: 1,
        pong_wait_secs: 2,
        ..WsConfig::default()
    };
    let server = start_test_server(ws_config).await;
    let mut alice = connect(&server, "alice").await;

    // tungstenite answers pings while the stream is polled
    let mut pings = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(3500);
    while let Ok(frame) = tokio::time::timeout_at(deadline, alice.next()).await {
        match frame {
            Some(Ok(WsMessage::Ping(_))) => pings += 1,
            Some(Ok(_)) => {}
            _ => panic!("connection closed despite answering pings"),
        }
    }

    assert!(pings >= 2, "expected at least two pings, got {}", pings);
    assert!(server.hub.is_online("alice"));
}

#[tokio::test]
async fn test_silent_client_is_dropped_after_read_deadline() {
    let ws_config = WsConfig {
        ping_interval_secs: 1,
        pong_wait_secs: 2,
        ..WsConfig::default()
    };
    let server = start_test_server(ws_config).await;
    // Never polled, so pings go unanswered
    let _alice = connect(&server, "alice").await;

    tokio::time::sleep(Duration::from_millis(2500)).await;
    wait_until(|| !server.hub.is_online("alice")).await;
}

#[tokio::test]
async fn test_per_ip_connection_cap() {
    let ws_config = WsConfig {
        max_connections_per_ip: 2,
        ..WsConfig::default()
    };
    let server = start_test_server(ws_config).await;
    let _alice = connect(&server, "alice").await;
    let _bob = connect(&server, "bob").await;

    let url = format!("ws://{}/ws?token={}", server.addr, token_for("carol"));
    match tokio_tungstenite::connect_async(&url).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
            assert_eq!(resp.status(), 429);
        }
        other => panic!("expected 429, got {:?}", other.map(|(_, resp)| resp.status())),
    }
}

#[tokio::test]
async fn test_hub_shutdown_closes_every_connection() {
    let server = start_test_server(WsConfig::default()).await;
    let mut alice = connect(&server, "alice").await;
    let mut bob = connect(&server, "bob").await;

    server.hub.shutdown().await;

    assert!(closed_within(&mut alice, Duration::from_secs(2)).await);
    assert!(closed_within(&mut bob, Duration::from_secs(2)).await);
    assert_eq!(server.hub.connection_count(), 0);
}
