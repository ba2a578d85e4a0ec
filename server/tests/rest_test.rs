//! Integration tests for the history, conversation and presence endpoints.

use chrono::{Duration, Utc};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use dmhub_server::config::WsConfig;
use dmhub_server::db::store::{MessageStore, SqliteStore};
use dmhub_server::dm::message::{Message, MessageKind};

const SECRET: &[u8] = b"integration-test-secret-0123456789";

/// Helper: start the server on a random port and return (base_url, store, tmp_dir).
async fn start_test_server() -> (String, SqliteStore, tempfile::TempDir) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = dmhub_server::db::init_db(&data_dir).expect("Failed to init DB");
    let store = SqliteStore::new(db.clone());
    let (presence, _worker) = dmhub_server::presence::spawn_presence_worker(
        std::sync::Arc::new(store.clone()),
        64,
    );
    let (state, _hub_task) =
        dmhub_server::state::AppState::new(db, SECRET, presence, WsConfig::default());

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

    (format!("http://{}", addr), store, tmp_dir)
}

fn token_for(user_id: &str) -> String {
    dmhub_server::auth::jwt::issue_token(SECRET, user_id, 900).unwrap()
}

fn seed(store: &SqliteStore, from: &str, to: &str, content: &str, minutes_ago: i64) {
    let mut msg = Message::new(from, to, content.to_string(), MessageKind::Text);
    msg.created_at = Utc::now() - Duration::minutes(minutes_ago);
    store.insert(&msg).unwrap();
}

#[tokio::test]
async fn test_health_check() {
    let (base_url, _store, _tmp) = start_test_server().await;
    let resp = reqwest::get(format!("{}/health", base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_endpoints_require_auth() {
    let (base_url, _store, _tmp) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/messages?user_id=bob", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{}/api/messages/unread", base_url))
        .bearer_auth("not.a.token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_history_pages_and_read_state() {
    let (base_url, store, _tmp) = start_test_server().await;
    let client = reqwest::Client::new();
    seed(&store, "bob", "alice", "one", 4);
    seed(&store, "alice", "bob", "two", 3);
    seed(&store, "bob", "alice", "three", 2);
    seed(&store, "carol", "alice", "hey", 1);

    let resp = client
        .get(format!("{}/api/messages/unread", base_url))
        .header("cookie", format!("jwt={}", token_for("alice")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["unread_count"], 3);

    let resp = client
        .get(format!("{}/api/messages?user_id=bob&limit=2", base_url))
        .bearer_auth(token_for("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let contents: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, ["two", "three"]);
    assert_eq!(body["pagination"]["page"], 1);
    assert_eq!(body["pagination"]["limit"], 2);
    assert_eq!(body["messages"][0]["type"], "text");

    let resp = client
        .get(format!("{}/api/messages?user_id=bob&page=2&limit=2", base_url))
        .bearer_auth(token_for("alice"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["messages"][0]["content"], "one");

    let resp = client
        .put(format!("{}/api/messages/carol/read", base_url))
        .bearer_auth(token_for("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["messages_updated"], 1);
}

#[tokio::test]
async fn test_history_requires_user_id() {
    let (base_url, _store, _tmp) = start_test_server().await;
    let resp = reqwest::Client::new()
        .get(format!("{}/api/messages", base_url))
        .bearer_auth(token_for("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_conversations_list_latest_per_partner() {
    let (base_url, store, _tmp) = start_test_server().await;
    seed(&store, "bob", "alice", "hi", 10);
    seed(&store, "alice", "carol", "lunch?", 5);
    seed(&store, "bob", "alice", "ping", 1);

    let resp = reqwest::Client::new()
        .get(format!("{}/api/conversations", base_url))
        .bearer_auth(token_for("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let convs = body["conversations"].as_array().unwrap();
    assert_eq!(convs.len(), 2);
    assert_eq!(convs[0]["user"]["id"], "bob");
    assert_eq!(convs[0]["user"]["online"], false);
    assert_eq!(convs[0]["last_message"]["content"], "ping");
    assert_eq!(convs[0]["unread_count"], 2);
    assert_eq!(convs[1]["user"]["id"], "carol");
}

#[tokio::test]
async fn test_presence_lookup() {
    let (base_url, store, _tmp) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/presence/bob", base_url))
        .bearer_auth(token_for("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    store.set_online("bob", false, Utc::now()).unwrap();
    let resp = client
        .get(format!("{}/api/presence/bob", base_url))
        .bearer_auth(token_for("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["user_id"], "bob");
    assert_eq!(body["online"], false);
    assert_eq!(body["connected"], false);

    let resp = client
        .get(format!("{}/api/online", base_url))
        .bearer_auth(token_for("alice"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["connections"], 0);
}
