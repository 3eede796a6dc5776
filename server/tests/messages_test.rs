//! Integration tests for the HTTP history and presence endpoints.

use parley_server::chat::messages::AddMessageResponse;
use parley_server::chat::presence::PresenceResponse;
use parley_server::config::{Config, HistoryBackend, HistoryConfig};
use parley_server::history::ConversationEntry;
use serde_json::json;
use tokio::net::TcpListener;

/// Helper: start the server on a random port and return the base URL.
async fn start_test_server(backend: HistoryBackend) -> String {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let config = Config {
        history: HistoryConfig {
            backend,
            max_message_len: 20,
        },
        ..Config::default()
    };
    let history = parley_server::history::open_store(&config.history, &data_dir)
        .expect("Failed to open history store");
    let state = parley_server::state::AppState::new(history, &config);

    let app = parley_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    format!("http://{}", addr)
}

async fn add_message(
    client: &reqwest::Client,
    base_url: &str,
    from: &str,
    to: &str,
    message: &str,
) -> reqwest::Response {
    client
        .post(format!("{}/api/messages/addmsg", base_url))
        .json(&json!({"from": from, "to": to, "message": message}))
        .send()
        .await
        .unwrap()
}

async fn get_conversation(
    client: &reqwest::Client,
    base_url: &str,
    body: serde_json::Value,
) -> Vec<ConversationEntry> {
    let resp = client
        .post(format!("{}/api/messages/getmsg", base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let base_url = start_test_server(HistoryBackend::Memory).await;

    let resp = reqwest::get(format!("{}/health", base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_presence_starts_empty() {
    let base_url = start_test_server(HistoryBackend::Memory).await;

    let presence: PresenceResponse = reqwest::get(format!("{}/api/presence", base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(presence.online.is_empty());
}

#[tokio::test]
async fn test_add_message_then_read_conversation() {
    let base_url = start_test_server(HistoryBackend::Sqlite).await;
    let client = reqwest::Client::new();

    let resp = add_message(&client, &base_url, "alice", "bob", "first").await;
    assert_eq!(resp.status(), 201);
    let body: AddMessageResponse = resp.json().await.unwrap();
    assert_eq!(body.msg, "Message added successfully");
    assert!(!body.id.is_empty());

    add_message(&client, &base_url, "bob", "alice", "second").await;
    add_message(&client, &base_url, "alice", "carol", "elsewhere").await;

    let entries = get_conversation(&client, &base_url, json!({"from": "alice", "to": "bob"})).await;
    let view: Vec<(bool, &str)> = entries
        .iter()
        .map(|e| (e.from_self, e.text.as_str()))
        .collect();
    assert_eq!(view, vec![(true, "first"), (false, "second")]);
    assert!(entries[0].created_at <= entries[1].created_at);
}

#[tokio::test]
async fn test_conversation_viewer_perspective() {
    let base_url = start_test_server(HistoryBackend::Memory).await;
    let client = reqwest::Client::new();

    add_message(&client, &base_url, "alice", "bob", "hey").await;

    let as_bob = get_conversation(&client, &base_url, json!({"from": "bob", "to": "alice"})).await;
    assert!(!as_bob[0].from_self);

    let explicit = get_conversation(
        &client,
        &base_url,
        json!({"from": "bob", "to": "alice", "viewer": "alice"}),
    )
    .await;
    assert!(explicit[0].from_self);
}

#[tokio::test]
async fn test_conversation_wire_shape() {
    let base_url = start_test_server(HistoryBackend::Memory).await;
    let client = reqwest::Client::new();

    add_message(&client, &base_url, "alice", "bob", "shape").await;

    let raw: serde_json::Value = client
        .post(format!("{}/api/messages/getmsg", base_url))
        .json(&json!({"from": "alice", "to": "bob"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(raw[0]["fromSelf"], true);
    assert_eq!(raw[0]["message"], "shape");
    assert!(raw[0]["createdAt"].is_string());
}

#[tokio::test]
async fn test_add_message_rejects_invalid_input() {
    let base_url = start_test_server(HistoryBackend::Memory).await;
    let client = reqwest::Client::new();

    let empty = add_message(&client, &base_url, "alice", "bob", "   ").await;
    assert_eq!(empty.status(), 400);

    let too_long = add_message(&client, &base_url, "alice", "bob", &"x".repeat(21)).await;
    assert_eq!(too_long.status(), 400);

    let no_sender = add_message(&client, &base_url, "", "bob", "hi").await;
    assert_eq!(no_sender.status(), 400);

    let entries = get_conversation(&client, &base_url, json!({"from": "alice", "to": "bob"})).await;
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_get_conversation_requires_both_users() {
    let base_url = start_test_server(HistoryBackend::Memory).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/messages/getmsg", base_url))
        .json(&json!({"from": "alice", "to": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
