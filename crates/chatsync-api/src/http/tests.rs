//! Router tests driven through `tower::ServiceExt::oneshot`, plus one
//! round trip through a real listener with the HTTP remote.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use chatsync_core::session::remote::ChatRemote;
use chatsync_core::session::store::{LocalSessionStore, StoreOptions};
use chatsync_infra::remote::http::HttpChatRemote;
use chatsync_infra::sqlite::pool::DatabasePool;
use chatsync_infra::sqlite::session_cache::SqliteSessionCache;
use chatsync_types::chat::{MessageRole, now_millis};
use chatsync_types::config::{ChatSyncConfig, ClientConfig};
use chatsync_types::session::ChatHistoryItem;

use crate::http::router::build_router;
use crate::state::AppState;

async fn temp_pool(name: &str) -> DatabasePool {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join(name).display());
    // Leak tempdir so it lives for the test
    std::mem::forget(dir);
    DatabasePool::new(&url).await.unwrap()
}

async fn test_state() -> AppState {
    let pool = temp_pool("server.db").await;
    AppState::from_pool(pool, ChatSyncConfig::default(), std::env::temp_dir())
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
    }
    let body = match body {
        Some(body) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn sync_body(chat_id: &str, messages: &[(&str, &str, i64)]) -> Value {
    json!({
        "chat": {"id": chat_id, "type": "group", "title": "Trip"},
        "members": [{"type": "character", "characterId": "airi"}],
        "messages": messages
            .iter()
            .map(|(id, content, created_at)| json!({
                "id": id, "role": "user", "content": content, "createdAt": created_at
            }))
            .collect::<Vec<_>>(),
    })
}

#[tokio::test]
async fn test_health_without_auth() {
    let app = build_router(test_state().await);
    let (status, json) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_missing_or_unknown_key_is_401() {
    let app = build_router(test_state().await);

    let (status, json) = call(&app, Method::GET, "/api/v1/chats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["data"].is_null());
    assert_eq!(json["errors"][0]["code"], "UNAUTHORIZED");

    let (status, _) = call(&app, Method::GET, "/api/v1/chats", Some("cs_nope"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sync_then_read_back() {
    let state = test_state().await;
    let key = state.api_keys.create_key("u-1", "test").await.unwrap();
    let app = build_router(state);

    let body = sync_body("chat-1", &[("m-1", "a", 100), ("m-2", "b", 200), ("m-3", "c", 300)]);
    let (status, json) = call(&app, Method::POST, "/api/v1/chats/sync", Some(&key), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["chatId"], "chat-1");

    let (status, json) = call(&app, Method::GET, "/api/v1/chats", Some(&key), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"][0]["id"], "chat-1");
    assert_eq!(json["data"][0]["characterId"], "airi");

    let (_, json) = call(
        &app,
        Method::GET,
        "/api/v1/chats/chat-1/messages?limit=1&beforeCreatedAt=300",
        Some(&key),
        None,
    )
    .await;
    assert_eq!(json["data"][0]["createdAt"], 200);

    let (status, json) = call(&app, Method::GET, "/api/v1/chats/chat-1/snapshot", Some(&key), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["chat"]["title"], "Trip");
    assert_eq!(json["data"]["messages"].as_array().unwrap().len(), 3);
    assert_eq!(json["data"]["messages"][0]["id"], "m-1");
}

#[tokio::test]
async fn test_invalid_input_is_400() {
    let state = test_state().await;
    let key = state.api_keys.create_key("u-1", "test").await.unwrap();
    let app = build_router(state);

    for uri in [
        "/api/v1/chats?limit=0",
        "/api/v1/chats?limit=201",
        "/api/v1/chats?limit=abc",
        "/api/v1/chats?beforeUpdatedAt=-1",
        "/api/v1/chats/chat-1/messages?limit=1001",
    ] {
        let (status, json) = call(&app, Method::GET, uri, Some(&key), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(json["errors"][0]["code"], "VALIDATION_ERROR");
    }

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/v1/chats/sync",
        Some(&key),
        Some(json!({"chat": {"id": "c"}, "messages": [{"id": "m", "role": "narrator", "content": "x"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/v1/chats/sync",
        Some(&key),
        Some(json!({"chat": {"id": ""}, "messages": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_member_and_conflict() {
    let state = test_state().await;
    let owner = state.api_keys.create_key("u-1", "owner").await.unwrap();
    let other = state.api_keys.create_key("u-2", "other").await.unwrap();
    let app = build_router(state);

    call(&app, Method::POST, "/api/v1/chats/sync", Some(&owner), Some(sync_body("chat-a", &[("m-1", "mine", 1)]))).await;

    for uri in ["/api/v1/chats/chat-a/snapshot", "/api/v1/chats/chat-a/messages", "/api/v1/chats/ghost/snapshot"] {
        let (status, json) = call(&app, Method::GET, uri, Some(&other), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(json["errors"][0]["code"], "FORBIDDEN");
    }

    let (status, _) = call(&app, Method::POST, "/api/v1/chats/sync", Some(&other), Some(sync_body("chat-a", &[]))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = call(
        &app,
        Method::POST,
        "/api/v1/chats/sync",
        Some(&owner),
        Some(sync_body("chat-b", &[("m-1", "stolen", 2)])),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["errors"][0]["code"], "CONFLICT");

    let (_, json) = call(&app, Method::GET, "/api/v1/chats/chat-a/messages", Some(&owner), None).await;
    assert_eq!(json["data"][0]["content"], "mine");
}

#[tokio::test]
async fn test_delete_tombstones_chat() {
    let state = test_state().await;
    let key = state.api_keys.create_key("u-1", "test").await.unwrap();
    let app = build_router(state);

    call(&app, Method::POST, "/api/v1/chats/sync", Some(&key), Some(sync_body("chat-1", &[("m-1", "x", 1)]))).await;

    let (status, json) = call(&app, Method::DELETE, "/api/v1/chats/chat-1", Some(&key), None).await;
    assert_eq!(status, StatusCode::OK);
    let deleted_at = json["data"]["deletedAt"].as_i64().unwrap();

    let (status, json) = call(&app, Method::GET, "/api/v1/chats/chat-1/snapshot", Some(&key), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["data"].is_null());

    let (_, json) = call(&app, Method::GET, "/api/v1/chats", Some(&key), None).await;
    assert!(json["data"].as_array().unwrap().is_empty());

    let uri = format!("/api/v1/chats/delta?sinceUpdatedAt={}", deleted_at - 1);
    let (status, json) = call(&app, Method::GET, &uri, Some(&key), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["deletedChatIds"], json!(["chat-1"]));
}

#[tokio::test]
async fn test_session_store_round_trip_over_http() {
    let state = test_state().await;
    let key = state.api_keys.create_key("u-1", "device").await.unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });

    let client = ClientConfig {
        remote_url: Some(format!("http://{addr}")),
        api_key: Some(key),
        ..ClientConfig::default()
    };

    let open_store = |name: &'static str| {
        let client = client.clone();
        async move {
            let cache = SqliteSessionCache::new(temp_pool(name).await);
            let remote = HttpChatRemote::from_config(&client).unwrap();
            assert!(remote.is_authenticated());
            LocalSessionStore::new(cache, remote, StoreOptions::from(&client))
        }
    };

    // First device writes a session and pushes it.
    let device_a = open_store("a.db").await;
    device_a.initialize().await.unwrap();
    let session_id = device_a.active_session_id().unwrap();
    let mut messages = device_a.active_messages();
    messages.push(ChatHistoryItem::new(
        "m-hello",
        MessageRole::User,
        "hello from a",
        now_millis() + 1_000,
    ));
    device_a.set_active_messages(messages.clone()).await.unwrap().unwrap();
    device_a.flush().await;
    assert!(device_a.sync_session_to_remote(&session_id).await.unwrap());

    // Second device starts empty and hydrates from the server.
    let device_b = open_store("b.db").await;
    device_b.initialize().await.unwrap();
    assert_eq!(device_b.active_session_id().as_deref(), Some(session_id.as_str()));

    let hydrated = device_b.session_messages(&session_id);
    assert_eq!(hydrated.len(), messages.len());
    assert_eq!(hydrated.last().unwrap().id.as_deref(), Some("m-hello"));
    assert_eq!(hydrated.last().unwrap().content.to_text(), "hello from a");
}
