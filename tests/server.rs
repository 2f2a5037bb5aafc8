use std::sync::Arc;
use std::time::Duration;

use roster_sync::models::{PlayerRecord, ServerAnnotation};
use roster_sync::server::{AppState, serve_listener};
use roster_sync::services::CachedLookup;
use roster_sync::storage::{MemoryStore, PlayerStore};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn start(store: Arc<MemoryStore>) -> (String, CancellationToken) {
    let lookup = CachedLookup::with_ttl(store, Duration::from_secs(30), Duration::from_secs(10));
    let state = AppState::new(Arc::new(lookup), None);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let token = CancellationToken::new();
    tokio::spawn(serve_listener(listener, state, token.clone()));
    (base, token)
}

async fn seeded() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_one(&PlayerRecord {
            external_id: "u-1".into(),
            display_name: "[ABC] PlayerOne".into(),
            crew_tag: Some("ABC".into()),
            source_tag: "EU1".into(),
            last_seen_at: None,
        })
        .await
        .unwrap();
    store.add_server(
        ServerAnnotation {
            server_id: "EU1".into(),
            time: None,
            restart_at: None,
        },
        vec![("u-1".into(), "[ABC] PlayerOne".into())],
    );
    store
}

#[tokio::test]
async fn test_lookup_by_uid_then_cached() {
    let (base, token) = start(seeded().await).await;
    let client = reqwest::Client::new();

    let first: Value = client
        .get(format!("{base}/api/players?uid=u-1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["count"], 1);
    assert_eq!(first["cached"], false);
    assert_eq!(first["players"][0]["external_id"], "u-1");
    assert_eq!(first["players"][0]["server"]["server_id"], "EU1");

    let second: Value = client
        .get(format!("{base}/api/players?uid=u-1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["cached"], true);

    token.cancel();
}

#[tokio::test]
async fn test_lookup_errors() {
    let (base, token) = start(seeded().await).await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("{base}/api/players?username=Nobody"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let empty = client
        .get(format!("{base}/api/players"))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);

    let unknown = client.get(format!("{base}/nope")).send().await.unwrap();
    assert_eq!(unknown.status(), 404);
    let body: Value = unknown.json().await.unwrap();
    assert_eq!(body["path"], "/nope");

    token.cancel();
}

#[tokio::test]
async fn test_health_and_last_sync() {
    let store = seeded().await;
    let (base, token) = start(store).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let last: Value = client
        .get(format!("{base}/api/sync/last"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(last["last_sync"].is_null());

    token.cancel();
}
