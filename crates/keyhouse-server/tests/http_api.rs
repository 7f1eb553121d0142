//! HTTP API tests for the DB wrapper: a real store on a temp directory
//! served on an ephemeral port.

use std::sync::Arc;

use axum::http::StatusCode;
use keyhouse_server::{router, ResponseBody};
use keyhouse_store::{Store, StoreConfig};
use tempfile::TempDir;

async fn spawn_server() -> (String, Arc<Store>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        Store::open(dir.path(), StoreConfig::default())
            .await
            .unwrap(),
    );

    let app = router(Arc::clone(&store));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (url, store, dir)
}

#[tokio::test]
async fn put_then_get_roundtrip() {
    let (url, _store, _dir) = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/db/greeting", url))
        .json(&serde_json::json!({"value": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = client
        .get(format!("{}/db/greeting", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: ResponseBody = response.json().await.unwrap();
    assert_eq!(body.key, "greeting");
    assert_eq!(body.value, "hello");
}

#[tokio::test]
async fn missing_key_is_404() {
    let (url, _store, _dir) = spawn_server().await;

    let response = reqwest::get(format!("{}/db/absent", url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_body_is_400() {
    let (url, _store, _dir) = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/db/key", url))
        .body("this is not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Valid JSON with the wrong shape is still a bad request
    let response = client
        .post(format!("{}/db/key", url))
        .json(&serde_json::json!({"wrong": "shape"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsupported_method_is_400() {
    let (url, _store, _dir) = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .patch(format!("{}/db/key", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_then_get_is_404() {
    let (url, _store, _dir) = spawn_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/db/doomed", url))
        .json(&serde_json::json!({"value": "v"}))
        .send()
        .await
        .unwrap();

    let response = client
        .delete(format!("{}/db/doomed", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client.get(format!("{}/db/doomed", url)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn overwrite_returns_latest() {
    let (url, _store, _dir) = spawn_server().await;
    let client = reqwest::Client::new();

    for value in ["first", "second", "third"] {
        let response = client
            .post(format!("{}/db/key", url))
            .json(&serde_json::json!({ "value": value }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let body: ResponseBody = client
        .get(format!("{}/db/key", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.value, "third");
}
