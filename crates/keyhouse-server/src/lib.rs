//! HTTP wrapper around the KeyHouse store.
//!
//! Exposes the store as a small JSON API under `/db/{key}`:
//!
//! - `GET /db/{key}` → `200` with `{"key": ..., "value": ...}`, or `404`
//!   when the key is absent or deleted
//! - `POST /db/{key}` with `{"value": ...}` → `201` on success, `400` on
//!   a malformed body
//! - `DELETE /db/{key}` → `204`
//! - any other method on the path → `400`
//!
//! Internal store errors map to `500`; `NotFound` is never logged as an
//! error.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use keyhouse_core::Error;
use keyhouse_store::Store;
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseBody {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestBody {
    pub value: String,
}

/// The wrapper router over a shared store.
pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route(
            "/db/:key",
            get(get_value)
                .post(put_value)
                .delete(delete_value)
                .fallback(unsupported_method),
        )
        .with_state(store)
}

async fn get_value(State(store): State<Arc<Store>>, Path(key): Path<String>) -> Response {
    match store.get(&key).await {
        Ok(value) => (StatusCode::OK, Json(ResponseBody { key, value })).into_response(),
        Err(Error::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(%key, error = %e, "get failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn put_value(
    State(store): State<Arc<Store>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    // Hand-rolled body parse so every malformed input maps to 400
    let body: RequestBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    match store.put(key.clone(), body.value).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => {
            error!(%key, error = %e, "put failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn delete_value(State(store): State<Arc<Store>>, Path(key): Path<String>) -> Response {
    match store.delete(key.clone()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(%key, error = %e, "delete failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn unsupported_method() -> StatusCode {
    StatusCode::BAD_REQUEST
}
