//! Request Dispatch and Forwarding
//!
//! The balancer's HTTP surface is a single fallback route: any method on
//! any path selects a backend and relays the request. The forwarded
//! request keeps the inbound method, path, query and body stream, swaps
//! the scheme and host for the chosen backend, and is bounded by the
//! configured forward timeout. Cancelling the inbound request drops the
//! handler future and with it the outbound request.
//!
//! On a response, ALL upstream headers are copied verbatim, the `lb-from`
//! trace header is stamped when tracing is on, and then status and body
//! are relayed - headers, then status, then body, in that order. Body
//! bytes are counted against the serving backend for the least-traffic
//! policy.
//!
//! On any forward error the client gets `503 Service Unavailable`; the
//! backend's health state is left to the prober.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::TryStreamExt;
use tracing::{info, warn};

use crate::config::BalancerConfig;
use crate::error::Result;
use crate::pool::{BackendLease, BackendPool};

/// Response header naming the backend that served the request.
pub const TRACE_HEADER: &str = "lb-from";

/// Shared state of the dispatch path.
#[derive(Clone)]
pub struct BalancerState {
    pool: Arc<BackendPool>,
    client: reqwest::Client,
    scheme: &'static str,
    forward_timeout: Duration,
    trace: bool,
}

impl BalancerState {
    pub fn new(pool: Arc<BackendPool>, config: &BalancerConfig) -> Self {
        Self {
            pool,
            client: reqwest::Client::new(),
            scheme: config.scheme(),
            forward_timeout: config.forward_timeout(),
            trace: config.trace,
        }
    }
}

/// The balancer router: every method on every path goes through dispatch.
pub fn router(state: BalancerState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

async fn dispatch(State(state): State<BalancerState>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    let lease = match state.pool.select(&path) {
        Ok(lease) => lease,
        Err(e) => {
            warn!(%path, error = %e, "request rejected");
            return unavailable();
        }
    };

    let target = lease.addr().to_string();
    match forward(&state, lease, request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(backend = %target, error = %e, "failed to forward request");
            unavailable()
        }
    }
}

fn unavailable() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "no healthy backend available\n").into_response()
}

async fn forward(state: &BalancerState, lease: BackendLease, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}://{}{}", state.scheme, lease.addr(), path_and_query);

    // The upstream connection carries its own host and body framing.
    let mut headers = parts.headers;
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    let upstream = state
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .timeout(state.forward_timeout)
        .send()
        .await?;

    info!(status = %upstream.status(), backend = %lease.addr(), path = %path_and_query, "fwd");

    let mut response = Response::new(Body::empty());
    *response.status_mut() = upstream.status();
    for (name, value) in upstream.headers() {
        response.headers_mut().append(name.clone(), value.clone());
    }
    if state.trace {
        if let Ok(value) = HeaderValue::from_str(lease.addr()) {
            response.headers_mut().insert(TRACE_HEADER, value);
        }
    }

    // Stream the body through; the lease rides along, counting bytes and
    // releasing the in-flight slot once the relay finishes (or the client
    // goes away).
    let body_stream = upstream
        .bytes_stream()
        .inspect_ok(move |chunk| lease.record_bytes(chunk.len() as u64));
    *response.body_mut() = Body::from_stream(body_stream);

    Ok(response)
}
