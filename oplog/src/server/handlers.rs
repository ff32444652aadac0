//! HTTP route handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use bytes::Bytes;
use futures::stream;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::event::OplogEvent;
use crate::filter::Filter;
use crate::ingest::decode_operation;
use crate::lastid::LastId;
use crate::stats::Stats;
use crate::store::Store;
use crate::tail::Tailer;

/// Ping interval on an idle SSE stream, keeping proxies and browsers from
/// closing the connection.
const HEARTBEAT: Duration = Duration::from_secs(25);

/// Events buffered between the tailer and the HTTP writer.
const SINK_BUFFER: usize = 64;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub tailer: Arc<Tailer>,
    pub stats: Arc<Stats>,
    pub password: Option<String>,
}

/// Query parameters of the SSE endpoint.
#[derive(Debug, Deserialize)]
pub struct OpsParams {
    types: Option<String>,
    parents: Option<String>,
}

/// Checks HTTP basic authentication against the shared password, if one is
/// configured. The username part is ignored.
fn authenticate(password: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(password) = password else {
        return true;
    };
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(pair) = String::from_utf8(decoded) else {
        return false;
    };
    match pair.split_once(':') {
        Some((_, supplied)) => supplied == password,
        None => false,
    }
}

/// Decrements the connected-clients gauge when the stream is dropped.
struct ClientGuard {
    stats: Arc<Stats>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.stats.clients.dec();
        tracing::info!("sse connection closed");
    }
}

/// Handle `GET /` and `GET /ops`: the SSE subscription stream.
///
/// The stream itself never fails mid-flight; tailer-side errors become
/// retries, and a dropped client cancels the tailer through the closed
/// event channel.
pub async fn handle_ops(
    State(state): State<AppState>,
    Query(params): Query<OpsParams>,
    headers: HeaderMap,
) -> Response {
    if headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept != "text/event-stream")
        .unwrap_or(true)
    {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }

    if !authenticate(state.password.as_deref(), &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    tracing::info!("sse connection started");
    state.stats.connections.inc();

    // Resolve the resume position. The header is echoed back only when the
    // requested id still resolves; a fallback or an ignored id starts the
    // stream without the echo so the consumer knows its exact resume was
    // not honored.
    let requested = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let mut echo = false;
    let last_id = if requested.is_empty() {
        None
    } else {
        match LastId::parse(&requested) {
            Ok(id) => match state.store.has_id(&id).await {
                Ok(true) => {
                    echo = true;
                    Some(id)
                }
                Ok(false) => match id {
                    // The operation aged out of the capped log: fall back
                    // to replicating from its embedded timestamp.
                    LastId::Operation(op_id) => Some(LastId::Replication(op_id.fallback())),
                    LastId::Replication(_) => Some(id),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "can't check last event id");
                    return StatusCode::SERVICE_UNAVAILABLE.into_response();
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unparseable last event id");
                None
            }
        }
    };

    let filter = Filter::from_query(params.types.as_deref(), params.parents.as_deref());

    let (tx, rx) = mpsc::channel::<OplogEvent>(SINK_BUFFER);
    let tailer = state.tailer.clone();
    tokio::spawn(async move {
        tailer.tail(last_id, filter, tx).await;
    });

    state.stats.clients.inc();
    let guard = ClientGuard {
        stats: state.stats.clone(),
    };
    let stats = state.stats.clone();
    let body = stream::unfold((rx, guard, stats), |(mut rx, guard, stats)| async move {
        let frame = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    let mut buf = String::new();
                    if let Err(e) = event.write_sse(&mut buf) {
                        tracing::warn!(error = %e, "can't serialize event, closing stream");
                        return None;
                    }
                    stats.events_sent.inc();
                    Bytes::from(buf)
                }
                None => return None,
            },
            _ = tokio::time::sleep(HEARTBEAT) => Bytes::from_static(b":\n"),
        };
        Some((Ok::<_, Infallible>(frame), (rx, guard, stats)))
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
    if echo {
        builder = builder.header("Last-Event-ID", requested);
    }
    builder
        .body(Body::from_stream(body))
        .expect("static headers are valid")
}

/// Handle `POST /ops`: synchronous ingestion of a single JSON operation.
pub async fn handle_ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authenticate(state.password.as_deref(), &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match decode_operation(&body) {
        Ok(mut op) => {
            state.store.append(&mut op).await;
            state.stats.events_ingested.inc();
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            state.stats.events_error.inc();
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

/// Handle `GET /status`: the JSON counter document.
pub async fn handle_status(State(state): State<AppState>) -> Response {
    axum::Json(state.stats.status_json()).into_response()
}

/// Handle `GET /metrics`: Prometheus text format.
pub async fn handle_metrics(State(state): State<AppState>) -> String {
    state.stats.encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn should_accept_anything_without_password() {
        // given
        let headers = HeaderMap::new();

        // when/then
        assert!(authenticate(None, &headers));
    }

    #[test]
    fn should_accept_matching_password() {
        // given - base64 of ":secret"
        let headers = headers_with_auth("Basic OnNlY3JldA==");

        // when/then
        assert!(authenticate(Some("secret"), &headers));
    }

    #[test]
    fn should_reject_wrong_password() {
        // given - base64 of ":wrong"
        let headers = headers_with_auth("Basic Ondyb25n");

        // when/then
        assert!(!authenticate(Some("secret"), &headers));
    }

    #[test]
    fn should_reject_missing_or_malformed_header() {
        // given/when/then
        assert!(!authenticate(Some("secret"), &HeaderMap::new()));
        assert!(!authenticate(Some("secret"), &headers_with_auth("Bearer x")));
        assert!(!authenticate(
            Some("secret"),
            &headers_with_auth("Basic !!!not-base64!!!")
        ));
    }
}
