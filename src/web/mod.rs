// src/web/mod.rs
// Durable-stream HTTP/SSE server: `/streams/:project_key` serves events
// from the append-only log as JSON pages or as a replay-then-tail SSE feed.

pub mod server;
pub mod state;

use crate::db::events::read_events;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, header};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use state::{ApiError, AppState, StreamItem, service_unavailable};
use std::collections::HashMap;
use std::convert::Infallible;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/streams/{project_key}", get(stream_handler))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (axum::http::StatusCode::NOT_FOUND, Json(serde_json::json!({"error": {"code": "not_found", "kind": "not_found", "message": "unknown route", "retryable": false}})))
}

/// Query params are parsed manually (rather than via axum's typed `Query`)
/// so a malformed `offset`/`limit` degrades to the default instead of
/// rejecting the request with a 400.
fn parse_int(params: &HashMap<String, String>, key: &str, default: i64) -> i64 {
    params.get(key).and_then(|v| v.parse::<i64>().ok()).unwrap_or(default)
}

fn is_live(params: &HashMap<String, String>) -> bool {
    params.get("live").map(|v| v == "true" || v == "1").unwrap_or(false)
}

async fn stream_handler(
    State(state): State<AppState>,
    Path(project_key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    if state.is_stopped() {
        return service_unavailable().into_response();
    }
    if is_live(&params) {
        sse_handler(state, project_key, params).await.into_response()
    } else {
        json_handler(state, project_key, params).await.into_response()
    }
}

async fn json_handler(state: AppState, project_key: String, params: HashMap<String, String>) -> axum::response::Response {
    let offset = parse_int(&params, "offset", 0);
    let limit = params.get("limit").and_then(|v| v.parse::<i64>().ok());

    let result = state
        .pool
        .run(move |conn| read_events(conn, &project_key, Some(offset), limit))
        .await;

    match result {
        Ok(events) => Json(events.into_iter().map(StreamItem::from).collect::<Vec<_>>()).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn sse_handler(state: AppState, project_key: String, params: HashMap<String, String>) -> impl IntoResponse {
    let offset = parse_int(&params, "offset", 0);
    let (sub_id, notify) = state.registry.register(&project_key, offset);
    let pool = state.pool.clone();
    let registry = state.registry.clone();
    let stopped = state.stopped.clone();
    let poll_interval = state.poll_interval;

    let stream = async_stream::stream! {
        let mut cursor = offset;

        // Replay: drain everything already in the log after `offset`.
        loop {
            let pk = project_key.clone();
            let after = cursor;
            let events = pool.run(move |conn| read_events(conn, &pk, Some(after), None)).await.unwrap_or_default();
            if events.is_empty() {
                break;
            }
            for event in events {
                cursor = event.sequence;
                yield sse_frame(&event.into());
            }
        }

        // Tail: poll for new events until the subscriber disconnects or the
        // server stops.
        loop {
            if stopped.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = notify.notified() => break,
                _ = tokio::time::sleep(poll_interval) => {
                    let pk = project_key.clone();
                    let after = cursor;
                    let events = pool.run(move |conn| read_events(conn, &pk, Some(after), None)).await.unwrap_or_default();
                    for event in events {
                        cursor = event.sequence;
                        yield sse_frame(&event.into());
                    }
                }
            }
        }

        registry.unregister(&project_key, offset, sub_id);
        debug!("sse subscriber for {} disconnected", project_key);
    };

    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

fn sse_frame(item: &StreamItem) -> Result<SseEvent, Infallible> {
    Ok(SseEvent::default().data(serde_json::to_string(item).unwrap_or_default()))
}
