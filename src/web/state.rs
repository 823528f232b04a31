// src/web/state.rs
// Shared state for the durable-stream HTTP/SSE server: the database pool,
// the live-subscription registry, and the process-wide stopped flag that
// makes `stop()` idempotent and new requests fail fast afterward.

use crate::db::events::Event;
use crate::db::pool::DatabasePool;
use crate::error::{ErrorKind, HiveError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, Serialize)]
pub struct StreamItem {
    pub offset: i64,
    pub data: serde_json::Value,
    pub timestamp: String,
}

impl From<Event> for StreamItem {
    fn from(e: Event) -> Self {
        Self { offset: e.sequence, data: e.data, timestamp: e.timestamp }
    }
}

/// Subscribers registered per `(project_key, offset)`. `stop_all` wakes
/// every open stream so the server's `stop()` closes them all at once.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subs: Mutex<HashMap<(String, i64), Vec<(u64, Arc<Notify>)>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn register(&self, project_key: &str, offset: i64) -> (u64, Arc<Notify>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let notify = Arc::new(Notify::new());
        self.subs.lock().unwrap().entry((project_key.to_string(), offset)).or_default().push((id, notify.clone()));
        (id, notify)
    }

    pub fn unregister(&self, project_key: &str, offset: i64, id: u64) {
        let mut subs = self.subs.lock().unwrap();
        if let Some(entry) = subs.get_mut(&(project_key.to_string(), offset)) {
            entry.retain(|(existing_id, _)| *existing_id != id);
            if entry.is_empty() {
                subs.remove(&(project_key.to_string(), offset));
            }
        }
    }

    pub fn stop_all(&self) {
        let subs = self.subs.lock().unwrap();
        for handles in subs.values() {
            for (_, notify) in handles {
                notify.notify_waiters();
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.subs.lock().unwrap().values().map(Vec::len).sum()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<DatabasePool>,
    pub registry: Arc<SubscriptionRegistry>,
    pub stopped: Arc<AtomicBool>,
    pub poll_interval: Duration,
}

impl AppState {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool, registry: Arc::new(SubscriptionRegistry::default()), stopped: Arc::new(AtomicBool::new(false)), poll_interval: Duration::from_millis(200) }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Idempotent: sets the stopped flag and wakes every open SSE stream.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.registry.stop_all();
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    kind: String,
    message: String,
    retryable: bool,
}

pub struct ApiError(HiveError);

impl From<HiveError> for ApiError {
    fn from(e: HiveError) -> Self {
        Self(e)
    }
}

pub fn service_unavailable() -> ApiError {
    ApiError(HiveError::Other("server is stopped".to_string()))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Cycle | ErrorKind::GraphTooDeep | ErrorKind::Parse | ErrorKind::Conflict => StatusCode::BAD_REQUEST,
            ErrorKind::Busy | ErrorKind::Locked => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: kind.to_string(),
                kind: kind.to_string(),
                message: self.0.to_user_string(),
                retryable: kind.retryable(),
            },
        };
        (status, Json(body)).into_response()
    }
}
