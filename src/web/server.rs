// src/web/server.rs
// Binds the router and owns graceful shutdown: `stop()` is idempotent,
// flips the shared stopped flag so new requests fail fast, wakes every
// open SSE stream, and lets axum's graceful_shutdown drain in-flight
// connections.

use super::state::AppState;
use crate::error::{HiveError, Result};
use std::net::SocketAddr;
use tokio::sync::Notify;
use std::sync::Arc;
use tracing::info;

pub struct Server {
    state: AppState,
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Server {
    pub async fn bind(addr: SocketAddr, state: AppState) -> Result<Self> {
        let router = super::create_router(state.clone());
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(HiveError::Io)?;
        let local_addr = listener.local_addr().map_err(HiveError::Io)?;
        let shutdown = Arc::new(Notify::new());

        let task_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router).with_graceful_shutdown(async move {
                task_shutdown.notified().await;
            }).await;
            if let Err(e) = result {
                tracing::error!("http server exited with error: {}", e);
            }
        });

        info!(%local_addr, "durable-stream server listening");
        Ok(Self { state, local_addr, shutdown, handle: Some(handle) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Idempotent. After this returns, new requests get 503 and every
    /// previously open SSE stream observes end-of-stream.
    pub async fn stop(&mut self) {
        if self.state.is_stopped() {
            return;
        }
        self.state.stop();
        self.shutdown.notify_waiters();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_pool;

    #[tokio::test]
    async fn bind_then_stop_is_idempotent() {
        let pool = setup_test_pool().await;
        let state = AppState::new(pool);
        let mut server = Server::bind("127.0.0.1:0".parse().unwrap(), state).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        server.stop().await;
        server.stop().await;
    }
}
