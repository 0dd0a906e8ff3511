//! HTTP surface: WebSocket signal stream plus status and health reads.
//!
//! - `GET /ws` streams signal packets as JSON text frames
//! - `GET /api/status` returns the engine snapshot
//! - `GET /health` liveness

use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::broadcast::SignalBroadcaster;
use crate::error::{EngineError, EngineResult};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::shutdown::Shutdown;
use crate::state::SharedState;

mod status;
mod ws;

#[derive(Clone)]
pub struct AppState {
    pub board: SharedState,
    pub broadcaster: SignalBroadcaster,
    pub shutdown: Shutdown,
    started: Arc<Instant>,
}

impl AppState {
    pub fn new(board: SharedState, broadcaster: SignalBroadcaster, shutdown: Shutdown) -> Self {
        Self { board, broadcaster, shutdown, started: Arc::new(Instant::now()) }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/status", get(status::get_status))
        .route("/health", get(status::health))
        .with_state(state)
}

pub async fn bind(addr: &str) -> EngineResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| EngineError::Config(format!("cannot bind {}: {}", addr, e)))
}

/// Serve until the shutdown signal fires.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let mut shutdown = state.shutdown.clone();
    if let Ok(addr) = listener.local_addr() {
        log(Level::Info, Domain::Server, "listening", obj(&[("addr", v_str(&addr.to_string()))]));
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    log(Level::Info, Domain::Server, "server_stopped", obj(&[]));
    Ok(())
}
