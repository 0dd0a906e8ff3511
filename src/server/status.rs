use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::state::EngineSnapshot;

/// `GET /api/status`
pub async fn get_status(State(state): State<AppState>) -> Json<EngineSnapshot> {
    Json(state.board.snapshot(state.broadcaster.subscriber_count()))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub subscribers: usize,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        subscribers: state.broadcaster.subscriber_count(),
    })
}
