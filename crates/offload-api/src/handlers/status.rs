//! /status and /health handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use offload_services::GridStatus;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

pub async fn handle_status(State(state): State<ApiState>) -> Json<GridStatus> {
    Json(state.grid.status())
}

// ── /health ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
