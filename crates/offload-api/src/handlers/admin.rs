//! /admin handlers.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use super::{caller, ApiError, ApiState};

// ── /admin/rate-limits/{principal}/reset (POST) ──────────────────────────────

#[derive(Serialize)]
pub struct ResetResponse {
    pub principal: String,
    /// False if the principal had no bucket yet.
    pub reset: bool,
}

pub async fn handle_reset_rate_limit(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(principal): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    let admin = caller(&headers, peer);
    let reset = state.grid.reset_principal(&admin, &principal)?;
    Ok(Json(ResetResponse { principal, reset }))
}
