//! HTTP API handlers: grid operations as JSON and NDJSON.

pub mod admin;
pub mod status;
pub mod tasks;

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use offload_services::{Caller, GridError, GridService};

/// Header carrying the caller's principal.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct ApiState {
    pub grid: GridService,
    /// Upper bound on a client-requested result-stream deadline.
    pub max_stream_deadline: Duration,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Principal from `x-user-id` (absent or non-UTF-8 → anonymous), origin
/// from the peer socket.
fn caller(headers: &HeaderMap, peer: SocketAddr) -> Caller {
    let principal = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Caller::new(principal, Some(peer.to_string()))
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// `GridError` as an HTTP response.
pub struct ApiError(pub GridError);

impl From<GridError> for ApiError {
    fn from(e: GridError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            GridError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            GridError::InvalidEnvelope(_) => (StatusCode::BAD_REQUEST, "invalid_envelope"),
            GridError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "invalid_payload"),
            GridError::UnsupportedKind(_) => (StatusCode::BAD_REQUEST, "unsupported_kind"),
            GridError::DuplicateTask(_) => (StatusCode::CONFLICT, "duplicate_task"),
            GridError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            GridError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let (pool, key) = match &self.0 {
            GridError::RateLimited(d) => (Some(d.pool.to_string()), Some(d.key.clone())),
            _ => (None, None),
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            kind,
            pool,
            key,
        };
        (status, Json(body)).into_response()
    }
}

/// A 400 that never reached the grid.
fn bad_request(kind: &'static str, error: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: error.into(),
        kind,
        pool: None,
        key: None,
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

// Re-export handler functions for use in router setup.
pub use admin::handle_reset_rate_limit;
pub use status::{handle_health, handle_status};
pub use tasks::{handle_get_task, handle_stream_results, handle_submit};
