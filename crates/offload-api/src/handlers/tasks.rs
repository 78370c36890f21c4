//! /tasks handlers: submit, snapshot and result streaming.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;

use offload_core::{TaskAck, TaskEnvelope, TaskResult};

use super::{bad_request, caller, ApiError, ApiState};

pub const NDJSON: &str = "application/x-ndjson";

// ── /tasks (POST) ─────────────────────────────────────────────────────────────

pub async fn handle_submit(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<TaskEnvelope>, JsonRejection>,
) -> Response {
    let caller = caller(&headers, peer);
    let Json(envelope) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request("invalid_envelope", rejection.body_text()),
    };

    match state.grid.submit(&caller, envelope) {
        Ok(ack) => (StatusCode::ACCEPTED, Json::<TaskAck>(ack)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

// ── /tasks/{id} (GET) ─────────────────────────────────────────────────────────

pub async fn handle_get_task(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResult>, ApiError> {
    let caller = caller(&headers, peer);
    Ok(Json(state.grid.get_task(&caller, &task_id)?))
}

// ── /tasks/{id}/results (GET, NDJSON) ────────────────────────────────────────

#[derive(Deserialize)]
pub struct StreamParams {
    pub deadline_ms: Option<u64>,
}

/// One `TaskResult` per line until a terminal status or the deadline.
/// Reaching the deadline just closes the body.
pub async fn handle_stream_results(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Query(params): Query<StreamParams>,
) -> Response {
    let deadline = match params.deadline_ms {
        Some(ms) if ms > 0 => Duration::from_millis(ms).min(state.max_stream_deadline),
        _ => return bad_request("missing_deadline", "deadline_ms is required and must be > 0"),
    };
    let caller = caller(&headers, peer);

    let results = match state.grid.stream_results(&caller, &task_id, deadline) {
        Ok(results) => results,
        Err(e) => return ApiError(e).into_response(),
    };
    tracing::debug!(task_id = %task_id, deadline_ms = deadline.as_millis() as u64, "streaming results");

    let lines = results.map(|result| {
        serde_json::to_vec(&result).map(|mut line| {
            line.push(b'\n');
            Bytes::from(line)
        })
    });

    (
        [(header::CONTENT_TYPE, NDJSON)],
        Body::from_stream(lines),
    )
        .into_response()
}
