//! offload-api: HTTP surface of the grid daemon, mounted under `/api`.

pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// Hex doubles the payload, plus envelope framing.
const MAX_REQUEST_BYTES: usize = 2 * offload_core::payload::MAX_BODY + 64 * 1024;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/status", get(handlers::handle_status))
        .route(
            "/tasks",
            post(handlers::handle_submit).layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES)),
        )
        .route("/tasks/{id}", get(handlers::handle_get_task))
        .route("/tasks/{id}/results", get(handlers::handle_stream_results))
        .route(
            "/admin/rate-limits/{principal}/reset",
            post(handlers::handle_reset_rate_limit),
        )
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

/// Bind `bind_addr:port` and serve until `shutdown` resolves.
pub async fn serve(
    state: ApiState,
    bind_addr: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("{bind_addr}:{port}")).await?;
    serve_on(listener, state, shutdown).await
}

/// Serve on an already-bound listener. Used by tests binding port 0.
pub async fn serve_on(
    listener: TcpListener,
    state: ApiState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "API listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    tracing::info!(%addr, "API stopped");
    Ok(())
}
