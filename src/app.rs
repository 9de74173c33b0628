//! HTTP application assembly: health endpoint plus socket upgrade fallback.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::ws::{RouteTable, handle_upgrade};

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    socket_routes: Vec<String>,
}

/// `GET /health` — Service health status.
async fn health_handler(State(routes): State<RouteTable>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            socket_routes: routes.paths().into_iter().map(str::to_string).collect(),
        }),
    )
}

/// Builds the application router.
///
/// `/health` is served directly; every other path falls through to
/// [`handle_upgrade`] and is matched against `routes`.
pub fn build_app(routes: RouteTable) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(handle_upgrade)
        .layer(TraceLayer::new_for_http())
        .with_state(routes)
}
