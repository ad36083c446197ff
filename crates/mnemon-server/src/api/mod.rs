mod ingest;
mod memory;
mod search;
mod sessions;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws;

/// Assemble the full HTTP/WS surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/ingest", post(ingest::ingest))
        .route("/api/search", post(search::search))
        .route("/api/memory/remember", post(memory::remember))
        .route("/api/memory/recall", post(memory::recall))
        .route("/api/memory/context", post(memory::context))
        .route("/api/query", post(memory::query))
        .route("/api/sessions/:id/snapshot", get(sessions::snapshot))
        .route("/ws/logs", get(ws::logs_ws))
        .route("/ws/metrics", get(ws::metrics_ws))
        .route("/ws/session/:id", get(ws::session_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Map backend errors onto the HTTP surface.
pub(crate) fn error_response(err: mnemon_store::Error) -> Response {
    use mnemon_store::Error;
    let status = match &err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Contract(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Unavailable(_) | Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        Error::Conflict { .. } | Error::Storage(_) | Error::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(serde_json::json!({"error": err.to_string()})),
    )
        .into_response()
}
