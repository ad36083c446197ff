use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use mnemon_runtime::SubmitError;
use mnemon_types::Envelope;

use crate::state::AppState;

/// POST /api/ingest: accept one envelope into the pipeline.
///
/// The pipeline applies backpressure through its bounded worker
/// queues; a submit that cannot be routed is a client error (missing
/// session), a submit into a stopped pipeline is a 503.
pub async fn ingest(
    State(state): State<AppState>,
    Json(envelope): Json<Envelope>,
) -> impl IntoResponse {
    match state.ingest.submit(envelope).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(serde_json::json!({"accepted": true})))
            .into_response(),
        Err(err @ SubmitError::MissingSession) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": err.to_string()})),
        )
            .into_response(),
        Err(err @ SubmitError::Closed) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}
