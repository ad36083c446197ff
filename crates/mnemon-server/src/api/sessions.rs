use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};

use crate::api::error_response;
use crate::hub::Topic;
use crate::state::AppState;

/// GET /api/sessions/{id}/snapshot: polling fallback for clients that
/// cannot hold a WebSocket; identical content to the on-connect
/// snapshot.
pub async fn snapshot(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.hub.snapshot(&Topic::Session { id: session_id }).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => error_response(err),
    }
}
