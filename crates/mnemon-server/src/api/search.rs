use axum::extract::State;
use axum::response::{IntoResponse, Json};
use mnemon_types::{SearchRequest, SearchResponse};

use crate::api::error_response;
use crate::state::AppState;

/// POST /api/search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> impl IntoResponse {
    match state.engine.search(&request).await {
        Ok(outcome) => {
            let total = outcome.results.len();
            Json(SearchResponse {
                results: outcome.results,
                total,
                took_ms: outcome.took_ms,
            })
            .into_response()
        }
        Err(err) => error_response(err),
    }
}
