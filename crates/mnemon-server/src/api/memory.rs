use axum::extract::State;
use axum::response::{IntoResponse, Json};
use mnemon_types::{ContextDepth, RememberRequest, SearchFilters};
use serde::Deserialize;
use serde_json::Value;

use crate::api::error_response;
use crate::state::AppState;

/// POST /api/memory/remember
pub async fn remember(
    State(state): State<AppState>,
    Json(request): Json<RememberRequest>,
) -> impl IntoResponse {
    match state.engine.remember(&request).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecallBody {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub filters: Option<SearchFilters>,
}

fn default_k() -> usize {
    10
}

/// POST /api/memory/recall
pub async fn recall(
    State(state): State<AppState>,
    Json(body): Json<RecallBody>,
) -> impl IntoResponse {
    match state.engine.recall(&body.query, body.k, body.filters).await {
        Ok(outcome) => Json(serde_json::json!({
            "results": outcome.results,
            "total": outcome.results.len(),
            "took_ms": outcome.took_ms,
            "degraded": outcome.degraded,
            "abstained": outcome.abstained,
        }))
        .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ContextBody {
    pub task: String,
    #[serde(default)]
    pub filters: Option<SearchFilters>,
    #[serde(default)]
    pub depth: ContextDepth,
}

/// POST /api/memory/context
pub async fn context(
    State(state): State<AppState>,
    Json(body): Json<ContextBody>,
) -> impl IntoResponse {
    match state
        .engine
        .get_context(&body.task, body.filters, body.depth)
        .await
    {
        Ok(outcome) => Json(serde_json::json!({
            "results": outcome.results,
            "total": outcome.results.len(),
            "took_ms": outcome.took_ms,
        }))
        .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub query: String,
    #[serde(default)]
    pub params: Value,
}

/// POST /api/query: read-only graph query, guard-checked.
pub async fn query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> impl IntoResponse {
    match state.engine.query(&body.query, body.params).await {
        Ok(rows) => Json(serde_json::json!({"rows": rows})).into_response(),
        Err(err) => error_response(err),
    }
}
