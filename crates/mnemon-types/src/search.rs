use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::MemoryKind;

/// Retrieval strategy requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    #[default]
    Hybrid,
    Vector,
    Bm25,
}

/// Reranker quality/cost tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankTier {
    Fast,
    Accurate,
    Code,
    Llm,
}

impl RerankTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RerankTier::Fast => "fast",
            RerankTier::Accurate => "accurate",
            RerankTier::Code => "code",
            RerankTier::Llm => "llm",
        }
    }
}

/// How reranker scores combine with fused scores
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MergeStrategy {
    /// Use the reranker score alone
    Replace,
    /// Convex combination of normalized fused and rerank scores
    Weighted { fused: f64, rerank: f64 },
    /// Preserve reranker ordering, retain fused score metadata
    #[default]
    RankBased,
}

/// Inclusive time range filter
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Structured filters on search candidates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
}

fn default_limit() -> usize {
    10
}

fn default_threshold() -> f64 {
    0.5
}

fn default_rerank_depth() -> usize {
    30
}

/// Search request (wire format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub text: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub strategy: SearchStrategy,
    #[serde(default)]
    pub rerank: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_tier: Option<RerankTier>,
    #[serde(default = "default_rerank_depth")]
    pub rerank_depth: usize,
}

impl SearchRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: default_limit(),
            threshold: default_threshold(),
            filters: SearchFilters::default(),
            strategy: SearchStrategy::default(),
            rerank: false,
            rerank_tier: None,
            rerank_depth: default_rerank_depth(),
        }
    }
}

/// One ranked hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrf_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranker_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_tier: Option<RerankTier>,
    pub payload: Value,
    #[serde(default)]
    pub degraded: bool,
}

/// Search response (wire format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub took_ms: u64,
}

/// Context retrieval depth; controls how many results feed the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextDepth {
    Shallow,
    #[default]
    Normal,
    Deep,
}

impl ContextDepth {
    pub fn k(&self) -> usize {
        match self {
            ContextDepth::Shallow => 5,
            ContextDepth::Normal => 10,
            ContextDepth::Deep => 25,
        }
    }
}

// --- Memory API contracts ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RememberRequest {
    pub content: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MemoryKind>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Outcome of a `remember` call; a duplicate points at the live node
/// that already holds the same content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RememberOutcome {
    pub stored: bool,
    pub duplicate: bool,
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_request_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"text": "design docs"}"#).unwrap();
        assert_eq!(req.limit, 10);
        assert!((req.threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(req.strategy, SearchStrategy::Hybrid);
        assert!(!req.rerank);
        assert_eq!(req.rerank_depth, 30);
    }

    #[test]
    fn test_filters_type_field_wire_name() {
        let filters: SearchFilters =
            serde_json::from_str(r#"{"session_id": "s-1", "type": "decision"}"#).unwrap();
        assert_eq!(filters.kind.as_deref(), Some("decision"));
    }

    #[test]
    fn test_context_depth_k() {
        assert!(ContextDepth::Shallow.k() < ContextDepth::Normal.k());
        assert!(ContextDepth::Normal.k() < ContextDepth::Deep.k());
    }
}
