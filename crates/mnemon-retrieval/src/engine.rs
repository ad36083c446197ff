use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemon_store::{
    validate_read_query, with_deadline, Embedder, GraphStore, MessageBus, ScoredPoint, VectorStore,
};
use mnemon_types::{
    MergeStrategy, NodeRecord, RerankTier, SearchRequest, SearchResult, SearchStrategy, TimeRange,
};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::features::{extract_features, QueryFeatures};
use crate::fusion::{
    fuse_rrf, k_sparse_for, normalize_scores, weighted_score, FusedCandidate, FusionModel, K_DENSE,
};
use crate::rerank::{merge_scores, RerankerSet};
use crate::temporal::parse_temporal;
use crate::{Error, Result};

/// LLM-backed query expansion seam for multi-query retrieval.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, query: &str, n: usize) -> Result<Vec<String>>;
}

/// Engine configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub rerank_depth: usize,
    pub abstention_threshold: f64,
    pub nli_threshold: f64,
    pub temporal_confidence_threshold: f64,
    pub rerank_max_concurrency: usize,
    pub default_rerank_tier: RerankTier,
    pub merge_strategy: MergeStrategy,
    /// Number of LLM query variations; None disables multi-query
    pub multi_query: Option<usize>,
    /// (top sessions, turns per session); None disables the two-stage
    /// session filter
    pub session_aware: Option<(usize, usize)>,
    pub graph_deadline: Duration,
    pub vector_deadline: Duration,
    pub embed_deadline: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rerank_depth: 30,
            abstention_threshold: 0.3,
            nli_threshold: 0.7,
            temporal_confidence_threshold: 0.7,
            rerank_max_concurrency: 2,
            default_rerank_tier: RerankTier::Fast,
            merge_strategy: MergeStrategy::RankBased,
            multi_query: None,
            session_aware: None,
            graph_deadline: Duration::from_secs(5),
            vector_deadline: Duration::from_secs(2),
            embed_deadline: Duration::from_secs(3),
        }
    }
}

fn rerank_deadline(tier: RerankTier) -> Duration {
    match tier {
        RerankTier::Fast => Duration::from_secs(5),
        RerankTier::Accurate | RerankTier::Code => Duration::from_secs(10),
        RerankTier::Llm => Duration::from_secs(30),
    }
}

/// Backend handles the engine is constructed over.
pub struct RetrievalDeps {
    pub graph: Arc<dyn GraphStore>,
    pub vector: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub bus: Arc<dyn MessageBus>,
    pub rerankers: RerankerSet,
    pub fusion_model: Option<Arc<dyn FusionModel>>,
    pub expander: Option<Arc<dyn QueryExpander>>,
}

/// Search outcome with the engine-level signals the reader consumes.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    /// Served from a fallback path
    pub degraded: bool,
    /// Retrieval-confidence abstention fired
    pub abstained: bool,
    pub took_ms: u64,
}

/// Hybrid retrieval engine: candidate retrieval, fusion, optional
/// reranking, abstention.
pub struct RetrievalEngine {
    deps: RetrievalDeps,
    config: SearchConfig,
    rerank_permits: Arc<Semaphore>,
}

impl RetrievalEngine {
    pub fn new(deps: RetrievalDeps, config: SearchConfig) -> Self {
        let permits = config.rerank_max_concurrency.max(1);
        Self {
            deps,
            config,
            rerank_permits: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub(crate) fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.deps.graph
    }

    pub(crate) fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.deps.bus
    }

    /// Full search pipeline.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        let start = Instant::now();
        if request.text.trim().is_empty() {
            return Err(Error::Validation("query text is empty".to_string()));
        }

        let features = extract_features(&request.text);
        let depth = request.rerank_depth.max(request.limit);
        let filter = self.build_filter(request);
        let time_range = self.effective_time_range(request);

        let (mut candidates, mut degraded) = match (self.config.multi_query, &self.deps.expander) {
            (Some(n), Some(expander)) if n > 0 => {
                self.multi_query_retrieve(request, &features, depth, &filter, expander.clone(), n)
                    .await?
            }
            _ => {
                self.retrieve_fused(&request.text, &features, request.strategy, depth, &filter)
                    .await?
            }
        };

        if let Some(range) = time_range {
            candidates.retain(|c| within_range(&c.payload, &range));
        }
        if let Some(kind) = &request.filters.kind {
            candidates.retain(|c| matches_kind(&c.payload, kind));
        }
        if let Some((top_sessions, per_session)) = self.config.session_aware {
            candidates = session_filter(candidates, top_sessions, per_session);
        }
        candidates.truncate(depth);

        let fused_scores = self.fused_scores(&features, &candidates);
        let fused_norm = normalize_scores(&fused_scores);

        let mut results = if request.rerank {
            self.rerank(request, &candidates, &fused_norm, &mut degraded)
                .await
        } else {
            candidates
                .iter()
                .zip(&fused_norm)
                .map(|(candidate, norm)| SearchResult {
                    id: candidate.id.clone(),
                    score: *norm,
                    rrf_score: Some(candidate.rrf_score),
                    reranker_score: None,
                    rerank_tier: None,
                    payload: candidate.payload.clone(),
                    degraded,
                })
                .collect::<Vec<_>>()
        };

        // Retrieval-confidence abstention: no evidence, or evidence
        // below the caller's threshold, returns nothing rather than
        // noise
        let abstained = match results.first() {
            None => true,
            Some(top) => top.score < request.threshold.min(1.0),
        };
        if abstained {
            return Ok(SearchOutcome {
                results: Vec::new(),
                degraded: true,
                abstained: true,
                took_ms: start.elapsed().as_millis() as u64,
            });
        }

        results.truncate(request.limit);
        Ok(SearchOutcome {
            results,
            degraded,
            abstained: false,
            took_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Guarded read-only graph query pass-through.
    pub async fn query(&self, query: &str, params: Value) -> Result<Vec<Value>> {
        validate_read_query(query)?;
        with_deadline(
            "graph query",
            self.config.graph_deadline,
            self.deps.graph.query(query, params),
        )
        .await
    }

    // --- candidate retrieval ---

    async fn retrieve_fused(
        &self,
        query: &str,
        features: &QueryFeatures,
        strategy: SearchStrategy,
        depth: usize,
        filter: &Value,
    ) -> Result<(Vec<FusedCandidate>, bool)> {
        let dense_fut = async {
            match strategy {
                SearchStrategy::Bm25 => None,
                _ => Some(self.dense_candidates(query, depth, filter).await),
            }
        };
        let sparse_fut = async {
            match strategy {
                SearchStrategy::Vector => None,
                _ => Some(self.sparse_candidates(query, depth, filter).await),
            }
        };
        let (dense, sparse) = tokio::join!(dense_fut, sparse_fut);

        let mut degraded = false;
        let dense_hits = match dense {
            Some(Ok(hits)) => Some(hits),
            Some(Err(err)) => {
                warn!(error = %err, "dense retrieval failed, falling back to sparse");
                degraded = true;
                None
            }
            None => None,
        };
        let sparse_hits = match sparse {
            Some(Ok(hits)) => Some(hits),
            Some(Err(err)) => {
                warn!(error = %err, "sparse retrieval failed");
                degraded = true;
                None
            }
            None => None,
        };

        match (dense_hits, sparse_hits) {
            (Some(dense), Some(sparse)) => Ok((
                fuse_rrf(&dense, &sparse, K_DENSE, k_sparse_for(features)),
                degraded,
            )),
            (Some(dense), None) => Ok((fuse_rrf(&dense, &[], K_DENSE, K_DENSE), degraded)),
            (None, Some(sparse)) => Ok((
                fuse_rrf(&[], &sparse, K_DENSE, k_sparse_for(features)),
                degraded,
            )),
            (None, None) => {
                // Total vector-store failure: shallow graph keyword scan
                warn!("vector retrieval unavailable, using graph keyword fallback");
                let nodes = with_deadline(
                    "keyword fallback",
                    self.config.graph_deadline,
                    self.deps.graph.keyword_search(query, depth),
                )
                .await?;
                let candidates = nodes
                    .iter()
                    .enumerate()
                    .map(|(rank, node)| FusedCandidate {
                        id: node.id.clone(),
                        rrf_score: 1.0 / (rank as f64 + 1.0),
                        dense_score: None,
                        sparse_score: None,
                        payload: keyword_payload(node),
                    })
                    .collect();
                Ok((candidates, true))
            }
        }
    }

    async fn dense_candidates(
        &self,
        query: &str,
        depth: usize,
        filter: &Value,
    ) -> Result<Vec<ScoredPoint>> {
        let vectors = with_deadline(
            "dense embedding",
            self.config.embed_deadline,
            self.deps.embedder.embed_dense(&[query.to_string()]),
        )
        .await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Contract("embedder returned no dense vector".to_string()))?;
        with_deadline(
            "dense search",
            self.config.vector_deadline,
            self.deps.vector.search_dense(&vector, depth, filter),
        )
        .await
    }

    async fn sparse_candidates(
        &self,
        query: &str,
        depth: usize,
        filter: &Value,
    ) -> Result<Vec<ScoredPoint>> {
        let vectors = with_deadline(
            "sparse embedding",
            self.config.embed_deadline,
            self.deps.embedder.embed_sparse(&[query.to_string()]),
        )
        .await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Contract("embedder returned no sparse vector".to_string()))?;
        with_deadline(
            "sparse search",
            self.config.vector_deadline,
            self.deps.vector.search_sparse(&vector, depth, filter),
        )
        .await
    }

    async fn multi_query_retrieve(
        &self,
        request: &SearchRequest,
        features: &QueryFeatures,
        depth: usize,
        filter: &Value,
        expander: Arc<dyn QueryExpander>,
        n: usize,
    ) -> Result<(Vec<FusedCandidate>, bool)> {
        let variations = match expander.expand(&request.text, n).await {
            Ok(variations) => variations,
            Err(err) => {
                warn!(error = %err, "query expansion failed, single-query retrieval");
                Vec::new()
            }
        };

        let mut queries = vec![request.text.clone()];
        queries.extend(variations);

        let mut lists = Vec::new();
        let mut degraded = false;
        for query in &queries {
            let (candidates, was_degraded) = self
                .retrieve_fused(query, features, request.strategy, depth, filter)
                .await?;
            degraded |= was_degraded;
            lists.push(candidates);
        }
        Ok((fuse_lists(lists), degraded))
    }

    // --- scoring ---

    fn fused_scores(&self, features: &QueryFeatures, candidates: &[FusedCandidate]) -> Vec<f64> {
        // Learned fusion when a model is installed and confident;
        // otherwise the RRF scores stand
        if let Some(model) = &self.deps.fusion_model {
            if let Some(weights) = model.predict(features) {
                let dense_norm = normalize_scores(
                    &candidates
                        .iter()
                        .map(|c| c.dense_score.unwrap_or(0.0))
                        .collect::<Vec<_>>(),
                );
                let sparse_norm = normalize_scores(
                    &candidates
                        .iter()
                        .map(|c| c.sparse_score.unwrap_or(0.0))
                        .collect::<Vec<_>>(),
                );
                return candidates
                    .iter()
                    .enumerate()
                    .map(|(i, _)| {
                        weighted_score(
                            &weights,
                            dense_norm.get(i).copied(),
                            sparse_norm.get(i).copied(),
                            None,
                        )
                    })
                    .collect();
            }
        }
        candidates.iter().map(|c| c.rrf_score).collect()
    }

    async fn rerank(
        &self,
        request: &SearchRequest,
        candidates: &[FusedCandidate],
        fused_norm: &[f64],
        degraded: &mut bool,
    ) -> Vec<SearchResult> {
        let tier = request.rerank_tier.unwrap_or(self.config.default_rerank_tier);

        let fused_results = |degraded: bool| {
            candidates
                .iter()
                .zip(fused_norm)
                .map(|(candidate, norm)| SearchResult {
                    id: candidate.id.clone(),
                    score: *norm,
                    rrf_score: Some(candidate.rrf_score),
                    reranker_score: None,
                    rerank_tier: None,
                    payload: candidate.payload.clone(),
                    degraded,
                })
                .collect::<Vec<_>>()
        };

        let Some(reranker) = self.deps.rerankers.get(tier) else {
            warn!(tier = tier.as_str(), "no reranker registered for tier");
            return fused_results(*degraded);
        };

        let docs: Vec<mnemon_store::RerankDoc> = candidates
            .iter()
            .map(|c| mnemon_store::RerankDoc {
                id: c.id.clone(),
                content: c
                    .payload
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect();

        let _permit = match self.rerank_permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return fused_results(*degraded),
        };

        let scores = with_deadline(
            "rerank",
            rerank_deadline(tier),
            reranker.rerank(&request.text, &docs),
        )
        .await;

        match scores.and_then(|scores| merge_scores(fused_norm, &scores, self.config.merge_strategy))
        {
            Ok(merged) => merged
                .into_iter()
                .map(|m| SearchResult {
                    id: candidates[m.index].id.clone(),
                    score: m.score,
                    rrf_score: m.rrf_score,
                    reranker_score: Some(m.reranker_score),
                    rerank_tier: Some(tier),
                    payload: candidates[m.index].payload.clone(),
                    degraded: *degraded,
                })
                .collect(),
            Err(err) => {
                // Rerank failure: the fused list is returned unchanged
                warn!(error = %err, tier = tier.as_str(), "rerank failed, keeping fused order");
                fused_results(*degraded)
            }
        }
    }

    // --- filters ---

    fn build_filter(&self, request: &SearchRequest) -> Value {
        let mut filter = serde_json::Map::new();
        if let Some(session_id) = &request.filters.session_id {
            filter.insert("session_id".to_string(), json!(session_id));
        }
        Value::Object(filter)
    }

    fn effective_time_range(&self, request: &SearchRequest) -> Option<TimeRange> {
        if let Some(range) = request.filters.time_range {
            return Some(range);
        }
        let (range, confidence) = parse_temporal(&request.text, Utc::now())?;
        (confidence >= self.config.temporal_confidence_threshold).then_some(range)
    }
}

/// A "type" filter matches the node's label set or its declared
/// memory type.
fn matches_kind(payload: &Value, kind: &str) -> bool {
    let label_match = payload
        .get("metadata")
        .and_then(|m| m.get("labels"))
        .or_else(|| payload.get("labels"))
        .and_then(|l| l.as_array())
        .map_or(false, |labels| {
            labels
                .iter()
                .filter_map(|l| l.as_str())
                .any(|l| l.eq_ignore_ascii_case(kind))
        });
    let type_match = payload
        .get("type")
        .and_then(|t| t.as_str())
        .map_or(false, |t| t.eq_ignore_ascii_case(kind));
    label_match || type_match
}

fn within_range(payload: &Value, range: &TimeRange) -> bool {
    let created = payload
        .get("metadata")
        .and_then(|m| m.get("created_at"))
        .or_else(|| payload.get("created_at"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    match created {
        Some(created) => range.start <= created && created <= range.end,
        // Undated payloads are not excluded by a temporal filter
        None => true,
    }
}

/// Keep candidates from the strongest sessions only, capped per
/// session. Candidates without a session pass through.
fn session_filter(
    candidates: Vec<FusedCandidate>,
    top_sessions: usize,
    per_session: usize,
) -> Vec<FusedCandidate> {
    let mut session_best: HashMap<String, f64> = HashMap::new();
    for candidate in &candidates {
        if let Some(session) = candidate.payload.get("session_id").and_then(|v| v.as_str()) {
            let best = session_best.entry(session.to_string()).or_insert(0.0);
            *best = best.max(candidate.rrf_score);
        }
    }
    let mut ranked: Vec<(String, f64)> = session_best.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let keep: Vec<String> = ranked
        .into_iter()
        .take(top_sessions)
        .map(|(session, _)| session)
        .collect();

    let mut taken: HashMap<String, usize> = HashMap::new();
    candidates
        .into_iter()
        .filter(|candidate| {
            match candidate.payload.get("session_id").and_then(|v| v.as_str()) {
                None => true,
                Some(session) => {
                    if !keep.iter().any(|k| k == session) {
                        return false;
                    }
                    let count = taken.entry(session.to_string()).or_insert(0);
                    *count += 1;
                    *count <= per_session
                }
            }
        })
        .collect()
}

/// RRF across whole candidate lists (multi-query fusion).
fn fuse_lists(lists: Vec<Vec<FusedCandidate>>) -> Vec<FusedCandidate> {
    let mut by_id: HashMap<String, FusedCandidate> = HashMap::new();
    for list in lists {
        for (rank, candidate) in list.into_iter().enumerate() {
            let entry = by_id
                .entry(candidate.id.clone())
                .or_insert_with(|| FusedCandidate {
                    rrf_score: 0.0,
                    ..candidate
                });
            entry.rrf_score += 1.0 / (K_DENSE + rank as f64 + 1.0);
        }
    }
    let mut fused: Vec<FusedCandidate> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}

fn keyword_payload(node: &NodeRecord) -> Value {
    json!({
        "content": node.prop_str("content")
            .or_else(|| node.prop_str("preview"))
            .or_else(|| node.prop_str("content_preview"))
            .unwrap_or_default(),
        "session_id": node.session_id,
        "labels": node.labels,
    })
}
