use std::collections::HashMap;

use mnemon_store::ScoredPoint;
use serde_json::Value;

use crate::features::QueryFeatures;

/// RRF constant for the dense list
pub const K_DENSE: f64 = 60.0;
/// RRF constant for the sparse list on entity-bearing or short queries
/// (sparse evidence gets more weight)
pub const K_SPARSE_FOCUSED: f64 = 30.0;
/// RRF constant for the sparse list otherwise
pub const K_SPARSE_WIDE: f64 = 60.0;

/// Fixed weights used when the learned fusion model is unavailable:
/// (dense, sparse, rerank)
pub const FALLBACK_WEIGHTS: FusionWeights = FusionWeights {
    dense: 0.4,
    sparse: 0.3,
    rerank: 0.3,
};

/// Per-signal weights predicted by the fusion model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub dense: f64,
    pub sparse: f64,
    pub rerank: f64,
}

/// Learned fusion seam. The production implementation runs a small MLP
/// over the query features; when no model is installed `predict`
/// returns None and the engine falls back to RRF with fixed weights.
pub trait FusionModel: Send + Sync {
    fn predict(&self, features: &QueryFeatures) -> Option<FusionWeights>;
}

/// One fused candidate with its per-list evidence retained
#[derive(Debug, Clone)]
pub struct FusedCandidate {
    pub id: String,
    pub rrf_score: f64,
    pub dense_score: Option<f64>,
    pub sparse_score: Option<f64>,
    pub payload: Value,
}

/// Sparse-list RRF constant for a query
pub fn k_sparse_for(features: &QueryFeatures) -> f64 {
    if features.has_entities || features.token_count <= 4 {
        K_SPARSE_FOCUSED
    } else {
        K_SPARSE_WIDE
    }
}

/// Reciprocal rank fusion of the dense and sparse candidate lists.
///
/// `rrf(d) = 1/(k_dense + rank_dense + 1) + 1/(k_sparse + rank_sparse + 1)`
/// with each term present only where the candidate appears. Output is
/// ordered by rrf descending, ties broken by id, so fusion is
/// independent of which retriever is named first.
pub fn fuse_rrf(
    dense: &[ScoredPoint],
    sparse: &[ScoredPoint],
    k_dense: f64,
    k_sparse: f64,
) -> Vec<FusedCandidate> {
    let mut by_id: HashMap<&str, FusedCandidate> = HashMap::new();

    for (rank, hit) in dense.iter().enumerate() {
        let entry = by_id.entry(&hit.id).or_insert_with(|| FusedCandidate {
            id: hit.id.clone(),
            rrf_score: 0.0,
            dense_score: None,
            sparse_score: None,
            payload: hit.payload.clone(),
        });
        entry.rrf_score += 1.0 / (k_dense + rank as f64 + 1.0);
        entry.dense_score = Some(hit.score);
    }

    for (rank, hit) in sparse.iter().enumerate() {
        let entry = by_id.entry(&hit.id).or_insert_with(|| FusedCandidate {
            id: hit.id.clone(),
            rrf_score: 0.0,
            dense_score: None,
            sparse_score: None,
            payload: hit.payload.clone(),
        });
        entry.rrf_score += 1.0 / (k_sparse + rank as f64 + 1.0);
        entry.sparse_score = Some(hit.score);
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

/// Min-max normalize into [0, 1]; a zero range maps everything to 0.5.
/// Idempotent on an already-normalized list containing 0 and 1.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    let Some(min) = scores.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().reduce(f64::max).unwrap_or(min);
    let range = max - min;

    if range <= f64::EPSILON {
        return vec![0.5; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

/// Weighted linear fusion of normalized signal lists. Missing signals
/// contribute zero; weights are used as given.
pub fn weighted_score(
    weights: &FusionWeights,
    dense: Option<f64>,
    sparse: Option<f64>,
    rerank: Option<f64>,
) -> f64 {
    weights.dense * dense.unwrap_or(0.0)
        + weights.sparse * sparse.unwrap_or(0.0)
        + weights.rerank * rerank.unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(id: &str, score: f64) -> ScoredPoint {
        ScoredPoint {
            id: id.to_string(),
            score,
            payload: json!({"id": id}),
        }
    }

    #[test]
    fn test_rrf_basic_scores() {
        let dense = vec![hit("a", 0.9), hit("b", 0.8)];
        let sparse = vec![hit("b", 12.0), hit("c", 11.0)];
        let fused = fuse_rrf(&dense, &sparse, 60.0, 60.0);

        let score = |id: &str| fused.iter().find(|c| c.id == id).unwrap().rrf_score;
        assert!((score("a") - 1.0 / 61.0).abs() < 1e-12);
        assert!((score("b") - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!((score("c") - 1.0 / 62.0).abs() < 1e-12);

        // b appears in both lists and wins
        assert_eq!(fused[0].id, "b");
    }

    #[test]
    fn test_rrf_is_retriever_order_independent() {
        let dense = vec![hit("a", 0.9), hit("b", 0.8)];
        let sparse = vec![hit("b", 12.0), hit("c", 11.0)];

        let forward = fuse_rrf(&dense, &sparse, 60.0, 60.0);
        // Swapping which physical list is handed first (with matching
        // constants) yields the same ranking
        let swapped = fuse_rrf(&sparse, &dense, 60.0, 60.0);

        let order = |fused: &[FusedCandidate]| fused.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
        assert_eq!(order(&forward), order(&swapped));
    }

    #[test]
    fn test_empty_dense_falls_through_to_sparse() {
        let sparse = vec![hit("a", 3.0), hit("b", 2.0), hit("c", 1.0)];
        let fused = fuse_rrf(&[], &sparse, 60.0, 30.0);
        let order: Vec<&str> = fused.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_k_sparse_adaptivity() {
        let focused = extract("TurnAggregator panics");
        assert_eq!(k_sparse_for(&focused), K_SPARSE_FOCUSED);

        let short = extract("dedup eviction");
        assert_eq!(k_sparse_for(&short), K_SPARSE_FOCUSED);

        let wide = extract("how are stale entries removed from the cache over time");
        assert_eq!(k_sparse_for(&wide), K_SPARSE_WIDE);
    }

    fn extract(q: &str) -> QueryFeatures {
        crate::features::extract_features(q)
    }

    #[test]
    fn test_normalize_bounds() {
        let normalized = normalize_scores(&[2.0, 4.0, 3.0]);
        assert_eq!(normalized, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_normalize_zero_range_is_half() {
        assert_eq!(normalize_scores(&[7.0, 7.0, 7.0]), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = normalize_scores(&[0.1, 0.9, 0.4]);
        let twice = normalize_scores(&once);
        for (a, b) in once.iter().zip(&twice) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_fallback_weights_sum_to_one() {
        let w = FALLBACK_WEIGHTS;
        assert!((w.dense + w.sparse + w.rerank - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_tie_break_on_id_is_stable() {
        // Same rrf contribution for two ids only in one list each, at
        // the same rank
        let dense = vec![hit("zeta", 0.5)];
        let sparse = vec![hit("alpha", 0.5)];
        let fused = fuse_rrf(&dense, &sparse, 60.0, 60.0);
        assert_eq!(fused[0].id, "alpha");
        assert_eq!(fused[1].id, "zeta");
    }
}
