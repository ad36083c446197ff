use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use mnemon_store::{RerankDoc, Reranker};
use mnemon_types::{MergeStrategy, RerankTier};
use std::sync::Mutex;

use crate::fusion::normalize_scores;
use crate::{Error, Result};

/// Rerankers registered by tier.
#[derive(Default)]
pub struct RerankerSet {
    tiers: HashMap<RerankTier, Arc<dyn Reranker>>,
}

impl RerankerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.tiers.insert(reranker.tier(), reranker);
        self
    }

    pub fn get(&self, tier: RerankTier) -> Option<Arc<dyn Reranker>> {
        self.tiers.get(&tier).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

/// Listwise LLM seam: given a query and documents, return the indices
/// in preference order.
#[async_trait]
pub trait ListwiseLlm: Send + Sync {
    async fn order(&self, query: &str, docs: &[String]) -> Result<Vec<usize>>;
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Listwise reranking by an external LLM.
///
/// The model returns an ordering of indices which maps to linearly
/// decreasing scores `1 - rank/n`. Calls are rate-limited through a
/// token bucket and cost-accounted (calls and documents scored).
pub struct LlmReranker {
    llm: Arc<dyn ListwiseLlm>,
    bucket: Mutex<TokenBucket>,
    calls: AtomicU64,
    docs_scored: AtomicU64,
}

impl LlmReranker {
    pub fn new(llm: Arc<dyn ListwiseLlm>, calls_per_minute: u32) -> Self {
        let capacity = calls_per_minute.max(1) as f64;
        Self {
            llm,
            bucket: Mutex::new(TokenBucket {
                tokens: capacity,
                capacity,
                refill_per_sec: capacity / 60.0,
                last: Instant::now(),
            }),
            calls: AtomicU64::new(0),
            docs_scored: AtomicU64::new(0),
        }
    }

    /// (calls made, documents scored) so far
    pub fn cost(&self) -> (u64, u64) {
        (
            self.calls.load(Ordering::Relaxed),
            self.docs_scored.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl Reranker for LlmReranker {
    fn tier(&self) -> RerankTier {
        RerankTier::Llm
    }

    async fn rerank(&self, query: &str, docs: &[RerankDoc]) -> Result<Vec<f64>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        {
            let mut bucket = self.bucket.lock().expect("bucket lock poisoned");
            if !bucket.try_take() {
                return Err(Error::Transient("llm rerank rate limit".to_string()));
            }
        }

        let contents: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let ordering = self.llm.order(query, &contents).await?;

        self.calls.fetch_add(1, Ordering::Relaxed);
        self.docs_scored.fetch_add(docs.len() as u64, Ordering::Relaxed);

        // rank r (0-based) -> 1 - r/n; unranked documents score 0
        let n = docs.len() as f64;
        let mut scores = vec![0.0f64; docs.len()];
        for (rank, index) in ordering.into_iter().enumerate() {
            if let Some(slot) = scores.get_mut(index) {
                *slot = 1.0 - rank as f64 / n;
            }
        }
        Ok(scores)
    }
}

/// One merged result row; `index` points back into the fused list.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedResult {
    pub index: usize,
    pub score: f64,
    pub rrf_score: Option<f64>,
    pub reranker_score: f64,
}

/// Combine normalized fused scores with reranker scores under the
/// requested strategy. Both inputs are positionally aligned.
pub fn merge_scores(
    fused_norm: &[f64],
    rerank: &[f64],
    strategy: MergeStrategy,
) -> Result<Vec<MergedResult>> {
    if fused_norm.len() != rerank.len() {
        return Err(Error::Contract(format!(
            "rerank returned {} scores for {} candidates",
            rerank.len(),
            fused_norm.len()
        )));
    }

    let mut merged: Vec<MergedResult> = match strategy {
        MergeStrategy::Replace => fused_norm
            .iter()
            .enumerate()
            .map(|(index, _)| MergedResult {
                index,
                score: rerank[index],
                rrf_score: None,
                reranker_score: rerank[index],
            })
            .collect(),

        MergeStrategy::RankBased => fused_norm
            .iter()
            .enumerate()
            .map(|(index, fused)| MergedResult {
                index,
                score: rerank[index],
                rrf_score: Some(*fused),
                reranker_score: rerank[index],
            })
            .collect(),

        MergeStrategy::Weighted { fused, rerank: rerank_weight } => {
            if (fused + rerank_weight - 1.0).abs() > 1e-9 {
                return Err(Error::Validation(format!(
                    "weighted merge weights must sum to 1 (got {} + {})",
                    fused, rerank_weight
                )));
            }
            let fused_n = normalize_scores(fused_norm);
            let rerank_n = normalize_scores(rerank);
            (0..fused_norm.len())
                .map(|index| MergedResult {
                    index,
                    score: fused * fused_n[index] + rerank_weight * rerank_n[index],
                    rrf_score: Some(fused_norm[index]),
                    reranker_score: rerank[index],
                })
                .collect()
        }
    };

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.index.cmp(&b.index))
    });
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct InvertingLlm;

    #[async_trait]
    impl ListwiseLlm for InvertingLlm {
        async fn order(&self, _query: &str, docs: &[String]) -> Result<Vec<usize>> {
            Ok((0..docs.len()).rev().collect())
        }
    }

    fn docs(n: usize) -> Vec<RerankDoc> {
        (0..n)
            .map(|i| RerankDoc {
                id: format!("d-{i}"),
                content: format!("document {i}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_llm_listwise_scores() {
        let reranker = LlmReranker::new(Arc::new(InvertingLlm), 60);
        let scores = reranker.rerank("q", &docs(4)).await.unwrap();
        // Inverted order: last doc ranked first -> 1.0, first doc last
        assert!((scores[3] - 1.0).abs() < 1e-9);
        assert!((scores[0] - 0.25).abs() < 1e-9);
        assert_eq!(reranker.cost(), (1, 4));
    }

    #[tokio::test]
    async fn test_llm_rate_limit() {
        let reranker = LlmReranker::new(Arc::new(InvertingLlm), 1);
        assert!(reranker.rerank("q", &docs(2)).await.is_ok());
        let err = reranker.rerank("q", &docs(2)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_replace_follows_reranker() {
        let fused = vec![1.0, 0.6, 0.2];
        let rerank = vec![0.0, 0.5, 1.0];
        let merged = merge_scores(&fused, &rerank, MergeStrategy::Replace).unwrap();
        let order: Vec<usize> = merged.iter().map(|m| m.index).collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert!(merged.iter().all(|m| m.rrf_score.is_none()));
    }

    #[test]
    fn test_rank_based_same_order_keeps_rrf() {
        let fused = vec![1.0, 0.6, 0.2];
        let rerank = vec![0.0, 0.5, 1.0];
        let replace = merge_scores(&fused, &rerank, MergeStrategy::Replace).unwrap();
        let rank_based = merge_scores(&fused, &rerank, MergeStrategy::RankBased).unwrap();

        let order = |m: &[MergedResult]| m.iter().map(|r| r.index).collect::<Vec<_>>();
        assert_eq!(order(&replace), order(&rank_based));
        assert_eq!(rank_based[0].rrf_score, Some(0.2));
    }

    #[test]
    fn test_weighted_blends_orders() {
        // Fused strongly prefers 0; rerank strongly prefers 2; a
        // fused-heavy blend keeps 0 on top
        let fused = vec![1.0, 0.9, 0.0];
        let rerank = vec![0.0, 0.4, 1.0];
        let merged = merge_scores(
            &fused,
            &rerank,
            MergeStrategy::Weighted {
                fused: 0.8,
                rerank: 0.2,
            },
        )
        .unwrap();
        assert_eq!(merged[0].index, 0);

        let rerank_heavy = merge_scores(
            &fused,
            &rerank,
            MergeStrategy::Weighted {
                fused: 0.2,
                rerank: 0.8,
            },
        )
        .unwrap();
        assert_eq!(rerank_heavy[0].index, 2);
    }

    #[test]
    fn test_weighted_validates_weights() {
        let err = merge_scores(
            &[0.5],
            &[0.5],
            MergeStrategy::Weighted {
                fused: 0.5,
                rerank: 0.6,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        assert!(merge_scores(&[0.5, 0.6], &[0.5], MergeStrategy::Replace).is_err());
    }
}
