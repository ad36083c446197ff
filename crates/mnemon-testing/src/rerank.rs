use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use mnemon_store::{Error, RerankDoc, Reranker, Result};
use mnemon_types::RerankTier;
use parking_lot::Mutex;

/// Reranker double with scripted per-document scores.
///
/// Unknown documents get 0.5; a failure flag covers the
/// rerank-failure-returns-fused-list path.
pub struct ScriptedReranker {
    tier: RerankTier,
    scores: Mutex<HashMap<String, f64>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedReranker {
    pub fn new(tier: RerankTier) -> Self {
        Self {
            tier,
            scores: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_scores(tier: RerankTier, scores: HashMap<String, f64>) -> Self {
        let reranker = Self::new(tier);
        *reranker.scores.lock() = scores;
        reranker
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn score(&self, id: impl Into<String>, score: f64) {
        self.scores.lock().insert(id.into(), score);
    }
}

#[async_trait]
impl Reranker for ScriptedReranker {
    fn tier(&self) -> RerankTier {
        self.tier
    }

    async fn rerank(&self, _query: &str, docs: &[RerankDoc]) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transient("reranker timeout".to_string()));
        }
        let scores = self.scores.lock();
        Ok(docs
            .iter()
            .map(|doc| scores.get(&doc.id).copied().unwrap_or(0.5))
            .collect())
    }
}
