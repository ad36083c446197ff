mod engine;
mod features;
mod fusion;
mod memory;
mod rerank;
mod temporal;

pub use engine::{QueryExpander, RetrievalDeps, RetrievalEngine, SearchConfig, SearchOutcome};
pub use features::{extract_features, QueryFeatures};
pub use fusion::{
    fuse_rrf, normalize_scores, FusedCandidate, FusionModel, FusionWeights, FALLBACK_WEIGHTS,
    K_DENSE, K_SPARSE_FOCUSED, K_SPARSE_WIDE,
};
pub use rerank::{ListwiseLlm, LlmReranker, RerankerSet};
pub use temporal::parse_temporal;

// The retrieval layer reuses the backend error taxonomy directly; its
// own failures are validation or backend failures, nothing else.
pub use mnemon_store::{Error, Result};
