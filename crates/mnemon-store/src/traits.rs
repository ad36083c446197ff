use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemon_types::{EdgeKind, EdgeRecord, NodeRecord, NodeRow, RerankTier, TemporalRef};
use serde_json::Value;

use crate::Result;

// NOTE: Backend Seam Design
//
// Every external system (graph store, vector store, bus, blob store,
// embedder, reranker) hides behind one narrow trait. Components receive
// trait objects at construction and never name a concrete backend, so
// the in-memory doubles in mnemon-testing slot in without reflection
// or conditional compilation.
//
// Nodes cross these seams as records keyed by stable string ids; no
// caller holds a node reference across an I/O boundary.

/// Lineage graph backend.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert a fresh node row (open bitemporal intervals).
    async fn insert_node(&self, node: &NodeRecord) -> Result<()>;

    /// Close-and-rewrite amendment: the current row gets `tt_end = now`,
    /// a successor row is written with the merged properties and
    /// `tt_start = now`. Valid time carries over.
    async fn amend_node(
        &self,
        id: &str,
        properties: Value,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord>;

    /// Point-in-time read; `TemporalRef::current()` selects the open row.
    async fn get_node(&self, id: &str, at: TemporalRef) -> Result<Option<NodeRecord>>;

    async fn insert_edge(&self, edge: &EdgeRecord) -> Result<()>;

    async fn edges_from(&self, id: &str, kind: EdgeKind) -> Result<Vec<EdgeRecord>>;

    async fn edges_to(&self, id: &str, kind: EdgeKind) -> Result<Vec<EdgeRecord>>;

    /// Current nodes of a session, optionally filtered by label.
    async fn session_nodes(
        &self,
        session_id: &str,
        label: Option<&str>,
        at: TemporalRef,
    ) -> Result<Vec<NodeRecord>>;

    /// Durable per-session dedup: record a content hash, returning true
    /// iff it was not already present.
    async fn record_content_hash(&self, session_id: &str, hash: u64) -> Result<bool>;

    /// Live memory with this content hash in the session, if any.
    async fn find_live_memory(&self, session_id: &str, hash: u64) -> Result<Option<NodeRecord>>;

    /// Shallow keyword search over current nodes; the vector-outage
    /// fallback path.
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<NodeRecord>>;

    /// Raw read query pass-through. Callers validate with the query
    /// guard before dispatching.
    async fn query(&self, query: &str, params: Value) -> Result<Vec<Value>>;

    /// Rows whose transaction interval closed before the cutoff
    /// (pruner support).
    async fn expired_rows(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<NodeRow>>;

    async fn remove_rows(&self, row_ids: &[i64]) -> Result<usize>;
}

/// Sparse vector in index/value form (SPLADE-style activations).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

/// One document upsert carrying every named vector space at once.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VectorUpsert {
    pub id: String,
    pub payload: Value,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colbert: Option<Vec<Vec<f32>>>,
}

/// Scored hit from the vector store.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f64,
    pub payload: Value,
}

/// Vector search backend with dense and sparse named spaces.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, points: Vec<VectorUpsert>) -> Result<()>;

    async fn search_dense(
        &self,
        vector: &[f32],
        k: usize,
        filter: &Value,
    ) -> Result<Vec<ScoredPoint>>;

    async fn search_sparse(
        &self,
        vector: &SparseVector,
        k: usize,
        filter: &Value,
    ) -> Result<Vec<ScoredPoint>>;
}

/// Embedding inference backend. Process-wide singleton with internal
/// concurrency limits; callers must not assume thread-locality.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_dense(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>>;

    /// Late-interaction multi-vectors; None when the backend does not
    /// serve a ColBERT model.
    async fn embed_colbert(&self, texts: &[String]) -> Result<Option<Vec<Vec<Vec<f32>>>>>;
}

/// Candidate document handed to a reranker.
#[derive(Debug, Clone)]
pub struct RerankDoc {
    pub id: String,
    pub content: String,
}

/// Cross-encoder / listwise reranking backend.
///
/// Implementations normalize their scores into [0, 1] and return one
/// score per input document, aligned by position.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn tier(&self) -> RerankTier;

    async fn rerank(&self, query: &str, docs: &[RerankDoc]) -> Result<Vec<f64>>;
}

/// Archive sink for pruned nodes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}
