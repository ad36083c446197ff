//! User-addressable memory operations on top of the retrieval engine:
//! remember / recall / get_context and point-in-time reads.

use chrono::Utc;
use mnemon_dedup::content_hash;
use mnemon_types::{
    topics, ContextDepth, MemoryKind, MemoryProps, NodeCreated, NodeLabel, NodeRecord,
    RememberOutcome, RememberRequest, SearchFilters, SearchRequest, TemporalRef,
};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::engine::{RetrievalEngine, SearchOutcome};
use crate::Result;

/// Session bucket for memories stored without a session.
const GLOBAL_SESSION: &str = "global";

impl RetrievalEngine {
    /// Store a memory unit. A live memory with the same content hash
    /// in the same session is never duplicated; the caller gets the
    /// existing id back.
    pub async fn remember(&self, request: &RememberRequest) -> Result<RememberOutcome> {
        let session = request
            .session_id
            .as_deref()
            .unwrap_or(GLOBAL_SESSION)
            .to_string();
        let hash = content_hash("memory", &request.content, None, &session);

        if let Some(existing) = self.graph().find_live_memory(&session, hash).await? {
            return Ok(RememberOutcome {
                stored: false,
                duplicate: true,
                id: existing.id,
            });
        }

        let id = Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("memory:{}:{}", session, hash).as_bytes(),
        )
        .to_string();
        let node = NodeRecord::new(
            id.clone(),
            NodeLabel::Memory,
            serde_json::to_value(MemoryProps {
                content: request.content.clone(),
                content_hash: hash,
                kind: request.kind.unwrap_or(MemoryKind::Fact),
                tags: request.tags.clone(),
                project: request.project.clone(),
            })
            .map_err(crate::Error::from)?,
            Some(session.clone()),
            Utc::now(),
        );
        self.graph().insert_node(&node).await?;
        self.graph().record_content_hash(&session, hash).await?;

        // Best-effort: the indexer picks the new memory up from the bus
        let event = NodeCreated::from_node(&node);
        if let Ok(payload) = serde_json::to_value(&event) {
            if let Err(err) = self.bus().publish(topics::NODES_CREATED, payload).await {
                warn!(memory_id = %id, error = %err, "memory publish failed");
            }
        }

        Ok(RememberOutcome {
            stored: true,
            duplicate: false,
            id,
        })
    }

    /// Amend a memory's content: the previous row is closed and a new
    /// row recorded, so point-in-time reads still see the old text.
    pub async fn revise(&self, id: &str, content: &str) -> Result<NodeRecord> {
        let current = self
            .graph()
            .get_node(id, TemporalRef::current())
            .await?
            .ok_or_else(|| crate::Error::Validation(format!("no live memory {}", id)))?;
        let session = current
            .session_id
            .clone()
            .unwrap_or_else(|| GLOBAL_SESSION.to_string());
        let hash = content_hash("memory", content, None, &session);

        let amended = self
            .graph()
            .amend_node(
                id,
                json!({"content": content, "content_hash": hash}),
                Utc::now(),
            )
            .await?;
        self.graph().record_content_hash(&session, hash).await?;
        Ok(amended)
    }

    /// Point-in-time read of a memory node.
    pub async fn memory_at(&self, id: &str, at: TemporalRef) -> Result<Option<NodeRecord>> {
        self.graph().get_node(id, at).await
    }

    /// Retrieval entry point for agents: hybrid search with the
    /// engine's abstention threshold.
    pub async fn recall(
        &self,
        query: &str,
        k: usize,
        filters: Option<SearchFilters>,
    ) -> Result<SearchOutcome> {
        let mut request = SearchRequest::new(query);
        request.limit = k;
        request.threshold = self.config().abstention_threshold;
        if let Some(filters) = filters {
            request.filters = filters;
        }
        self.search(&request).await
    }

    /// Task-scoped context: depth controls how much comes back.
    pub async fn get_context(
        &self,
        task: &str,
        filters: Option<SearchFilters>,
        depth: ContextDepth,
    ) -> Result<SearchOutcome> {
        self.recall(task, depth.k(), filters).await
    }
}
