use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mnemon_store::{
    with_retry, Embedder, MessageBus, Result, RetryPolicy, VectorStore, VectorUpsert,
};
use mnemon_types::{topics, ConsumerStatus, ConsumerStatusEvent, NodeCreated};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::document::{document_for, Document};

/// Batches that exhaust their retries land here, one message per
/// document, and the consumer advances.
pub const DEAD_LETTER_TOPIC: &str = "memory.indexing.dead_letter";

/// Indexer configuration
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub group: String,
    pub service: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_queue_size: usize,
    pub heartbeat_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            group: "hybrid-indexer".to_string(),
            service: "mnemon-index".to_string(),
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            max_queue_size: 1000,
            heartbeat_interval: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Hybrid indexer: durable consumer on `memory.nodes.created`,
/// embedding fan-out, single multi-vector upsert per batch.
///
/// One logical task; backpressure is structural: the consumer stops
/// receiving while a full queue is flushing, so `max_queue_size`
/// bounds in-flight documents.
pub struct HybridIndexer {
    bus: Arc<dyn MessageBus>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: IndexerConfig,
}

struct Pending {
    doc: Document,
    offset: u64,
}

impl HybridIndexer {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            bus,
            vector,
            embedder,
            config,
        }
    }

    /// Consume until the bus closes or shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut consumer = self
            .bus
            .subscribe(topics::NODES_CREATED, &self.config.group)
            .await?;
        self.publish_status(ConsumerStatus::ConsumerReady).await;

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        heartbeat.tick().await; // immediate first tick

        let mut flush_tick = tokio::time::interval(self.config.flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        flush_tick.tick().await;

        let mut batch: Vec<Pending> = Vec::new();
        // Highest offset observed, including skipped-label messages
        let mut seen_offset: Option<u64> = None;

        loop {
            tokio::select! {
                msg = consumer.recv() => {
                    let Some(msg) = msg else {
                        self.flush(&mut consumer, &mut batch, &mut seen_offset).await;
                        break;
                    };
                    seen_offset = Some(msg.offset);
                    match serde_json::from_value::<NodeCreated>(msg.payload.clone()) {
                        Ok(event) => {
                            if let Some(doc) = document_for(&event) {
                                debug!(id = %doc.id, "queued for indexing");
                                batch.push(Pending { doc, offset: msg.offset });
                            }
                        }
                        Err(err) => {
                            // Malformed payload: drop and advance
                            warn!(offset = msg.offset, error = %err, "malformed node-created event");
                        }
                    }
                    if batch.len() >= self.config.batch_size
                        || batch.len() >= self.config.max_queue_size
                    {
                        self.flush(&mut consumer, &mut batch, &mut seen_offset).await;
                    }
                }
                _ = flush_tick.tick() => {
                    self.flush(&mut consumer, &mut batch, &mut seen_offset).await;
                }
                _ = heartbeat.tick() => {
                    self.publish_status(ConsumerStatus::ConsumerHeartbeat).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.flush(&mut consumer, &mut batch, &mut seen_offset).await;
                        break;
                    }
                }
            }
        }

        self.publish_status(ConsumerStatus::ConsumerDisconnected).await;
        Ok(())
    }

    /// Flush the queued batch: embed, upsert once, commit. A batch
    /// that exhausts its retries is dead-lettered and committed so the
    /// consumer advances.
    async fn flush(
        &self,
        consumer: &mut Box<dyn mnemon_store::BusConsumer>,
        batch: &mut Vec<Pending>,
        seen_offset: &mut Option<u64>,
    ) {
        if batch.is_empty() {
            // Nothing queued, but skipped messages still advance
            if let Some(offset) = seen_offset.take() {
                if let Err(err) = consumer.commit(offset).await {
                    warn!(error = %err, "offset commit failed");
                }
            }
            return;
        }

        let pending = std::mem::take(batch);
        let docs: Vec<&Document> = pending.iter().map(|p| &p.doc).collect();
        let commit_offset = seen_offset
            .take()
            .unwrap_or_else(|| pending.last().map(|p| p.offset).unwrap_or(0));

        let result = with_retry("index flush", &self.config.retry, || {
            let docs = docs.clone();
            async move { self.upsert_batch(&docs).await }
        })
        .await;

        match result {
            Ok(count) => {
                info!(count, "indexed batch");
            }
            Err(err) => {
                error!(error = %err, count = pending.len(), "batch dead-lettered");
                for p in &pending {
                    let payload = json!({
                        "id": p.doc.id,
                        "content": p.doc.content,
                        "metadata": p.doc.metadata,
                        "error": err.to_string(),
                        "ts": Utc::now(),
                    });
                    if let Err(publish_err) = self.bus.publish(DEAD_LETTER_TOPIC, payload).await {
                        warn!(error = %publish_err, "dead-letter publish failed");
                    }
                }
            }
        }

        if let Err(err) = consumer.commit(commit_offset).await {
            warn!(error = %err, "offset commit failed");
        }
    }

    async fn upsert_batch(&self, docs: &[&Document]) -> Result<usize> {
        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();

        let dense = self.embedder.embed_dense(&texts).await?;
        let sparse = self.embedder.embed_sparse(&texts).await?;
        let colbert = self.embedder.embed_colbert(&texts).await?;

        let points: Vec<VectorUpsert> = docs
            .iter()
            .enumerate()
            .map(|(i, doc)| VectorUpsert {
                id: doc.id.clone(),
                payload: json!({
                    "content": doc.content,
                    "metadata": doc.metadata,
                    "session_id": doc.metadata.get("session_id").cloned().unwrap_or_default(),
                }),
                dense: dense.get(i).cloned().unwrap_or_default(),
                sparse: sparse.get(i).cloned().unwrap_or_default(),
                colbert: colbert.as_ref().and_then(|c| c.get(i).cloned()),
            })
            .collect();

        let count = points.len();
        self.vector.upsert(points).await?;
        Ok(count)
    }

    async fn publish_status(&self, event: ConsumerStatus) {
        let status = ConsumerStatusEvent {
            event,
            group: self.config.group.clone(),
            service: self.config.service.clone(),
            ts: Utc::now(),
        };
        match serde_json::to_value(&status) {
            Ok(payload) => {
                if let Err(err) = self.bus.publish(topics::CONSUMERS_STATUS, payload).await {
                    debug!(error = %err, "consumer status publish failed");
                }
            }
            Err(err) => debug!(error = %err, "consumer status encode failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_store::MemoryBus;
    use mnemon_testing::{HashingEmbedder, MockVectorStore};
    use mnemon_types::NodeCreated;

    fn node_created(id: &str, label: &str, content: &str) -> serde_json::Value {
        serde_json::to_value(NodeCreated {
            id: id.to_string(),
            labels: vec![label.to_string()],
            properties: json!({"content": content}),
            session_id: Some("s-1".to_string()),
            created_at: Utc::now(),
        })
        .unwrap()
    }

    fn config(batch_size: usize, flush_ms: u64) -> IndexerConfig {
        IndexerConfig {
            batch_size,
            flush_interval: Duration::from_millis(flush_ms),
            heartbeat_interval: Duration::from_millis(20),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                multiplier: 2.0,
                max_backoff: Duration::from_millis(5),
                jitter: false,
            },
            ..Default::default()
        }
    }

    struct Harness {
        bus: MemoryBus,
        vector: Arc<MockVectorStore>,
        shutdown: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<()>,
    }

    async fn start(config: IndexerConfig) -> Harness {
        let bus = MemoryBus::new();
        let vector = Arc::new(MockVectorStore::new());
        let indexer = HybridIndexer::new(
            Arc::new(bus.clone()),
            vector.clone(),
            Arc::new(HashingEmbedder::new()),
            config,
        );
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            indexer.run(rx).await.unwrap();
        });
        // Give the consumer a beat to subscribe and publish ready
        tokio::time::sleep(Duration::from_millis(10)).await;
        Harness {
            bus,
            vector,
            shutdown,
            handle,
        }
    }

    #[tokio::test]
    async fn test_batch_size_triggers_flush() {
        let harness = start(config(2, 10_000)).await;

        for i in 0..2 {
            harness
                .bus
                .publish(topics::NODES_CREATED, node_created(&format!("n-{i}"), "Memory", "text"))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.vector.point_count(), 2);

        harness.shutdown.send(true).unwrap();
        harness.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_interval_flush_and_label_filter() {
        let harness = start(config(100, 30)).await;

        harness
            .bus
            .publish(topics::NODES_CREATED, node_created("n-1", "Reasoning", "thinking"))
            .await
            .unwrap();
        harness
            .bus
            .publish(topics::NODES_CREATED, node_created("n-2", "Session", "ignored"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(harness.vector.point_count(), 1);
        assert!(harness.vector.point("n-1").is_some());

        harness.shutdown.send(true).unwrap();
        harness.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_carries_all_vector_spaces() {
        let harness = start(config(1, 10_000)).await;

        harness
            .bus
            .publish(
                topics::NODES_CREATED,
                node_created("n-1", "Memory", "retry backoff policy"),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let point = harness.vector.point("n-1").unwrap();
        assert!(!point.dense.is_empty());
        assert!(!point.sparse.indices.is_empty());
        assert_eq!(point.payload["content"], "retry backoff policy");

        harness.shutdown.send(true).unwrap();
        harness.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_dead_letter_advances_consumer() {
        let harness = start(config(1, 10_000)).await;
        harness.vector.set_down(true);

        harness
            .bus
            .publish(topics::NODES_CREATED, node_created("n-bad", "Memory", "doomed"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        // The batch landed in the dead-letter topic
        assert_eq!(harness.bus.topic_len(DEAD_LETTER_TOPIC), 1);

        // And the consumer keeps going once the store recovers
        harness.vector.set_down(false);
        harness
            .bus
            .publish(topics::NODES_CREATED, node_created("n-good", "Memory", "alive"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(harness.vector.point("n-good").is_some());
        assert!(harness.vector.point("n-bad").is_none());

        harness.shutdown.send(true).unwrap();
        harness.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_liveness_events() {
        let harness = start(config(10, 10_000)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        harness.shutdown.send(true).unwrap();
        harness.handle.await.unwrap();

        let mut status = harness
            .bus
            .subscribe(topics::CONSUMERS_STATUS, "test-observer")
            .await
            .unwrap();

        let first: ConsumerStatusEvent =
            serde_json::from_value(status.recv().await.unwrap().payload).unwrap();
        assert_eq!(first.event, ConsumerStatus::ConsumerReady);
        assert_eq!(first.group, "hybrid-indexer");

        // Heartbeats in between, disconnect at the end
        let mut events = vec![first.event];
        harness.bus.shutdown();
        while let Some(msg) = status.recv().await {
            let event: ConsumerStatusEvent = serde_json::from_value(msg.payload).unwrap();
            events.push(event.event);
        }
        assert!(events.contains(&ConsumerStatus::ConsumerHeartbeat));
        assert_eq!(*events.last().unwrap(), ConsumerStatus::ConsumerDisconnected);
    }
}
