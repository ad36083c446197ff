use std::sync::Arc;
use std::time::Duration;

use mnemon_dedup::{content_hash, DedupCache, DedupKey};
use mnemon_engine::TurnAggregator;
use mnemon_providers::parse_envelope;
use mnemon_store::MessageBus;
use mnemon_types::{Delta, DeltaKind, Envelope};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Events that exhaust their aggregation retries land here.
pub const INGEST_DEAD_LETTER_TOPIC: &str = "memory.ingestion.dead_letter";

const MAX_AGGREGATE_ATTEMPTS: u32 = 3;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Worker count; envelopes partition by session hash so
    /// per-session order is preserved while sessions scale out
    pub workers: usize,
    /// Bounded depth of each worker queue (backpressure upstream)
    pub queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 256,
        }
    }
}

/// Why a submission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// No session id in headers or payload; rejected at the boundary
    MissingSession,
    /// The pipeline has shut down
    Closed,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::MissingSession => write!(f, "missing session id"),
            SubmitError::Closed => write!(f, "pipeline is shut down"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Submission handle shared with the ingestion surfaces.
#[derive(Clone)]
pub struct IngestHandle {
    senders: Arc<Vec<mpsc::Sender<Envelope>>>,
}

impl IngestHandle {
    fn partition(&self, session_id: &str) -> &mpsc::Sender<Envelope> {
        let index = mnemon_dedup::fnv1a64(session_id.as_bytes()) as usize % self.senders.len();
        &self.senders[index]
    }

    /// Route an envelope to its session's worker. Applies backpressure
    /// when the worker queue is full.
    pub async fn submit(&self, envelope: Envelope) -> Result<(), SubmitError> {
        let session_id = resolve_session(&envelope).ok_or(SubmitError::MissingSession)?;
        self.partition(&session_id)
            .send(envelope)
            .await
            .map_err(|_| SubmitError::Closed)
    }

    /// Blocking submit for non-async sources (the file watcher thread).
    pub fn submit_blocking(&self, envelope: Envelope) -> Result<(), SubmitError> {
        let session_id = resolve_session(&envelope).ok_or(SubmitError::MissingSession)?;
        self.partition(&session_id)
            .blocking_send(envelope)
            .map_err(|_| SubmitError::Closed)
    }
}

/// Session id from the envelope headers, or from the payload when the
/// transport did not label it.
pub fn resolve_session(envelope: &Envelope) -> Option<String> {
    if let Some(session) = &envelope.headers.session_id {
        return Some(session.clone());
    }
    envelope
        .payload
        .get("session_id")
        .or_else(|| envelope.payload.get("sessionId"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// The ingestion pipeline: parse, dedup, aggregate. N workers, each
/// owning a partition of the session space.
pub struct IngestPipeline {
    senders: Arc<Vec<mpsc::Sender<Envelope>>>,
    workers: Vec<JoinHandle<()>>,
}

impl IngestPipeline {
    pub fn start(
        aggregator: Arc<TurnAggregator>,
        dedup: Arc<DedupCache>,
        bus: Arc<dyn MessageBus>,
        config: PipelineConfig,
    ) -> Self {
        let workers_count = config.workers.max(1);
        let mut senders = Vec::with_capacity(workers_count);
        let mut workers = Vec::with_capacity(workers_count);

        for worker_id in 0..workers_count {
            let (tx, rx) = mpsc::channel(config.queue_depth);
            senders.push(tx);
            let aggregator = aggregator.clone();
            let dedup = dedup.clone();
            let bus = bus.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, aggregator, dedup, bus).await;
            }));
        }

        info!(workers = workers_count, "ingest pipeline started");
        Self {
            senders: Arc::new(senders),
            workers,
        }
    }

    pub fn handle(&self) -> IngestHandle {
        IngestHandle {
            senders: self.senders.clone(),
        }
    }

    /// Drop intake and drain the workers.
    pub async fn shutdown(self) {
        drop(self.senders);
        for worker in self.workers {
            let _ = worker.await;
        }
        info!("ingest pipeline drained");
    }
}

async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<Envelope>,
    aggregator: Arc<TurnAggregator>,
    dedup: Arc<DedupCache>,
    bus: Arc<dyn MessageBus>,
) {
    while let Some(envelope) = rx.recv().await {
        let Some(session_id) = resolve_session(&envelope) else {
            warn!(event_id = %envelope.event_id, "envelope without session id dropped");
            continue;
        };

        let deltas = parse_envelope(&envelope);
        if deltas.is_empty() {
            continue;
        }

        let source = envelope.source();
        let kept: Vec<Delta> = deltas
            .into_iter()
            .filter(|delta| match dedup_inputs(delta) {
                Some((event_type, content, tool_name)) => {
                    let key = DedupKey {
                        session_id: session_id.clone(),
                        content_hash: content_hash(
                            event_type,
                            &content,
                            tool_name.as_deref(),
                            &session_id,
                        ),
                        source,
                    };
                    dedup.should_ingest(&key)
                }
                // usage / stop deltas carry no content to collapse on
                None => true,
            })
            .collect();

        if kept.is_empty() {
            debug!(worker_id, session_id = %session_id, "all deltas deduplicated");
            continue;
        }

        let mut attempt = 0;
        loop {
            match aggregator.process(&session_id, &envelope, &kept).await {
                Ok(_) => {
                    // Sync the in-process filter with the durable dedup
                    for delta in &kept {
                        if let Some((event_type, content, tool_name)) = dedup_inputs(delta) {
                            let hash = content_hash(
                                event_type,
                                &content,
                                tool_name.as_deref(),
                                &session_id,
                            );
                            dedup.mark_seen(&session_id, hash, source);
                        }
                    }
                    break;
                }
                Err(err) if err.is_transient() && attempt + 1 < MAX_AGGREGATE_ATTEMPTS => {
                    attempt += 1;
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                    warn!(
                        session_id = %session_id,
                        attempt,
                        error = %err,
                        "aggregation failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    error!(
                        session_id = %session_id,
                        event_id = %envelope.event_id,
                        error = %err,
                        "event dead-lettered"
                    );
                    let payload = json!({
                        "event_id": envelope.event_id,
                        "session_id": session_id,
                        "provider": envelope.provider.as_str(),
                        "error": err.to_string(),
                    });
                    if let Err(publish_err) =
                        bus.publish(INGEST_DEAD_LETTER_TOPIC, payload).await
                    {
                        warn!(error = %publish_err, "dead-letter publish failed");
                    }
                    break;
                }
            }
        }
    }
    debug!(worker_id, "pipeline worker exited");
}

/// Dedup hash inputs for a delta; None means the delta is never
/// deduplicated.
fn dedup_inputs(delta: &Delta) -> Option<(&'static str, String, Option<String>)> {
    match delta.kind {
        DeltaKind::Content => Some((
            "content",
            delta.content.clone().unwrap_or_default(),
            None,
        )),
        DeltaKind::ToolCall => delta
            .tool_call
            .as_ref()
            .map(|call| ("tool_call", call.args.to_string(), Some(call.name.clone()))),
        DeltaKind::ToolResult => delta
            .tool_result
            .as_ref()
            .map(|result| ("tool_result", result.content.clone(), None)),
        DeltaKind::Usage | DeltaKind::Stop => None,
    }
}
