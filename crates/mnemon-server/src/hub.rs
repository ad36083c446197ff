use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mnemon_store::{GraphStore, MessageBus, Result};
use mnemon_types::{topics, NodeCreated, TemporalRef};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound buffer per subscriber before coalescing kicks in
    pub max_buffered: usize,
    /// Last-N ring for log/metric snapshots
    pub snapshot_ring: usize,
    pub heartbeat_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_buffered: 64,
            snapshot_ring: 100,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Subscription topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Logs { service: Option<String> },
    Metrics,
    Session { id: String },
}

struct Subscriber {
    topic: Topic,
    tx: mpsc::Sender<Value>,
    /// Newest update that did not fit; last writer wins
    pending: Option<Value>,
    /// Updates were coalesced; the next delivered message is marked
    degraded: bool,
}

struct HubInner {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    logs: Mutex<VecDeque<Value>>,
    metrics: Mutex<VecDeque<Value>>,
    config: HubConfig,
}

/// Fan-out hub: bridges `memory.nodes.created` to subscribed
/// WebSocket sessions and keeps the log/metric snapshot rings.
#[derive(Clone)]
pub struct FanoutHub {
    inner: Arc<HubInner>,
    graph: Arc<dyn GraphStore>,
}

impl FanoutHub {
    pub fn new(graph: Arc<dyn GraphStore>, config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                logs: Mutex::new(VecDeque::new()),
                metrics: Mutex::new(VecDeque::new()),
                config: config.clone(),
            }),
            graph,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Bridge the bus into the hub until shutdown.
    pub async fn run(
        &self,
        bus: Arc<dyn MessageBus>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut consumer = bus.subscribe(topics::NODES_CREATED, "fanout-hub").await?;
        info!("fan-out hub attached to bus");
        loop {
            tokio::select! {
                msg = consumer.recv() => {
                    let Some(msg) = msg else { break };
                    if let Ok(event) = serde_json::from_value::<NodeCreated>(msg.payload) {
                        self.route_node_created(&event);
                    }
                    let _ = consumer.commit(msg.offset).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Register a subscriber; the caller owns the receiving end and
    /// the connection lifecycle.
    pub fn subscribe(&self, topic: Topic) -> (u64, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(self.inner.config.max_buffered);
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.lock().insert(
            id,
            Subscriber {
                topic,
                tx,
                pending: None,
                degraded: false,
            },
        );
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.subscribers.lock().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Current snapshot for a topic; what a connecting subscriber (or
    /// a polling client) sees first.
    pub async fn snapshot(&self, topic: &Topic) -> Result<Value> {
        match topic {
            Topic::Logs { service } => {
                let logs = self.inner.logs.lock();
                let lines: Vec<Value> = logs
                    .iter()
                    .filter(|line| match service {
                        Some(service) => line.get("service").and_then(|v| v.as_str())
                            == Some(service.as_str()),
                        None => true,
                    })
                    .cloned()
                    .collect();
                Ok(json!({"type": "snapshot", "logs": lines}))
            }
            Topic::Metrics => {
                let metrics = self.inner.metrics.lock();
                Ok(json!({"type": "snapshot", "metrics": metrics.iter().cloned().collect::<Vec<_>>()}))
            }
            Topic::Session { id } => {
                let nodes = self
                    .graph
                    .session_nodes(id, None, TemporalRef::current())
                    .await?;
                let mut turns: Vec<&mnemon_types::NodeRecord> =
                    nodes.iter().filter(|n| n.has_label("Turn")).collect();
                turns.sort_by_key(|t| t.prop_u64("sequence_index").unwrap_or(u64::MAX));

                Ok(json!({
                    "type": "snapshot",
                    "session_id": id,
                    "lineage": nodes,
                    "timeline": turns,
                }))
            }
        }
    }

    /// Record a log line and fan it out to log subscribers.
    pub fn publish_log(&self, service: &str, message: Value) {
        let line = json!({
            "type": "log",
            "service": service,
            "message": message,
            "ts": chrono::Utc::now(),
        });
        {
            let mut logs = self.inner.logs.lock();
            logs.push_back(line.clone());
            while logs.len() > self.inner.config.snapshot_ring {
                logs.pop_front();
            }
        }
        self.fan_out(|topic| match topic {
            Topic::Logs { service: filter } => {
                filter.as_deref().map_or(true, |f| f == service)
            }
            _ => false,
        }, line);
    }

    /// Record a metric sample and fan it out to metric subscribers.
    pub fn publish_metric(&self, sample: Value) {
        let message = json!({"type": "metric", "sample": sample, "ts": chrono::Utc::now()});
        {
            let mut metrics = self.inner.metrics.lock();
            metrics.push_back(message.clone());
            while metrics.len() > self.inner.config.snapshot_ring {
                metrics.pop_front();
            }
        }
        self.fan_out(|topic| matches!(topic, Topic::Metrics), message);
    }

    fn route_node_created(&self, event: &NodeCreated) {
        let Some(session_id) = &event.session_id else {
            return;
        };
        let message = json!({
            "type": "node_created",
            "session_id": session_id,
            "node": event,
        });
        let session_id = session_id.clone();
        self.fan_out(
            move |topic| matches!(topic, Topic::Session { id } if *id == session_id),
            message,
        );
    }

    /// Deliver to matching subscribers with per-subscriber
    /// backpressure: a full buffer coalesces updates last-writer-wins
    /// and the next delivered message carries `degraded: true`.
    fn fan_out(&self, matches: impl Fn(&Topic) -> bool, message: Value) {
        let mut subscribers = self.inner.subscribers.lock();
        for subscriber in subscribers.values_mut() {
            if !matches(&subscriber.topic) {
                continue;
            }

            // Retry whatever was coalesced first, oldest-first order
            if let Some(pending) = subscriber.pending.take() {
                match subscriber.tx.try_send(mark_degraded(pending)) {
                    Ok(()) => subscriber.degraded = false,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Still full: the new message supersedes it
                        subscriber.pending = Some(message.clone());
                        continue;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => continue,
                }
            }

            let outgoing = if subscriber.degraded {
                mark_degraded(message.clone())
            } else {
                message.clone()
            };
            match subscriber.tx.try_send(outgoing) {
                Ok(()) => subscriber.degraded = false,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("subscriber buffer full, coalescing");
                    subscriber.pending = Some(message.clone());
                    subscriber.degraded = true;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("subscriber channel closed before unsubscribe");
                }
            }
        }
    }
}

fn mark_degraded(mut message: Value) -> Value {
    if let Some(map) = message.as_object_mut() {
        map.insert("degraded".to_string(), Value::Bool(true));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mnemon_testing::MockGraphStore;
    use mnemon_types::{NodeLabel, NodeRecord};

    fn hub_with(graph: Arc<MockGraphStore>, max_buffered: usize) -> FanoutHub {
        FanoutHub::new(
            graph,
            HubConfig {
                max_buffered,
                ..Default::default()
            },
        )
    }

    fn node_created(session: &str, id: &str) -> NodeCreated {
        NodeCreated {
            id: id.to_string(),
            labels: vec!["Reasoning".to_string()],
            properties: json!({"preview": id}),
            session_id: Some(session.to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_session_routing() {
        let hub = hub_with(Arc::new(MockGraphStore::new()), 8);
        let (_, mut a) = hub.subscribe(Topic::Session { id: "s-1".into() });
        let (_, mut b) = hub.subscribe(Topic::Session { id: "s-2".into() });

        hub.route_node_created(&node_created("s-1", "n-1"));

        let msg = a.recv().await.unwrap();
        assert_eq!(msg["session_id"], "s-1");
        assert_eq!(msg["node"]["id"], "n-1");
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_backpressure_coalesces_last_writer_wins() {
        let hub = hub_with(Arc::new(MockGraphStore::new()), 1);
        let (_, mut rx) = hub.subscribe(Topic::Session { id: "s-1".into() });

        // First fills the buffer; the next two coalesce to the newest
        hub.route_node_created(&node_created("s-1", "n-1"));
        hub.route_node_created(&node_created("s-1", "n-2"));
        hub.route_node_created(&node_created("s-1", "n-3"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first["node"]["id"], "n-1");
        assert!(first.get("degraded").is_none());

        // Drain lets the coalesced message through, marked degraded
        hub.route_node_created(&node_created("s-1", "n-4"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second["node"]["id"], "n-3");
        assert_eq!(second["degraded"], true);
    }

    #[tokio::test]
    async fn test_log_snapshot_ring_and_filter() {
        let hub = hub_with(Arc::new(MockGraphStore::new()), 8);
        hub.publish_log("ingest", json!("a"));
        hub.publish_log("search", json!("b"));

        let all = hub.snapshot(&Topic::Logs { service: None }).await.unwrap();
        assert_eq!(all["logs"].as_array().unwrap().len(), 2);

        let filtered = hub
            .snapshot(&Topic::Logs {
                service: Some("search".into()),
            })
            .await
            .unwrap();
        let lines = filtered["logs"].as_array().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["message"], "b");
    }

    #[tokio::test]
    async fn test_session_snapshot_orders_timeline() {
        let graph = Arc::new(MockGraphStore::new());
        let now = Utc::now();
        for seq in [2u64, 0, 1] {
            graph
                .insert_node(&NodeRecord::new(
                    format!("t-{seq}"),
                    NodeLabel::Turn,
                    json!({"sequence_index": seq, "user_content": "q"}),
                    Some("s-1".to_string()),
                    now + chrono::Duration::seconds(seq as i64),
                ))
                .await
                .unwrap();
        }

        let hub = hub_with(graph, 8);
        let snapshot = hub
            .snapshot(&Topic::Session { id: "s-1".into() })
            .await
            .unwrap();
        let timeline = snapshot["timeline"].as_array().unwrap();
        let sequence: Vec<u64> = timeline
            .iter()
            .map(|t| t["properties"]["sequence_index"].as_u64().unwrap())
            .collect();
        assert_eq!(sequence, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = hub_with(Arc::new(MockGraphStore::new()), 8);
        let (id, mut rx) = hub.subscribe(Topic::Metrics);
        hub.publish_metric(json!({"queries": 1}));
        assert!(rx.recv().await.is_some());

        hub.unsubscribe(id);
        assert_eq!(hub.subscriber_count(), 0);
        hub.publish_metric(json!({"queries": 2}));
        assert!(rx.recv().await.is_none());
    }
}
