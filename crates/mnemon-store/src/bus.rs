use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::{Error, Result};

/// One message on a topic, with its consumer-group offset.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub offset: u64,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

/// Consumer handle for one (topic, group).
///
/// `recv` delivers from the group's committed offset onward; a consumer
/// that drops without committing sees the same messages again on
/// resubscribe, so a batch-failure retry never loses work, and a commit
/// guarantees no redelivery of finished work.
#[async_trait]
pub trait BusConsumer: Send {
    /// Next message, waiting if none is available. None = bus closed.
    async fn recv(&mut self) -> Option<BusMessage>;

    /// Advance the group's committed offset past `offset`.
    async fn commit(&mut self, offset: u64) -> Result<()>;
}

/// Message bus seam. One abstract interface; no broker specifics leak
/// into component code.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn BusConsumer>>;
}

// --- In-memory implementation ---

struct TopicState {
    messages: Vec<Arc<BusMessage>>,
    groups: HashMap<String, u64>,
    len_tx: watch::Sender<u64>,
    len_rx: watch::Receiver<u64>,
}

impl TopicState {
    fn new() -> Self {
        let (len_tx, len_rx) = watch::channel(0);
        Self {
            messages: Vec::new(),
            groups: HashMap::new(),
            len_tx,
            len_rx,
        }
    }
}

struct BusInner {
    topics: HashMap<String, TopicState>,
    closed: bool,
}

/// Bounded-channel in-memory bus with consumer-group offsets.
///
/// The in-process default for single-node deployments and the reference
/// for bus semantics in tests. Messages are retained for the lifetime
/// of the process.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Mutex<BusInner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                topics: HashMap::new(),
                closed: false,
            })),
        }
    }

    /// Close the bus: consumers drain what is buffered, then see None.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        for topic in inner.topics.values() {
            let len = topic.messages.len() as u64;
            let _ = topic.len_tx.send(len);
        }
    }

    /// Number of messages ever published to a topic (tests, diagnostics)
    pub fn topic_len(&self, topic: &str) -> usize {
        let inner = self.inner.lock();
        inner.topics.get(topic).map_or(0, |t| t.messages.len())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Unavailable("bus is shut down".to_string()));
        }
        let state = inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(TopicState::new);
        let offset = state.messages.len() as u64;
        state.messages.push(Arc::new(BusMessage {
            topic: topic.to_string(),
            offset,
            payload,
            published_at: Utc::now(),
        }));
        let len = state.messages.len() as u64;
        let _ = state.len_tx.send(len);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn BusConsumer>> {
        let mut inner = self.inner.lock();
        let state = inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(TopicState::new);
        let committed = *state.groups.entry(group.to_string()).or_insert(0);
        let len_rx = state.len_rx.clone();
        drop(inner);

        Ok(Box::new(MemoryConsumer {
            bus: self.inner.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            cursor: committed,
            len_rx,
        }))
    }
}

struct MemoryConsumer {
    bus: Arc<Mutex<BusInner>>,
    topic: String,
    group: String,
    cursor: u64,
    len_rx: watch::Receiver<u64>,
}

#[async_trait]
impl BusConsumer for MemoryConsumer {
    async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            {
                let inner = self.bus.lock();
                let state = inner.topics.get(&self.topic)?;
                if (self.cursor as usize) < state.messages.len() {
                    let msg = state.messages[self.cursor as usize].clone();
                    self.cursor += 1;
                    return Some((*msg).clone());
                }
                if inner.closed {
                    return None;
                }
            }
            if self.len_rx.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn commit(&mut self, offset: u64) -> Result<()> {
        let mut inner = self.bus.lock();
        let state = inner
            .topics
            .get_mut(&self.topic)
            .ok_or_else(|| Error::Contract(format!("unknown topic {}", self.topic)))?;
        let committed = state.groups.entry(self.group.clone()).or_insert(0);
        *committed = (*committed).max(offset + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_then_subscribe_delivers_backlog() {
        let bus = MemoryBus::new();
        bus.publish("t", json!({"n": 1})).await.unwrap();
        bus.publish("t", json!({"n": 2})).await.unwrap();

        let mut consumer = bus.subscribe("t", "g").await.unwrap();
        assert_eq!(consumer.recv().await.unwrap().payload["n"], 1);
        assert_eq!(consumer.recv().await.unwrap().payload["n"], 2);
    }

    #[tokio::test]
    async fn test_uncommitted_messages_redeliver() {
        let bus = MemoryBus::new();
        bus.publish("t", json!({"n": 1})).await.unwrap();
        bus.publish("t", json!({"n": 2})).await.unwrap();

        {
            let mut consumer = bus.subscribe("t", "g").await.unwrap();
            let first = consumer.recv().await.unwrap();
            consumer.commit(first.offset).await.unwrap();
            let _second = consumer.recv().await.unwrap();
            // second dropped without commit
        }

        let mut consumer = bus.subscribe("t", "g").await.unwrap();
        assert_eq!(consumer.recv().await.unwrap().payload["n"], 2);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let bus = MemoryBus::new();
        bus.publish("t", json!({"n": 1})).await.unwrap();

        let mut a = bus.subscribe("t", "indexer").await.unwrap();
        let mut b = bus.subscribe("t", "hub").await.unwrap();
        let msg = a.recv().await.unwrap();
        a.commit(msg.offset).await.unwrap();
        assert_eq!(b.recv().await.unwrap().payload["n"], 1);
    }

    #[tokio::test]
    async fn test_recv_waits_for_publish() {
        let bus = MemoryBus::new();
        let mut consumer = bus.subscribe("t", "g").await.unwrap();

        let publisher = bus.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            publisher.publish("t", json!({"late": true})).await.unwrap();
        });

        let msg = consumer.recv().await.unwrap();
        assert_eq!(msg.payload["late"], true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_ends() {
        let bus = MemoryBus::new();
        bus.publish("t", json!({"n": 1})).await.unwrap();
        let mut consumer = bus.subscribe("t", "g").await.unwrap();
        bus.shutdown();

        assert!(consumer.recv().await.is_some());
        assert!(consumer.recv().await.is_none());
        assert!(bus.publish("t", json!({"n": 2})).await.is_err());
    }
}
