use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemon_store::{Error, GraphStore, Result};
use mnemon_types::{
    max_sentinel, Bitemporal, EdgeKind, EdgeRecord, NodeRecord, NodeRow, TemporalRef,
};
use parking_lot::Mutex;
use serde_json::Value;

/// No tt means current knowledge (the open row); a tt is a point
/// query on the transaction axis.
fn tt_selects(bitemporal: &Bitemporal, tt: Option<DateTime<Utc>>) -> bool {
    match tt {
        None => bitemporal.is_current(),
        Some(tt) => bitemporal.tt_start <= tt && tt < bitemporal.tt_end,
    }
}

struct StoredRow {
    row_id: i64,
    node: NodeRecord,
}

struct GraphData {
    rows: Vec<StoredRow>,
    edges: Vec<EdgeRecord>,
    hashes: HashSet<(String, String)>,
    next_row_id: i64,
}

/// In-memory graph store double with the same bitemporal semantics as
/// the embedded store, plus failure injection and query recording.
pub struct MockGraphStore {
    data: Mutex<GraphData>,
    unavailable: AtomicBool,
    queries: Mutex<Vec<(String, Value)>>,
    query_response: Mutex<Vec<Value>>,
}

impl MockGraphStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(GraphData {
                rows: Vec::new(),
                edges: Vec::new(),
                hashes: HashSet::new(),
                next_row_id: 1,
            }),
            unavailable: AtomicBool::new(false),
            queries: Mutex::new(Vec::new()),
            query_response: Mutex::new(Vec::new()),
        }
    }

    /// Make every operation fail with `Error::Unavailable`.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Raw queries recorded through `query()`.
    pub fn recorded_queries(&self) -> Vec<(String, Value)> {
        self.queries.lock().clone()
    }

    /// Script the rows the next `query()` calls return.
    pub fn set_query_response(&self, rows: Vec<Value>) {
        *self.query_response.lock() = rows;
    }

    /// All current (open) nodes, for assertions.
    pub fn current_nodes(&self) -> Vec<NodeRecord> {
        let data = self.data.lock();
        data.rows
            .iter()
            .filter(|r| r.node.bitemporal.is_current())
            .map(|r| r.node.clone())
            .collect()
    }

    /// All edges, for assertions.
    pub fn all_edges(&self) -> Vec<EdgeRecord> {
        self.data.lock().edges.clone()
    }

    /// Total physical rows (current + closed).
    pub fn row_count(&self) -> usize {
        self.data.lock().rows.len()
    }

    fn check_up(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::Unavailable("mock graph store down".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MockGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MockGraphStore {
    async fn insert_node(&self, node: &NodeRecord) -> Result<()> {
        self.check_up()?;
        let mut data = self.data.lock();
        let row_id = data.next_row_id;
        data.next_row_id += 1;
        data.rows.push(StoredRow {
            row_id,
            node: node.clone(),
        });
        Ok(())
    }

    async fn amend_node(
        &self,
        id: &str,
        properties: Value,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord> {
        self.check_up()?;
        let mut data = self.data.lock();

        let current = data
            .rows
            .iter_mut()
            .find(|r| r.node.id == id && r.node.bitemporal.is_current())
            .ok_or_else(|| Error::Contract(format!("no current row for node {}", id)))?;

        current.node.bitemporal.tt_end = now;

        let mut merged = current.node.properties.clone();
        if let (Value::Object(target), Value::Object(source)) = (&mut merged, &properties) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        } else if !properties.is_null() {
            merged = properties;
        }

        let successor = NodeRecord {
            id: current.node.id.clone(),
            labels: current.node.labels.clone(),
            properties: merged,
            session_id: current.node.session_id.clone(),
            bitemporal: {
                let mut bt = current.node.bitemporal;
                bt.tt_start = now;
                bt.tt_end = max_sentinel();
                bt
            },
        };

        let row_id = data.next_row_id;
        data.next_row_id += 1;
        data.rows.push(StoredRow {
            row_id,
            node: successor.clone(),
        });
        Ok(successor)
    }

    async fn get_node(&self, id: &str, at: TemporalRef) -> Result<Option<NodeRecord>> {
        self.check_up()?;
        let data = self.data.lock();

        Ok(data
            .rows
            .iter()
            .find(|r| {
                r.node.id == id
                    && tt_selects(&r.node.bitemporal, at.tt)
                    && at.vt.map_or(true, |vt| {
                        r.node.bitemporal.vt_start <= vt && vt < r.node.bitemporal.vt_end
                    })
            })
            .map(|r| r.node.clone()))
    }

    async fn insert_edge(&self, edge: &EdgeRecord) -> Result<()> {
        self.check_up()?;
        let mut data = self.data.lock();
        let exists = data
            .edges
            .iter()
            .any(|e| e.kind == edge.kind && e.from == edge.from && e.to == edge.to);
        if !exists {
            data.edges.push(edge.clone());
        }
        Ok(())
    }

    async fn edges_from(&self, id: &str, kind: EdgeKind) -> Result<Vec<EdgeRecord>> {
        self.check_up()?;
        let data = self.data.lock();
        Ok(data
            .edges
            .iter()
            .filter(|e| e.from == id && e.kind == kind)
            .cloned()
            .collect())
    }

    async fn edges_to(&self, id: &str, kind: EdgeKind) -> Result<Vec<EdgeRecord>> {
        self.check_up()?;
        let data = self.data.lock();
        Ok(data
            .edges
            .iter()
            .filter(|e| e.to == id && e.kind == kind)
            .cloned()
            .collect())
    }

    async fn session_nodes(
        &self,
        session_id: &str,
        label: Option<&str>,
        at: TemporalRef,
    ) -> Result<Vec<NodeRecord>> {
        self.check_up()?;
        let data = self.data.lock();

        let mut nodes: Vec<NodeRecord> = data
            .rows
            .iter()
            .filter(|r| {
                r.node.session_id.as_deref() == Some(session_id)
                    && tt_selects(&r.node.bitemporal, at.tt)
                    && at.vt.map_or(true, |vt| {
                        r.node.bitemporal.vt_start <= vt && vt < r.node.bitemporal.vt_end
                    })
                    && label.map_or(true, |l| r.node.has_label(l))
            })
            .map(|r| r.node.clone())
            .collect();
        nodes.sort_by(|a, b| {
            a.bitemporal
                .vt_start
                .cmp(&b.bitemporal.vt_start)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(nodes)
    }

    async fn record_content_hash(&self, session_id: &str, hash: u64) -> Result<bool> {
        self.check_up()?;
        let mut data = self.data.lock();
        Ok(data.hashes.insert((session_id.to_string(), hash.to_string())))
    }

    async fn find_live_memory(&self, session_id: &str, hash: u64) -> Result<Option<NodeRecord>> {
        self.check_up()?;
        let data = self.data.lock();
        Ok(data
            .rows
            .iter()
            .find(|r| {
                r.node.bitemporal.is_current()
                    && r.node.session_id.as_deref() == Some(session_id)
                    && r.node.has_label("Memory")
                    && r.node.prop_u64("content_hash") == Some(hash)
            })
            .map(|r| r.node.clone()))
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<NodeRecord>> {
        self.check_up()?;
        let data = self.data.lock();
        let needle = query.to_lowercase();
        Ok(data
            .rows
            .iter()
            .filter(|r| {
                r.node.bitemporal.is_current()
                    && r.node.properties.to_string().to_lowercase().contains(&needle)
            })
            .take(limit)
            .map(|r| r.node.clone())
            .collect())
    }

    async fn query(&self, query: &str, params: Value) -> Result<Vec<Value>> {
        self.check_up()?;
        self.queries.lock().push((query.to_string(), params));
        Ok(self.query_response.lock().clone())
    }

    async fn expired_rows(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<NodeRow>> {
        self.check_up()?;
        let data = self.data.lock();
        Ok(data
            .rows
            .iter()
            .filter(|r| r.node.bitemporal.tt_end < cutoff)
            .take(limit)
            .map(|r| NodeRow {
                row_id: r.row_id,
                node: r.node.clone(),
            })
            .collect())
    }

    async fn remove_rows(&self, row_ids: &[i64]) -> Result<usize> {
        self.check_up()?;
        let mut data = self.data.lock();
        let before = data.rows.len();
        data.rows.retain(|r| !row_ids.contains(&r.row_id));
        Ok(before - data.rows.len())
    }
}
