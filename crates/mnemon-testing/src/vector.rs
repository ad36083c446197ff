use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mnemon_store::{Error, Result, ScoredPoint, SparseVector, VectorStore, VectorUpsert};
use parking_lot::Mutex;
use serde_json::Value;

/// In-memory vector store double.
///
/// Searches score against the stored vectors (cosine for dense, dot
/// product for sparse), so ordering behaves like the real thing;
/// scripted results and failure flags cover the degraded paths.
pub struct MockVectorStore {
    points: Mutex<HashMap<String, VectorUpsert>>,
    dense_down: AtomicBool,
    sparse_down: AtomicBool,
    scripted_dense: Mutex<Option<Vec<ScoredPoint>>>,
    scripted_sparse: Mutex<Option<Vec<ScoredPoint>>>,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self {
            points: Mutex::new(HashMap::new()),
            dense_down: AtomicBool::new(false),
            sparse_down: AtomicBool::new(false),
            scripted_dense: Mutex::new(None),
            scripted_sparse: Mutex::new(None),
        }
    }

    pub fn set_dense_down(&self, down: bool) {
        self.dense_down.store(down, Ordering::SeqCst);
    }

    pub fn set_sparse_down(&self, down: bool) {
        self.sparse_down.store(down, Ordering::SeqCst);
    }

    /// Take the whole store down.
    pub fn set_down(&self, down: bool) {
        self.set_dense_down(down);
        self.set_sparse_down(down);
    }

    pub fn script_dense(&self, hits: Vec<ScoredPoint>) {
        *self.scripted_dense.lock() = Some(hits);
    }

    pub fn script_sparse(&self, hits: Vec<ScoredPoint>) {
        *self.scripted_sparse.lock() = Some(hits);
    }

    pub fn point_count(&self) -> usize {
        self.points.lock().len()
    }

    pub fn point(&self, id: &str) -> Option<VectorUpsert> {
        self.points.lock().get(id).cloned()
    }

    fn matches_filter(payload: &Value, filter: &Value) -> bool {
        // Minimal filter semantics: every top-level key in the filter
        // must equal the payload's value
        match filter {
            Value::Object(map) if !map.is_empty() => map
                .iter()
                .all(|(key, expected)| payload.get(key) == Some(expected)),
            _ => true,
        }
    }
}

impl Default for MockVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

fn sparse_dot(a: &SparseVector, b: &SparseVector) -> f64 {
    let mut score = 0.0f64;
    for (i, &index) in a.indices.iter().enumerate() {
        if let Some(j) = b.indices.iter().position(|&bi| bi == index) {
            score += (a.values[i] * b.values[j]) as f64;
        }
    }
    score
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn upsert(&self, points: Vec<VectorUpsert>) -> Result<()> {
        if self.dense_down.load(Ordering::SeqCst) && self.sparse_down.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("mock vector store down".to_string()));
        }
        let mut map = self.points.lock();
        for point in points {
            map.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search_dense(
        &self,
        vector: &[f32],
        k: usize,
        filter: &Value,
    ) -> Result<Vec<ScoredPoint>> {
        if self.dense_down.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("dense retriever down".to_string()));
        }
        if let Some(hits) = self.scripted_dense.lock().clone() {
            return Ok(hits.into_iter().take(k).collect());
        }

        let map = self.points.lock();
        let mut hits: Vec<ScoredPoint> = map
            .values()
            .filter(|p| Self::matches_filter(&p.payload, filter))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine(vector, &p.dense),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn search_sparse(
        &self,
        vector: &SparseVector,
        k: usize,
        filter: &Value,
    ) -> Result<Vec<ScoredPoint>> {
        if self.sparse_down.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("sparse retriever down".to_string()));
        }
        if let Some(hits) = self.scripted_sparse.lock().clone() {
            return Ok(hits.into_iter().take(k).collect());
        }

        let map = self.points.lock();
        let mut hits: Vec<ScoredPoint> = map
            .values()
            .filter(|p| Self::matches_filter(&p.payload, filter))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: sparse_dot(vector, &p.sparse),
                payload: p.payload.clone(),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
