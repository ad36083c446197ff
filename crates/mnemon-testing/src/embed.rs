use async_trait::async_trait;
use mnemon_store::{Embedder, Result, SparseVector};
use sha2::{Digest, Sha256};

const DENSE_DIM: usize = 32;
const SPARSE_VOCAB: u32 = 30_000;

/// Deterministic hashing embedder.
///
/// Tokens hash into fixed positions, so equal texts embed equally and
/// token overlap produces similarity. Enough signal for retrieval
/// tests without model inference.
pub struct HashingEmbedder {
    colbert: bool,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self { colbert: false }
    }

    pub fn with_colbert() -> Self {
        Self { colbert: true }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.to_lowercase().as_bytes());
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn dense_of(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DENSE_DIM];
    for token in tokens(text) {
        let h = token_hash(&token);
        let index = (h % DENSE_DIM as u64) as usize;
        let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn sparse_of(text: &str) -> SparseVector {
    let mut counts: std::collections::BTreeMap<u32, f32> = std::collections::BTreeMap::new();
    for token in tokens(text) {
        let index = (token_hash(&token) % SPARSE_VOCAB as u64) as u32;
        *counts.entry(index).or_insert(0.0) += 1.0;
    }
    SparseVector {
        indices: counts.keys().copied().collect(),
        values: counts.values().copied().collect(),
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_dense(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| dense_of(t)).collect())
    }

    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        Ok(texts.iter().map(|t| sparse_of(t)).collect())
    }

    async fn embed_colbert(&self, texts: &[String]) -> Result<Option<Vec<Vec<Vec<f32>>>>> {
        if !self.colbert {
            return Ok(None);
        }
        Ok(Some(
            texts
                .iter()
                .map(|text| tokens(text).iter().map(|t| dense_of(t)).collect())
                .collect(),
        ))
    }
}
