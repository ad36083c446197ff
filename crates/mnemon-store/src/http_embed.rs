use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::retry::{with_retry, RetryPolicy};
use crate::traits::{Embedder, SparseVector};
use crate::{Error, Result};

/// Embedding service configuration
#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub base_url: String,
    /// Dense model name (e5-small/base/large, gte, bge)
    pub dense_model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Request ColBERT multi-vectors from the service
    pub colbert: bool,
}

impl HttpEmbedderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            dense_model: "e5-base".to_string(),
            api_key: None,
            timeout: Duration::from_secs(3),
            retry: RetryPolicy::default(),
            colbert: false,
        }
    }
}

/// REST client for an embedding inference service exposing dense,
/// sparse (SPLADE) and optional ColBERT endpoints.
pub struct HttpEmbedder {
    http: reqwest::Client,
    config: HttpEmbedderConfig,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(Self { http, config })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        with_retry(path, &self.config.retry, || async {
            let mut rb = self.http.post(&url).json(&body);
            if let Some(key) = &self.config.api_key {
                rb = rb.bearer_auth(key);
            }
            let response = rb.send().await?;
            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Transient(format!("{path} returned {status}: {text}")));
            }
            if status.is_client_error() {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Validation(format!("{path} returned {status}: {text}")));
            }
            Ok(response.json().await?)
        })
        .await
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_dense(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({"inputs": texts, "model": self.config.dense_model});
        let response = self.post("/embed", body).await?;
        serde_json::from_value(response)
            .map_err(|e| Error::Contract(format!("bad dense embedding response: {e}")))
    }

    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        let body = json!({"inputs": texts});
        let response = self.post("/embed_sparse", body).await?;
        serde_json::from_value(response)
            .map_err(|e| Error::Contract(format!("bad sparse embedding response: {e}")))
    }

    async fn embed_colbert(&self, texts: &[String]) -> Result<Option<Vec<Vec<Vec<f32>>>>> {
        if !self.config.colbert {
            return Ok(None);
        }
        let body = json!({"inputs": texts});
        let response = self.post("/embed_all", body).await?;
        let vectors = serde_json::from_value(response)
            .map_err(|e| Error::Contract(format!("bad colbert embedding response: {e}")))?;
        Ok(Some(vectors))
    }
}
