use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::retry::{with_retry, RetryPolicy};
use crate::traits::{RerankDoc, Reranker};
use crate::{Error, Result};
use mnemon_types::RerankTier;

/// Cross-encoder service configuration. One client per tier; the
/// accurate and code tiers point at different models of the same API.
#[derive(Debug, Clone)]
pub struct CrossEncoderConfig {
    pub base_url: String,
    pub tier: RerankTier,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl CrossEncoderConfig {
    pub fn new(base_url: impl Into<String>, tier: RerankTier) -> Self {
        Self {
            base_url: base_url.into(),
            tier,
            api_key: None,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RerankRow {
    index: usize,
    score: f64,
}

/// REST client for a cross-encoder reranking service.
///
/// Scores come back per (query, text) pair and are min-max normalized
/// into [0, 1] before they leave this client.
pub struct CrossEncoderClient {
    http: reqwest::Client,
    config: CrossEncoderConfig,
}

impl CrossEncoderClient {
    pub fn new(config: CrossEncoderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl Reranker for CrossEncoderClient {
    fn tier(&self) -> RerankTier {
        self.config.tier
    }

    async fn rerank(&self, query: &str, docs: &[RerankDoc]) -> Result<Vec<f64>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/rerank", self.config.base_url.trim_end_matches('/'));
        let texts: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        let body = json!({"query": query, "texts": texts});

        let rows: Vec<RerankRow> = with_retry("rerank", &self.config.retry, || async {
            let mut rb = self.http.post(&url).json(&body);
            if let Some(key) = &self.config.api_key {
                rb = rb.bearer_auth(key);
            }
            let response = rb.send().await?;
            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Transient(format!("rerank returned {status}: {text}")));
            }
            if status.is_client_error() {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Validation(format!("rerank returned {status}: {text}")));
            }
            let rows: Vec<RerankRow> = response.json().await?;
            Ok(rows)
        })
        .await?;

        let mut scores = vec![0.0f64; docs.len()];
        for row in rows {
            if let Some(slot) = scores.get_mut(row.index) {
                *slot = row.score;
            }
        }

        // Normalize into [0, 1]
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        if range > f64::EPSILON {
            for score in &mut scores {
                *score = (*score - min) / range;
            }
        } else {
            scores.iter_mut().for_each(|s| *s = 0.5);
        }
        Ok(scores)
    }
}
