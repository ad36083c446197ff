use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::retry::{with_retry, RetryPolicy};
use crate::traits::{ScoredPoint, SparseVector, VectorStore, VectorUpsert};
use crate::{Error, Result};

/// HTTP vector store configuration
#[derive(Debug, Clone)]
pub struct HttpVectorStoreConfig {
    pub base_url: String,
    pub collection: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl HttpVectorStoreConfig {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            collection: collection.into(),
            api_key: None,
            timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

/// REST client for a named-vector store.
///
/// One client is created at startup and reused; the underlying
/// `reqwest::Client` keeps a connection pool independent from the
/// graph store's.
pub struct HttpVectorStore {
    http: reqwest::Client,
    config: HttpVectorStoreConfig,
}

impl HttpVectorStore {
    pub fn new(config: HttpVectorStoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.collection,
            path
        )
    }

    fn decorate(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => rb.header("api-key", key),
            None => rb,
        }
    }

    async fn post_json(&self, endpoint: &str, url: &str, body: Value) -> Result<Value> {
        let result = with_retry(endpoint, &self.config.retry, || async {
            let response = self
                .decorate(self.http.post(url).json(&body))
                .send()
                .await?;

            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Transient(format!("{endpoint} returned {status}: {text}")));
            }
            if status.is_client_error() {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Validation(format!("{endpoint} returned {status}: {text}")));
            }

            let body: Value = response.json().await?;
            Ok(body)
        })
        .await?;

        Ok(result)
    }

    fn parse_hits(body: &Value) -> Vec<ScoredPoint> {
        body.get("result")
            .and_then(|r| r.as_array())
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| {
                        Some(ScoredPoint {
                            id: hit.get("id")?.as_str()?.to_string(),
                            score: hit.get("score")?.as_f64()?,
                            payload: hit.get("payload").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn upsert(&self, points: Vec<VectorUpsert>) -> Result<()> {
        let body_points: Vec<Value> = points
            .into_iter()
            .map(|point| {
                let mut vectors = json!({
                    "dense": point.dense,
                    "sparse": {
                        "indices": point.sparse.indices,
                        "values": point.sparse.values,
                    },
                });
                if let Some(colbert) = point.colbert {
                    vectors["colbert"] = json!(colbert);
                }
                json!({
                    "id": point.id,
                    "vector": vectors,
                    "payload": point.payload,
                })
            })
            .collect();

        self.post_json(
            "upsert points",
            &format!("{}?wait=true", self.url("/points")),
            json!({"points": body_points}),
        )
        .await?;
        Ok(())
    }

    async fn search_dense(
        &self,
        vector: &[f32],
        k: usize,
        filter: &Value,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": {"name": "dense", "vector": vector},
            "limit": k,
            "with_payload": true,
        });
        if !filter.is_null() {
            body["filter"] = filter.clone();
        }

        let response = self
            .post_json("dense search", &self.url("/points/search"), body)
            .await?;
        Ok(Self::parse_hits(&response))
    }

    async fn search_sparse(
        &self,
        vector: &SparseVector,
        k: usize,
        filter: &Value,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": {
                "name": "sparse",
                "vector": {"indices": vector.indices, "values": vector.values},
            },
            "limit": k,
            "with_payload": true,
        });
        if !filter.is_null() {
            body["filter"] = filter.clone();
        }

        let response = self
            .post_json("sparse search", &self.url("/points/search"), body)
            .await?;
        Ok(Self::parse_hits(&response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_shape() {
        let store = HttpVectorStore::new(HttpVectorStoreConfig::new(
            "http://localhost:6333/",
            "mnemon",
        ))
        .unwrap();
        assert_eq!(
            store.url("/points/search"),
            "http://localhost:6333/collections/mnemon/points/search"
        );
    }

    #[test]
    fn test_parse_hits() {
        let body = json!({
            "result": [
                {"id": "n-1", "score": 0.92, "payload": {"content": "a"}},
                {"id": "n-2", "score": 0.81},
                {"not_a_hit": true}
            ]
        });
        let hits = HttpVectorStore::parse_hits(&body);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "n-1");
        assert!((hits[0].score - 0.92).abs() < 1e-9);
        assert_eq!(hits[1].payload, Value::Null);
    }
}
