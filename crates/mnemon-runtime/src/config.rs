use std::path::PathBuf;
use std::time::Duration;

use mnemon_types::RerankTier;

/// Runtime configuration, read once from the environment at startup.
/// Immutable afterwards; components receive what they need at
/// construction.
#[derive(Debug, Clone)]
pub struct Config {
    // Service endpoints
    pub ingestion_url: String,
    pub search_url: String,
    pub graph_url: Option<String>,
    pub vector_store_url: String,
    pub bus_url: Option<String>,
    pub embedding_url: String,
    pub reranker_url: Option<String>,

    // Auth
    pub auth_token: Option<String>,
    pub oauth_introspection_url: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub resource_server_url: Option<String>,

    // Dedup engine
    pub dedup_ttl: Duration,
    pub dedup_max_entries: usize,
    pub dedup_cleanup_interval: Duration,

    // Indexer batching
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_queue_size: usize,

    // Retrieval
    pub rerank_tier: RerankTier,
    pub rerank_depth: usize,
    pub rerank_max_concurrency: usize,
    pub abstention_threshold: f64,
    pub nli_threshold: f64,
    pub colbert_enabled: bool,

    // Pipeline
    pub pipeline_workers: usize,
    pub turn_idle_timeout: Duration,
    pub watch_root: Option<PathBuf>,

    // Storage
    pub data_dir: PathBuf,
    pub retention: Duration,
    pub prune_interval: Duration,
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_str(key).unwrap_or_else(|| default.to_string())
}

fn env_ms(key: &str, default_ms: u64) -> Duration {
    let ms = env_str(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_str(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_str(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let rerank_tier = match env_or("RERANK_TIER", "fast").to_lowercase().as_str() {
            "accurate" => RerankTier::Accurate,
            "code" => RerankTier::Code,
            "llm" => RerankTier::Llm,
            _ => RerankTier::Fast,
        };

        Self {
            ingestion_url: env_or("INGESTION_URL", "0.0.0.0:7461"),
            search_url: env_or("SEARCH_URL", "0.0.0.0:7462"),
            graph_url: env_str("GRAPH_URL"),
            vector_store_url: env_or("VECTOR_STORE_URL", "http://127.0.0.1:6333"),
            bus_url: env_str("BUS_URL"),
            embedding_url: env_or("EMBEDDING_URL", "http://127.0.0.1:8080"),
            reranker_url: env_str("RERANKER_URL"),

            auth_token: env_str("AUTH_TOKEN"),
            oauth_introspection_url: env_str("OAUTH_INTROSPECTION_URL"),
            oauth_client_id: env_str("OAUTH_CLIENT_ID"),
            oauth_client_secret: env_str("OAUTH_CLIENT_SECRET"),
            resource_server_url: env_str("RESOURCE_SERVER_URL"),

            dedup_ttl: env_ms("DEDUP_TTL_MS", 300_000),
            dedup_max_entries: env_usize("DEDUP_MAX_ENTRIES", 50_000),
            dedup_cleanup_interval: env_ms("DEDUP_CLEANUP_MS", 60_000),

            batch_size: env_usize("BATCH_SIZE", 100),
            flush_interval: env_ms("FLUSH_INTERVAL_MS", 5_000),
            max_queue_size: env_usize("MAX_QUEUE_SIZE", 1_000),

            rerank_tier,
            rerank_depth: env_usize("RERANK_DEPTH", 30),
            rerank_max_concurrency: env_usize("RERANK_MAX_CONCURRENCY", 2),
            abstention_threshold: env_f64("ABSTENTION_THRESHOLD", 0.3),
            nli_threshold: env_f64("NLI_THRESHOLD", 0.7),
            colbert_enabled: env_str("COLBERT_ENABLED").map_or(false, |v| v == "1" || v == "true"),

            pipeline_workers: env_usize("PIPELINE_WORKERS", 4),
            turn_idle_timeout: env_ms("TURN_IDLE_TIMEOUT_MS", 120_000),
            watch_root: env_str("WATCH_ROOT").map(PathBuf::from),

            data_dir: env_str("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".mnemon")),
            retention: env_ms("RETENTION_MS", 30 * 24 * 3600 * 1000),
            prune_interval: env_ms("PRUNE_INTERVAL_MS", 3600 * 1000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let config = Config::from_env();
        assert_eq!(config.dedup_ttl, Duration::from_millis(300_000));
        assert_eq!(config.dedup_max_entries, 50_000);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_queue_size, 1_000);
        assert_eq!(config.rerank_depth, 30);
        assert!((config.abstention_threshold - 0.3).abs() < 1e-9);
        assert!((config.nli_threshold - 0.7).abs() < 1e-9);
    }
}
