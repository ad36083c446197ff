use std::sync::Arc;

use anyhow::{Context, Result};
use mnemon_retrieval::RerankerSet;
use mnemon_store::{
    BlobStore, CrossEncoderClient, CrossEncoderConfig, Embedder, FsBlobStore, GraphStore,
    HttpEmbedder, HttpEmbedderConfig, HttpVectorStore, HttpVectorStoreConfig, MemoryBus,
    MessageBus, SqliteGraphStore, VectorStore,
};
use mnemon_types::RerankTier;

use crate::config::Config;

/// Backend handles for every component, assembled once at startup.
/// No process-wide mutable state: components hold the Arcs they are
/// given at construction.
pub struct Services {
    pub graph: Arc<dyn GraphStore>,
    pub vector: Arc<dyn VectorStore>,
    pub bus: Arc<dyn MessageBus>,
    pub blob: Arc<dyn BlobStore>,
    pub embedder: Arc<dyn Embedder>,
    pub rerankers: RerankerSet,
}

impl Services {
    /// Default single-node wiring: embedded SQLite lineage store,
    /// in-memory bus, filesystem blob store, HTTP vector store and
    /// embedding service.
    pub fn from_config(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

        let graph = Arc::new(
            SqliteGraphStore::open(&config.data_dir.join("lineage.db"))
                .context("opening lineage store")?,
        );

        let vector = Arc::new(
            HttpVectorStore::new(HttpVectorStoreConfig::new(
                config.vector_store_url.clone(),
                "mnemon",
            ))
            .context("building vector store client")?,
        );

        let mut embedder_config = HttpEmbedderConfig::new(config.embedding_url.clone());
        embedder_config.colbert = config.colbert_enabled;
        let embedder =
            Arc::new(HttpEmbedder::new(embedder_config).context("building embedder client")?);

        let mut rerankers = RerankerSet::new();
        if let Some(reranker_url) = &config.reranker_url {
            for tier in [RerankTier::Fast, RerankTier::Accurate, RerankTier::Code] {
                let client = CrossEncoderClient::new(CrossEncoderConfig::new(
                    format!("{}/{}", reranker_url.trim_end_matches('/'), tier.as_str()),
                    tier,
                ))
                .context("building reranker client")?;
                rerankers = rerankers.with(Arc::new(client));
            }
        }

        Ok(Self {
            graph,
            vector,
            bus: Arc::new(MemoryBus::new()),
            blob: Arc::new(FsBlobStore::new(config.data_dir.join("archive"))),
            embedder,
            rerankers,
        })
    }
}
