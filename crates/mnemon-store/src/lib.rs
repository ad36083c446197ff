mod blob_fs;
mod bus;
mod error;
mod guard;
mod http_embed;
mod http_rerank;
mod http_vector;
mod pruner;
mod query_builder;
mod retry;
mod sqlite;
mod traits;

pub use blob_fs::FsBlobStore;
pub use bus::{BusConsumer, BusMessage, MemoryBus, MessageBus};
pub use error::{Error, Result};
pub use guard::validate_read_query;
pub use http_embed::{HttpEmbedder, HttpEmbedderConfig};
pub use http_rerank::{CrossEncoderClient, CrossEncoderConfig};
pub use http_vector::{HttpVectorStore, HttpVectorStoreConfig};
pub use pruner::{GraphPruner, PruneConfig, PruneReport};
pub use query_builder::{QueryBuilder, TtRef};
pub use retry::{with_deadline, with_retry, RetryPolicy};
pub use sqlite::SqliteGraphStore;
pub use traits::{
    BlobStore, Embedder, GraphStore, RerankDoc, Reranker, ScoredPoint, SparseVector, VectorStore,
    VectorUpsert,
};
