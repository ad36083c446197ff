mod document;
mod indexer;

pub use document::{document_for, Document};
pub use indexer::{HybridIndexer, IndexerConfig, DEAD_LETTER_TOPIC};
