mod cache;
mod hash;

pub use cache::{DedupCache, DedupConfig, DedupEntry, DedupKey};
pub use hash::{content_hash, fnv1a64, HASH_CONTENT_LIMIT};
