use std::sync::Arc;

use mnemon_retrieval::RetrievalEngine;
use mnemon_runtime::IngestHandle;

use crate::hub::FanoutHub;

/// Shared handles for the request handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestHandle,
    pub engine: Arc<RetrievalEngine>,
    pub hub: FanoutHub,
}
