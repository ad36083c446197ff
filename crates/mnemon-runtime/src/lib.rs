mod config;
mod pipeline;
mod runtime;
mod services;
mod watcher;

pub use config::Config;
pub use pipeline::{IngestHandle, IngestPipeline, PipelineConfig, SubmitError};
pub use runtime::Runtime;
pub use services::Services;
pub use watcher::{FileWatcherSource, WatcherConfig};
