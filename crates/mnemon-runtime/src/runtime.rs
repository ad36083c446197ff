use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use mnemon_dedup::{DedupCache, DedupConfig};
use mnemon_engine::{AggregatorConfig, TurnAggregator};
use mnemon_index::{HybridIndexer, IndexerConfig};
use mnemon_retrieval::{RetrievalDeps, RetrievalEngine, SearchConfig};
use mnemon_store::{GraphPruner, GraphStore, MessageBus, PruneConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::pipeline::{IngestHandle, IngestPipeline, PipelineConfig};
use crate::services::Services;
use crate::watcher::{FileWatcherSource, WatcherConfig};

/// The assembled system: pipeline, indexer, retrieval engine and the
/// maintenance tasks, with one shutdown signal.
pub struct Runtime {
    pub ingest: IngestHandle,
    pub engine: Arc<RetrievalEngine>,
    pub aggregator: Arc<TurnAggregator>,
    pub graph: Arc<dyn GraphStore>,
    pub bus: Arc<dyn MessageBus>,
    pipeline: IngestPipeline,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<FileWatcherSource>,
}

impl Runtime {
    pub fn start(services: Services, config: Config) -> Result<Self> {
        let Services {
            graph,
            vector,
            bus,
            blob,
            embedder,
            rerankers,
        } = services;

        let dedup = Arc::new(DedupCache::new(DedupConfig {
            ttl: config.dedup_ttl,
            max_entries: config.dedup_max_entries,
            cleanup_interval: config.dedup_cleanup_interval,
        }));

        let aggregator = Arc::new(TurnAggregator::new(
            graph.clone(),
            bus.clone(),
            AggregatorConfig {
                turn_idle_timeout: config.turn_idle_timeout,
                ..Default::default()
            },
        ));

        let pipeline = IngestPipeline::start(
            aggregator.clone(),
            dedup.clone(),
            bus.clone(),
            PipelineConfig {
                workers: config.pipeline_workers,
                queue_depth: 256,
            },
        );
        let ingest = pipeline.handle();

        let engine = Arc::new(RetrievalEngine::new(
            RetrievalDeps {
                graph: graph.clone(),
                vector: vector.clone(),
                embedder: embedder.clone(),
                bus: bus.clone(),
                rerankers,
                fusion_model: None,
                expander: None,
            },
            SearchConfig {
                rerank_depth: config.rerank_depth,
                abstention_threshold: config.abstention_threshold,
                nli_threshold: config.nli_threshold,
                rerank_max_concurrency: config.rerank_max_concurrency,
                default_rerank_tier: config.rerank_tier,
                ..Default::default()
            },
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        // Indexer
        let indexer = HybridIndexer::new(
            bus.clone(),
            vector,
            embedder,
            IndexerConfig {
                batch_size: config.batch_size,
                flush_interval: config.flush_interval,
                max_queue_size: config.max_queue_size,
                ..Default::default()
            },
        );
        let indexer_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = indexer.run(indexer_shutdown).await {
                warn!(error = %err, "indexer exited with error");
            }
        }));

        // Dedup TTL cleanup
        let cleanup_dedup = dedup.clone();
        let cleanup_interval = config.dedup_cleanup_interval;
        let mut cleanup_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(cleanup_interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => { cleanup_dedup.cleanup(); }
                    _ = cleanup_shutdown.changed() => break,
                }
            }
        }));

        // Idle-turn sweeper
        let sweep_aggregator = aggregator.clone();
        let sweep_interval = config.turn_idle_timeout / 2;
        let mut sweep_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_interval.max(std::time::Duration::from_secs(1)));
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(err) = sweep_aggregator.sweep_idle(Utc::now()).await {
                            warn!(error = %err, "idle sweep failed");
                        }
                    }
                    _ = sweep_shutdown.changed() => break,
                }
            }
        }));

        // Periodic pruning with archive
        let pruner = GraphPruner::new(
            graph.clone(),
            Some(blob),
            PruneConfig {
                retention: config.retention,
                ..Default::default()
            },
        );
        let prune_interval = config.prune_interval;
        let mut prune_shutdown = shutdown_rx;
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(prune_interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(err) = pruner.run_once().await {
                            warn!(error = %err, "prune pass failed");
                        }
                    }
                    _ = prune_shutdown.changed() => break,
                }
            }
        }));

        // Optional file-watcher source
        let watcher = match &config.watch_root {
            Some(root) => Some(FileWatcherSource::start(
                WatcherConfig::new(root.clone()),
                ingest.clone(),
            )?),
            None => None,
        };

        info!("runtime started");
        Ok(Self {
            ingest,
            engine,
            aggregator,
            graph,
            bus,
            pipeline,
            shutdown,
            tasks,
            _watcher: watcher,
        })
    }

    /// Graceful shutdown: stop intake, drain workers, flush the
    /// indexer, stop maintenance tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.pipeline.shutdown().await;
        for task in self.tasks {
            let _ = task.await;
        }
        info!("runtime stopped");
    }
}
