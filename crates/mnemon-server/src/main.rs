use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mnemon_runtime::{Config, Runtime, Services};
use mnemon_server::{router, AppState, FanoutHub, HubConfig};
use mnemon_store::{GraphPruner, PruneConfig};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "mnemond", about = "Memory and lineage platform for coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion + search + observatory server
    Serve {
        /// Listen address; overrides INGESTION_URL
        #[arg(long)]
        listen: Option<String>,
    },
    /// Run one pruning pass and exit
    Prune {
        /// Retention window in days
        #[arg(long, default_value_t = 30)]
        retention_days: u64,
        /// Skip the blob-store archive
        #[arg(long)]
        no_archive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mnemon=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Serve { listen } => serve(config, listen).await,
        Command::Prune {
            retention_days,
            no_archive,
        } => prune(config, retention_days, no_archive).await,
    }
}

async fn serve(config: Config, listen: Option<String>) -> Result<()> {
    let listen = listen.unwrap_or_else(|| config.ingestion_url.clone());
    let services = Services::from_config(&config)?;
    let runtime = Runtime::start(services, config)?;

    let hub = FanoutHub::new(runtime.graph.clone(), HubConfig::default());
    let (hub_shutdown, hub_shutdown_rx) = watch::channel(false);
    let hub_task = {
        let hub = hub.clone();
        let bus = runtime.bus.clone();
        tokio::spawn(async move {
            if let Err(err) = hub.run(bus, hub_shutdown_rx).await {
                tracing::warn!(error = %err, "fan-out hub exited with error");
            }
        })
    };

    let state = AppState {
        ingest: runtime.ingest.clone(),
        engine: runtime.engine.clone(),
        hub,
    };

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(%listen, "mnemond listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = hub_shutdown.send(true);
    let _ = hub_task.await;
    runtime.shutdown().await;
    Ok(())
}

async fn prune(config: Config, retention_days: u64, no_archive: bool) -> Result<()> {
    let services = Services::from_config(&config)?;
    let blob = if no_archive { None } else { Some(services.blob) };
    let pruner = GraphPruner::new(
        services.graph,
        blob,
        PruneConfig {
            retention: Duration::from_secs(retention_days * 24 * 3600),
            ..Default::default()
        },
    );

    let report = pruner.run_once().await?;
    info!(
        batches = report.batches,
        removed = report.nodes_removed,
        archived = report.archived,
        "prune complete"
    );
    println!(
        "pruned {} rows in {} batches (archived: {})",
        report.nodes_removed, report.batches, report.archived
    );
    Ok(())
}
