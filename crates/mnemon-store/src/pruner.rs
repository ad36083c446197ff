use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::traits::{BlobStore, GraphStore};
use crate::Result;

/// Pruner configuration
#[derive(Debug, Clone)]
pub struct PruneConfig {
    /// Rows whose transaction interval closed before now - retention
    /// are removed.
    pub retention: Duration,
    pub batch_size: usize,
    pub max_batches: usize,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30 * 24 * 3600),
            batch_size: 500,
            max_batches: 20,
        }
    }
}

/// Outcome of one pruner run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub batches: usize,
    pub nodes_removed: usize,
    pub archived: bool,
}

/// Removes superseded node rows past the retention window, in fixed
/// batches, optionally archiving them to the blob store first.
pub struct GraphPruner {
    graph: Arc<dyn GraphStore>,
    blob: Option<Arc<dyn BlobStore>>,
    config: PruneConfig,
}

impl GraphPruner {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        blob: Option<Arc<dyn BlobStore>>,
        config: PruneConfig,
    ) -> Self {
        Self { graph, blob, config }
    }

    /// One pruning pass. Stops when a batch comes back empty or
    /// `max_batches` is reached.
    pub async fn run_once(&self) -> Result<PruneReport> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::days(30));
        let mut report = PruneReport::default();
        let mut archive_lines: Vec<String> = Vec::new();

        for _ in 0..self.config.max_batches {
            let rows = self
                .graph
                .expired_rows(cutoff, self.config.batch_size)
                .await?;
            if rows.is_empty() {
                break;
            }
            report.batches += 1;

            if self.blob.is_some() {
                let archived_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
                for row in &rows {
                    // One JSONL record per node, preserving everything a
                    // restore would need
                    let record = json!({
                        "id": row.node.id,
                        "labels": row.node.labels,
                        "properties": row.node.properties,
                        "internal_id": row.row_id,
                        "archived_at": archived_at,
                    });
                    archive_lines.push(record.to_string());
                }
            }

            let row_ids: Vec<i64> = rows.iter().map(|r| r.row_id).collect();
            report.nodes_removed += self.graph.remove_rows(&row_ids).await?;
        }

        if let (Some(blob), false) = (&self.blob, archive_lines.is_empty()) {
            let key = format!(
                "prune/{}.jsonl",
                Utc::now().format("%Y%m%dT%H%M%S%.6fZ")
            );
            let mut body = archive_lines.join("\n");
            body.push('\n');
            match blob.put(&key, body.into_bytes()).await {
                Ok(()) => report.archived = true,
                Err(err) => warn!(error = %err, key, "prune archive write failed"),
            }
        }

        if report.nodes_removed > 0 {
            info!(
                batches = report.batches,
                removed = report.nodes_removed,
                archived = report.archived,
                "prune pass complete"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FsBlobStore, SqliteGraphStore};
    use chrono::Duration as ChronoDuration;
    use mnemon_types::{NodeLabel, NodeRecord, TemporalRef};
    use serde_json::json;

    async fn store_with_history(amendments: usize) -> Arc<SqliteGraphStore> {
        let store = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        // Rows closed well in the past, beyond any sane retention
        let t0 = Utc::now() - ChronoDuration::days(90);
        store
            .insert_node(&NodeRecord::new(
                "n-1",
                NodeLabel::Turn,
                json!({"v": 0}),
                None,
                t0,
            ))
            .await
            .unwrap();
        for i in 0..amendments {
            store
                .amend_node("n-1", json!({"v": i + 1}), t0 + ChronoDuration::seconds(i as i64 + 1))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_prunes_closed_rows_keeps_current() {
        let store = store_with_history(3).await;
        let pruner = GraphPruner::new(
            store.clone(),
            None,
            PruneConfig {
                retention: Duration::from_secs(24 * 3600),
                batch_size: 2,
                max_batches: 10,
            },
        );

        let report = pruner.run_once().await.unwrap();
        assert_eq!(report.nodes_removed, 3);
        assert_eq!(report.batches, 2);
        assert!(!report.archived);

        let current = store.get_node("n-1", TemporalRef::current()).await.unwrap();
        assert_eq!(current.unwrap().prop_u64("v"), Some(3));
    }

    #[tokio::test]
    async fn test_max_batches_bounds_work() {
        let store = store_with_history(5).await;
        let pruner = GraphPruner::new(
            store.clone(),
            None,
            PruneConfig {
                retention: Duration::from_secs(24 * 3600),
                batch_size: 1,
                max_batches: 2,
            },
        );

        let report = pruner.run_once().await.unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.nodes_removed, 2);
    }

    #[tokio::test]
    async fn test_archive_written_as_jsonl() {
        let store = store_with_history(2).await;
        let dir = tempfile::tempdir().unwrap();
        let blob = Arc::new(FsBlobStore::new(dir.path()));
        let pruner = GraphPruner::new(
            store,
            Some(blob),
            PruneConfig {
                retention: Duration::from_secs(24 * 3600),
                batch_size: 10,
                max_batches: 5,
            },
        );

        let report = pruner.run_once().await.unwrap();
        assert!(report.archived);
        assert_eq!(report.nodes_removed, 2);

        // One .jsonl file with one record per removed row
        let mut entries = std::fs::read_dir(dir.path().join("prune")).unwrap();
        let file = entries.next().unwrap().unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let record: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(record["id"], "n-1");
            assert!(record["internal_id"].is_i64());
            assert!(record["archived_at"].is_string());
        }
    }

    #[tokio::test]
    async fn test_nothing_to_prune() {
        let store = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let pruner = GraphPruner::new(store, None, PruneConfig::default());
        let report = pruner.run_once().await.unwrap();
        assert_eq!(report, PruneReport::default());
    }
}
