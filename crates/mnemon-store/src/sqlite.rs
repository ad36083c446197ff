use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mnemon_types::{
    max_sentinel, Bitemporal, EdgeKind, EdgeRecord, NodeRecord, NodeRow, TemporalRef,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::traits::GraphStore;
use crate::{Error, Result};

// Schema version (increment when changing table definitions)
const SCHEMA_VERSION: i32 = 1;

// NOTE: Embedded Store Design
//
// Timestamps are RFC 3339 text with fixed microsecond precision and a
// Z suffix, so lexicographic comparison in SQL equals chronological
// comparison, sentinel included.
//
// One logical node spans many rows; the open row (tt_end = sentinel)
// is the current knowledge. Amendments close the old row and insert a
// successor inside one transaction, which is what keeps the
// single-open-row invariant.
//
// content_hash is denormalized into its own column so memory dedup
// does not depend on JSON text matching.

/// SQLite-backed lineage store for local-first deployments.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("bad timestamp {text}: {e}")))
}

fn content_hash_of(properties: &Value) -> Option<String> {
    properties
        .get("content_hash")
        .and_then(|v| v.as_u64())
        .map(|h| h.to_string())
}

impl SqliteGraphStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current_version != 0 && current_version != SCHEMA_VERSION {
            return Err(Error::Storage(format!(
                "schema version {} is not supported (expected {})",
                current_version, SCHEMA_VERSION
            )));
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                labels TEXT NOT NULL,
                properties TEXT NOT NULL,
                session_id TEXT,
                content_hash TEXT,
                vt_start TEXT NOT NULL,
                vt_end TEXT NOT NULL,
                tt_start TEXT NOT NULL,
                tt_end TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edges (
                kind TEXT NOT NULL,
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (kind, from_id, to_id)
            );

            CREATE TABLE IF NOT EXISTS session_hashes (
                session_id TEXT NOT NULL,
                hash TEXT NOT NULL,
                PRIMARY KEY (session_id, hash)
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_id_tt ON nodes(id, tt_end);
            CREATE INDEX IF NOT EXISTS idx_nodes_session ON nodes(session_id, tt_end);
            CREATE INDEX IF NOT EXISTS idx_nodes_hash ON nodes(session_id, content_hash);
            CREATE INDEX IF NOT EXISTS idx_nodes_expiry ON nodes(tt_end);
            CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id, kind);
            CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id, kind);
            "#,
        )?;

        conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
        Ok(())
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, NodeRecord, String)> {
    let row_id: i64 = row.get(0)?;
    let id: String = row.get(1)?;
    let labels: String = row.get(2)?;
    let properties: String = row.get(3)?;
    let session_id: Option<String> = row.get(4)?;
    let vt_start: String = row.get(5)?;
    let vt_end: String = row.get(6)?;
    let tt_start: String = row.get(7)?;
    let tt_end: String = row.get(8)?;

    Ok((
        row_id,
        NodeRecord {
            id,
            labels: serde_json::from_str(&labels).unwrap_or_default(),
            properties: serde_json::from_str(&properties).unwrap_or(Value::Null),
            session_id,
            // placeholder; timestamps parsed by the caller for error
            // handling outside rusqlite's error type
            bitemporal: Bitemporal::open(Utc::now()),
        },
        format!("{vt_start}\u{1f}{vt_end}\u{1f}{tt_start}\u{1f}{tt_end}"),
    ))
}

fn finish_node(raw: (i64, NodeRecord, String)) -> Result<(i64, NodeRecord)> {
    let (row_id, mut node, stamps) = raw;
    let mut parts = stamps.split('\u{1f}');
    let mut next = || -> Result<DateTime<Utc>> {
        parse_ts(parts.next().ok_or_else(|| Error::Storage("missing timestamp".into()))?)
    };
    node.bitemporal = Bitemporal {
        vt_start: next()?,
        vt_end: next()?,
        tt_start: next()?,
        tt_end: next()?,
    };
    Ok((row_id, node))
}

const NODE_COLUMNS: &str =
    "row_id, id, labels, properties, session_id, vt_start, vt_end, tt_start, tt_end";

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn insert_node(&self, node: &NodeRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO nodes (id, labels, properties, session_id, content_hash,
                               vt_start, vt_end, tt_start, tt_end)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                &node.id,
                serde_json::to_string(&node.labels)?,
                serde_json::to_string(&node.properties)?,
                &node.session_id,
                content_hash_of(&node.properties),
                ts(node.bitemporal.vt_start),
                ts(node.bitemporal.vt_end),
                ts(node.bitemporal.tt_start),
                ts(node.bitemporal.tt_end),
            ],
        )?;
        Ok(())
    }

    async fn amend_node(
        &self,
        id: &str,
        properties: Value,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let sentinel = ts(max_sentinel());
        let current = tx
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1 AND tt_end = ?2"),
                params![id, &sentinel],
                row_to_node,
            )
            .optional()?;

        let Some(raw) = current else {
            return Err(Error::Contract(format!("no current row for node {}", id)));
        };
        let (row_id, node) = finish_node(raw)?;

        // Merge: amended keys override, untouched keys carry over
        let mut merged = node.properties.clone();
        if let (Value::Object(target), Value::Object(source)) = (&mut merged, &properties) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        } else if !properties.is_null() {
            merged = properties;
        }

        tx.execute(
            "UPDATE nodes SET tt_end = ?1 WHERE row_id = ?2",
            params![ts(now), row_id],
        )?;

        let successor = NodeRecord {
            id: node.id.clone(),
            labels: node.labels.clone(),
            properties: merged,
            session_id: node.session_id.clone(),
            bitemporal: node.bitemporal.amended(now),
        };

        tx.execute(
            r#"
            INSERT INTO nodes (id, labels, properties, session_id, content_hash,
                               vt_start, vt_end, tt_start, tt_end)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                &successor.id,
                serde_json::to_string(&successor.labels)?,
                serde_json::to_string(&successor.properties)?,
                &successor.session_id,
                content_hash_of(&successor.properties),
                ts(successor.bitemporal.vt_start),
                ts(successor.bitemporal.vt_end),
                ts(successor.bitemporal.tt_start),
                ts(successor.bitemporal.tt_end),
            ],
        )?;

        tx.commit()?;
        Ok(successor)
    }

    async fn get_node(&self, id: &str, at: TemporalRef) -> Result<Option<NodeRecord>> {
        let conn = self.conn.lock();

        // No tt means current knowledge: the open row, not a point
        // query at the sentinel
        let tt_clause = match at.tt {
            Some(_) => "tt_start <= ?2 AND tt_end > ?2",
            None => "tt_end = ?2",
        };
        let tt = at.tt.map(ts).unwrap_or_else(|| ts(max_sentinel()));

        let raw = match at.vt {
            None => conn
                .query_row(
                    &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1 AND {tt_clause}"),
                    params![id, &tt],
                    row_to_node,
                )
                .optional()?,
            Some(vt) => conn
                .query_row(
                    &format!(
                        "SELECT {NODE_COLUMNS} FROM nodes
                         WHERE id = ?1 AND {tt_clause}
                           AND vt_start <= ?3 AND vt_end > ?3"
                    ),
                    params![id, &tt, ts(vt)],
                    row_to_node,
                )
                .optional()?,
        };

        raw.map(finish_node)
            .transpose()
            .map(|opt| opt.map(|(_, node)| node))
    }

    async fn insert_edge(&self, edge: &EdgeRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO edges (kind, from_id, to_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![edge.kind.as_str(), &edge.from, &edge.to, ts(edge.created_at)],
        )?;
        Ok(())
    }

    async fn edges_from(&self, id: &str, kind: EdgeKind) -> Result<Vec<EdgeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT from_id, to_id, created_at FROM edges
             WHERE from_id = ?1 AND kind = ?2 ORDER BY created_at",
        )?;
        let edges = stmt
            .query_map(params![id, kind.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        edges
            .into_iter()
            .map(|(from, to, created)| {
                Ok(EdgeRecord {
                    kind,
                    from,
                    to,
                    created_at: parse_ts(&created)?,
                })
            })
            .collect()
    }

    async fn edges_to(&self, id: &str, kind: EdgeKind) -> Result<Vec<EdgeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT from_id, to_id, created_at FROM edges
             WHERE to_id = ?1 AND kind = ?2 ORDER BY created_at",
        )?;
        let edges = stmt
            .query_map(params![id, kind.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        edges
            .into_iter()
            .map(|(from, to, created)| {
                Ok(EdgeRecord {
                    kind,
                    from,
                    to,
                    created_at: parse_ts(&created)?,
                })
            })
            .collect()
    }

    async fn session_nodes(
        &self,
        session_id: &str,
        label: Option<&str>,
        at: TemporalRef,
    ) -> Result<Vec<NodeRecord>> {
        let conn = self.conn.lock();
        let tt_clause = match at.tt {
            Some(_) => "tt_start <= ?2 AND tt_end > ?2",
            None => "tt_end = ?2",
        };
        let tt = at.tt.map(ts).unwrap_or_else(|| ts(max_sentinel()));

        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE session_id = ?1 AND {tt_clause}
             ORDER BY vt_start, id"
        ))?;
        let raws = stmt
            .query_map(params![session_id, &tt], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut nodes = Vec::with_capacity(raws.len());
        for raw in raws {
            let (_, node) = finish_node(raw)?;
            if let Some(vt) = at.vt {
                if !(node.bitemporal.vt_start <= vt && vt < node.bitemporal.vt_end) {
                    continue;
                }
            }
            if let Some(label) = label {
                if !node.has_label(label) {
                    continue;
                }
            }
            nodes.push(node);
        }
        Ok(nodes)
    }

    async fn record_content_hash(&self, session_id: &str, hash: u64) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO session_hashes (session_id, hash) VALUES (?1, ?2)",
            params![session_id, hash.to_string()],
        )?;
        Ok(changed > 0)
    }

    async fn find_live_memory(&self, session_id: &str, hash: u64) -> Result<Option<NodeRecord>> {
        let conn = self.conn.lock();
        let sentinel = ts(max_sentinel());
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes
                     WHERE session_id = ?1 AND content_hash = ?2 AND tt_end = ?3
                       AND labels LIKE '%\"Memory\"%'"
                ),
                params![session_id, hash.to_string(), &sentinel],
                row_to_node,
            )
            .optional()?;

        raw.map(finish_node)
            .transpose()
            .map(|opt| opt.map(|(_, node)| node))
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<NodeRecord>> {
        let conn = self.conn.lock();
        let sentinel = ts(max_sentinel());
        let escaped = query.replace('%', "\\%").replace('_', "\\_");
        let pattern = format!("%{}%", escaped);

        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE tt_end = ?1 AND properties LIKE ?2 ESCAPE '\\'
             ORDER BY tt_start DESC LIMIT ?3"
        ))?;
        let raws = stmt
            .query_map(params![&sentinel, &pattern, limit as i64], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raws.into_iter()
            .map(|raw| finish_node(raw).map(|(_, node)| node))
            .collect()
    }

    async fn query(&self, _query: &str, _params: Value) -> Result<Vec<Value>> {
        Err(Error::Unsupported(
            "raw graph queries require an external graph backend".to_string(),
        ))
    }

    async fn expired_rows(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<NodeRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE tt_end < ?1 ORDER BY tt_end LIMIT ?2"
        ))?;
        let raws = stmt
            .query_map(params![ts(cutoff), limit as i64], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raws.into_iter()
            .map(|raw| finish_node(raw).map(|(row_id, node)| NodeRow { row_id, node }))
            .collect()
    }

    async fn remove_rows(&self, row_ids: &[i64]) -> Result<usize> {
        if row_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; row_ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "DELETE FROM nodes WHERE row_id IN ({placeholders})"
        ))?;
        let removed = stmt.execute(rusqlite::params_from_iter(row_ids.iter()))?;
        Ok(removed)
    }
}
