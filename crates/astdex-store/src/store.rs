//! Metadata Store
//!
//! A single embedded SQLite database hosting annotations, embeddings, file
//! state, the model registry, the query log, the persistent cache layer, and
//! the append-only security audit.
//!
//! Multi-row updates touching `annotations + embeddings + file_state` for
//! one file run in a single transaction under a per-file lock; different
//! files proceed in parallel up to the connection. Busy databases are
//! retried per the configured `RetryPolicy`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use astdex_core::Annotation;
use astdex_embed::EmbeddingRecord;

use crate::error::{Result, StoreError};
use crate::retry::{is_retryable, RetryPolicy};
use crate::schema;

/// Audit rows kept before rotation discards the oldest.
const AUDIT_MAX_ROWS: usize = 10_000;

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ============================================================================
// Row types
// ============================================================================

/// Persisted per-file indexing state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileState {
    pub path: String,
    pub content_hash: String,
    /// Unix milliseconds of the last successful index
    pub last_indexed: i64,
    /// Node ids owned by this file
    pub node_ids: Vec<String>,
}

/// Aggregated query statistics, one row per fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryLogEntry {
    pub query_hash: String,
    pub text: String,
    pub options_json: String,
    pub count: u64,
    pub avg_execution_time_ms: f64,
    pub first_seen: i64,
    pub last_seen: i64,
}

/// One registered embedding model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRegistryEntry {
    pub model_name: String,
    pub version: String,
    pub file_path: Option<String>,
    pub checksum: Option<String>,
    pub checksum_verified: bool,
    pub signature_verified: bool,
    pub active: bool,
    pub download_date: Option<String>,
    pub last_verification: Option<String>,
}

// ============================================================================
// Vector blob codec
// ============================================================================

fn append_audit_line(
    path: &Path,
    timestamp: &str,
    event_type: &str,
    details: &serde_json::Value,
) -> std::io::Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let line = serde_json::json!({
        "timestamp": timestamp,
        "event": event_type,
        "details": details,
    });

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::CorruptValue(format!(
            "vector blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

// ============================================================================
// Metadata Store
// ============================================================================

/// Handle to the embedded metadata database.
///
/// Cloneable via `Arc`; all methods take `&self`.
pub struct MetadataStore {
    conn: Mutex<Connection>,
    file_locks: DashMap<String, Arc<Mutex<()>>>,
    retry: RetryPolicy,
    /// Mirror of audit events as JSON lines, for external collectors
    audit_log: Option<PathBuf>,
}

impl MetadataStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.busy_timeout(std::time::Duration::from_millis(250))?;

        for statement in schema::ALL_TABLES {
            conn.execute(statement, [])?;
        }
        conn.execute_batch(schema::SCHEMA_CREATE_INDEXES)?;
        conn.execute(
            "INSERT OR IGNORE INTO store_metadata (key, value) VALUES ('schema_version', ?1)",
            params![schema::STORE_SCHEMA_VERSION],
        )?;

        info!("Metadata store ready (schema {})", schema::STORE_SCHEMA_VERSION);

        Ok(Self {
            conn: Mutex::new(conn),
            file_locks: DashMap::new(),
            retry: RetryPolicy::default(),
            audit_log: None,
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Mirror audit events to a JSONL file (e.g.
    /// `ast_db/security/logs/security-audit.jsonl`).
    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = Some(path.into());
        self
    }

    fn file_lock(&self, path: &str) -> Arc<Mutex<()>> {
        self.file_locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run a closure against the connection with busy retries.
    fn with_conn<T>(&self, f: impl Fn(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        self.retry
            .run(|| {
                let conn = self.conn.lock();
                let result = f(&conn);
                let retryable = result.as_ref().err().map(is_retryable).unwrap_or(false);
                (result, retryable)
            })
            .map_err(StoreError::from)
    }

    // ========================================================================
    // File-scoped atomic writes
    // ========================================================================

    /// Atomically replace a file's annotations, embeddings, and file state.
    ///
    /// Rows for node ids no longer owned by the file are deleted; the whole
    /// update commits or rolls back as a unit.
    pub fn upsert_file_records(
        &self,
        path: &str,
        content_hash: &str,
        annotations: &[Annotation],
        embeddings: &[EmbeddingRecord],
    ) -> Result<()> {
        let lock = self.file_lock(path);
        let _guard = lock.lock();

        let new_ids: Vec<String> = annotations.iter().map(|a| a.node_id.clone()).collect();
        let new_id_set: HashSet<&String> = new_ids.iter().collect();
        let node_ids_json = serde_json::to_string(&new_ids)?;
        let now = unix_millis();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        // Drop rows the file no longer owns
        let old_ids: Option<String> = tx
            .query_row(
                "SELECT node_ids_json FROM file_state WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(old_ids) = old_ids {
            let old_ids: Vec<String> = serde_json::from_str(&old_ids)?;
            for old_id in old_ids {
                if !new_id_set.contains(&old_id) {
                    tx.execute("DELETE FROM annotations WHERE node_id = ?1", params![old_id])?;
                    tx.execute("DELETE FROM embeddings WHERE node_id = ?1", params![old_id])?;
                }
            }
        }

        for annotation in annotations {
            tx.execute(
                "INSERT INTO annotations (node_id, file_path, language, signature, summary, purpose,
                    dependencies_json, complexity, cognitive, tags_json, last_updated, schema_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(node_id) DO UPDATE SET
                    file_path = excluded.file_path,
                    language = excluded.language,
                    signature = excluded.signature,
                    summary = excluded.summary,
                    purpose = excluded.purpose,
                    dependencies_json = excluded.dependencies_json,
                    complexity = excluded.complexity,
                    cognitive = excluded.cognitive,
                    tags_json = excluded.tags_json,
                    last_updated = excluded.last_updated,
                    schema_version = excluded.schema_version",
                params![
                    annotation.node_id,
                    annotation.file_path,
                    annotation.language,
                    annotation.signature,
                    annotation.summary,
                    annotation.purpose,
                    serde_json::to_string(&annotation.dependencies)?,
                    annotation.complexity,
                    annotation.cognitive,
                    serde_json::to_string(&annotation.tags)?,
                    annotation.last_updated,
                    annotation.schema_version,
                ],
            )?;
        }

        for record in embeddings {
            tx.execute(
                "INSERT INTO embeddings (node_id, model_id, model_version, dim, vector)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(node_id) DO UPDATE SET
                    model_id = excluded.model_id,
                    model_version = excluded.model_version,
                    dim = excluded.dim,
                    vector = excluded.vector",
                params![
                    record.node_id,
                    record.model_id,
                    record.model_version,
                    record.vector.len(),
                    encode_vector(&record.vector),
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO file_state (path, content_hash, last_indexed, node_ids_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                last_indexed = excluded.last_indexed,
                node_ids_json = excluded.node_ids_json",
            params![path, content_hash, now, node_ids_json],
        )?;

        tx.commit()?;
        debug!("Committed {} annotations for {}", annotations.len(), path);
        Ok(())
    }

    /// Delete a file's state and cascade to its annotations and embeddings.
    ///
    /// Returns the node ids that were removed, for index cleanup.
    pub fn delete_file(&self, path: &str) -> Result<Vec<String>> {
        let lock = self.file_lock(path);
        let _guard = lock.lock();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let node_ids: Vec<String> = match tx
            .query_row(
                "SELECT node_ids_json FROM file_state WHERE path = ?1",
                params![path],
                |row| row.get::<_, String>(0),
            )
            .optional()?
        {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };

        for node_id in &node_ids {
            tx.execute("DELETE FROM annotations WHERE node_id = ?1", params![node_id])?;
            tx.execute("DELETE FROM embeddings WHERE node_id = ?1", params![node_id])?;
        }
        tx.execute("DELETE FROM file_state WHERE path = ?1", params![path])?;

        tx.commit()?;
        debug!("Deleted file state for {} ({} nodes)", path, node_ids.len());
        Ok(node_ids)
    }

    /// Move a file's records to a new path without re-annotating.
    ///
    /// Node ids are content hashes of `(path, span, kind)` only at creation
    /// time; a rename with identical content keeps them valid, so only the
    /// stored paths change.
    pub fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        let lock = self.file_lock(from);
        let _guard = lock.lock();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE annotations SET file_path = ?1 WHERE file_path = ?2",
            params![to, from],
        )?;
        tx.execute(
            "UPDATE file_state SET path = ?1 WHERE path = ?2",
            params![to, from],
        )?;

        tx.commit()?;
        info!("Renamed file records {} -> {}", from, to);
        Ok(())
    }

    // ========================================================================
    // Annotations
    // ========================================================================

    fn row_to_annotation(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Annotation, String, String)> {
        Ok((
            Annotation {
                node_id: row.get(0)?,
                file_path: row.get(1)?,
                language: row.get(2)?,
                signature: row.get(3)?,
                summary: row.get(4)?,
                purpose: row.get(5)?,
                dependencies: Vec::new(),
                complexity: row.get(7)?,
                cognitive: row.get(8)?,
                tags: Vec::new(),
                last_updated: row.get(10)?,
                schema_version: row.get(11)?,
            },
            row.get::<_, String>(6)?,
            row.get::<_, String>(9)?,
        ))
    }

    fn hydrate_annotation(raw: (Annotation, String, String)) -> Result<Annotation> {
        let (mut annotation, deps_json, tags_json) = raw;
        annotation.dependencies = serde_json::from_str(&deps_json)?;
        annotation.tags = serde_json::from_str(&tags_json)?;
        Ok(annotation)
    }

    const ANNOTATION_COLUMNS: &'static str =
        "node_id, file_path, language, signature, summary, purpose, dependencies_json, \
         complexity, cognitive, tags_json, last_updated, schema_version";

    /// Fetch one annotation by node id.
    pub fn get_annotation(&self, node_id: &str) -> Result<Option<Annotation>> {
        let raw = self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM annotations WHERE node_id = ?1",
                    Self::ANNOTATION_COLUMNS
                ),
                params![node_id],
                Self::row_to_annotation,
            )
            .optional()
        })?;
        raw.map(Self::hydrate_annotation).transpose()
    }

    /// All annotations for a file path.
    pub fn annotations_for_file(&self, path: &str) -> Result<Vec<Annotation>> {
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM annotations WHERE file_path = ?1 ORDER BY node_id",
                Self::ANNOTATION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![path], Self::row_to_annotation)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        raw.into_iter().map(Self::hydrate_annotation).collect()
    }

    /// Annotations whose signature contains the pattern (case-insensitive).
    pub fn annotations_by_signature(&self, pattern: &str, limit: usize) -> Result<Vec<Annotation>> {
        let like = format!("%{}%", pattern.replace('%', "\\%").replace('_', "\\_"));
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM annotations WHERE signature LIKE ?1 ESCAPE '\\' \
                 ORDER BY last_updated DESC, node_id LIMIT ?2",
                Self::ANNOTATION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![like, limit], Self::row_to_annotation)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        raw.into_iter().map(Self::hydrate_annotation).collect()
    }

    /// Total annotation count.
    pub fn annotation_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM annotations", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .map(|n| n as usize)
    }

    // ========================================================================
    // Embeddings
    // ========================================================================

    /// Fetch one embedding record.
    pub fn get_embedding(&self, node_id: &str) -> Result<Option<EmbeddingRecord>> {
        let raw = self.with_conn(|conn| {
            conn.query_row(
                "SELECT node_id, model_id, model_version, vector FROM embeddings WHERE node_id = ?1",
                params![node_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )
            .optional()
        })?;

        raw.map(|(node_id, model_id, model_version, blob)| {
            Ok(EmbeddingRecord {
                node_id,
                model_id,
                model_version,
                vector: decode_vector(&blob)?,
            })
        })
        .transpose()
    }

    /// All embedding records for a model, newest annotations first.
    ///
    /// This is the rebuild feed: records join to annotations for the
    /// `last_updated` ordering.
    pub fn embeddings_for_model(&self, model_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.node_id, e.model_id, e.model_version, e.vector
                 FROM embeddings e
                 LEFT JOIN annotations a ON a.node_id = e.node_id
                 WHERE e.model_id = ?1
                 ORDER BY a.last_updated DESC, e.node_id",
            )?;
            let rows = stmt.query_map(params![model_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        raw.into_iter()
            .map(|(node_id, model_id, model_version, blob)| {
                Ok(EmbeddingRecord {
                    node_id,
                    model_id,
                    model_version,
                    vector: decode_vector(&blob)?,
                })
            })
            .collect()
    }

    // ========================================================================
    // File state
    // ========================================================================

    /// Fetch one file's state.
    pub fn get_file_state(&self, path: &str) -> Result<Option<FileState>> {
        let raw = self.with_conn(|conn| {
            conn.query_row(
                "SELECT path, content_hash, last_indexed, node_ids_json FROM file_state WHERE path = ?1",
                params![path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
        })?;

        raw.map(|(path, content_hash, last_indexed, node_ids_json)| {
            Ok(FileState {
                path,
                content_hash,
                last_indexed,
                node_ids: serde_json::from_str(&node_ids_json)?,
            })
        })
        .transpose()
    }

    /// All file states.
    pub fn all_file_states(&self) -> Result<Vec<FileState>> {
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT path, content_hash, last_indexed, node_ids_json FROM file_state ORDER BY path",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        raw.into_iter()
            .map(|(path, content_hash, last_indexed, node_ids_json)| {
                Ok(FileState {
                    path,
                    content_hash,
                    last_indexed,
                    node_ids: serde_json::from_str(&node_ids_json)?,
                })
            })
            .collect()
    }

    /// Path → content hash map for delta analysis seeding.
    pub fn file_hashes(&self) -> Result<std::collections::HashMap<String, String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT path, content_hash FROM file_state")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<rusqlite::Result<std::collections::HashMap<_, _>>>()
        })
    }

    // ========================================================================
    // Query log
    // ========================================================================

    /// Record one execution of a query fingerprint.
    ///
    /// Increments the counter, folds the latency into a rolling average, and
    /// advances `last_seen`; monotonic for both.
    pub fn record_query(
        &self,
        query_hash: &str,
        text: &str,
        options_json: &str,
        execution_time_ms: u64,
    ) -> Result<()> {
        let now = unix_millis();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO query_log (query_hash, text, options_json, count, avg_execution_time_ms, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?5)
                 ON CONFLICT(query_hash) DO UPDATE SET
                    count = count + 1,
                    avg_execution_time_ms =
                        (avg_execution_time_ms * count + ?4) / (count + 1),
                    last_seen = ?5",
                params![query_hash, text, options_json, execution_time_ms as f64, now],
            )
            .map(|_| ())
        })
    }

    /// Fetch one query log entry.
    pub fn query_log_entry(&self, query_hash: &str) -> Result<Option<QueryLogEntry>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT query_hash, text, options_json, count, avg_execution_time_ms, first_seen, last_seen
                 FROM query_log WHERE query_hash = ?1",
                params![query_hash],
                |row| {
                    Ok(QueryLogEntry {
                        query_hash: row.get(0)?,
                        text: row.get(1)?,
                        options_json: row.get(2)?,
                        count: row.get::<_, i64>(3)? as u64,
                        avg_execution_time_ms: row.get(4)?,
                        first_seen: row.get(5)?,
                        last_seen: row.get(6)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Most frequent queries at or above `min_frequency`, for cache warming.
    pub fn top_queries(&self, limit: usize, min_frequency: u64) -> Result<Vec<QueryLogEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT query_hash, text, options_json, count, avg_execution_time_ms, first_seen, last_seen
                 FROM query_log WHERE count >= ?1
                 ORDER BY count DESC, last_seen DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![min_frequency as i64, limit], |row| {
                Ok(QueryLogEntry {
                    query_hash: row.get(0)?,
                    text: row.get(1)?,
                    options_json: row.get(2)?,
                    count: row.get::<_, i64>(3)? as u64,
                    avg_execution_time_ms: row.get(4)?,
                    first_seen: row.get(5)?,
                    last_seen: row.get(6)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    /// Drop query log entries older than the retention window.
    pub fn prune_query_log(&self, retention_days: u32) -> Result<usize> {
        let cutoff = unix_millis() - (retention_days as i64) * 24 * 60 * 60 * 1000;
        self.with_conn(|conn| {
            conn.execute("DELETE FROM query_log WHERE last_seen < ?1", params![cutoff])
        })
        .map(|n| n as usize)
    }

    // ========================================================================
    // L3 cache
    // ========================================================================

    /// Read an L3 row, honoring TTL and bumping access stats.
    ///
    /// Expired rows are purged on read and reported as misses.
    pub fn l3_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = unix_millis();

        let row: Option<(Vec<u8>, i64, u64)> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT payload, created_at, ttl_ms FROM l3_cache WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)? as u64,
                    ))
                },
            )
            .optional()
        })?;

        let Some((payload, created_at, ttl_ms)) = row else {
            return Ok(None);
        };

        if ttl_ms > 0 && now - created_at > ttl_ms as i64 {
            self.l3_remove(key)?;
            return Ok(None);
        }

        self.with_conn(|conn| {
            conn.execute(
                "UPDATE l3_cache SET last_accessed = ?1, hit_count = hit_count + 1 WHERE key = ?2",
                params![now, key],
            )
            .map(|_| ())
        })?;

        Ok(Some(payload))
    }

    /// Write an L3 row, evicting least-recently-used rows past the cap.
    pub fn l3_put(&self, key: &str, payload: &[u8], ttl_ms: u64, max_rows: usize) -> Result<()> {
        let now = unix_millis();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO l3_cache (key, payload, size_bytes, created_at, last_accessed, hit_count, ttl_ms)
                 VALUES (?1, ?2, ?3, ?4, ?4, 0, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    payload = excluded.payload,
                    size_bytes = excluded.size_bytes,
                    created_at = excluded.created_at,
                    last_accessed = excluded.last_accessed,
                    ttl_ms = excluded.ttl_ms",
                params![key, payload, payload.len(), now, ttl_ms as i64],
            )?;

            // LRU trim past the row cap
            conn.execute(
                "DELETE FROM l3_cache WHERE key IN (
                    SELECT key FROM l3_cache ORDER BY last_accessed ASC
                    LIMIT max(0, (SELECT COUNT(*) FROM l3_cache) - ?1)
                 )",
                params![max_rows],
            )
            .map(|_| ())
        })
    }

    /// Delete one L3 row.
    pub fn l3_remove(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM l3_cache WHERE key = ?1", params![key])
        })
        .map(|n| n > 0)
    }

    /// Clear the L3 layer.
    pub fn l3_clear(&self) -> Result<usize> {
        self.with_conn(|conn| conn.execute("DELETE FROM l3_cache", []))
            .map(|n| n as usize)
    }

    /// L3 row count.
    pub fn l3_len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM l3_cache", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .map(|n| n as usize)
    }

    // ========================================================================
    // Security audit
    // ========================================================================

    /// Append an audit event; the table is append-only with rotation by
    /// count, oldest rows first. When an audit log file is configured the
    /// event is also mirrored there as one JSON line.
    pub fn audit_append(&self, event_type: &str, details: &serde_json::Value) -> Result<()> {
        let details_json = details.to_string();
        let timestamp = Utc::now().to_rfc3339();

        if let Some(log_path) = &self.audit_log {
            if let Err(e) = append_audit_line(log_path, &timestamp, event_type, details) {
                warn!("Audit log append failed: {}", e);
            }
        }

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO security_audit (timestamp, event_type, details_json) VALUES (?1, ?2, ?3)",
                params![timestamp, event_type, details_json],
            )?;
            conn.execute(
                "DELETE FROM security_audit WHERE id IN (
                    SELECT id FROM security_audit ORDER BY id ASC
                    LIMIT max(0, (SELECT COUNT(*) FROM security_audit) - ?1)
                 )",
                params![AUDIT_MAX_ROWS],
            )
            .map(|_| ())
        })
    }

    /// Recent audit events, newest first.
    pub fn audit_recent(&self, limit: usize) -> Result<Vec<(String, String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, event_type, details_json FROM security_audit
                 ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    // ========================================================================
    // Model registry
    // ========================================================================

    /// Register (or refresh) a model entry. Registration alone does not
    /// allow activation.
    pub fn register_model(
        &self,
        model_name: &str,
        version: &str,
        file_path: Option<&str>,
        checksum: Option<&str>,
    ) -> Result<()> {
        let download_date = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO model_registry (model_name, version, file_path, checksum, download_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(model_name, version) DO UPDATE SET
                    file_path = excluded.file_path,
                    checksum = excluded.checksum",
                params![model_name, version, file_path, checksum, download_date],
            )
            .map(|_| ())
        })
    }

    /// Verify a model blob against its registered checksum.
    ///
    /// The outcome is recorded in `verification_history` and, on failure, in
    /// the security audit.
    pub fn verify_model(&self, model_name: &str, version: &str) -> Result<bool> {
        let entry = self
            .get_model(model_name, version)?
            .ok_or_else(|| StoreError::ModelNotFound(model_name.to_string()))?;

        let ok = match (&entry.file_path, &entry.checksum) {
            (Some(file_path), Some(expected)) => match std::fs::read(file_path) {
                Ok(bytes) => format!("{:x}", Sha256::digest(&bytes)) == *expected,
                Err(e) => {
                    warn!("Model blob unreadable at {}: {}", file_path, e);
                    false
                }
            },
            // The in-tree provider has no blob; it verifies trivially
            (None, None) => true,
            _ => false,
        };

        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO verification_history (model_name, version, verified_at, ok, details)
                 VALUES (?1, ?2, ?3, ?4, NULL)",
                params![model_name, version, now, ok as i64],
            )?;
            conn.execute(
                "UPDATE model_registry SET checksum_verified = ?1, last_verification = ?2
                 WHERE model_name = ?3 AND version = ?4",
                params![ok as i64, now, model_name, version],
            )
            .map(|_| ())
        })?;

        if !ok {
            self.audit_append(
                "model_verification_failed",
                &serde_json::json!({ "model": model_name, "version": version }),
            )?;
        }

        Ok(ok)
    }

    /// Activate a model. Fails unless its checksum has been verified.
    pub fn activate_model(&self, model_name: &str, version: &str) -> Result<()> {
        let entry = self
            .get_model(model_name, version)?
            .ok_or_else(|| StoreError::ModelNotFound(model_name.to_string()))?;

        if !entry.checksum_verified {
            return Err(StoreError::ModelVerificationFailed(format!(
                "{model_name} v{version} has not passed checksum verification"
            )));
        }

        self.with_conn(|conn| {
            conn.execute("UPDATE model_registry SET active = 0", [])?;
            conn.execute(
                "UPDATE model_registry SET active = 1 WHERE model_name = ?1 AND version = ?2",
                params![model_name, version],
            )
            .map(|_| ())
        })?;

        info!("Activated model {} v{}", model_name, version);
        Ok(())
    }

    /// Fetch one model entry.
    pub fn get_model(&self, model_name: &str, version: &str) -> Result<Option<ModelRegistryEntry>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT model_name, version, file_path, checksum, checksum_verified,
                        signature_verified, active, download_date, last_verification
                 FROM model_registry WHERE model_name = ?1 AND version = ?2",
                params![model_name, version],
                Self::row_to_model,
            )
            .optional()
        })
    }

    /// The currently active model, if any.
    pub fn active_model(&self) -> Result<Option<ModelRegistryEntry>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT model_name, version, file_path, checksum, checksum_verified,
                        signature_verified, active, download_date, last_verification
                 FROM model_registry WHERE active = 1",
                [],
                Self::row_to_model,
            )
            .optional()
        })
    }

    fn row_to_model(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModelRegistryEntry> {
        Ok(ModelRegistryEntry {
            model_name: row.get(0)?,
            version: row.get(1)?,
            file_path: row.get(2)?,
            checksum: row.get(3)?,
            checksum_verified: row.get::<_, i64>(4)? != 0,
            signature_verified: row.get::<_, i64>(5)? != 0,
            active: row.get::<_, i64>(6)? != 0,
            download_date: row.get(7)?,
            last_verification: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astdex_core::ANNOTATION_SCHEMA_VERSION;

    fn store() -> MetadataStore {
        MetadataStore::open_in_memory().unwrap()
    }

    fn annotation(node_id: &str, file_path: &str) -> Annotation {
        Annotation {
            node_id: node_id.to_string(),
            file_path: file_path.to_string(),
            language: "typescript".to_string(),
            signature: format!("function {node_id}()"),
            summary: format!("function {node_id} in {file_path}"),
            purpose: "computation".to_string(),
            dependencies: vec!["helper".to_string()],
            complexity: 1,
            cognitive: 0,
            tags: vec!["function".to_string()],
            last_updated: unix_millis(),
            schema_version: ANNOTATION_SCHEMA_VERSION,
        }
    }

    fn embedding(node_id: &str) -> EmbeddingRecord {
        EmbeddingRecord {
            node_id: node_id.to_string(),
            vector: vec![0.6, 0.8, 0.0],
            model_id: "feature-hash".to_string(),
            model_version: "1".to_string(),
        }
    }

    #[test]
    fn test_upsert_and_read_back() {
        let store = store();
        store
            .upsert_file_records(
                "a.ts",
                "hash1",
                &[annotation("n1", "a.ts")],
                &[embedding("n1")],
            )
            .unwrap();

        let read = store.get_annotation("n1").unwrap().unwrap();
        assert_eq!(read.file_path, "a.ts");
        assert_eq!(read.dependencies, vec!["helper"]);
        assert_eq!(read.tags, vec!["function"]);

        let emb = store.get_embedding("n1").unwrap().unwrap();
        assert_eq!(emb.vector, vec![0.6, 0.8, 0.0]);
        assert_eq!(emb.model_id, "feature-hash");

        let state = store.get_file_state("a.ts").unwrap().unwrap();
        assert_eq!(state.content_hash, "hash1");
        assert_eq!(state.node_ids, vec!["n1"]);
    }

    #[test]
    fn test_upsert_drops_orphaned_nodes() {
        let store = store();
        store
            .upsert_file_records(
                "a.ts",
                "hash1",
                &[annotation("n1", "a.ts"), annotation("n2", "a.ts")],
                &[embedding("n1"), embedding("n2")],
            )
            .unwrap();

        // Re-index with only n1 surviving
        store
            .upsert_file_records("a.ts", "hash2", &[annotation("n1", "a.ts")], &[embedding("n1")])
            .unwrap();

        assert!(store.get_annotation("n1").unwrap().is_some());
        assert!(store.get_annotation("n2").unwrap().is_none());
        assert!(store.get_embedding("n2").unwrap().is_none());
    }

    #[test]
    fn test_delete_file_cascades() {
        let store = store();
        store
            .upsert_file_records(
                "a.ts",
                "hash1",
                &[annotation("n1", "a.ts")],
                &[embedding("n1")],
            )
            .unwrap();

        let removed = store.delete_file("a.ts").unwrap();
        assert_eq!(removed, vec!["n1"]);
        assert!(store.get_annotation("n1").unwrap().is_none());
        assert!(store.get_embedding("n1").unwrap().is_none());
        assert!(store.get_file_state("a.ts").unwrap().is_none());
    }

    #[test]
    fn test_rename_updates_paths_keeps_node_ids() {
        let store = store();
        store
            .upsert_file_records(
                "a.ts",
                "hash1",
                &[annotation("n1", "a.ts")],
                &[embedding("n1")],
            )
            .unwrap();

        store.rename_file("a.ts", "src/a.ts").unwrap();

        assert!(store.get_file_state("a.ts").unwrap().is_none());
        let state = store.get_file_state("src/a.ts").unwrap().unwrap();
        assert_eq!(state.node_ids, vec!["n1"]);

        let read = store.get_annotation("n1").unwrap().unwrap();
        assert_eq!(read.file_path, "src/a.ts");
    }

    #[test]
    fn test_signature_search() {
        let store = store();
        store
            .upsert_file_records(
                "a.ts",
                "hash1",
                &[annotation("add", "a.ts"), annotation("mul", "a.ts")],
                &[],
            )
            .unwrap();

        let hits = store.annotations_by_signature("add", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_id, "add");
    }

    #[test]
    fn test_embeddings_for_model_ordered_and_filtered() {
        let store = store();
        let mut old = annotation("old", "a.ts");
        old.last_updated = 1_000;
        let mut new = annotation("new", "a.ts");
        new.last_updated = 2_000;

        let mut stale = embedding("stale");
        stale.model_id = "other-model".to_string();

        store
            .upsert_file_records(
                "a.ts",
                "hash1",
                &[old, new, annotation("stale", "a.ts")],
                &[embedding("old"), embedding("new"), stale],
            )
            .unwrap();

        let records = store.embeddings_for_model("feature-hash").unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_query_log_monotonicity() {
        let store = store();
        store.record_query("h1", "add numbers", "{}", 100).unwrap();
        let first = store.query_log_entry("h1").unwrap().unwrap();
        assert_eq!(first.count, 1);
        assert!((first.avg_execution_time_ms - 100.0).abs() < 1e-9);

        store.record_query("h1", "add numbers", "{}", 50).unwrap();
        let second = store.query_log_entry("h1").unwrap().unwrap();
        assert_eq!(second.count, 2);
        assert!((second.avg_execution_time_ms - 75.0).abs() < 1e-9);
        assert!(second.last_seen >= first.last_seen);
        assert_eq!(second.first_seen, first.first_seen);
    }

    #[test]
    fn test_top_queries_respects_min_frequency() {
        let store = store();
        store.record_query("h1", "common", "{}", 10).unwrap();
        store.record_query("h1", "common", "{}", 10).unwrap();
        store.record_query("h1", "common", "{}", 10).unwrap();
        store.record_query("h2", "rare", "{}", 10).unwrap();

        let top = store.top_queries(10, 2).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].query_hash, "h1");
        assert_eq!(top[0].count, 3);
    }

    #[test]
    fn test_prune_query_log() {
        let store = store();
        store.record_query("h1", "q", "{}", 10).unwrap();

        // Nothing younger than the window is pruned
        assert_eq!(store.prune_query_log(30).unwrap(), 0);
        // A zero-day window prunes everything seen before "now"
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(store.prune_query_log(0).unwrap(), 1);
    }

    #[test]
    fn test_l3_round_trip_and_ttl() {
        let store = store();
        store.l3_put("k1", b"payload", 60_000, 100).unwrap();
        assert_eq!(store.l3_get("k1").unwrap().unwrap(), b"payload");

        // Expired entry purges on read
        store.l3_put("k2", b"stale", 1, 100).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.l3_get("k2").unwrap().is_none());
        assert_eq!(store.l3_len().unwrap(), 1);
    }

    #[test]
    fn test_l3_row_cap_evicts_lru() {
        let store = store();
        store.l3_put("k1", b"1", 0, 2).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.l3_put("k2", b"2", 0, 2).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));

        // Touch k1 so k2 becomes the LRU row
        store.l3_get("k1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.l3_put("k3", b"3", 0, 2).unwrap();

        assert_eq!(store.l3_len().unwrap(), 2);
        assert!(store.l3_get("k2").unwrap().is_none());
        assert!(store.l3_get("k1").unwrap().is_some());
    }

    #[test]
    fn test_audit_append_and_rotation_query() {
        let store = store();
        store
            .audit_append("model_verification_failed", &serde_json::json!({"m": 1}))
            .unwrap();
        store
            .audit_append("index_rebuild", &serde_json::json!({"reason": "corruption"}))
            .unwrap();

        let recent = store.audit_recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        // Newest first
        assert_eq!(recent[0].1, "index_rebuild");
    }

    #[test]
    fn test_audit_log_file_mirror() {
        let temp = tempfile::TempDir::new().unwrap();
        let log_path = temp
            .path()
            .join("security")
            .join("logs")
            .join("security-audit.jsonl");

        let store = MetadataStore::open_in_memory()
            .unwrap()
            .with_audit_log(&log_path);

        store
            .audit_append("model_verification_failed", &serde_json::json!({"m": "x"}))
            .unwrap();
        store
            .audit_append("index_rebuild", &serde_json::json!({}))
            .unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "model_verification_failed");
        assert!(first["timestamp"].as_str().is_some());
    }

    #[test]
    fn test_model_registry_verification_gate() {
        let store = store();
        store
            .register_model("feature-hash", "1", None, None)
            .unwrap();

        // Unverified models cannot activate
        let result = store.activate_model("feature-hash", "1");
        assert!(matches!(result, Err(StoreError::ModelVerificationFailed(_))));

        // The blob-less in-tree model verifies trivially
        assert!(store.verify_model("feature-hash", "1").unwrap());
        store.activate_model("feature-hash", "1").unwrap();

        let active = store.active_model().unwrap().unwrap();
        assert_eq!(active.model_name, "feature-hash");
        assert!(active.checksum_verified);
    }

    #[test]
    fn test_model_checksum_verification_against_blob() {
        let temp = tempfile::TempDir::new().unwrap();
        let blob = temp.path().join("model.bin");
        std::fs::write(&blob, b"model-bytes").unwrap();

        let checksum = format!("{:x}", Sha256::digest(b"model-bytes"));

        let store = store();
        store
            .register_model("jina-mini", "2", Some(blob.to_str().unwrap()), Some(&checksum))
            .unwrap();

        assert!(store.verify_model("jina-mini", "2").unwrap());

        // Tamper with the blob: verification fails and is audited
        std::fs::write(&blob, b"tampered").unwrap();
        assert!(!store.verify_model("jina-mini", "2").unwrap());

        let result = store.activate_model("jina-mini", "2");
        assert!(matches!(result, Err(StoreError::ModelVerificationFailed(_))));

        let recent = store.audit_recent(5).unwrap();
        assert!(recent.iter().any(|(_, t, _)| t == "model_verification_failed"));
    }

    #[test]
    fn test_missing_model() {
        let store = store();
        assert!(matches!(
            store.verify_model("ghost", "1"),
            Err(StoreError::ModelNotFound(_))
        ));
    }
}
