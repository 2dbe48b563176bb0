//! SQLite Schema Definitions for the Metadata Store
//!
//! One embedded database (`meta.db`) hosts every persistent table:
//! annotations, embeddings, file state, the model registry with its
//! verification history, the query log, the L3 cache, and the append-only
//! security audit.

/// Schema version for the metadata database.
pub const STORE_SCHEMA_VERSION: &str = "1.0";

/// SQL to create the annotations table.
///
/// One row per annotated node; `node_id` is the content-hash id.
pub const SCHEMA_CREATE_ANNOTATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS annotations (
    node_id TEXT PRIMARY KEY NOT NULL,
    file_path TEXT NOT NULL,
    language TEXT NOT NULL,
    signature TEXT NOT NULL,
    summary TEXT NOT NULL,
    purpose TEXT NOT NULL,

    -- JSON array of dependency names
    dependencies_json TEXT NOT NULL,

    complexity INTEGER NOT NULL,
    cognitive INTEGER NOT NULL,

    -- JSON array of semantic tags
    tags_json TEXT NOT NULL,

    -- Unix milliseconds of last (re-)annotation
    last_updated INTEGER NOT NULL,
    schema_version INTEGER NOT NULL
)
"#;

/// SQL to create the embeddings table.
///
/// Vectors are little-endian f32 blobs; rows with a stale model_id are
/// treated as cache misses by readers.
pub const SCHEMA_CREATE_EMBEDDINGS: &str = r#"
CREATE TABLE IF NOT EXISTS embeddings (
    node_id TEXT PRIMARY KEY NOT NULL,
    model_id TEXT NOT NULL,
    model_version TEXT NOT NULL,
    dim INTEGER NOT NULL,
    vector BLOB NOT NULL
)
"#;

/// SQL to create the file state table.
pub const SCHEMA_CREATE_FILE_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS file_state (
    path TEXT PRIMARY KEY NOT NULL,
    content_hash TEXT NOT NULL,
    last_indexed INTEGER NOT NULL,

    -- JSON array of node ids owned by this file
    node_ids_json TEXT NOT NULL
)
"#;

/// SQL to create the model registry table.
pub const SCHEMA_CREATE_MODEL_REGISTRY: &str = r#"
CREATE TABLE IF NOT EXISTS model_registry (
    model_name TEXT NOT NULL,
    version TEXT NOT NULL,
    file_path TEXT,
    checksum TEXT,
    checksum_verified INTEGER NOT NULL DEFAULT 0,
    signature_verified INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 0,
    download_date TEXT,
    last_verification TEXT,
    PRIMARY KEY (model_name, version)
)
"#;

/// SQL to create the verification history table.
pub const SCHEMA_CREATE_VERIFICATION_HISTORY: &str = r#"
CREATE TABLE IF NOT EXISTS verification_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_name TEXT NOT NULL,
    version TEXT NOT NULL,
    verified_at TEXT NOT NULL,
    ok INTEGER NOT NULL,
    details TEXT
)
"#;

/// SQL to create the query log table.
///
/// One row per query fingerprint; counts and rolling latency feed the cache
/// warmer.
pub const SCHEMA_CREATE_QUERY_LOG: &str = r#"
CREATE TABLE IF NOT EXISTS query_log (
    query_hash TEXT PRIMARY KEY NOT NULL,
    text TEXT NOT NULL,
    options_json TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 1,
    avg_execution_time_ms REAL NOT NULL,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL
)
"#;

/// SQL to create the persistent cache table (L3).
pub const SCHEMA_CREATE_L3_CACHE: &str = r#"
CREATE TABLE IF NOT EXISTS l3_cache (
    key TEXT PRIMARY KEY NOT NULL,
    payload BLOB NOT NULL,
    size_bytes INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    last_accessed INTEGER NOT NULL,
    hit_count INTEGER NOT NULL DEFAULT 0,
    ttl_ms INTEGER NOT NULL
)
"#;

/// SQL to create the append-only security audit table.
pub const SCHEMA_CREATE_SECURITY_AUDIT: &str = r#"
CREATE TABLE IF NOT EXISTS security_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    details_json TEXT NOT NULL
)
"#;

/// SQL to create indexes for efficient queries.
pub const SCHEMA_CREATE_INDEXES: &str = r#"
-- File-based annotation lookups
CREATE INDEX IF NOT EXISTS idx_annotations_file ON annotations(file_path);

-- Language filtering
CREATE INDEX IF NOT EXISTS idx_annotations_language ON annotations(language);

-- Rebuild ordering
CREATE INDEX IF NOT EXISTS idx_annotations_updated ON annotations(last_updated);

-- Stale-model sweeps
CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(model_id);

-- Warmer ordering
CREATE INDEX IF NOT EXISTS idx_query_log_count ON query_log(count);

-- L3 LRU eviction
CREATE INDEX IF NOT EXISTS idx_l3_last_accessed ON l3_cache(last_accessed)
"#;

/// SQL to create the metadata table holding the schema version.
pub const SCHEMA_CREATE_META: &str = r#"
CREATE TABLE IF NOT EXISTS store_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

/// All table creation statements, in order.
pub const ALL_TABLES: &[&str] = &[
    SCHEMA_CREATE_ANNOTATIONS,
    SCHEMA_CREATE_EMBEDDINGS,
    SCHEMA_CREATE_FILE_STATE,
    SCHEMA_CREATE_MODEL_REGISTRY,
    SCHEMA_CREATE_VERIFICATION_HISTORY,
    SCHEMA_CREATE_QUERY_LOG,
    SCHEMA_CREATE_L3_CACHE,
    SCHEMA_CREATE_SECURITY_AUDIT,
    SCHEMA_CREATE_META,
];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();

        for statement in ALL_TABLES {
            conn.execute(statement, []).unwrap();
        }

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "annotations",
            "embeddings",
            "file_state",
            "model_registry",
            "verification_history",
            "query_log",
            "l3_cache",
            "security_audit",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_schema_creates_indexes() {
        let conn = Connection::open_in_memory().unwrap();

        for statement in ALL_TABLES {
            conn.execute(statement, []).unwrap();
        }
        conn.execute_batch(SCHEMA_CREATE_INDEXES).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(indexes.contains(&"idx_annotations_file".to_string()));
        assert!(indexes.contains(&"idx_embeddings_model".to_string()));
        assert!(indexes.contains(&"idx_l3_last_accessed".to_string()));
    }
}
