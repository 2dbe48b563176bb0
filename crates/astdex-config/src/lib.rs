//! Astdex Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.astdex/config.toml`
//! - Local config: `.astdex/config.toml` (in workspace)
//! - Programmatic overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → overrides. Every value
//! has a default; validation rejects out-of-range values before any component
//! consumes them.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for Astdex.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AstdexConfig {
    /// Parsing and output configuration
    pub indexing: IndexingConfig,

    /// HNSW vector index parameters
    pub index_params: IndexParams,

    /// Embedding model configuration
    pub model: ModelConfig,

    /// File watching configuration
    pub file_watching: FileWatchingConfig,

    /// Multi-level cache configuration
    pub cache: CacheConfig,

    /// Result ranking configuration
    pub ranking: RankingConfig,

    /// Performance budgets and retry limits
    pub performance: PerformanceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Whether to enqueue telemetry events for the offline queue
    pub enable_telemetry: bool,
}

impl AstdexConfig {
    /// Validate every section.
    ///
    /// Returns the first violation found; components must not consume an
    /// unvalidated config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.indexing.validate()?;
        self.index_params.validate()?;
        self.model.validate()?;
        self.file_watching.validate()?;
        self.cache.validate()?;
        self.ranking.validate()?;
        self.performance.validate()?;
        Ok(())
    }

    /// Apply programmatic overrides on top of the merged configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref dir) = overrides.output_dir {
            self.indexing.output_dir = dir.clone();
        }
        if let Some(concurrency) = overrides.concurrency {
            self.indexing.concurrency = concurrency;
        }
        if let Some(ef_search) = overrides.ef_search {
            self.index_params.ef_search = ef_search;
        }
        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }
        if let Some(telemetry) = overrides.enable_telemetry {
            self.enable_telemetry = telemetry;
        }
    }
}

/// Programmatic configuration overrides.
///
/// Collaborators (front-ends, editor hosts) fill the fields they wish to
/// force; `None` leaves the merged value untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override the output directory
    pub output_dir: Option<PathBuf>,

    /// Override worker concurrency
    pub concurrency: Option<usize>,

    /// Override the runtime `ef_search` parameter
    pub ef_search: Option<usize>,

    /// Override the log level
    pub log_level: Option<String>,

    /// Override telemetry enablement
    pub enable_telemetry: Option<bool>,
}

/// Parsing, output, and ingest batching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Glob patterns selecting files to parse
    pub parse_glob: Vec<String>,

    /// Glob patterns selecting files to watch for changes
    pub watch_glob: Vec<String>,

    /// Root of the persisted layout (index, store, caches, models)
    pub output_dir: PathBuf,

    /// Default number of results for queries that don't specify a limit
    pub top_k: usize,

    /// Lines of context included in result snippets
    pub snippet_lines: usize,

    /// Worker concurrency for CPU-bound stages (0 = one per core)
    pub concurrency: usize,

    /// Nodes per annotation batch
    pub batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parse_glob: vec!["**/*".to_string()],
            watch_glob: vec!["**/*".to_string()],
            output_dir: PathBuf::from("ast_db"),
            top_k: 10,
            snippet_lines: 5,
            concurrency: 0,
            batch_size: 100,
        }
    }
}

impl IndexingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::validation("indexing.top_k", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::validation(
                "indexing.batch_size",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// HNSW index construction and search parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Graph connectivity (neighbors per node per layer)
    pub m: usize,

    /// Candidate-list width during construction
    pub ef_construction: usize,

    /// Default candidate-list width during search
    pub ef_search: usize,

    /// Maximum number of vectors the index will hold
    pub max_elements: usize,

    /// Embedding dimension
    pub dim: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            max_elements: 1_000_000,
            dim: 384,
        }
    }
}

impl IndexParams {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(4..=64).contains(&self.m) {
            return Err(ConfigError::validation(
                "index_params.m",
                "must be between 4 and 64",
            ));
        }
        if !(16..=800).contains(&self.ef_construction) {
            return Err(ConfigError::validation(
                "index_params.ef_construction",
                "must be between 16 and 800",
            ));
        }
        if self.ef_search == 0 {
            return Err(ConfigError::validation(
                "index_params.ef_search",
                "must be at least 1",
            ));
        }
        if self.dim == 0 || self.dim > 4096 {
            return Err(ConfigError::validation(
                "index_params.dim",
                "must be between 1 and 4096",
            ));
        }
        if self.max_elements == 0 {
            return Err(ConfigError::validation(
                "index_params.max_elements",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Embedding model configuration.
///
/// Model binary acquisition is a collaborator concern; the engine only needs
/// to know which model is active and where verified blobs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier activated at startup
    pub default_model: String,

    /// Directory holding model blobs under the output dir
    pub models_dir: PathBuf,

    /// Download timeout passed through to acquisition collaborators
    pub download_timeout_ms: u64,

    /// Concurrent download cap passed through to acquisition collaborators
    pub max_concurrent_downloads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_model: "feature-hash".to_string(),
            models_dir: PathBuf::from("models"),
            download_timeout_ms: 120_000,
            max_concurrent_downloads: 2,
        }
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_model.is_empty() {
            return Err(ConfigError::validation(
                "model.default_model",
                "must not be empty",
            ));
        }
        if self.max_concurrent_downloads == 0 {
            return Err(ConfigError::validation(
                "model.max_concurrent_downloads",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// File watching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileWatchingConfig {
    /// Roots to watch
    pub watch_paths: Vec<PathBuf>,

    /// Glob patterns to include
    pub include_patterns: Vec<String>,

    /// Glob patterns to exclude
    pub exclude_patterns: Vec<String>,

    /// Event coalescing window in milliseconds (0-10000)
    pub debounce_ms: u64,

    /// Files per delta-processing batch (1-1000)
    pub batch_size: usize,

    /// Whether to watch directories recursively
    pub enable_recursive: bool,

    /// Whether to follow symlinks while watching
    pub follow_symlinks: bool,
}

impl Default for FileWatchingConfig {
    fn default() -> Self {
        Self {
            watch_paths: vec![PathBuf::from(".")],
            include_patterns: vec!["**/*".to_string()],
            exclude_patterns: vec![
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
                "**/.git/**".to_string(),
            ],
            debounce_ms: 100,
            batch_size: 50,
            enable_recursive: true,
            follow_symlinks: false,
        }
    }
}

impl FileWatchingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms > 10_000 {
            return Err(ConfigError::validation(
                "file_watching.debounce_ms",
                "must be between 0 and 10000",
            ));
        }
        if !(1..=1000).contains(&self.batch_size) {
            return Err(ConfigError::validation(
                "file_watching.batch_size",
                "must be between 1 and 1000",
            ));
        }
        Ok(())
    }
}

/// Multi-level cache configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// L1 capacity in entries (decoded responses)
    pub l1_max_entries: usize,

    /// L2 capacity in bytes (compressed responses)
    pub l2_max_bytes: usize,

    /// L3 capacity in rows (persistent)
    pub l3_rows: usize,

    /// Default time-to-live for cached responses in milliseconds
    pub default_ttl_ms: u64,

    /// Whether to warm the cache from the query log at startup
    pub warm_on_startup: bool,

    /// How many query-log entries the warmer considers
    pub top_queries_count: usize,

    /// Minimum query frequency for warming
    pub min_frequency: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_entries: 256,
            l2_max_bytes: 32 * 1024 * 1024,
            l3_rows: 10_000,
            default_ttl_ms: 15 * 60 * 1000,
            warm_on_startup: false,
            top_queries_count: 50,
            min_frequency: 2,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.l1_max_entries == 0 {
            return Err(ConfigError::validation(
                "cache.l1_max_entries",
                "must be at least 1",
            ));
        }
        if self.l2_max_bytes == 0 {
            return Err(ConfigError::validation(
                "cache.l2_max_bytes",
                "must be at least 1",
            ));
        }
        if self.l3_rows == 0 {
            return Err(ConfigError::validation("cache.l3_rows", "must be at least 1"));
        }
        Ok(())
    }
}

/// Weights and parameters for result ranking.
///
/// Final score is `alpha*similarity + beta*confidence + gamma*context_boost
/// + delta*recency`; the four weights must sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Weight of vector similarity
    pub alpha: f32,

    /// Weight of annotation confidence
    pub beta: f32,

    /// Weight of contextual boost
    pub gamma: f32,

    /// Weight of recency
    pub delta: f32,

    /// Multiplier applied to `k` when widening the search ef
    pub ef_ratio: usize,

    /// Upper bound for the widened ef
    pub ef_max: usize,

    /// Default candidate confidence threshold
    pub confidence_threshold: f32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.2,
            gamma: 0.1,
            delta: 0.1,
            ef_ratio: 4,
            ef_max: 512,
            confidence_threshold: 0.0,
        }
    }
}

impl RankingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.alpha + self.beta + self.gamma + self.delta;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::validation(
                "ranking",
                format!("alpha+beta+gamma+delta must sum to 1.0, got {sum}"),
            ));
        }
        for (name, w) in [
            ("alpha", self.alpha),
            ("beta", self.beta),
            ("gamma", self.gamma),
            ("delta", self.delta),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(ConfigError::validation(
                    format!("ranking.{name}"),
                    "must be between 0.0 and 1.0",
                ));
            }
        }
        if self.ef_ratio == 0 {
            return Err(ConfigError::validation(
                "ranking.ef_ratio",
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::validation(
                "ranking.confidence_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

/// Processing budgets and retry limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Wall-clock budget for one annotation task in milliseconds
    pub max_processing_time_ms: u64,

    /// Retry cap for storage operations
    pub max_retries: u32,

    /// Default query deadline in milliseconds
    pub query_deadline_ms: u64,

    /// Days of query-log history to retain
    pub query_log_retention_days: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_processing_time_ms: 30_000,
            max_retries: 3,
            query_deadline_ms: 30_000,
            query_log_retention_days: 30,
        }
    }
}

impl PerformanceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_processing_time_ms == 0 {
            return Err(ConfigError::validation(
                "performance.max_processing_time_ms",
                "must be at least 1",
            ));
        }
        if self.query_deadline_ms == 0 {
            return Err(ConfigError::validation(
                "performance.query_deadline_ms",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Output format ("text" or "json")
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
