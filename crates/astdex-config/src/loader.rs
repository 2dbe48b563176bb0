//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.astdex/config.toml`
//! 2. Local config: `.astdex/config.toml` (in workspace)
//! 3. Programmatic overrides
//!
//! Later sources override earlier ones. The merged result is validated before
//! it is returned.

use crate::error::ConfigError;
use crate::{AstdexConfig, ConfigOverrides};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Global configuration directory name.
const GLOBAL_CONFIG_DIR: &str = ".astdex";

/// Local configuration directory name.
const LOCAL_CONFIG_DIR: &str = ".astdex";

/// Configuration loader with caching and inheritance support.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.astdex`)
    global_config_dir: Option<PathBuf>,

    /// Cached global config
    global_config: Option<AstdexConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    ///
    /// Automatically detects the global config directory (`~/.astdex`).
    pub fn new() -> Self {
        let global_config_dir = dirs::home_dir().map(|h| h.join(GLOBAL_CONFIG_DIR));

        Self {
            global_config_dir,
            global_config: None,
        }
    }

    /// Create a loader with a custom global config directory.
    ///
    /// Useful for testing.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
            global_config: None,
        }
    }

    /// Get the global config file path.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Get the local config file path for a workspace.
    pub fn local_config_path(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(LOCAL_CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Load and validate configuration for a workspace with optional overrides.
    ///
    /// Merges config in order: global → local → overrides.
    pub fn load(
        &mut self,
        workspace_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<AstdexConfig, ConfigError> {
        let mut config = AstdexConfig::default();

        if let Some(global_config) = self.load_global()? {
            config = merge_configs(config, global_config);
        }

        if let Some(local_config) = self.load_local(workspace_root)? {
            config = merge_configs(config, local_config);
        }

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;

        Ok(config)
    }

    /// Load only the global configuration.
    pub fn load_global(&mut self) -> Result<Option<AstdexConfig>, ConfigError> {
        if let Some(ref config) = self.global_config {
            return Ok(Some(config.clone()));
        }

        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("Global config not found at {:?}", global_path);
            return Ok(None);
        }

        debug!("Loading global config from {:?}", global_path);
        let config = load_config_file(&global_path)?;

        self.global_config = Some(config.clone());

        Ok(Some(config))
    }

    /// Load only the local configuration for a workspace.
    pub fn load_local(&self, workspace_root: &Path) -> Result<Option<AstdexConfig>, ConfigError> {
        let local_path = self.local_config_path(workspace_root);

        if !local_path.exists() {
            trace!("Local config not found at {:?}", local_path);
            return Ok(None);
        }

        debug!("Loading local config from {:?}", local_path);
        load_config_file(&local_path).map(Some)
    }

    /// Save configuration to the global config file.
    pub fn save_global(&self, config: &AstdexConfig) -> Result<(), ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };

        let global_path = global_dir.join(CONFIG_FILE_NAME);
        save_config_file(&global_path, config)
    }

    /// Save configuration to the local config file for a workspace.
    pub fn save_local(
        &self,
        workspace_root: &Path,
        config: &AstdexConfig,
    ) -> Result<(), ConfigError> {
        let local_path = self.local_config_path(workspace_root);
        save_config_file(&local_path, config)
    }

    /// Initialize local configuration for a workspace.
    ///
    /// Creates `.astdex/config.toml` with default configuration.
    pub fn init_local(&self, workspace_root: &Path) -> Result<PathBuf, ConfigError> {
        let local_dir = workspace_root.join(LOCAL_CONFIG_DIR);

        if !local_dir.exists() {
            std::fs::create_dir_all(&local_dir)
                .map_err(|e| ConfigError::create_dir(&local_dir, e))?;
        }

        let config_path = local_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            let default_config = AstdexConfig::default();
            save_config_file(&config_path, &default_config)?;
        }

        Ok(config_path)
    }

    /// Clear cached global configuration.
    ///
    /// Forces reload on next `load_global()` call.
    pub fn clear_cache(&mut self) {
        self.global_config = None;
    }
}

/// Load a configuration file from disk.
fn load_config_file(path: &Path) -> Result<AstdexConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;

    toml::from_str(&content).map_err(|e| ConfigError::parse_toml(path, e))
}

/// Save a configuration file to disk.
fn save_config_file(path: &Path, config: &AstdexConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
}

/// Merge two configurations, with `overlay` taking precedence.
///
/// This performs a field-by-field merge, allowing partial configs.
fn merge_configs(base: AstdexConfig, overlay: AstdexConfig) -> AstdexConfig {
    let defaults = AstdexConfig::default();

    AstdexConfig {
        indexing: merge_indexing(base.indexing, overlay.indexing, &defaults.indexing),
        index_params: merge_index_params(
            base.index_params,
            overlay.index_params,
            &defaults.index_params,
        ),
        model: merge_model(base.model, overlay.model, &defaults.model),
        file_watching: merge_file_watching(
            base.file_watching,
            overlay.file_watching,
            &defaults.file_watching,
        ),
        cache: merge_cache(base.cache, overlay.cache, &defaults.cache),
        ranking: merge_ranking(base.ranking, overlay.ranking, &defaults.ranking),
        performance: merge_performance(
            base.performance,
            overlay.performance,
            &defaults.performance,
        ),
        logging: merge_logging(base.logging, overlay.logging, &defaults.logging),
        enable_telemetry: overlay.enable_telemetry || base.enable_telemetry,
    }
}

/// Pick overlay when it differs from the default, otherwise keep base.
macro_rules! pick {
    ($base:expr, $overlay:expr, $default:expr) => {
        if $overlay != $default {
            $overlay
        } else {
            $base
        }
    };
}

fn merge_indexing(
    base: crate::IndexingConfig,
    overlay: crate::IndexingConfig,
    defaults: &crate::IndexingConfig,
) -> crate::IndexingConfig {
    crate::IndexingConfig {
        parse_glob: pick!(base.parse_glob, overlay.parse_glob, defaults.parse_glob),
        watch_glob: pick!(base.watch_glob, overlay.watch_glob, defaults.watch_glob),
        output_dir: pick!(base.output_dir, overlay.output_dir, defaults.output_dir),
        top_k: pick!(base.top_k, overlay.top_k, defaults.top_k),
        snippet_lines: pick!(
            base.snippet_lines,
            overlay.snippet_lines,
            defaults.snippet_lines
        ),
        concurrency: pick!(base.concurrency, overlay.concurrency, defaults.concurrency),
        batch_size: pick!(base.batch_size, overlay.batch_size, defaults.batch_size),
    }
}

fn merge_index_params(
    base: crate::IndexParams,
    overlay: crate::IndexParams,
    defaults: &crate::IndexParams,
) -> crate::IndexParams {
    crate::IndexParams {
        m: pick!(base.m, overlay.m, defaults.m),
        ef_construction: pick!(
            base.ef_construction,
            overlay.ef_construction,
            defaults.ef_construction
        ),
        ef_search: pick!(base.ef_search, overlay.ef_search, defaults.ef_search),
        max_elements: pick!(
            base.max_elements,
            overlay.max_elements,
            defaults.max_elements
        ),
        dim: pick!(base.dim, overlay.dim, defaults.dim),
    }
}

fn merge_model(
    base: crate::ModelConfig,
    overlay: crate::ModelConfig,
    defaults: &crate::ModelConfig,
) -> crate::ModelConfig {
    crate::ModelConfig {
        default_model: pick!(
            base.default_model,
            overlay.default_model,
            defaults.default_model
        ),
        models_dir: pick!(base.models_dir, overlay.models_dir, defaults.models_dir),
        download_timeout_ms: pick!(
            base.download_timeout_ms,
            overlay.download_timeout_ms,
            defaults.download_timeout_ms
        ),
        max_concurrent_downloads: pick!(
            base.max_concurrent_downloads,
            overlay.max_concurrent_downloads,
            defaults.max_concurrent_downloads
        ),
    }
}

fn merge_file_watching(
    base: crate::FileWatchingConfig,
    overlay: crate::FileWatchingConfig,
    defaults: &crate::FileWatchingConfig,
) -> crate::FileWatchingConfig {
    crate::FileWatchingConfig {
        watch_paths: pick!(base.watch_paths, overlay.watch_paths, defaults.watch_paths),
        // Patterns extend rather than replace
        include_patterns: merge_patterns(base.include_patterns, overlay.include_patterns),
        exclude_patterns: merge_patterns(base.exclude_patterns, overlay.exclude_patterns),
        debounce_ms: pick!(base.debounce_ms, overlay.debounce_ms, defaults.debounce_ms),
        batch_size: pick!(base.batch_size, overlay.batch_size, defaults.batch_size),
        enable_recursive: overlay.enable_recursive,
        follow_symlinks: overlay.follow_symlinks,
    }
}

fn merge_patterns(base: Vec<String>, overlay: Vec<String>) -> Vec<String> {
    let mut patterns = base;
    for pattern in overlay {
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }
    patterns
}

fn merge_cache(
    base: crate::CacheConfig,
    overlay: crate::CacheConfig,
    defaults: &crate::CacheConfig,
) -> crate::CacheConfig {
    crate::CacheConfig {
        l1_max_entries: pick!(
            base.l1_max_entries,
            overlay.l1_max_entries,
            defaults.l1_max_entries
        ),
        l2_max_bytes: pick!(
            base.l2_max_bytes,
            overlay.l2_max_bytes,
            defaults.l2_max_bytes
        ),
        l3_rows: pick!(base.l3_rows, overlay.l3_rows, defaults.l3_rows),
        default_ttl_ms: pick!(
            base.default_ttl_ms,
            overlay.default_ttl_ms,
            defaults.default_ttl_ms
        ),
        warm_on_startup: overlay.warm_on_startup || base.warm_on_startup,
        top_queries_count: pick!(
            base.top_queries_count,
            overlay.top_queries_count,
            defaults.top_queries_count
        ),
        min_frequency: pick!(
            base.min_frequency,
            overlay.min_frequency,
            defaults.min_frequency
        ),
    }
}

fn merge_ranking(
    base: crate::RankingConfig,
    overlay: crate::RankingConfig,
    defaults: &crate::RankingConfig,
) -> crate::RankingConfig {
    // Weights travel as a unit: a section that changes any weight wins whole
    let overlay_changed = overlay.alpha != defaults.alpha
        || overlay.beta != defaults.beta
        || overlay.gamma != defaults.gamma
        || overlay.delta != defaults.delta;

    crate::RankingConfig {
        alpha: if overlay_changed { overlay.alpha } else { base.alpha },
        beta: if overlay_changed { overlay.beta } else { base.beta },
        gamma: if overlay_changed { overlay.gamma } else { base.gamma },
        delta: if overlay_changed { overlay.delta } else { base.delta },
        ef_ratio: pick!(base.ef_ratio, overlay.ef_ratio, defaults.ef_ratio),
        ef_max: pick!(base.ef_max, overlay.ef_max, defaults.ef_max),
        confidence_threshold: pick!(
            base.confidence_threshold,
            overlay.confidence_threshold,
            defaults.confidence_threshold
        ),
    }
}

fn merge_performance(
    base: crate::PerformanceConfig,
    overlay: crate::PerformanceConfig,
    defaults: &crate::PerformanceConfig,
) -> crate::PerformanceConfig {
    crate::PerformanceConfig {
        max_processing_time_ms: pick!(
            base.max_processing_time_ms,
            overlay.max_processing_time_ms,
            defaults.max_processing_time_ms
        ),
        max_retries: pick!(base.max_retries, overlay.max_retries, defaults.max_retries),
        query_deadline_ms: pick!(
            base.query_deadline_ms,
            overlay.query_deadline_ms,
            defaults.query_deadline_ms
        ),
        query_log_retention_days: pick!(
            base.query_log_retention_days,
            overlay.query_log_retention_days,
            defaults.query_log_retention_days
        ),
    }
}

fn merge_logging(
    base: crate::LoggingConfig,
    overlay: crate::LoggingConfig,
    defaults: &crate::LoggingConfig,
) -> crate::LoggingConfig {
    crate::LoggingConfig {
        level: pick!(base.level, overlay.level, defaults.level),
        format: pick!(base.format, overlay.format, defaults.format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config(content: &str, dir: &Path) -> PathBuf {
        let config_dir = dir.join(".astdex");
        std::fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_default_config() {
        let temp = TempDir::new().unwrap();
        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.indexing.output_dir, PathBuf::from("ast_db"));
        assert_eq!(config.index_params.m, 16);
    }

    #[test]
    fn test_load_local_config() {
        let temp = TempDir::new().unwrap();
        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        create_test_config(
            r#"
            [indexing]
            output_dir = "custom_db"

            [index_params]
            m = 32
            "#,
            temp.path(),
        );

        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.indexing.output_dir, PathBuf::from("custom_db"));
        assert_eq!(config.index_params.m, 32);
    }

    #[test]
    fn test_global_overrides_default() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");

        std::fs::create_dir_all(&global_dir).unwrap();
        std::fs::write(
            global_dir.join("config.toml"),
            r#"
            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let mut loader = ConfigLoader::with_global_dir(&global_dir);
        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_local_overrides_global() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");

        std::fs::create_dir_all(&global_dir).unwrap();
        std::fs::write(
            global_dir.join("config.toml"),
            r#"
            [logging]
            level = "debug"

            [index_params]
            ef_search = 96
            "#,
        )
        .unwrap();

        // Local overrides ef_search but not log level
        create_test_config(
            r#"
            [index_params]
            ef_search = 200
            "#,
            temp.path(),
        );

        let mut loader = ConfigLoader::with_global_dir(&global_dir);
        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.index_params.ef_search, 200);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_overrides_win_over_all() {
        let temp = TempDir::new().unwrap();

        create_test_config(
            r#"
            [index_params]
            ef_search = 200
            "#,
            temp.path(),
        );

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let overrides = ConfigOverrides {
            ef_search: Some(300),
            log_level: Some("trace".to_string()),
            ..Default::default()
        };

        let config = loader.load(temp.path(), Some(&overrides)).unwrap();

        assert_eq!(config.index_params.ef_search, 300);
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_invalid_merged_config_rejected() {
        let temp = TempDir::new().unwrap();

        create_test_config(
            r#"
            [index_params]
            m = 2
            "#,
            temp.path(),
        );

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        let result = loader.load(temp.path(), None);

        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_save_and_load_config() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let mut config = AstdexConfig::default();
        config.index_params.ef_search = 111;
        config.logging.level = "warn".to_string();

        loader.save_local(temp.path(), &config).unwrap();

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        let loaded = loader.load(temp.path(), None).unwrap();

        assert_eq!(loaded.index_params.ef_search, 111);
        assert_eq!(loaded.logging.level, "warn");
    }

    #[test]
    fn test_init_local_creates_config() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let config_path = loader.init_local(temp.path()).unwrap();

        assert!(config_path.exists());
        assert!(config_path.ends_with(".astdex/config.toml"));

        let content = std::fs::read_to_string(&config_path).unwrap();
        let _: AstdexConfig = toml::from_str(&content).unwrap();
    }

    #[test]
    fn test_exclude_patterns_merge() {
        let base = crate::FileWatchingConfig {
            exclude_patterns: vec!["**/node_modules/**".to_string()],
            ..Default::default()
        };

        let overlay = crate::FileWatchingConfig {
            exclude_patterns: vec!["**/custom/**".to_string()],
            ..Default::default()
        };

        let merged = merge_file_watching(base, overlay, &crate::FileWatchingConfig::default());

        assert!(merged
            .exclude_patterns
            .contains(&"**/node_modules/**".to_string()));
        assert!(merged.exclude_patterns.contains(&"**/custom/**".to_string()));
    }

    #[test]
    fn test_cache_clearing() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");

        std::fs::create_dir_all(&global_dir).unwrap();
        std::fs::write(
            global_dir.join("config.toml"),
            r#"
            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let mut loader = ConfigLoader::with_global_dir(&global_dir);

        let _ = loader.load_global().unwrap();
        assert!(loader.global_config.is_some());

        loader.clear_cache();
        assert!(loader.global_config.is_none());
    }
}
