//! Error types for astdex-query
//!
//! Every public operation returns one of these kinds with a message and
//! whatever structured context the stage had. Internal recoveries (cache
//! misses, retried storage calls, corruption-triggered rebuilds that
//! succeed) are invisible to callers.

use thiserror::Error;

/// Errors surfaced by query and ingest operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// A configuration value failed validation
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Language id not registered
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Active model is missing
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Model failed checksum verification
    #[error("model verification failed: {0}")]
    ModelVerificationFailed(String),

    /// Index failed integrity verification and a rebuild is required
    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    /// Corruption rebuild failed
    #[error("index rebuild failed: {0}")]
    RebuildFailed(String),

    /// Query exceeded its deadline
    #[error("query timed out")]
    Timeout,

    /// Query was canceled by its token
    #[error("query canceled")]
    Canceled,

    /// Storage failure after retries
    #[error(transparent)]
    Storage(#[from] astdex_store::StoreError),

    /// Embedding failure
    #[error(transparent)]
    Embedding(#[from] astdex_embed::EmbedError),

    /// Vector index failure
    #[error(transparent)]
    Index(#[from] astdex_index::IndexError),

    /// Memory or descriptor cap hit; load was shed
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// IO failure outside the store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl QueryError {
    /// Exit code contract for CLI collaborators.
    pub fn exit_code(&self) -> i32 {
        match self {
            QueryError::ConfigInvalid(_) => 2,
            QueryError::RebuildFailed(_) => 3,
            QueryError::UnsupportedLanguage(_) => 4,
            QueryError::ModelVerificationFailed(_) => 5,
            _ => 1,
        }
    }
}

impl From<astdex_config::ConfigError> for QueryError {
    fn from(err: astdex_config::ConfigError) -> Self {
        QueryError::ConfigInvalid(err.to_string())
    }
}

impl From<astdex_core::LanguageError> for QueryError {
    fn from(err: astdex_core::LanguageError) -> Self {
        match err {
            astdex_core::LanguageError::UnsupportedLanguage(id) => {
                QueryError::UnsupportedLanguage(id)
            }
            other => QueryError::Other(other.to_string()),
        }
    }
}

/// Result type for astdex-query operations
pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(QueryError::ConfigInvalid("m".into()).exit_code(), 2);
        assert_eq!(QueryError::RebuildFailed("r".into()).exit_code(), 3);
        assert_eq!(QueryError::UnsupportedLanguage("x".into()).exit_code(), 4);
        assert_eq!(QueryError::ModelVerificationFailed("m".into()).exit_code(), 5);
        assert_eq!(QueryError::Timeout.exit_code(), 1);
        assert_eq!(QueryError::Canceled.exit_code(), 1);
    }
}
