//! Error types for astdex-store

use thiserror::Error;

/// Errors that can occur in metadata store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying SQLite error
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Model is not registered
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Model cannot be activated before checksum verification
    #[error("model verification failed: {0}")]
    ModelVerificationFailed(String),

    /// Stored blob has an unexpected shape
    #[error("corrupt stored value: {0}")]
    CorruptValue(String),
}

/// Result type for astdex-store operations
pub type Result<T> = std::result::Result<T, StoreError>;
