//! Error types for astdex-index

use thiserror::Error;

/// Errors that can occur in vector index operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// Vector has the wrong dimension
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector contains NaN or infinity
    #[error("vector for '{0}' is not finite")]
    NonFiniteVector(String),

    /// Node id already present and upsert was not requested
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    /// Index is at max_elements
    #[error("index capacity exceeded: max_elements = {max_elements}")]
    CapacityExceeded { max_elements: usize },

    /// Invalid index configuration
    #[error("invalid index configuration: {0}")]
    InvalidConfig(String),

    /// Snapshot failed integrity verification
    #[error("index corrupted: {0}")]
    Corrupted(String),

    /// Snapshot encoding failed
    #[error("snapshot encode error: {0}")]
    Encode(String),

    /// Sidecar serialization error
    #[error("sidecar serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for astdex-index operations
pub type Result<T> = std::result::Result<T, IndexError>;
