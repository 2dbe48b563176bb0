//! Error types for astdex-embed

use thiserror::Error;

/// Errors that can occur during embedding generation
#[derive(Error, Debug)]
pub enum EmbedError {
    /// Provider failed to produce embeddings
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// Input exceeded the provider's length bound
    #[error("input too long: {length} characters (limit {limit})")]
    InputTooLong { length: usize, limit: usize },

    /// Provider returned a vector of the wrong dimension
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The requested model is not available
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
}

/// Result type for astdex-embed operations
pub type Result<T> = std::result::Result<T, EmbedError>;
