//! Embedding provider trait and record types
//!
//! The provider is the seam between the engine and whatever produces
//! vectors: the in-tree feature-hash embedder, or an externally managed
//! neural model activated through the model registry. All methods are async
//! so remote and spawn-blocking local providers share one contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A stored embedding for one annotated node.
///
/// Vectors are L2-normalized at creation; records whose `model_id` differs
/// from the active model are treated as stale and lazily re-embedded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub node_id: String,
    pub vector: Vec<f32>,
    pub model_id: String,
    pub model_version: String,
}

impl EmbeddingRecord {
    /// L2 norm of the stored vector.
    pub fn norm(&self) -> f32 {
        self.vector.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

/// Embedding provider contract.
///
/// Outputs must be finite, L2-normalized, and deterministic for a given
/// model. Implementations must be `Send + Sync`; batching happens inside
/// the provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts.
    ///
    /// Returns one vector of `dim()` components per input, in input order.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: String) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(vec![text]).await?;
        batch
            .pop()
            .ok_or_else(|| crate::error::EmbedError::Provider("empty batch result".to_string()))
    }

    /// Embedding dimension.
    fn dim(&self) -> usize;

    /// Identifier of the model producing the vectors.
    fn model_id(&self) -> &str;

    /// Version of the model producing the vectors.
    fn model_version(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_norm() {
        let record = EmbeddingRecord {
            node_id: "n".to_string(),
            vector: vec![0.6, 0.8],
            model_id: "m".to_string(),
            model_version: "1".to_string(),
        };
        assert!((record.norm() - 1.0).abs() < 1e-6);
    }
}
