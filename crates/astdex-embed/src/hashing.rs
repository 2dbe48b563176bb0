//! Feature-hash embedder
//!
//! A deterministic embedding provider that needs no model file: tokens and
//! token bigrams are hashed into `dim` signed buckets and the result is
//! L2-normalized. Identifiers are split on case and separator boundaries so
//! `parseConfigFile` and `parse_config_file` land on the same features.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{EmbedError, Result};
use crate::provider::EmbeddingProvider;

/// Model id registered for this provider.
pub const HASH_MODEL_ID: &str = "feature-hash";

/// Model version; bump when tokenization or hashing changes.
pub const HASH_MODEL_VERSION: &str = "1";

/// Longest input accepted, in characters.
const MAX_INPUT_CHARS: usize = 16_384;

/// First eight bytes of SHA-256, as the feature hash.
fn feature_hash(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(out)
}

/// Strip a trailing plural 's' so `numbers` and `number` share a feature.
fn stem(mut token: String) -> String {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token.pop();
    }
    token
}

/// Split text into lowercase stemmed tokens on non-alphanumeric and case
/// boundaries.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in text.chars() {
        if c.is_alphanumeric() {
            // camelCase boundary starts a new token
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                tokens.push(stem(std::mem::take(&mut current)));
            }
            prev_lower = c.is_lowercase() || c.is_numeric();
            current.extend(c.to_lowercase());
        } else {
            prev_lower = false;
            if !current.is_empty() {
                tokens.push(stem(std::mem::take(&mut current)));
            }
        }
    }
    if !current.is_empty() {
        tokens.push(stem(current));
    }
    tokens
}

/// Deterministic feature-hashing embedding provider.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    /// Create an embedder with the given output dimension.
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Embed one text synchronously.
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let length = text.chars().count();
        if length > MAX_INPUT_CHARS {
            return Err(EmbedError::InputTooLong {
                length,
                limit: MAX_INPUT_CHARS,
            });
        }

        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dim];

        let mut bump = |feature: &str, weight: f32| {
            let hash = feature_hash(feature.as_bytes());
            let bucket = (hash % self.dim as u64) as usize;
            // Sign bit decorrelates colliding features
            let sign = if (hash >> 63) == 0 { weight } else { -weight };
            vector[bucket] += sign;
        };

        for token in &tokens {
            bump(token, 1.0);
        }
        // Bigrams sharpen phrase matches but carry less weight than tokens
        for pair in tokens.windows(2) {
            bump(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        // L2-normalize; an all-zero vector (empty input) gets a fixed unit
        // direction so downstream norms hold
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        } else if self.dim > 0 {
            vector[0] = 1.0;
        }

        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_text(t)).collect()
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model_id(&self) -> &str {
        HASH_MODEL_ID
    }

    fn model_version(&self) -> &str {
        HASH_MODEL_VERSION
    }
}
