//! Astdex Embed - embedding providers
//!
//! Defines the provider contract used by the query engine and ingest
//! pipeline, the stored `EmbeddingRecord` type, the embedding-text builder,
//! and the deterministic feature-hash provider that ships in-tree.
//!
//! Neural model acquisition is a collaborator concern: external models are
//! activated through the metadata store's model registry and plugged in as
//! `EmbeddingProvider` implementations.

mod error;
mod hashing;
mod provider;
mod text;

pub use error::{EmbedError, Result};
pub use hashing::{HashEmbedder, HASH_MODEL_ID, HASH_MODEL_VERSION};
pub use provider::{EmbeddingProvider, EmbeddingRecord};
pub use text::embedding_text;
