//! Astdex Store - embedded metadata persistence
//!
//! One SQLite database hosts every persistent table of the engine:
//! annotations, embeddings, file state, the model registry and its
//! verification history, the query log, the L3 cache layer, and the
//! append-only security audit.

mod error;
mod retry;
mod schema;
mod store;

pub use error::{Result, StoreError};
pub use retry::{is_retryable, BackoffStrategy, RetryPolicy};
pub use schema::STORE_SCHEMA_VERSION;
pub use store::{FileState, MetadataStore, ModelRegistryEntry, QueryLogEntry};
