//! Astdex Query - retrieval engine and ingest orchestration
//!
//! This crate ties the engine together:
//! - Multi-level query cache (L1 decoded, L2 compressed, L3 persistent)
//! - Query engine (semantic, signature, file, contextual, batch)
//! - Cache warmer driven by the query log
//! - Ingest pipeline (delta → parse → annotate → embed → store + index)
//! - Corruption-triggered index rebuild from the metadata store

mod cache;
mod cancel;
mod engine;
mod error;
mod fingerprint;
mod pipeline;
mod rank;
mod types;
mod warmer;

pub use cache::{CacheSettings, CacheStats, MultiLevelCache, PruneStrategy};
pub use cancel::{QueryToken, DEFAULT_DEADLINE};
pub use engine::QueryEngine;
pub use error::{QueryError, Result};
pub use fingerprint::{canonical_options, fingerprint};
pub use pipeline::{
    load_or_rebuild_index, rebuild_index_from_store, BatchError, IngestPipeline, IngestReport,
};
pub use rank::{confidence_of, context_boost_of, recency_of, Candidate, Ranked};
pub use types::{
    strategy, BatchOptions, BatchQueryItem, BatchQueryOutcome, QueryContext, QueryMetadata,
    QueryOptions, QueryResponse, QueryResult, RankingMode, SearchParameters,
};
pub use warmer::{CacheWarmer, WarmupReport};
