//! Query request and response types
//!
//! Transport-agnostic shapes: front-ends supply a query string plus options
//! and consume a structured response. Everything serializes so responses can
//! live in the compressed cache layers byte-for-byte.

use serde::{Deserialize, Serialize};

use astdex_core::Annotation;

/// Search strategies reported in responses.
pub mod strategy {
    pub const SEMANTIC: &str = "semantic_vector_search";
    pub const SIGNATURE: &str = "signature_match";
    pub const FILE: &str = "file_pattern";
    pub const CONTEXTUAL: &str = "contextual_vector_search";
}

/// How results are ordered after scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RankingMode {
    /// Weighted score order
    #[default]
    Relevance,
    /// Fresh annotations first
    Recency,
    /// Penalize repeated files
    Diversity,
}

/// Per-query options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Result cap
    pub max_results: usize,
    /// Minimum final score
    pub min_score: f32,
    /// Globs restricting result file paths
    pub file_filter: Vec<String>,
    /// Canonical language ids restricting results
    pub language_filter: Vec<String>,
    /// Candidate confidence floor (None = config default)
    pub confidence_threshold: Option<f32>,
    /// Include entries tagged `private`
    pub include_private: bool,
    /// Ranking mode
    pub ranking_mode: RankingMode,
    /// Override for the search ef parameter
    pub search_ef: Option<usize>,
    /// Apply context boosts from `QueryContext`
    pub use_context_boosting: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_score: 0.0,
            file_filter: Vec::new(),
            language_filter: Vec::new(),
            confidence_threshold: None,
            include_private: false,
            ranking_mode: RankingMode::Relevance,
            search_ef: None,
            use_context_boosting: false,
        }
    }
}

/// Editor-side context for contextual queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryContext {
    pub current_file: Option<String>,
    pub cursor_position: Option<usize>,
    pub selected_text: Option<String>,
    pub recent_files: Vec<String>,
}

/// One scored result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub annotation: Annotation,
    pub score: f32,
    /// Why this entry matched (never empty)
    pub match_reason: String,
    /// Short code context for display
    pub context_snippet: String,
    /// Node ids of related hits (same file)
    pub related_matches: Vec<String>,
}

/// Parameters the search actually ran with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchParameters {
    pub k: usize,
    pub ef: usize,
    pub model_id: String,
}

/// Per-stage timings and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryMetadata {
    pub embed_time_ms: u64,
    pub vector_search_time_ms: u64,
    pub ranking_time_ms: u64,
    pub total_candidates: usize,
    pub applied_filters: Vec<String>,
    pub search_parameters: SearchParameters,
}

/// Full query response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
    /// Candidates that survived filtering, before the result cap
    pub total_matches: usize,
    pub query_time_ms: u64,
    pub search_strategy: String,
    pub metadata: QueryMetadata,
}

/// One entry of a batch query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchQueryItem {
    pub text: String,
    #[serde(default)]
    pub options: QueryOptions,
}

/// Batch execution limits.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Concurrent queries in flight
    pub max_concurrency: usize,
    /// Abort the whole batch on the first failure
    pub fail_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            fail_on_error: false,
        }
    }
}

/// Outcome of one batch entry: a response or an error message.
#[derive(Debug, Clone)]
pub struct BatchQueryOutcome {
    pub text: String,
    pub response: Option<QueryResponse>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = QueryOptions::default();
        assert_eq!(options.max_results, 10);
        assert!(!options.include_private);
        assert_eq!(options.ranking_mode, RankingMode::Relevance);
    }

    #[test]
    fn test_options_deserialize_partial() {
        let options: QueryOptions =
            serde_json::from_str(r#"{"max_results": 3, "include_private": true}"#).unwrap();
        assert_eq!(options.max_results, 3);
        assert!(options.include_private);
        assert_eq!(options.min_score, 0.0);
    }

    #[test]
    fn test_ranking_mode_serde() {
        assert_eq!(
            serde_json::to_string(&RankingMode::Diversity).unwrap(),
            r#""diversity""#
        );
        let mode: RankingMode = serde_json::from_str(r#""recency""#).unwrap();
        assert_eq!(mode, RankingMode::Recency);
    }
}
