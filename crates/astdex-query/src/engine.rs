//! Query Engine
//!
//! Orchestrates the query pipeline: fingerprint → cache lookup → embed →
//! ANN search → hydrate + filter → rank → respond → write-through →
//! query log. Each query runs as a small state machine whose stages check
//! the cancellation token at their boundaries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

use astdex_config::AstdexConfig;
use astdex_embed::EmbeddingProvider;
use astdex_index::VectorIndex;
use astdex_store::MetadataStore;

use crate::cache::MultiLevelCache;
use crate::cancel::QueryToken;
use crate::error::{QueryError, Result};
use crate::fingerprint::{canonical_options, fingerprint};
use crate::rank::{confidence_of, rank, Candidate, Ranked};
use crate::types::{
    strategy, BatchOptions, BatchQueryItem, BatchQueryOutcome, QueryContext, QueryMetadata,
    QueryOptions, QueryResponse, QueryResult, SearchParameters,
};

/// Related matches listed per result.
const MAX_RELATED: usize = 3;

/// Serves semantic, signature, file, and contextual queries.
///
/// All collaborators arrive through the constructor; tests pass fakes.
pub struct QueryEngine {
    config: AstdexConfig,
    root: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    store: Arc<MetadataStore>,
    cache: Arc<MultiLevelCache>,
}

impl QueryEngine {
    pub fn new(
        config: AstdexConfig,
        root: PathBuf,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        store: Arc<MetadataStore>,
        cache: Arc<MultiLevelCache>,
    ) -> Self {
        Self {
            config,
            root,
            embedder,
            index,
            store,
            cache,
        }
    }

    /// The cache serving this engine.
    pub fn cache(&self) -> &Arc<MultiLevelCache> {
        &self.cache
    }

    /// The store serving this engine.
    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    fn default_token(&self) -> QueryToken {
        QueryToken::with_deadline(Duration::from_millis(
            self.config.performance.query_deadline_ms,
        ))
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Natural-language search over annotation embeddings.
    pub async fn semantic_query(&self, text: &str, options: &QueryOptions) -> Result<QueryResponse> {
        self.semantic_query_with_token(text, options, &self.default_token())
            .await
    }

    /// Semantic search with an explicit cancellation token.
    pub async fn semantic_query_with_token(
        &self,
        text: &str,
        options: &QueryOptions,
        token: &QueryToken,
    ) -> Result<QueryResponse> {
        self.vector_pipeline(text, options, None, strategy::SEMANTIC, token)
            .await
    }

    /// Semantic search boosted by editor context.
    pub async fn contextual_query(
        &self,
        text: &str,
        context: &QueryContext,
        options: &QueryOptions,
    ) -> Result<QueryResponse> {
        self.vector_pipeline(
            text,
            options,
            Some(context),
            strategy::CONTEXTUAL,
            &self.default_token(),
        )
        .await
    }

    /// Signature substring search over the store.
    pub async fn signature_query(&self, text: &str, options: &QueryOptions) -> Result<QueryResponse> {
        let token = self.default_token();
        let started = Instant::now();

        let key = self.cache_key(strategy::SIGNATURE, text, options);
        token.check()?;
        if let Some(cached) = self.cache.get(&key) {
            self.log_query(&key, text, options, started.elapsed());
            return Ok((*cached).clone());
        }

        token.check()?;
        let k = options.max_results.max(1);
        let rank_start = Instant::now();
        let matches = self.store.annotations_by_signature(text, k * 4)?;
        let total_candidates = matches.len();

        let query_tokens = lower_tokens(text);
        let candidates: Vec<Candidate> = matches
            .into_iter()
            .map(|annotation| {
                let similarity = token_overlap(&query_tokens, &annotation.signature);
                Candidate {
                    annotation,
                    similarity,
                }
            })
            .collect();

        token.check()?;
        let (results, total_matches, applied_filters) =
            self.filter_and_rank(candidates, options, None, text)?;

        let response = QueryResponse {
            results,
            total_matches,
            query_time_ms: started.elapsed().as_millis() as u64,
            search_strategy: strategy::SIGNATURE.to_string(),
            metadata: QueryMetadata {
                embed_time_ms: 0,
                vector_search_time_ms: 0,
                ranking_time_ms: rank_start.elapsed().as_millis() as u64,
                total_candidates,
                applied_filters,
                search_parameters: SearchParameters {
                    k,
                    ef: 0,
                    model_id: self.embedder.model_id().to_string(),
                },
            },
        };

        self.finish(&key, text, options, &response, started.elapsed())?;
        Ok(response)
    }

    /// Glob search over indexed file paths.
    pub async fn file_query(&self, pattern: &str, options: &QueryOptions) -> Result<QueryResponse> {
        let token = self.default_token();
        let started = Instant::now();

        let key = self.cache_key(strategy::FILE, pattern, options);
        token.check()?;
        if let Some(cached) = self.cache.get(&key) {
            self.log_query(&key, pattern, options, started.elapsed());
            return Ok((*cached).clone());
        }

        let glob = Glob::new(pattern)
            .map_err(|e| QueryError::ConfigInvalid(format!("bad file pattern '{pattern}': {e}")))?
            .compile_matcher();

        token.check()?;
        let mut candidates = Vec::new();
        for state in self.store.all_file_states()? {
            if glob.is_match(&state.path) {
                for annotation in self.store.annotations_for_file(&state.path)? {
                    candidates.push(Candidate {
                        annotation,
                        similarity: 1.0,
                    });
                }
            }
        }
        let total_candidates = candidates.len();

        token.check()?;
        let rank_start = Instant::now();
        let (results, total_matches, applied_filters) =
            self.filter_and_rank(candidates, options, None, pattern)?;

        let response = QueryResponse {
            results,
            total_matches,
            query_time_ms: started.elapsed().as_millis() as u64,
            search_strategy: strategy::FILE.to_string(),
            metadata: QueryMetadata {
                embed_time_ms: 0,
                vector_search_time_ms: 0,
                ranking_time_ms: rank_start.elapsed().as_millis() as u64,
                total_candidates,
                applied_filters,
                search_parameters: SearchParameters {
                    k: options.max_results,
                    ef: 0,
                    model_id: self.embedder.model_id().to_string(),
                },
            },
        };

        self.finish(&key, pattern, options, &response, started.elapsed())?;
        Ok(response)
    }

    /// Run a batch of semantic queries under a concurrency cap.
    ///
    /// With `fail_on_error` unset, failing entries still produce an outcome
    /// with the error field set.
    pub async fn batch_query(
        self: Arc<Self>,
        items: Vec<BatchQueryItem>,
        batch: BatchOptions,
    ) -> Result<Vec<BatchQueryOutcome>> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(batch.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let engine = Arc::clone(&self);
            let permits = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = engine.semantic_query(&item.text, &item.options).await;
                (item.text, result)
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            let (text, result) = handle
                .await
                .map_err(|e| QueryError::Other(format!("batch task panicked: {e}")))?;
            match result {
                Ok(response) => outcomes.push(BatchQueryOutcome {
                    text,
                    response: Some(response),
                    error: None,
                }),
                Err(e) if batch.fail_on_error => return Err(e),
                Err(e) => outcomes.push(BatchQueryOutcome {
                    text,
                    response: None,
                    error: Some(e.to_string()),
                }),
            }
        }

        Ok(outcomes)
    }

    /// Rebuild the vector index from stored embeddings of the active model,
    /// newest annotations first.
    pub fn rebuild_index(&self) -> Result<usize> {
        let model_id = self.embedder.model_id();
        let restored = crate::pipeline::rebuild_index_from_store(&self.index, &self.store, model_id)?;

        self.store.audit_append(
            "index_rebuild",
            &serde_json::json!({ "model": model_id, "restored": restored }),
        )?;

        info!("Rebuilt index with {} vectors", restored);
        Ok(restored)
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    async fn vector_pipeline(
        &self,
        text: &str,
        options: &QueryOptions,
        context: Option<&QueryContext>,
        search_strategy: &str,
        token: &QueryToken,
    ) -> Result<QueryResponse> {
        let started = Instant::now();

        // Stage: fingerprint + cache lookup (ship-through on hit)
        let key = self.cache_key(search_strategy, text, options);
        token.check()?;
        if let Some(cached) = self.cache.get(&key) {
            debug!("Cache hit for {}", key);
            self.log_query(&key, text, options, started.elapsed());
            return Ok((*cached).clone());
        }

        // Stage: embed
        token.check()?;
        let embed_start = Instant::now();
        let vector = self.embedder.embed(text.to_string()).await?;
        let embed_time_ms = embed_start.elapsed().as_millis() as u64;

        // Stage: ANN search with widened ef
        token.check()?;
        let k = options.max_results.max(1);
        let ratio = self.config.ranking.ef_ratio;
        let ef_base = options.search_ef.unwrap_or(self.config.index_params.ef_search);
        let ef = ef_base.max((k * ratio).min(self.config.ranking.ef_max));
        let k_prime = (k * ratio).max(k).min(ef);

        let search_start = Instant::now();
        let hits = self.index.search(&vector, k_prime, Some(ef))?;
        let vector_search_time_ms = search_start.elapsed().as_millis() as u64;
        let total_candidates = hits.len();

        // Stage: hydrate from the store
        token.check()?;
        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get_annotation(&hit.node_id)? {
                Some(annotation) => candidates.push(Candidate {
                    annotation,
                    similarity: 1.0 - hit.distance,
                }),
                None => warn!("Index hit {} has no annotation", hit.node_id),
            }
        }

        // Stage: filter + rank
        token.check()?;
        let rank_start = Instant::now();
        let (results, total_matches, applied_filters) =
            self.filter_and_rank(candidates, options, context, text)?;
        let ranking_time_ms = rank_start.elapsed().as_millis() as u64;

        let response = QueryResponse {
            results,
            total_matches,
            query_time_ms: started.elapsed().as_millis() as u64,
            search_strategy: search_strategy.to_string(),
            metadata: QueryMetadata {
                embed_time_ms,
                vector_search_time_ms,
                ranking_time_ms,
                total_candidates,
                applied_filters,
                search_parameters: SearchParameters {
                    k,
                    ef,
                    model_id: self.embedder.model_id().to_string(),
                },
            },
        };

        // Stage: write-through + query log
        token.check()?;
        self.finish(&key, text, options, &response, started.elapsed())?;
        Ok(response)
    }

    /// Shared filtering, ranking, and result assembly.
    fn filter_and_rank(
        &self,
        candidates: Vec<Candidate>,
        options: &QueryOptions,
        context: Option<&QueryContext>,
        query_text: &str,
    ) -> Result<(Vec<QueryResult>, usize, Vec<String>)> {
        let mut applied_filters = Vec::new();

        let file_matcher = if options.file_filter.is_empty() {
            None
        } else {
            applied_filters.push("file_filter".to_string());
            Some(build_globset(&options.file_filter)?)
        };
        if !options.language_filter.is_empty() {
            applied_filters.push("language_filter".to_string());
        }
        if !options.include_private {
            applied_filters.push("private".to_string());
        }
        let confidence_threshold = options
            .confidence_threshold
            .unwrap_or(self.config.ranking.confidence_threshold);
        if confidence_threshold > 0.0 {
            applied_filters.push("confidence_threshold".to_string());
        }

        let filtered: Vec<Candidate> = candidates
            .into_iter()
            .filter(|candidate| {
                let annotation = &candidate.annotation;
                if confidence_of(annotation) < confidence_threshold {
                    return false;
                }
                if let Some(matcher) = &file_matcher {
                    if !matcher.is_match(&annotation.file_path) {
                        return false;
                    }
                }
                if !options.language_filter.is_empty()
                    && !options.language_filter.iter().any(|l| *l == annotation.language)
                {
                    return false;
                }
                if !options.include_private && annotation.is_private() {
                    return false;
                }
                true
            })
            .collect();

        let ranked = rank(
            filtered,
            &self.config.ranking,
            options.ranking_mode,
            context,
            options.use_context_boosting,
        );

        let surviving: Vec<&Ranked> = ranked
            .iter()
            .filter(|r| r.score >= options.min_score)
            .collect();
        let total_matches = surviving.len();

        let query_tokens = lower_tokens(query_text);
        let capped: Vec<&Ranked> = surviving
            .into_iter()
            .take(options.max_results.max(1))
            .collect();

        let results = capped
            .iter()
            .map(|entry| {
                let related: Vec<String> = capped
                    .iter()
                    .filter(|other| {
                        other.annotation.node_id != entry.annotation.node_id
                            && other.annotation.file_path == entry.annotation.file_path
                    })
                    .take(MAX_RELATED)
                    .map(|other| other.annotation.node_id.clone())
                    .collect();

                QueryResult {
                    annotation: entry.annotation.clone(),
                    score: entry.score,
                    match_reason: match_reason(entry, &query_tokens),
                    context_snippet: self.snippet_for(&entry.annotation),
                    related_matches: related,
                }
            })
            .collect();

        Ok((results, total_matches, applied_filters))
    }

    /// Short code context for a result.
    ///
    /// Reads the source when reachable; falls back to the stored signature.
    fn snippet_for(&self, annotation: &astdex_core::Annotation) -> String {
        let lines = self.config.indexing.snippet_lines.max(1);
        let path = self.root.join(&annotation.file_path);

        if let Ok(content) = std::fs::read_to_string(&path) {
            let needle = annotation
                .signature
                .split_whitespace()
                .last()
                .unwrap_or(&annotation.signature);
            if let Some(start) = content.lines().position(|line| line.contains(needle)) {
                return content
                    .lines()
                    .skip(start)
                    .take(lines)
                    .collect::<Vec<_>>()
                    .join("\n");
            }
        }

        annotation.signature.clone()
    }

    fn cache_key(&self, search_strategy: &str, text: &str, options: &QueryOptions) -> String {
        // The strategy is folded into the text component so equal texts
        // under different operations never collide
        fingerprint(
            &format!("{search_strategy}\u{1}{text}"),
            options,
            self.embedder.model_id(),
        )
    }

    fn log_query(&self, key: &str, text: &str, options: &QueryOptions, elapsed: Duration) {
        if let Err(e) = self.store.record_query(
            key,
            text,
            &canonical_options(options),
            elapsed.as_millis() as u64,
        ) {
            warn!("Query log write failed: {}", e);
        }
    }

    /// Write-through and log a completed query.
    fn finish(
        &self,
        key: &str,
        text: &str,
        options: &QueryOptions,
        response: &QueryResponse,
        elapsed: Duration,
    ) -> Result<()> {
        self.cache.set(key, Arc::new(response.clone()))?;
        self.log_query(key, text, options, elapsed);
        Ok(())
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| QueryError::ConfigInvalid(format!("bad glob '{pattern}': {e}")))?,
        );
    }
    builder
        .build()
        .map_err(|e| QueryError::ConfigInvalid(format!("glob set: {e}")))
}

fn lower_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Token-set overlap between a query and a signature, in [0, 1].
fn token_overlap(query_tokens: &[String], signature: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let signature_tokens = lower_tokens(signature);
    let matched = query_tokens
        .iter()
        .filter(|t| signature_tokens.contains(t))
        .count();
    matched as f32 / query_tokens.len() as f32
}

/// Human-readable reason a result matched; never empty.
fn match_reason(entry: &Ranked, query_tokens: &[String]) -> String {
    let signature_lower = entry.annotation.signature.to_lowercase();
    let matched: Vec<&String> = query_tokens
        .iter()
        .filter(|t| signature_lower.contains(t.as_str()))
        .collect();

    if matched.is_empty() {
        format!("semantic similarity {:.2}", entry.similarity)
    } else {
        let terms: Vec<&str> = matched.iter().map(|t| t.as_str()).collect();
        format!(
            "matches '{}' in signature; semantic similarity {:.2}",
            terms.join("', '"),
            entry.similarity
        )
    }
}
