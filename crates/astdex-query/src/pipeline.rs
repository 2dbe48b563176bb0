//! Ingest Pipeline
//!
//! Drives a repository into the index: delta analysis → parse → classify →
//! annotate → embed → store + vector index, with per-file atomicity. File
//! parsing fans out across cores; store writes for one file commit as a
//! unit under the store's per-file locks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use astdex_config::AstdexConfig;
use astdex_core::{
    normalized_content_hash, Annotation, AnnotationConfig, AnnotationEngine, ChangeSet,
    DeltaEngine, GrammarCache, Language, ParserAdapter,
};
use astdex_embed::{embedding_text, EmbeddingProvider, EmbeddingRecord};
use astdex_index::{ChecksumSidecar, IndexConfig, IndexError, VectorIndex};
use astdex_store::MetadataStore;

use crate::error::{QueryError, Result};

/// One recorded per-file failure; other batches keep going.
#[derive(Debug, Clone)]
pub struct BatchError {
    pub batch: usize,
    pub path: String,
    pub message: String,
}

/// Outcome of one ingest run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub changes: ChangeSet,
    pub files_processed: usize,
    pub nodes_annotated: usize,
    pub errors: Vec<BatchError>,
}

/// Per-file intermediate product of the parse/annotate fan-out.
struct FileProduct {
    path: String,
    content_hash: String,
    annotations: Vec<Annotation>,
}

/// Repository ingest orchestrator.
pub struct IngestPipeline {
    config: AstdexConfig,
    root: PathBuf,
    grammars: Arc<GrammarCache>,
    annotator: AnnotationEngine,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    store: Arc<MetadataStore>,
    delta: Mutex<DeltaEngine>,
}

impl IngestPipeline {
    /// Create a pipeline rooted at `root`, seeded with persisted file state.
    pub fn new(
        config: AstdexConfig,
        root: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        store: Arc<MetadataStore>,
    ) -> Result<Self> {
        let mut delta = DeltaEngine::new(root).map_err(|e| QueryError::Other(e.to_string()))?;
        delta.set_prior_state(store.file_hashes()?);

        let annotator = AnnotationEngine::new(AnnotationConfig {
            batch_size: config.indexing.batch_size,
            max_processing_time: Duration::from_millis(config.performance.max_processing_time_ms),
        });

        Ok(Self {
            config,
            root: root.to_path_buf(),
            grammars: Arc::new(GrammarCache::new()),
            annotator,
            embedder,
            index,
            store,
            delta: Mutex::new(delta),
        })
    }

    /// Index path under the configured output directory.
    pub fn index_path(&self) -> PathBuf {
        let output = &self.config.indexing.output_dir;
        let base = if output.is_absolute() {
            output.clone()
        } else {
            self.root.join(output)
        };
        base.join("hnsw.index")
    }

    /// Scan the whole repository and process what changed.
    pub async fn sync_repository(&self) -> Result<IngestReport> {
        let changes = {
            let mut delta = self.delta.lock();
            delta
                .analyze_repository()
                .map_err(|e| QueryError::Other(e.to_string()))?
        };
        self.apply_changes(changes).await
    }

    /// Analyze and process a specific set of repository-relative paths.
    pub async fn index_paths(&self, paths: &[String]) -> Result<IngestReport> {
        let changes = {
            let mut delta = self.delta.lock();
            delta
                .analyze(paths)
                .map_err(|e| QueryError::Other(e.to_string()))?
        };
        self.apply_changes(changes).await
    }

    /// Process a classified change set.
    pub async fn apply_changes(&self, changes: ChangeSet) -> Result<IngestReport> {
        let mut report = IngestReport {
            changes: changes.clone(),
            ..Default::default()
        };

        // Renames move records without touching node ids
        for renamed in &changes.renamed {
            self.store.rename_file(&renamed.from, &renamed.to)?;
        }

        // Deletions cascade through the store, then the index
        for path in &changes.deleted {
            let node_ids = self.store.delete_file(path)?;
            for node_id in node_ids {
                self.index.remove(&node_id);
            }
        }

        // Re-parse and re-embed in batches; per-batch errors are recorded
        // and remaining batches continue
        let to_process = changes.files_to_process();
        let batch_size = self.config.file_watching.batch_size.max(1);

        for (batch_idx, batch) in to_process.chunks(batch_size).enumerate() {
            let products: Vec<std::result::Result<FileProduct, (String, String)>> = batch
                .par_iter()
                .map(|path| self.parse_and_annotate(path))
                .collect();

            for product in products {
                match product {
                    Ok(product) => {
                        let path = product.path.clone();
                        match self.embed_and_commit(product).await {
                            Ok(annotated) => {
                                report.files_processed += 1;
                                report.nodes_annotated += annotated;
                            }
                            Err(e) => report.errors.push(BatchError {
                                batch: batch_idx,
                                path,
                                message: e.to_string(),
                            }),
                        }
                    }
                    Err((path, message)) => {
                        warn!("Batch {} failed on {}: {}", batch_idx, path, message);
                        report.errors.push(BatchError {
                            batch: batch_idx,
                            path,
                            message,
                        });
                    }
                }
            }
        }

        info!(
            "Ingest: {} files, {} nodes, {} errors",
            report.files_processed,
            report.nodes_annotated,
            report.errors.len()
        );

        Ok(report)
    }

    /// CPU-side stage: read, parse, and annotate one file.
    fn parse_and_annotate(
        &self,
        path: &str,
    ) -> std::result::Result<FileProduct, (String, String)> {
        let fail = |message: String| (path.to_string(), message);

        let abs = self.root.join(path);
        let content =
            std::fs::read_to_string(&abs).map_err(|e| fail(format!("read failed: {e}")))?;

        let language = Language::from_path(Path::new(path))
            .ok_or_else(|| fail("no language for extension".to_string()))?;

        // Fresh adapter per task; the grammar cache behind it is shared
        let parser = ParserAdapter::new(Arc::clone(&self.grammars));
        let parsed = parser
            .parse_code(&content, language, path)
            .map_err(|e| fail(e.to_string()))?;

        if parsed.has_errors() {
            debug!("{} parsed with {} syntax errors", path, parsed.errors.len());
        }

        let outcome = self.annotator.annotate_file(&parsed, &content);
        if outcome.batches_dropped > 0 {
            warn!(
                "{}: {} annotation batches dropped on time budget",
                path, outcome.batches_dropped
            );
        }

        Ok(FileProduct {
            path: path.to_string(),
            content_hash: normalized_content_hash(&content),
            annotations: outcome.annotations,
        })
    }

    /// IO-side stage: embed annotations and commit file records atomically.
    async fn embed_and_commit(&self, product: FileProduct) -> Result<usize> {
        let texts: Vec<String> = product.annotations.iter().map(embedding_text).collect();
        let vectors = self.embedder.embed_batch(texts).await?;

        let records: Vec<EmbeddingRecord> = product
            .annotations
            .iter()
            .zip(vectors)
            .map(|(annotation, vector)| EmbeddingRecord {
                node_id: annotation.node_id.clone(),
                vector,
                model_id: self.embedder.model_id().to_string(),
                model_version: self.embedder.model_version().to_string(),
            })
            .collect();

        // Index entries for node ids this file no longer owns go first
        let new_ids: std::collections::HashSet<&str> = product
            .annotations
            .iter()
            .map(|a| a.node_id.as_str())
            .collect();
        if let Some(prior) = self.store.get_file_state(&product.path)? {
            for old_id in prior.node_ids {
                if !new_ids.contains(old_id.as_str()) {
                    self.index.remove(&old_id);
                }
            }
        }

        self.store.upsert_file_records(
            &product.path,
            &product.content_hash,
            &product.annotations,
            &records,
        )?;

        for record in &records {
            self.index
                .add(&record.node_id, &record.vector, None, true)?;
        }

        Ok(product.annotations.len())
    }

    /// Persist the vector index snapshot with its checksum sidecar.
    pub fn persist_index(&self) -> Result<ChecksumSidecar> {
        let path = self.index_path();
        Ok(self.index.save(&path)?)
    }
}

/// Re-add all stored embeddings of `model_id` into an index, newest
/// annotations first.
pub fn rebuild_index_from_store(
    index: &VectorIndex,
    store: &MetadataStore,
    model_id: &str,
) -> Result<usize> {
    let records = store.embeddings_for_model(model_id)?;

    index.clear();
    let mut restored = 0usize;
    for record in &records {
        match index.add(&record.node_id, &record.vector, None, true) {
            Ok(()) => restored += 1,
            Err(e) => warn!("Skipping {} during rebuild: {}", record.node_id, e),
        }
    }
    Ok(restored)
}

/// Load the index snapshot, rebuilding from the store on corruption.
///
/// A clean load returns the snapshot graph. A corrupted snapshot is audited
/// and rebuilt from stored embeddings; if the rebuild itself fails the error
/// is `RebuildFailed`.
pub fn load_or_rebuild_index(
    snapshot_path: &Path,
    index_config: IndexConfig,
    store: &MetadataStore,
    model_id: &str,
) -> Result<Arc<VectorIndex>> {
    match VectorIndex::load(snapshot_path, index_config) {
        Ok(index) => Ok(Arc::new(index)),
        Err(IndexError::Corrupted(reason)) => {
            warn!("Index corrupted ({}); rebuilding from store", reason);
            store.audit_append(
                "index_corruption_detected",
                &serde_json::json!({ "path": snapshot_path.display().to_string(), "reason": reason }),
            )?;

            let index = VectorIndex::new(index_config)
                .map_err(|e| QueryError::RebuildFailed(e.to_string()))?;
            let restored = rebuild_index_from_store(&index, store, model_id)
                .map_err(|e| QueryError::RebuildFailed(e.to_string()))?;

            info!("Rebuilt index from store: {} vectors", restored);
            Ok(Arc::new(index))
        }
        Err(e) => Err(e.into()),
    }
}
