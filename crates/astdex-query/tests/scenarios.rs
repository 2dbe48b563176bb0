//! End-to-end engine scenarios: ingest, query, rename, corruption recovery,
//! cache behavior, and cancellation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use astdex_config::AstdexConfig;
use astdex_embed::{EmbeddingProvider, HashEmbedder};
use astdex_index::{verify_integrity, IndexConfig, VectorIndex};
use astdex_query::{
    load_or_rebuild_index, BatchOptions, BatchQueryItem, CacheSettings, CacheWarmer,
    IngestPipeline, MultiLevelCache, QueryContext, QueryEngine, QueryError, QueryOptions,
    QueryToken,
};
use astdex_store::MetadataStore;

const DIM: usize = 256;

struct Stack {
    _temp: TempDir,
    root: PathBuf,
    config: AstdexConfig,
    embedder: Arc<HashEmbedder>,
    index: Arc<VectorIndex>,
    store: Arc<MetadataStore>,
    cache: Arc<MultiLevelCache>,
    engine: Arc<QueryEngine>,
    pipeline: IngestPipeline,
}

fn index_config() -> IndexConfig {
    IndexConfig {
        dim: DIM,
        max_elements: 10_000,
        m: 16,
        ef_construction: 128,
        ef_search: 64,
    }
}

fn stack() -> Stack {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();

    let mut config = AstdexConfig::default();
    config.index_params.dim = DIM;
    config.indexing.output_dir = root.join("ast_db");

    let embedder = Arc::new(HashEmbedder::new(DIM));
    let index = Arc::new(VectorIndex::new(index_config()).unwrap());
    let store = Arc::new(MetadataStore::open(&root.join("ast_db").join("meta.db")).unwrap());
    let cache = Arc::new(MultiLevelCache::new(
        CacheSettings::default(),
        Arc::clone(&store),
    ));

    let engine = Arc::new(QueryEngine::new(
        config.clone(),
        root.clone(),
        embedder.clone(),
        Arc::clone(&index),
        Arc::clone(&store),
        Arc::clone(&cache),
    ));

    let pipeline = IngestPipeline::new(
        config.clone(),
        &root,
        embedder.clone(),
        Arc::clone(&index),
        Arc::clone(&store),
    )
    .unwrap();

    Stack {
        _temp: temp,
        root,
        config,
        embedder,
        index,
        store,
        cache,
        engine,
        pipeline,
    }
}

fn write_two_file_repo(stack: &Stack) {
    std::fs::write(
        stack.root.join("a.ts"),
        "export function add(x: number, y: number) { return x + y; }\n",
    )
    .unwrap();
    std::fs::write(stack.root.join("b.py"), "def mul(x, y):\n    return x * y\n").unwrap();
}

#[tokio::test]
async fn scenario_index_two_file_repo() {
    let stack = stack();
    write_two_file_repo(&stack);

    let report = stack.pipeline.sync_repository().await.unwrap();
    assert_eq!(report.files_processed, 2);
    assert!(report.errors.is_empty());

    let states = stack.store.all_file_states().unwrap();
    assert_eq!(states.len(), 2);

    assert!(stack.store.annotation_count().unwrap() >= 2);
    assert_eq!(stack.index.count(), 2);

    // Invariant: every file-state node id has exactly one annotation and
    // one embedding record of the active model, and lives in the index
    for state in states {
        for node_id in &state.node_ids {
            let annotation = stack.store.get_annotation(node_id).unwrap().unwrap();
            assert_eq!(annotation.file_path, state.path);

            let record = stack.store.get_embedding(node_id).unwrap().unwrap();
            assert_eq!(record.model_id, stack.embedder.model_id());
            assert_eq!(record.vector.len(), DIM);
            assert!((record.norm() - 1.0).abs() < 1e-4);

            assert!(stack.index.contains(node_id));
        }
    }
}

#[tokio::test]
async fn scenario_semantic_query() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    let options = QueryOptions {
        max_results: 3,
        ..Default::default()
    };
    let response = stack
        .engine
        .semantic_query("add two numbers", &options)
        .await
        .unwrap_or_else(|e| panic!("query failed: {e}"));

    assert_eq!(response.search_strategy, "semantic_vector_search");
    assert!(!response.results.is_empty());

    let top = &response.results[0];
    assert_eq!(top.annotation.file_path, "a.ts");
    assert!(top.score >= 0.5, "top score was {}", top.score);
    assert!(!top.match_reason.is_empty());
    assert!(response.metadata.search_parameters.ef >= 12);
}

#[tokio::test]
async fn scenario_rename_detection() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    let before: Vec<String> = stack
        .store
        .get_file_state("a.ts")
        .unwrap()
        .unwrap()
        .node_ids;

    // Move a.ts to src/a.ts with identical bytes
    let content = std::fs::read(stack.root.join("a.ts")).unwrap();
    std::fs::create_dir(stack.root.join("src")).unwrap();
    std::fs::remove_file(stack.root.join("a.ts")).unwrap();
    std::fs::write(stack.root.join("src/a.ts"), content).unwrap();

    let report = stack.pipeline.sync_repository().await.unwrap();

    assert_eq!(report.changes.renamed.len(), 1);
    assert_eq!(report.changes.renamed[0].from, "a.ts");
    assert_eq!(report.changes.renamed[0].to, "src/a.ts");
    assert!(report.changes.added.is_empty());
    assert!(report.changes.deleted.is_empty());

    // Paths updated, node ids unchanged
    assert!(stack.store.get_file_state("a.ts").unwrap().is_none());
    let after = stack.store.get_file_state("src/a.ts").unwrap().unwrap();
    assert_eq!(after.node_ids, before);

    for node_id in &after.node_ids {
        let annotation = stack.store.get_annotation(node_id).unwrap().unwrap();
        assert_eq!(annotation.file_path, "src/a.ts");
    }
}

#[tokio::test]
async fn scenario_corruption_recovery() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    let options = QueryOptions {
        max_results: 3,
        ..Default::default()
    };
    let original = stack
        .engine
        .semantic_query("add two numbers", &options)
        .await
        .unwrap();
    let original_top = original.results[0].annotation.node_id.clone();

    // Persist, then append one byte to the snapshot
    let sidecar = stack.pipeline.persist_index().unwrap();
    assert_eq!(sidecar.vector_count, 2);

    let snapshot_path = stack.pipeline.index_path();
    let mut bytes = std::fs::read(&snapshot_path).unwrap();
    bytes.push(0x00);
    std::fs::write(&snapshot_path, bytes).unwrap();

    assert!(!verify_integrity(&snapshot_path));

    // Loading detects corruption and rebuilds from the store
    let rebuilt = load_or_rebuild_index(
        &snapshot_path,
        index_config(),
        &stack.store,
        stack.embedder.model_id(),
    )
    .unwrap();
    assert_eq!(rebuilt.count(), 2);

    // A repeat of the semantic query over the rebuilt index returns the
    // same top hit (fresh cache so the search actually runs)
    let fresh_cache = Arc::new(MultiLevelCache::new(
        CacheSettings::default(),
        Arc::new(MetadataStore::open_in_memory().unwrap()),
    ));
    let engine = QueryEngine::new(
        stack.config.clone(),
        stack.root.clone(),
        stack.embedder.clone(),
        rebuilt,
        Arc::clone(&stack.store),
        fresh_cache,
    );

    let recovered = engine.semantic_query("add two numbers", &options).await.unwrap();
    assert_eq!(recovered.results[0].annotation.node_id, original_top);

    // The corruption event was audited
    let audit = stack.store.audit_recent(10).unwrap();
    assert!(audit.iter().any(|(_, t, _)| t == "index_corruption_detected"));
}

#[tokio::test]
async fn scenario_cache_hit() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    let options = QueryOptions {
        max_results: 3,
        ..Default::default()
    };

    let first = stack
        .engine
        .semantic_query("add two numbers", &options)
        .await
        .unwrap();
    let l1_before = stack.cache.stats().l1_hits;

    let second = stack
        .engine
        .semantic_query("add two numbers", &options)
        .await
        .unwrap();

    // Byte-equal ship-through and an L1 hit
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
    assert_eq!(stack.cache.stats().l1_hits, l1_before + 1);
}

#[tokio::test]
async fn scenario_cancellation() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    let writes_before = stack.cache.stats().writes;

    let token = QueryToken::with_deadline(Duration::from_millis(1));
    std::thread::sleep(Duration::from_millis(5));

    let options = QueryOptions::default();
    let started = std::time::Instant::now();
    let result = stack
        .engine
        .semantic_query_with_token("add two numbers", &options, &token)
        .await;

    assert!(matches!(result, Err(QueryError::Canceled)));
    assert!(started.elapsed() < Duration::from_millis(50));

    // No partial cache write, no query-log increment
    assert_eq!(stack.cache.stats().writes, writes_before);
    let key = astdex_query::fingerprint("semantic_vector_search\u{1}add two numbers", &options, "feature-hash");
    assert!(stack.store.query_log_entry(&key).unwrap().is_none());
}

#[tokio::test]
async fn signature_query_finds_declarations() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    let response = stack
        .engine
        .signature_query("add", &QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(response.search_strategy, "signature_match");
    assert_eq!(response.results[0].annotation.file_path, "a.ts");
    assert!(response.results[0].match_reason.contains("add"));
}

#[tokio::test]
async fn file_query_matches_globs() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    let response = stack
        .engine
        .file_query("*.py", &QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(response.search_strategy, "file_pattern");
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].annotation.file_path, "b.py");
}

#[tokio::test]
async fn language_filter_applies() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    let options = QueryOptions {
        language_filter: vec!["python".to_string()],
        ..Default::default()
    };
    let response = stack.engine.semantic_query("multiply", &options).await.unwrap();

    assert!(response
        .metadata
        .applied_filters
        .contains(&"language_filter".to_string()));
    for result in &response.results {
        assert_eq!(result.annotation.language, "python");
    }
}

#[tokio::test]
async fn private_entries_hidden_by_default() {
    let stack = stack();
    std::fs::write(
        stack.root.join("p.py"),
        "def _hidden(x):\n    return x\n\ndef visible(x):\n    return x\n",
    )
    .unwrap();
    stack.pipeline.sync_repository().await.unwrap();

    let hidden = stack
        .engine
        .semantic_query("hidden helper", &QueryOptions::default())
        .await
        .unwrap();
    assert!(hidden
        .results
        .iter()
        .all(|r| !r.annotation.tags.iter().any(|t| t == "private")));

    let options = QueryOptions {
        include_private: true,
        ..Default::default()
    };
    let shown = stack.engine.semantic_query("hidden helper", &options).await.unwrap();
    assert!(shown
        .results
        .iter()
        .any(|r| r.annotation.tags.iter().any(|t| t == "private")));
}

#[tokio::test]
async fn contextual_query_boosts_current_file() {
    let stack = stack();
    // Two similar functions in different files; context should break the tie
    std::fs::write(
        stack.root.join("first.py"),
        "def compute_total(items):\n    return sum(items)\n",
    )
    .unwrap();
    std::fs::write(
        stack.root.join("second.py"),
        "def compute_sum(items):\n    return sum(items)\n",
    )
    .unwrap();
    stack.pipeline.sync_repository().await.unwrap();

    let context = QueryContext {
        current_file: Some("second.py".to_string()),
        ..Default::default()
    };
    let options = QueryOptions {
        use_context_boosting: true,
        ..Default::default()
    };

    let response = stack
        .engine
        .contextual_query("compute values", &context, &options)
        .await
        .unwrap();

    assert_eq!(response.search_strategy, "contextual_vector_search");
    assert_eq!(response.results[0].annotation.file_path, "second.py");
}

#[tokio::test]
async fn batch_query_collects_outcomes() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    let outcomes = Arc::clone(&stack.engine)
        .batch_query(
            vec![
                BatchQueryItem {
                    text: "add numbers".to_string(),
                    options: QueryOptions::default(),
                },
                BatchQueryItem {
                    text: "multiply values".to_string(),
                    options: QueryOptions::default(),
                },
            ],
            BatchOptions {
                max_concurrency: 2,
                fail_on_error: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.response.is_some() && o.error.is_none()));
}

#[tokio::test]
async fn warmer_pre_executes_top_queries() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    // Log the query twice so it clears min_frequency
    let options = QueryOptions::default();
    stack.engine.semantic_query("add two numbers", &options).await.unwrap();
    stack.engine.semantic_query("add two numbers", &options).await.unwrap();

    // Cold memory layers, warm log
    stack.cache.clear_memory();

    let warmer = CacheWarmer::new();
    let mut seen = Vec::new();
    let report = warmer
        .warm(
            &stack.engine,
            10,
            2,
            Some(&mut |done, total| seen.push((done, total))),
        )
        .await
        .unwrap();

    assert_eq!(report.considered, 1);
    assert!(!report.aborted);
    assert!(!seen.is_empty());
    // The entry either re-executed or was already hot via L3 promotion
    assert_eq!(report.warmed + report.skipped, 1);
}

#[tokio::test]
async fn modified_file_reindexes_and_cleans_up() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    let before = stack.store.get_file_state("b.py").unwrap().unwrap();

    std::fs::write(
        stack.root.join("b.py"),
        "def mul(x, y):\n    return x * y\n\ndef div(x, y):\n    return x / y\n",
    )
    .unwrap();
    let report = stack.pipeline.sync_repository().await.unwrap();
    assert_eq!(report.changes.modified, vec!["b.py"]);

    let after = stack.store.get_file_state("b.py").unwrap().unwrap();
    assert_eq!(after.node_ids.len(), 2);

    // Old ids not reused are gone from the index
    for old_id in &before.node_ids {
        if !after.node_ids.contains(old_id) {
            assert!(!stack.index.contains(old_id));
            assert!(stack.store.get_annotation(old_id).unwrap().is_none());
        }
    }
    assert_eq!(stack.index.count(), 1 + after.node_ids.len());
}

#[tokio::test]
async fn deleted_file_cascades_everywhere() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();

    let doomed = stack.store.get_file_state("b.py").unwrap().unwrap();

    std::fs::remove_file(stack.root.join("b.py")).unwrap();
    let report = stack.pipeline.sync_repository().await.unwrap();
    assert_eq!(report.changes.deleted, vec!["b.py"]);

    assert!(stack.store.get_file_state("b.py").unwrap().is_none());
    for node_id in &doomed.node_ids {
        assert!(stack.store.get_annotation(node_id).unwrap().is_none());
        assert!(stack.store.get_embedding(node_id).unwrap().is_none());
        assert!(!stack.index.contains(node_id));
    }
    assert_eq!(stack.index.count(), 1);
}

#[tokio::test]
async fn checksum_round_trip_preserves_search() {
    let stack = stack();
    write_two_file_repo(&stack);
    stack.pipeline.sync_repository().await.unwrap();
    stack.pipeline.persist_index().unwrap();

    let loaded = VectorIndex::load(&stack.pipeline.index_path(), index_config()).unwrap();

    let query = stack.embedder.embed_text("add two numbers").unwrap();
    let before = stack.index.search(&query, 2, None).unwrap();
    let after = loaded.search(&query, 2, None).unwrap();

    assert_eq!(
        before.iter().map(|h| &h.node_id).collect::<Vec<_>>(),
        after.iter().map(|h| &h.node_id).collect::<Vec<_>>()
    );
}
