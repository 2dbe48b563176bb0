//! Astdex Index - in-process HNSW vector index
//!
//! An approximate nearest-neighbor index over unit vectors with:
//! - Cosine distance search (`1 - dot`), ties broken by node id
//! - Tombstoned removal with automatic compaction past 20% dead weight
//! - Bincode snapshots guarded by a SHA-256 JSON sidecar
//! - Single-writer / many-reader discipline with an epoch counter

mod error;
mod hnsw;
mod snapshot;

pub use error::{IndexError, Result};
pub use hnsw::SearchHit;
pub use snapshot::{sidecar_path, verify_integrity, ChecksumSidecar, SNAPSHOT_SCHEMA_VERSION};

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use hnsw::HnswGraph;

// ============================================================================
// Configuration
// ============================================================================

/// Construction and search parameters for the index.
#[derive(Debug, Clone, Copy)]
pub struct IndexConfig {
    /// Embedding dimension
    pub dim: usize,
    /// Maximum elements the index will accept
    pub max_elements: usize,
    /// Graph connectivity (4-64)
    pub m: usize,
    /// Candidate width during construction (16-800)
    pub ef_construction: usize,
    /// Default candidate width during search
    pub ef_search: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dim: 384,
            max_elements: 1_000_000,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

impl IndexConfig {
    /// Validate parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(IndexError::InvalidConfig("dim must be at least 1".into()));
        }
        if !(4..=64).contains(&self.m) {
            return Err(IndexError::InvalidConfig(
                "m must be between 4 and 64".into(),
            ));
        }
        if !(16..=800).contains(&self.ef_construction) {
            return Err(IndexError::InvalidConfig(
                "ef_construction must be between 16 and 800".into(),
            ));
        }
        if self.ef_search == 0 {
            return Err(IndexError::InvalidConfig(
                "ef_search must be at least 1".into(),
            ));
        }
        if self.max_elements == 0 {
            return Err(IndexError::InvalidConfig(
                "max_elements must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Vector Index
// ============================================================================

/// Thread-safe HNSW index.
///
/// Writers serialize through a queue mutex; readers share a lock and always
/// observe either the pre-write or post-write graph, never a partial rewire.
/// The epoch counter increments once per committed write.
pub struct VectorIndex {
    config: IndexConfig,
    graph: RwLock<HnswGraph>,
    /// Writer queue; parking_lot mutexes hand off roughly FIFO under contention
    writer: Mutex<()>,
    epoch: AtomicU64,
    build_time_ms: AtomicU64,
}

impl VectorIndex {
    /// Allocate an empty index. Idempotent for a given configuration.
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            graph: RwLock::new(HnswGraph::new(config.dim, config.m, config.ef_construction)),
            writer: Mutex::new(()),
            epoch: AtomicU64::new(0),
            build_time_ms: AtomicU64::new(0),
        })
    }

    /// The active configuration.
    pub fn config(&self) -> IndexConfig {
        self.config
    }

    /// Current write epoch. Bumped once per committed write.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Add a vector.
    ///
    /// Rejects wrong dimension, non-finite values, and duplicates unless
    /// `upsert` is set, in which case the existing element is replaced and
    /// the graph rewired.
    pub fn add(
        &self,
        node_id: &str,
        vector: &[f32],
        metadata: Option<serde_json::Value>,
        upsert: bool,
    ) -> Result<()> {
        if vector.len() != self.config.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dim,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::NonFiniteVector(node_id.to_string()));
        }

        let _writer = self.writer.lock();
        let start = Instant::now();
        let mut graph = self.graph.write();

        if graph.contains(node_id) {
            if !upsert {
                return Err(IndexError::DuplicateNode(node_id.to_string()));
            }
            graph.remove(node_id);
        }

        if graph.live_count() >= self.config.max_elements {
            return Err(IndexError::CapacityExceeded {
                max_elements: self.config.max_elements,
            });
        }

        graph.insert(node_id.to_string(), vector.to_vec(), metadata);
        if graph.needs_compaction() {
            graph.compact();
        }
        drop(graph);

        self.build_time_ms
            .fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);
        self.epoch.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Top-k search under cosine distance on unit vectors.
    ///
    /// `ef` overrides the configured `ef_search` for this call.
    pub fn search(&self, query: &[f32], k: usize, ef: Option<usize>) -> Result<Vec<SearchHit>> {
        if query.len() != self.config.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dim,
                actual: query.len(),
            });
        }

        let ef = ef.unwrap_or(self.config.ef_search);
        Ok(self.graph.read().search(query, k, ef))
    }

    /// Logically delete an element. Compaction runs when tombstones exceed
    /// 20% of live elements.
    pub fn remove(&self, node_id: &str) -> bool {
        let _writer = self.writer.lock();
        let start = Instant::now();
        let mut graph = self.graph.write();

        let removed = graph.remove(node_id);
        if removed && graph.needs_compaction() {
            info!("Compacting index ({} tombstones)", graph.tombstones);
            graph.compact();
        }
        drop(graph);

        if removed {
            self.build_time_ms
                .fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);
            self.epoch.fetch_add(1, Ordering::Release);
        }
        removed
    }

    /// Whether an element is present (live).
    pub fn contains(&self, node_id: &str) -> bool {
        self.graph.read().contains(node_id)
    }

    /// Live element count.
    pub fn count(&self) -> usize {
        self.graph.read().live_count()
    }

    /// Drop every element.
    pub fn clear(&self) {
        let _writer = self.writer.lock();
        self.graph.write().clear();
        self.epoch.fetch_add(1, Ordering::Release);
    }

    /// Write a snapshot plus `<path>.checksum` sidecar.
    pub fn save(&self, path: &Path) -> Result<ChecksumSidecar> {
        let graph = self.graph.read();
        snapshot::save(path, &graph, self.build_time_ms.load(Ordering::Relaxed))
    }

    /// Load a verified snapshot.
    ///
    /// Fails with `IndexError::Corrupted` when the snapshot or sidecar is
    /// missing, unreadable, or fails digest verification; the caller is
    /// expected to rebuild from the metadata store.
    pub fn load(path: &Path, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let (graph, sidecar) = snapshot::load(path)?;

        if graph.dim != config.dim {
            return Err(IndexError::Corrupted(format!(
                "snapshot dimension {} does not match configured {}",
                graph.dim, config.dim
            )));
        }

        info!(
            "Loaded vector index: {} vectors (built in {}ms)",
            sidecar.vector_count, sidecar.build_time_ms
        );

        Ok(Self {
            config,
            graph: RwLock::new(graph),
            writer: Mutex::new(()),
            epoch: AtomicU64::new(0),
            build_time_ms: AtomicU64::new(sidecar.build_time_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(v: &[f32]) -> Vec<f32> {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }

    fn small_config() -> IndexConfig {
        IndexConfig {
            dim: 3,
            max_elements: 100,
            m: 8,
            ef_construction: 64,
            ef_search: 32,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(IndexConfig::default().validate().is_ok());

        let mut bad = IndexConfig::default();
        bad.m = 2;
        assert!(matches!(bad.validate(), Err(IndexError::InvalidConfig(_))));

        bad = IndexConfig::default();
        bad.ef_construction = 801;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_add_and_count() {
        let index = VectorIndex::new(small_config()).unwrap();
        index.add("a", &unit(&[1.0, 0.0, 0.0]), None, false).unwrap();
        index.add("b", &unit(&[0.0, 1.0, 0.0]), None, false).unwrap();
        assert_eq!(index.count(), 2);
        assert!(index.contains("a"));
    }

    #[test]
    fn test_dimension_rejected() {
        let index = VectorIndex::new(small_config()).unwrap();
        let result = index.add("a", &[1.0, 0.0], None, false);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let index = VectorIndex::new(small_config()).unwrap();
        let result = index.add("a", &[f32::NAN, 0.0, 0.0], None, false);
        assert!(matches!(result, Err(IndexError::NonFiniteVector(_))));
    }

    #[test]
    fn test_duplicate_rejected_without_upsert() {
        let index = VectorIndex::new(small_config()).unwrap();
        index.add("a", &unit(&[1.0, 0.0, 0.0]), None, false).unwrap();

        let result = index.add("a", &unit(&[0.0, 1.0, 0.0]), None, false);
        assert!(matches!(result, Err(IndexError::DuplicateNode(_))));

        // Upsert replaces and rewires
        index.add("a", &unit(&[0.0, 1.0, 0.0]), None, true).unwrap();
        assert_eq!(index.count(), 1);

        let hits = index.search(&unit(&[0.0, 1.0, 0.0]), 1, None).unwrap();
        assert_eq!(hits[0].node_id, "a");
        assert!(hits[0].distance < 0.01);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut config = small_config();
        config.max_elements = 2;
        let index = VectorIndex::new(config).unwrap();

        index.add("a", &unit(&[1.0, 0.0, 0.0]), None, false).unwrap();
        index.add("b", &unit(&[0.0, 1.0, 0.0]), None, false).unwrap();
        let result = index.add("c", &unit(&[0.0, 0.0, 1.0]), None, false);
        assert!(matches!(result, Err(IndexError::CapacityExceeded { .. })));
    }

    #[test]
    fn test_epoch_increments_on_writes_only() {
        let index = VectorIndex::new(small_config()).unwrap();
        assert_eq!(index.epoch(), 0);

        index.add("a", &unit(&[1.0, 0.0, 0.0]), None, false).unwrap();
        assert_eq!(index.epoch(), 1);

        index.search(&unit(&[1.0, 0.0, 0.0]), 1, None).unwrap();
        assert_eq!(index.epoch(), 1);

        index.remove("a");
        assert_eq!(index.epoch(), 2);

        // Removing a missing element commits nothing
        index.remove("a");
        assert_eq!(index.epoch(), 2);
    }

    #[test]
    fn test_metadata_round_trip() {
        let index = VectorIndex::new(small_config()).unwrap();
        index
            .add(
                "a",
                &unit(&[1.0, 0.0, 0.0]),
                Some(serde_json::json!({"file": "a.ts"})),
                false,
            )
            .unwrap();

        let hits = index.search(&unit(&[1.0, 0.0, 0.0]), 1, None).unwrap();
        assert_eq!(hits[0].metadata.as_ref().unwrap()["file"], "a.ts");
    }

    #[test]
    fn test_save_load_search_equivalence() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hnsw.index");

        let index = VectorIndex::new(small_config()).unwrap();
        for (i, v) in [
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.7, 0.7, 0.0],
        ]
        .iter()
        .enumerate()
        {
            index.add(&format!("n{i}"), &unit(v), None, false).unwrap();
        }

        index.save(&path).unwrap();
        let loaded = VectorIndex::load(&path, small_config()).unwrap();

        let query = unit(&[0.8, 0.5, 0.1]);
        let before = index.search(&query, 4, None).unwrap();
        let after = loaded.search(&query, 4, None).unwrap();

        assert_eq!(
            before.iter().map(|h| &h.node_id).collect::<Vec<_>>(),
            after.iter().map(|h| &h.node_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_load_missing_is_corrupted() {
        let temp = TempDir::new().unwrap();
        let result = VectorIndex::load(&temp.path().join("absent.index"), small_config());
        assert!(matches!(result, Err(IndexError::Corrupted(_))));
    }

    #[test]
    fn test_clear() {
        let index = VectorIndex::new(small_config()).unwrap();
        index.add("a", &unit(&[1.0, 0.0, 0.0]), None, false).unwrap();
        index.clear();
        assert_eq!(index.count(), 0);
    }
}
