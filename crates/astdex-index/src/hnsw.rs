//! HNSW graph internals
//!
//! A hierarchical navigable small-world graph over unit vectors under cosine
//! distance (`1 - dot`). Level assignment is derived deterministically from
//! the node id, so rebuilding from the same records produces an identical
//! graph regardless of machine or process.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hard cap on layer count.
const MAX_LEVEL: usize = 16;

/// Tombstone share of live elements that triggers compaction.
pub const COMPACTION_THRESHOLD: f64 = 0.20;

/// One element slot in the graph.
///
/// Metadata is kept as compact JSON text so the binary snapshot encoding
/// stays self-contained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Slot {
    pub node_id: String,
    pub vector: Vec<f32>,
    pub level: usize,
    /// Neighbor lists, one per layer `0..=level`
    pub neighbors: Vec<Vec<u32>>,
    pub deleted: bool,
    pub metadata: Option<String>,
}

/// A search result before hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub node_id: String,
    /// Cosine distance (`1 - dot`), ascending is better
    pub distance: f32,
    pub metadata: Option<serde_json::Value>,
}

/// f32 wrapper with a total order for heap use.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrdF32(f32);

impl Eq for OrdF32 {}

impl PartialOrd for OrdF32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdF32 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Candidate ordered by ascending distance (min-heap via Reverse).
type Candidate = (OrdF32, u32);

/// The multilayer graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HnswGraph {
    pub dim: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub slots: Vec<Slot>,
    pub id_index: HashMap<String, u32>,
    pub entry: Option<u32>,
    pub max_level: usize,
    pub tombstones: usize,
}

impl HnswGraph {
    pub fn new(dim: usize, m: usize, ef_construction: usize) -> Self {
        Self {
            dim,
            m,
            ef_construction,
            slots: Vec::new(),
            id_index: HashMap::new(),
            entry: None,
            max_level: 0,
            tombstones: 0,
        }
    }

    /// Elements not tombstoned.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.tombstones
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.id_index.contains_key(node_id)
    }

    /// Max neighbors for a layer: `2M` at layer 0, `M` above.
    fn max_neighbors(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    /// Deterministic level for a node id.
    ///
    /// Hashes the id to a uniform draw and applies the standard exponential
    /// level distribution with multiplier `1/ln(M)`.
    fn assign_level(&self, node_id: &str) -> usize {
        let digest = Sha256::digest(node_id.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let raw = u64::from_le_bytes(bytes);

        // Map to (0, 1); never exactly zero so ln is finite
        let uniform = (raw as f64 + 1.0) / (u64::MAX as f64 + 2.0);
        let multiplier = 1.0 / (self.m as f64).ln();
        (((-uniform.ln()) * multiplier) as usize).min(MAX_LEVEL)
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        1.0 - dot
    }

    fn slot_distance(&self, query: &[f32], idx: u32) -> f32 {
        self.distance(query, &self.slots[idx as usize].vector)
    }

    /// Insert a vector. The caller has already validated dimension,
    /// finiteness, and uniqueness.
    pub fn insert(&mut self, node_id: String, vector: Vec<f32>, metadata: Option<serde_json::Value>) {
        self.insert_raw(node_id, vector, metadata.map(|v| v.to_string()));
    }

    fn insert_raw(&mut self, node_id: String, vector: Vec<f32>, metadata: Option<String>) {
        let level = self.assign_level(&node_id);
        let index = self.slots.len() as u32;

        self.slots.push(Slot {
            node_id: node_id.clone(),
            vector,
            level,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
            metadata,
        });
        self.id_index.insert(node_id, index);

        let Some(entry) = self.entry else {
            self.entry = Some(index);
            self.max_level = level;
            return;
        };

        let query = self.slots[index as usize].vector.clone();
        let mut ep = entry;

        // Greedy descent through layers above the new node's level
        let mut layer = self.max_level;
        while layer > level {
            ep = self.greedy_closest(&query, ep, layer);
            layer -= 1;
        }

        // Connect on each layer from min(level, max_level) down to 0
        let top = level.min(self.max_level);
        for layer in (0..=top).rev() {
            let found = self.search_layer(&query, &[ep], self.ef_construction, layer);

            let chosen: Vec<u32> = found
                .iter()
                .filter(|(_, idx)| !self.slots[*idx as usize].deleted)
                .take(self.m)
                .map(|(_, idx)| *idx)
                .collect();

            for &neighbor in &chosen {
                self.slots[index as usize].neighbors[layer].push(neighbor);
                self.slots[neighbor as usize].neighbors[layer].push(index);
                self.prune_neighbors(neighbor, layer);
            }

            if let Some((_, closest)) = found.first() {
                ep = *closest;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry = Some(index);
        }
    }

    /// Trim a slot's neighbor list to the layer cap, keeping the closest.
    fn prune_neighbors(&mut self, slot: u32, layer: usize) {
        let cap = self.max_neighbors(layer);
        if self.slots[slot as usize].neighbors[layer].len() <= cap {
            return;
        }

        let vector = self.slots[slot as usize].vector.clone();
        let mut scored: Vec<(OrdF32, u32)> = self.slots[slot as usize].neighbors[layer]
            .iter()
            .map(|&n| (OrdF32(self.slot_distance(&vector, n)), n))
            .collect();
        scored.sort_unstable();
        scored.dedup_by_key(|(_, n)| *n);
        scored.truncate(cap);

        self.slots[slot as usize].neighbors[layer] = scored.into_iter().map(|(_, n)| n).collect();
    }

    /// One-step greedy walk to the closest element on a layer.
    fn greedy_closest(&self, query: &[f32], start: u32, layer: usize) -> u32 {
        let mut current = start;
        let mut current_dist = self.slot_distance(query, current);

        loop {
            let mut improved = false;
            let neighbors = &self.slots[current as usize].neighbors;
            if layer < neighbors.len() {
                for &neighbor in &neighbors[layer] {
                    let d = self.slot_distance(query, neighbor);
                    if d < current_dist {
                        current = neighbor;
                        current_dist = d;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search on a single layer.
    ///
    /// Returns up to `ef` candidates as `(distance, index)` sorted ascending.
    /// Tombstoned slots are traversed (they keep the graph connected) and
    /// included here; result assembly filters them.
    fn search_layer(&self, query: &[f32], entries: &[u32], ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        // Min-heap of candidates to expand
        let mut candidates: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();
        // Max-heap of the best `ef` found so far
        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();

        for &entry in entries {
            if visited.insert(entry) {
                let d = OrdF32(self.slot_distance(query, entry));
                candidates.push(std::cmp::Reverse((d, entry)));
                best.push((d, entry));
            }
        }

        while let Some(std::cmp::Reverse((dist, idx))) = candidates.pop() {
            let worst = best.peek().map(|(d, _)| *d).unwrap_or(OrdF32(f32::MAX));
            if best.len() >= ef && dist > worst {
                break;
            }

            let neighbors = &self.slots[idx as usize].neighbors;
            if layer >= neighbors.len() {
                continue;
            }
            for &neighbor in &neighbors[layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = OrdF32(self.slot_distance(query, neighbor));
                let worst = best.peek().map(|(w, _)| *w).unwrap_or(OrdF32(f32::MAX));
                if best.len() < ef || d < worst {
                    candidates.push(std::cmp::Reverse((d, neighbor)));
                    best.push((d, neighbor));
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = best.into_vec();
        out.sort_unstable();
        out
    }

    /// Top-k search under cosine distance.
    ///
    /// Ordered by ascending distance, ties broken by ascending node id.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<SearchHit> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        if k == 0 || self.live_count() == 0 {
            return Vec::new();
        }

        let mut ep = entry;
        for layer in (1..=self.max_level).rev() {
            ep = self.greedy_closest(query, ep, layer);
        }

        let ef = ef.max(k);
        let found = self.search_layer(query, &[ep], ef, 0);

        let mut hits: Vec<(OrdF32, &Slot)> = found
            .into_iter()
            .map(|(d, idx)| (d, &self.slots[idx as usize]))
            .filter(|(_, slot)| !slot.deleted)
            .collect();

        hits.sort_by(|(da, sa), (db, sb)| da.cmp(db).then_with(|| sa.node_id.cmp(&sb.node_id)));
        hits.truncate(k);

        hits.into_iter()
            .map(|(d, slot)| SearchHit {
                node_id: slot.node_id.clone(),
                distance: d.0,
                metadata: slot
                    .metadata
                    .as_ref()
                    .and_then(|json| serde_json::from_str(json).ok()),
            })
            .collect()
    }

    /// Logically delete an element. Returns whether it existed live.
    pub fn remove(&mut self, node_id: &str) -> bool {
        let Some(&index) = self.id_index.get(node_id) else {
            return false;
        };
        let slot = &mut self.slots[index as usize];
        if slot.deleted {
            return false;
        }
        slot.deleted = true;
        self.tombstones += 1;
        self.id_index.remove(node_id);
        true
    }

    /// Whether tombstones exceed the compaction threshold.
    pub fn needs_compaction(&self) -> bool {
        let live = self.live_count();
        live > 0 && (self.tombstones as f64) > (live as f64) * COMPACTION_THRESHOLD
    }

    /// Rebuild the graph from live elements, dropping tombstones.
    ///
    /// Re-insertion order follows slot order; combined with deterministic
    /// level assignment this keeps compaction reproducible.
    pub fn compact(&mut self) {
        let live: Vec<(String, Vec<f32>, Option<String>)> = self
            .slots
            .iter()
            .filter(|slot| !slot.deleted)
            .map(|slot| (slot.node_id.clone(), slot.vector.clone(), slot.metadata.clone()))
            .collect();

        self.slots.clear();
        self.id_index.clear();
        self.entry = None;
        self.max_level = 0;
        self.tombstones = 0;

        for (node_id, vector, metadata) in live {
            self.insert_raw(node_id, vector, metadata);
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.id_index.clear();
        self.entry = None;
        self.max_level = 0;
        self.tombstones = 0;
    }
}
