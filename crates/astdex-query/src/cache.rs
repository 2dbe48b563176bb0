//! Multi-Level Query Cache
//!
//! Three layers, looked up in order with promotion on hit:
//! - L1: decoded responses, capacity by entry count
//! - L2: zstd-compressed JSON, capacity by bytes
//! - L3: persistent rows in the metadata store
//!
//! Writes go through all three layers synchronously. TTL is enforced at
//! read time: an expired entry is ignored and purged. Entries are keyed by
//! the query fingerprint.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use astdex_store::MetadataStore;

use crate::error::Result;
use crate::types::QueryResponse;

/// zstd level for L2/L3 payloads.
const COMPRESSION_LEVEL: i32 = 3;

/// Cache layer configuration.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub l1_max_entries: usize,
    pub l2_max_bytes: usize,
    pub l3_rows: usize,
    pub default_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            l1_max_entries: 256,
            l2_max_bytes: 32 * 1024 * 1024,
            l3_rows: 10_000,
            default_ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// Which entries a prune pass removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneStrategy {
    /// Least recently used entry per in-process layer
    Lru,
    /// Least frequently used entry per in-process layer
    Lfu,
    /// Every expired entry
    Ttl,
    /// One explicit fingerprint, all layers
    Key(String),
}

/// Per-layer counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,
    pub misses: u64,
    pub l1_evictions: u64,
    pub l2_evictions: u64,
    pub writes: u64,
    pub l2_bytes: usize,
}

impl CacheStats {
    /// Total hits across layers.
    pub fn hits(&self) -> u64 {
        self.l1_hits + self.l2_hits + self.l3_hits
    }
}

struct L1Entry {
    response: Arc<QueryResponse>,
    created_at: Instant,
    hits: u64,
}

struct L2Entry {
    compressed: Vec<u8>,
    created_at: Instant,
    hits: u64,
}

struct CacheState {
    l1: LruCache<String, L1Entry>,
    l2: LruCache<String, L2Entry>,
    l2_bytes: usize,
    stats: CacheStats,
    /// Fingerprint hit counters for the top-queries report
    key_hits: HashMap<String, u64>,
}

/// Write-through multi-level cache.
pub struct MultiLevelCache {
    settings: CacheSettings,
    store: Arc<MetadataStore>,
    state: Mutex<CacheState>,
}

impl MultiLevelCache {
    /// Create a cache backed by the given store (L3).
    pub fn new(settings: CacheSettings, store: Arc<MetadataStore>) -> Self {
        Self {
            settings,
            store,
            state: Mutex::new(CacheState {
                l1: LruCache::new(NonZeroUsize::new(settings.l1_max_entries.max(1)).unwrap()),
                // L2 is bounded by bytes, not entries; use a generous count cap
                l2: LruCache::new(NonZeroUsize::new(100_000).unwrap()),
                l2_bytes: 0,
                stats: CacheStats::default(),
                key_hits: HashMap::new(),
            }),
        }
    }

    /// Look up a fingerprint, promoting hits toward L1.
    pub fn get(&self, key: &str) -> Option<Arc<QueryResponse>> {
        let now = Instant::now();
        let ttl = self.settings.default_ttl;

        let mut state = self.state.lock();

        // L1
        if let Some(entry) = state.l1.get_mut(key) {
            if now.duration_since(entry.created_at) <= ttl {
                entry.hits += 1;
                let response = entry.response.clone();
                state.stats.l1_hits += 1;
                *state.key_hits.entry(key.to_string()).or_insert(0) += 1;
                return Some(response);
            }
            state.l1.pop(key);
        }

        // L2
        if let Some(entry) = state.l2.get_mut(key) {
            if now.duration_since(entry.created_at) <= ttl {
                entry.hits += 1;
                let compressed = entry.compressed.clone();
                match decompress_response(&compressed) {
                    Ok(response) => {
                        let response = Arc::new(response);
                        state.stats.l2_hits += 1;
                        *state.key_hits.entry(key.to_string()).or_insert(0) += 1;
                        Self::promote_l1(&mut state, key, response.clone());
                        return Some(response);
                    }
                    Err(e) => {
                        warn!("Dropping undecodable L2 entry {}: {}", key, e);
                        Self::l2_remove(&mut state, key);
                    }
                }
            } else {
                Self::l2_remove(&mut state, key);
            }
        }

        // L3 (store enforces its own TTL)
        match self.store.l3_get(key) {
            Ok(Some(compressed)) => match decompress_response(&compressed) {
                Ok(response) => {
                    let response = Arc::new(response);
                    state.stats.l3_hits += 1;
                    *state.key_hits.entry(key.to_string()).or_insert(0) += 1;
                    Self::promote_l2(&mut state, self.settings.l2_max_bytes, key, compressed);
                    Self::promote_l1(&mut state, key, response.clone());
                    return Some(response);
                }
                Err(e) => {
                    warn!("Dropping undecodable L3 entry {}: {}", key, e);
                    let _ = self.store.l3_remove(key);
                }
            },
            Ok(None) => {}
            Err(e) => warn!("L3 read failed for {}: {}", key, e),
        }

        state.stats.misses += 1;
        None
    }

    /// Whether the fingerprint is already hot (present in L1 or L2).
    pub fn contains_hot(&self, key: &str) -> bool {
        let state = self.state.lock();
        state.l1.contains(key) || state.l2.contains(key)
    }

    /// Write-through set: all three layers are updated synchronously.
    pub fn set(&self, key: &str, response: Arc<QueryResponse>) -> Result<()> {
        let compressed = compress_response(&response)?;

        let mut state = self.state.lock();
        Self::promote_l1(&mut state, key, response);
        Self::promote_l2(&mut state, self.settings.l2_max_bytes, key, compressed.clone());
        state.stats.writes += 1;
        drop(state);

        self.store.l3_put(
            key,
            &compressed,
            self.settings.default_ttl.as_millis() as u64,
            self.settings.l3_rows,
        )?;
        Ok(())
    }

    /// Run one prune pass.
    pub fn prune(&self, strategy: PruneStrategy) -> Result<usize> {
        let mut removed = 0usize;
        let mut state = self.state.lock();

        match strategy {
            PruneStrategy::Lru => {
                if state.l1.pop_lru().is_some() {
                    state.stats.l1_evictions += 1;
                    removed += 1;
                }
                if let Some((key, _)) = state.l2.peek_lru().map(|(k, _)| (k.clone(), ())) {
                    Self::l2_remove(&mut state, &key);
                    state.stats.l2_evictions += 1;
                    removed += 1;
                }
            }
            PruneStrategy::Lfu => {
                let coldest_l1 = state
                    .l1
                    .iter()
                    .min_by_key(|(_, entry)| entry.hits)
                    .map(|(key, _)| key.clone());
                if let Some(key) = coldest_l1 {
                    state.l1.pop(&key);
                    state.stats.l1_evictions += 1;
                    removed += 1;
                }
                let coldest_l2 = state
                    .l2
                    .iter()
                    .min_by_key(|(_, entry)| entry.hits)
                    .map(|(key, _)| key.clone());
                if let Some(key) = coldest_l2 {
                    Self::l2_remove(&mut state, &key);
                    state.stats.l2_evictions += 1;
                    removed += 1;
                }
            }
            PruneStrategy::Ttl => {
                let now = Instant::now();
                let ttl = self.settings.default_ttl;

                let expired_l1: Vec<String> = state
                    .l1
                    .iter()
                    .filter(|(_, entry)| now.duration_since(entry.created_at) > ttl)
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in expired_l1 {
                    state.l1.pop(&key);
                    removed += 1;
                }

                let expired_l2: Vec<String> = state
                    .l2
                    .iter()
                    .filter(|(_, entry)| now.duration_since(entry.created_at) > ttl)
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in expired_l2 {
                    Self::l2_remove(&mut state, &key);
                    removed += 1;
                }
            }
            PruneStrategy::Key(key) => {
                if state.l1.pop(&key).is_some() {
                    removed += 1;
                }
                if state.l2.contains(&key) {
                    Self::l2_remove(&mut state, &key);
                    removed += 1;
                }
                drop(state);
                if self.store.l3_remove(&key)? {
                    removed += 1;
                }
                return Ok(removed);
            }
        }

        Ok(removed)
    }

    /// Snapshot of counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.l2_bytes = state.l2_bytes;
        stats
    }

    /// Hottest fingerprints by cumulative hit count.
    pub fn top_queries(&self, limit: usize) -> Vec<(String, u64)> {
        let state = self.state.lock();
        let mut entries: Vec<(String, u64)> = state
            .key_hits
            .iter()
            .map(|(key, hits)| (key.clone(), *hits))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(limit);
        entries
    }

    /// Drop the in-process layers (L3 is left to the store's own pruning).
    pub fn clear_memory(&self) {
        let mut state = self.state.lock();
        state.l1.clear();
        state.l2.clear();
        state.l2_bytes = 0;
        state.key_hits.clear();
    }

    fn promote_l1(state: &mut CacheState, key: &str, response: Arc<QueryResponse>) {
        let evicted = state.l1.push(
            key.to_string(),
            L1Entry {
                response,
                created_at: Instant::now(),
                hits: 0,
            },
        );
        // push returns the displaced LRU entry when full
        if let Some((evicted_key, _)) = evicted {
            if evicted_key != key {
                state.stats.l1_evictions += 1;
                debug!("L1 evicted {}", evicted_key);
            }
        }
    }

    fn promote_l2(state: &mut CacheState, max_bytes: usize, key: &str, compressed: Vec<u8>) {
        if let Some(old) = state.l2.peek(key) {
            state.l2_bytes = state.l2_bytes.saturating_sub(old.compressed.len());
        }
        state.l2_bytes += compressed.len();
        state.l2.put(
            key.to_string(),
            L2Entry {
                compressed,
                created_at: Instant::now(),
                hits: 0,
            },
        );

        // Evict LRU entries until the byte budget holds
        while state.l2_bytes > max_bytes {
            let Some((evicted_key, evicted)) = state.l2.pop_lru() else {
                break;
            };
            state.l2_bytes = state.l2_bytes.saturating_sub(evicted.compressed.len());
            state.stats.l2_evictions += 1;
            debug!("L2 evicted {} ({} bytes)", evicted_key, evicted.compressed.len());
        }
    }

    fn l2_remove(state: &mut CacheState, key: &str) {
        if let Some(entry) = state.l2.pop(key) {
            state.l2_bytes = state.l2_bytes.saturating_sub(entry.compressed.len());
        }
    }
}

fn compress_response(response: &QueryResponse) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(response)
        .map_err(|e| crate::error::QueryError::Other(format!("cache encode: {e}")))?;
    zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
        .map_err(|e| crate::error::QueryError::Io(e))
}

fn decompress_response(compressed: &[u8]) -> std::result::Result<QueryResponse, String> {
    let json = zstd::decode_all(compressed).map_err(|e| e.to_string())?;
    serde_json::from_slice(&json).map_err(|e| e.to_string())
}
