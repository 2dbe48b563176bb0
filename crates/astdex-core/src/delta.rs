//! Incremental Update Engine
//!
//! Detects repository changes by content hashing and classifies them into a
//! `ChangeSet` of added / modified / renamed / deleted / unchanged paths plus
//! transitively affected dependents. Hashes are computed over normalized
//! content (CRLF folded to LF, trailing whitespace trimmed), so
//! whitespace-only edits classify as `unchanged`.
//!
//! Rename detection: hashes of deleted files are remembered for at least the
//! rename window (5 s); a new path arriving with a remembered hash is
//! reclassified as `renamed(from -> to)`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ignore::WalkBuilder;
use parking_lot::Mutex;
use petgraph::graph::{DiGraph, NodeIndex};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::annotate::scan_imports;
use crate::language::Language;

/// Minimum time a deleted hash is remembered for rename detection.
pub const RENAME_WINDOW: Duration = Duration::from_secs(5);

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during delta analysis.
#[derive(Debug, Error)]
pub enum DeltaError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Repository root does not exist
    #[error("repository root not found: {0}")]
    RootNotFound(PathBuf),
}

/// Result type for delta operations.
pub type Result<T> = std::result::Result<T, DeltaError>;

// ============================================================================
// ChangeSet
// ============================================================================

/// A file rename detected within the rename window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamedFile {
    pub from: String,
    pub to: String,
}

/// Classified changes for a batch of paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Paths new to the index
    pub added: Vec<String>,
    /// Paths whose normalized content changed
    pub modified: Vec<String>,
    /// Paths that moved with identical content
    pub renamed: Vec<RenamedFile>,
    /// Paths removed from disk
    pub deleted: Vec<String>,
    /// Paths whose content is unchanged
    pub unchanged: Vec<String>,
    /// Paths that import a changed file (transitively) and need reprocessing
    pub dependencies: Vec<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether anything needs reprocessing.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty()
            || !self.modified.is_empty()
            || !self.renamed.is_empty()
            || !self.deleted.is_empty()
            || !self.dependencies.is_empty()
    }

    /// Total classified changes (unchanged excluded).
    pub fn total_changes(&self) -> usize {
        self.added.len() + self.modified.len() + self.renamed.len() + self.deleted.len()
    }

    /// Paths whose content must be re-parsed and re-embedded.
    pub fn files_to_process(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        out.extend(self.added.iter().cloned());
        out.extend(self.modified.iter().cloned());
        out.extend(self.dependencies.iter().cloned());
        out
    }
}

// ============================================================================
// Content hashing
// ============================================================================

/// SHA-256 of normalized content: CRLF folded to LF, trailing whitespace
/// trimmed per line. Whitespace-only edits therefore hash identically.
pub fn normalized_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    for line in content.split('\n') {
        hasher.update(line.trim_end().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Normalized hash of a file on disk.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let content = std::fs::read_to_string(path)?;
    Ok(normalized_content_hash(&content))
}

// ============================================================================
// Exclusion filter
// ============================================================================

/// Directory names never scanned.
const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "build",
    "dist",
    "__pycache__",
    ".venv",
    "venv",
];

/// File patterns never scanned.
const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &["*.min.js", "*.lock", "*.generated.*"];

/// Decides which paths the delta engine ignores.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    exclude_patterns: Vec<glob::Pattern>,
    exclude_dirs: HashSet<String>,
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl ExclusionFilter {
    /// Create a filter with the default set plus custom glob patterns.
    ///
    /// Unparseable custom patterns are skipped.
    pub fn new(custom_patterns: &[&str]) -> Self {
        let mut patterns = Vec::new();
        for pattern in DEFAULT_EXCLUDE_PATTERNS.iter().chain(custom_patterns) {
            if let Ok(p) = glob::Pattern::new(pattern) {
                patterns.push(p);
            }
        }

        Self {
            exclude_patterns: patterns,
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Check whether a repository-relative path should be excluded.
    pub fn should_exclude(&self, rel_path: &str) -> bool {
        if rel_path
            .split('/')
            .any(|component| self.exclude_dirs.contains(component))
        {
            return true;
        }

        if let Some(filename) = rel_path.rsplit('/').next() {
            if self
                .exclude_patterns
                .iter()
                .any(|pattern| pattern.matches(filename))
            {
                return true;
            }
        }

        false
    }
}

// ============================================================================
// Delta Engine
// ============================================================================

struct DeletedEntry {
    hash: String,
    path: String,
    deleted_at: Instant,
}

/// Content-hash based change detector with rename tracking.
///
/// Holds the prior path → hash state (seeded from the metadata store) and a
/// short-lived memory of deleted hashes for rename detection. `analyze`
/// classifies a path set and commits the new state.
pub struct DeltaEngine {
    root: PathBuf,
    prior: HashMap<String, String>,
    recently_deleted: Vec<DeletedEntry>,
    rename_window: Duration,
    filter: ExclusionFilter,
    tracker: DependencyTracker,
}

impl DeltaEngine {
    /// Create an engine for a repository root.
    pub fn new(root: &Path) -> Result<Self> {
        if !root.exists() {
            return Err(DeltaError::RootNotFound(root.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            prior: HashMap::new(),
            recently_deleted: Vec::new(),
            rename_window: RENAME_WINDOW,
            filter: ExclusionFilter::default(),
            tracker: DependencyTracker::new(root),
        })
    }

    /// Override the rename window (testing; production keeps 5 s).
    pub fn with_rename_window(mut self, window: Duration) -> Self {
        self.rename_window = window;
        self
    }

    /// Replace the exclusion filter.
    pub fn with_exclusions(mut self, filter: ExclusionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Seed prior state from persisted file state (path → content hash).
    pub fn set_prior_state(&mut self, state: HashMap<String, String>) {
        self.prior = state;
    }

    /// Current path → hash state.
    pub fn state(&self) -> &HashMap<String, String> {
        &self.prior
    }

    /// Scan the whole repository and classify against prior state.
    pub fn analyze_repository(&mut self) -> Result<ChangeSet> {
        let mut paths = self.scan_files()?;
        // Prior paths must be revisited so deletions are noticed
        for path in self.prior.keys() {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        self.analyze(&paths)
    }

    /// Classify a specific set of repository-relative paths.
    ///
    /// Commits the resulting state: a second analyze of the same paths with
    /// no disk changes reports everything `unchanged`.
    pub fn analyze(&mut self, paths: &[String]) -> Result<ChangeSet> {
        let start = Instant::now();
        let now = Instant::now();

        self.expire_deleted(now);

        let mut changes = ChangeSet::new();

        // Hash all present files in parallel
        let hashed: Vec<(String, Option<String>)> = paths
            .par_iter()
            .map(|rel| {
                let abs = self.root.join(rel);
                if abs.is_file() {
                    match hash_file(&abs) {
                        Ok(hash) => (rel.clone(), Some(hash)),
                        Err(e) => {
                            warn!("Failed to hash {}: {}", rel, e);
                            (rel.clone(), None)
                        }
                    }
                } else {
                    (rel.clone(), None)
                }
            })
            .collect();

        // Pass 1: deletions, remembered for rename detection
        for (rel, hash) in &hashed {
            if hash.is_none() {
                if let Some(old_hash) = self.prior.remove(rel) {
                    self.recently_deleted.push(DeletedEntry {
                        hash: old_hash,
                        path: rel.clone(),
                        deleted_at: now,
                    });
                    changes.deleted.push(rel.clone());
                }
            }
        }

        // Pass 2: additions (with rename reclassification), modifications
        for (rel, hash) in hashed {
            let Some(hash) = hash else { continue };

            match self.prior.get(&rel) {
                Some(prior_hash) if *prior_hash == hash => {
                    changes.unchanged.push(rel);
                }
                Some(_) => {
                    self.prior.insert(rel.clone(), hash);
                    changes.modified.push(rel);
                }
                None => {
                    // New path: a just-deleted file with the same hash makes
                    // this a rename
                    if let Some(pos) = self
                        .recently_deleted
                        .iter()
                        .position(|entry| entry.hash == hash)
                    {
                        let entry = self.recently_deleted.remove(pos);
                        changes.deleted.retain(|p| *p != entry.path);
                        changes.renamed.push(RenamedFile {
                            from: entry.path,
                            to: rel.clone(),
                        });
                    } else {
                        changes.added.push(rel.clone());
                    }
                    self.prior.insert(rel, hash);
                }
            }
        }

        // Pass 3: transitive dependents of changed files
        let mut changed: Vec<String> = Vec::new();
        changed.extend(changes.modified.iter().cloned());
        changed.extend(changes.deleted.iter().cloned());
        changed.extend(changes.renamed.iter().map(|r| r.to.clone()));
        if !changed.is_empty() {
            let universe: Vec<String> = self.prior.keys().cloned().collect();
            let already: HashSet<&String> = changes
                .added
                .iter()
                .chain(changes.modified.iter())
                .chain(changes.renamed.iter().map(|r| &r.to))
                .collect();

            changes.dependencies = self
                .tracker
                .dependents_of(&changed, &universe)
                .into_iter()
                .filter(|p| !already.contains(p))
                .collect();
        }

        info!(
            "Delta analysis: {} added, {} modified, {} renamed, {} deleted, {} unchanged, {} dependents in {:.2?}",
            changes.added.len(),
            changes.modified.len(),
            changes.renamed.len(),
            changes.deleted.len(),
            changes.unchanged.len(),
            changes.dependencies.len(),
            start.elapsed()
        );

        Ok(changes)
    }

    /// Drop remembered deletions older than the rename window.
    fn expire_deleted(&mut self, now: Instant) {
        let window = self.rename_window;
        self.recently_deleted
            .retain(|entry| now.duration_since(entry.deleted_at) < window);
    }

    /// Find all indexable files under the root.
    fn scan_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();

        let walker = WalkBuilder::new(&self.root)
            .follow_links(false)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error walking directory: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");

            if self.filter.should_exclude(&rel) {
                continue;
            }
            if Language::from_path(Path::new(&rel)).is_none() {
                continue;
            }

            files.push(rel);
        }

        Ok(files)
    }
}

// ============================================================================
// Dependency Tracker
// ============================================================================

/// Resolves textual imports to local files and computes reverse closures.
pub struct DependencyTracker {
    root: PathBuf,
}

impl DependencyTracker {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Files in `universe` that (transitively) import any of `changed`.
    pub fn dependents_of(&self, changed: &[String], universe: &[String]) -> Vec<String> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut index_of: HashMap<String, NodeIndex> = HashMap::new();

        for path in universe {
            let idx = graph.add_node(path.clone());
            index_of.insert(path.clone(), idx);
        }
        for path in changed {
            if !index_of.contains_key(path) {
                let idx = graph.add_node(path.clone());
                index_of.insert(path.clone(), idx);
            }
        }

        // importer -> imported edges
        for path in universe {
            let abs = self.root.join(path);
            let Ok(content) = std::fs::read_to_string(&abs) else {
                continue;
            };
            let Some(language) = Language::from_path(Path::new(path)) else {
                continue;
            };

            for spec in scan_imports(&content, language) {
                if let Some(target) = self.resolve_local(path, &spec) {
                    if let (Some(&from), Some(&to)) = (index_of.get(path), index_of.get(&target)) {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }

        // Reverse BFS from the changed set
        let mut affected: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = changed
            .iter()
            .filter_map(|p| index_of.get(p).copied())
            .collect();
        let seeds: HashSet<NodeIndex> = queue.iter().copied().collect();

        while let Some(node) = queue.pop_front() {
            for importer in graph.neighbors_directed(node, petgraph::Direction::Incoming) {
                if affected.insert(importer) {
                    queue.push_back(importer);
                }
            }
        }

        let mut out: Vec<String> = affected
            .into_iter()
            .filter(|idx| !seeds.contains(idx))
            .map(|idx| graph[idx].clone())
            .collect();
        out.sort_unstable();
        out
    }

    /// Resolve an import specifier to a repository-relative path.
    ///
    /// Only local specifiers resolve; package imports return `None`.
    fn resolve_local(&self, importer: &str, spec: &str) -> Option<String> {
        let importer_dir = Path::new(importer).parent().unwrap_or(Path::new(""));

        let candidate_base = if spec.starts_with("./") || spec.starts_with("../") {
            importer_dir.join(spec)
        } else if spec.contains('/') || spec.ends_with(".h") || spec.ends_with(".hpp") {
            // Root-relative (C includes, go-style paths)
            PathBuf::from(spec)
        } else if spec.contains('.') && !spec.contains("::") {
            // Python dotted module
            PathBuf::from(spec.replace('.', "/"))
        } else {
            PathBuf::from(spec)
        };

        let normalized = normalize_path(&candidate_base);

        // Exact file, or file with a known extension appended
        let direct = self.root.join(&normalized);
        if direct.is_file() {
            return Some(normalized.to_string_lossy().replace('\\', "/"));
        }
        for ext in Language::all_extensions() {
            let with_ext = self.root.join(format!(
                "{}.{}",
                normalized.to_string_lossy().replace('\\', "/"),
                ext
            ));
            if with_ext.is_file() {
                return Some(format!(
                    "{}.{}",
                    normalized.to_string_lossy().replace('\\', "/"),
                    ext
                ));
            }
        }
        None
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

// ============================================================================
// Event Coalescer
// ============================================================================

/// Debouncing collector for file-watch events.
///
/// Events accumulate until the debounce window passes without new arrivals,
/// or the pending set hits the high-water mark; either drains the batch.
pub struct EventCoalescer {
    window: Duration,
    high_water: usize,
    state: Mutex<CoalescerState>,
}

struct CoalescerState {
    pending: HashSet<String>,
    last_event: Option<Instant>,
}

impl EventCoalescer {
    /// Create a coalescer with a debounce window and a high-water mark.
    pub fn new(window: Duration, high_water: usize) -> Self {
        Self {
            window,
            high_water,
            state: Mutex::new(CoalescerState {
                pending: HashSet::new(),
                last_event: None,
            }),
        }
    }

    /// Record a file event. Duplicate paths coalesce.
    pub fn offer(&self, path: impl Into<String>) {
        let mut state = self.state.lock();
        state.pending.insert(path.into());
        state.last_event = Some(Instant::now());
    }

    /// Number of coalesced pending paths.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Drain the pending batch if the window has elapsed or the high-water
    /// mark is exceeded. Returns `None` while events are still settling.
    pub fn drain_ready(&self) -> Option<Vec<String>> {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            return None;
        }

        let over_high_water = state.pending.len() >= self.high_water;
        let settled = state
            .last_event
            .map(|at| at.elapsed() >= self.window)
            .unwrap_or(false);

        if over_high_water || settled {
            debug!(
                "Draining {} coalesced events (high_water={}, settled={})",
                state.pending.len(),
                over_high_water,
                settled
            );
            let mut batch: Vec<String> = state.pending.drain().collect();
            batch.sort_unstable();
            state.last_event = None;
            Some(batch)
        } else {
            None
        }
    }
}
