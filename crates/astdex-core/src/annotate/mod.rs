//! Annotation Engine
//!
//! Builds `Annotation` records for significant AST nodes. Sub-analyzers are
//! held by composition; per-language behavior lives in their data tables.
//! Batching is time-budgeted: completed batches are kept, a batch that
//! overruns the budget is dropped and its nodes stay stale until the next
//! update.

mod complexity;
mod dependency;
mod signature;
mod summary;

pub use complexity::{ComplexityAnalyzer, ComplexityScore};
pub use dependency::{scan_imports, DependencyAnalyzer, NodeDependencies};
pub use signature::SignatureExtractor;
pub use summary::{SummaryGenerator, SummaryInputs};

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ast::ParseResult;
use crate::classify::{NodeClassifier, NodeRole, NodeTier};

/// Version stamped into every annotation for forward compatibility.
pub const ANNOTATION_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// Annotation record
// ============================================================================

/// A structured record describing a significant AST node.
///
/// One annotation exists per node id; re-annotating replaces the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
    /// Content-hash id of the annotated node
    pub node_id: String,
    /// Repository-relative file path
    pub file_path: String,
    /// Canonical language id
    pub language: String,
    /// Normalized declaration signature
    pub signature: String,
    /// Template-generated summary sentence
    pub summary: String,
    /// Short purpose phrase ("parsing", "validation", ...)
    pub purpose: String,
    /// Imports, calls, and type references the node depends on
    pub dependencies: Vec<String>,
    /// Cyclomatic complexity
    pub complexity: u32,
    /// Cognitive complexity
    pub cognitive: u32,
    /// Semantic tags ("function", "async", "exported", "private", ...)
    pub tags: Vec<String>,
    /// Unix milliseconds of the last (re-)annotation
    pub last_updated: i64,
    /// Annotation schema version
    pub schema_version: u32,
}

impl Annotation {
    /// Whether the annotation is tagged private.
    pub fn is_private(&self) -> bool {
        self.tags.iter().any(|t| t == "private")
    }
}

// ============================================================================
// Engine configuration
// ============================================================================

/// Batching configuration for the annotation engine.
#[derive(Debug, Clone, Copy)]
pub struct AnnotationConfig {
    /// Nodes per batch
    pub batch_size: usize,
    /// Wall-clock budget for one annotation task
    pub max_processing_time: Duration,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_processing_time: Duration::from_secs(30),
        }
    }
}

/// Outcome of a batched annotation run.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Annotations from completed batches
    pub annotations: Vec<Annotation>,
    /// Arena indices of nodes in dropped batches; they stay stale
    pub stale: Vec<u32>,
    /// Batches fully processed
    pub batches_completed: usize,
    /// Batches dropped on budget overrun
    pub batches_dropped: usize,
}

// ============================================================================
// Annotation Engine
// ============================================================================

/// Orchestrates signature, complexity, dependency, and summary analysis.
pub struct AnnotationEngine {
    config: AnnotationConfig,
    classifier: NodeClassifier,
    signatures: SignatureExtractor,
    complexity: ComplexityAnalyzer,
    dependencies: DependencyAnalyzer,
    summaries: SummaryGenerator,
}

impl Default for AnnotationEngine {
    fn default() -> Self {
        Self::new(AnnotationConfig::default())
    }
}

impl AnnotationEngine {
    /// Create an engine with the given batching configuration.
    pub fn new(config: AnnotationConfig) -> Self {
        Self {
            config,
            classifier: NodeClassifier::new(),
            signatures: SignatureExtractor::new(),
            complexity: ComplexityAnalyzer::new(),
            dependencies: DependencyAnalyzer::new(),
            summaries: SummaryGenerator::new(),
        }
    }

    /// Annotate every significant node of a parse result.
    ///
    /// Batches of `batch_size` nodes are processed until the time budget is
    /// exhausted; remaining batches are dropped and reported as stale.
    pub fn annotate_file(&self, result: &ParseResult, source: &str) -> BatchOutcome {
        let significant = self.classifier.significant_nodes(result);
        self.annotate_nodes(result, &significant, source)
    }

    /// Annotate a specific set of nodes, batched under the time budget.
    pub fn annotate_nodes(
        &self,
        result: &ParseResult,
        indices: &[u32],
        source: &str,
    ) -> BatchOutcome {
        let start = Instant::now();
        let mut outcome = BatchOutcome::default();

        for batch in indices.chunks(self.config.batch_size.max(1)) {
            if start.elapsed() > self.config.max_processing_time {
                warn!(
                    "Annotation budget exhausted after {} batches, dropping {} nodes",
                    outcome.batches_completed,
                    indices.len() - outcome.annotations.len()
                );
                outcome.stale.extend_from_slice(batch);
                outcome.batches_dropped += 1;
                continue;
            }

            for &index in batch {
                outcome.annotations.push(self.annotate_node(result, index, source));
            }
            outcome.batches_completed += 1;
        }

        debug!(
            "Annotated {} nodes ({} batches, {} dropped)",
            outcome.annotations.len(),
            outcome.batches_completed,
            outcome.batches_dropped
        );

        outcome
    }

    /// Build the annotation for one node.
    pub fn annotate_node(&self, result: &ParseResult, index: u32, source: &str) -> Annotation {
        let node = result
            .node(index)
            .expect("annotate_node called with a valid arena index");

        let classification = self.classifier.classify(result, index);
        let signature = self.signatures.extract(node, source);
        let name = self.signatures.declared_name(result, index, source);
        let parameters = self.signatures.parameter_list(result, index, source);
        let score = self.complexity.analyze(result, index, source);
        let deps = self.dependencies.analyze(result, index, source);

        let node_text = node.text(source);
        let is_async = detect_async(node_text, &node.kind);
        let is_exported = detect_exported(result, index, source);
        let is_private = detect_private(name, node_text, node.language);

        let inputs = SummaryInputs {
            name,
            role: Some(classification.role),
            file_path: &node.file_path,
            language: node.language.as_str(),
            parameters,
            calls: &deps.calls,
            is_async,
            is_exported,
        };
        let summary = self.summaries.summarize(&inputs);
        let purpose = self.summaries.purpose(&inputs);

        let mut tags: Vec<String> = vec![role_tag(classification.role).to_string()];
        if is_async {
            tags.push("async".to_string());
        }
        if is_exported {
            tags.push("exported".to_string());
        }
        if is_private {
            tags.push("private".to_string());
        }
        if let Some(name) = name {
            if deps.calls.iter().any(|c| c == name) {
                tags.push("recursive".to_string());
            }
            let lowered = name.to_lowercase();
            if lowered.starts_with("test") || lowered.ends_with("_test") {
                tags.push("test".to_string());
            }
        }

        Annotation {
            node_id: node.id.clone(),
            file_path: node.file_path.clone(),
            language: node.language.as_str().to_string(),
            signature,
            summary,
            purpose,
            dependencies: deps.into_list(),
            complexity: score.cyclomatic,
            cognitive: score.cognitive,
            tags,
            last_updated: unix_millis(),
            schema_version: ANNOTATION_SCHEMA_VERSION,
        }
    }

    /// The classifier used for significance decisions.
    pub fn classifier(&self) -> &NodeClassifier {
        &self.classifier
    }
}

fn role_tag(role: NodeRole) -> &'static str {
    match role {
        NodeRole::Function => "function",
        NodeRole::Class => "class",
        NodeRole::Method => "method",
        NodeRole::Import => "import",
        NodeRole::Type => "type",
        NodeRole::Statement => "statement",
        NodeRole::Expression => "expression",
        NodeRole::Comment => "comment",
    }
}

fn detect_async(node_text: &str, kind: &str) -> bool {
    node_text.starts_with("async ")
        || node_text.starts_with("pub async ")
        || node_text.contains(" async fn ")
        || kind.contains("async")
}

fn detect_exported(result: &ParseResult, index: u32, source: &str) -> bool {
    let Some(node) = result.node(index) else {
        return false;
    };

    // Export wrappers (TS/JS) make the child exported
    if let Some(parent_idx) = node.parent {
        if let Some(parent) = result.node(parent_idx) {
            if parent.kind == "export_statement" {
                return true;
            }
        }
    }

    let text = node.text(source);
    text.starts_with("pub ")
        || text.starts_with("export ")
        || text.starts_with("public ")
        || text.contains("public static")
}

fn detect_private(name: Option<&str>, node_text: &str, language: crate::language::Language) -> bool {
    if let Some(name) = name {
        if name.starts_with('_') {
            return true;
        }
    }
    if node_text.starts_with("private ") {
        return true;
    }
    // Rust items without pub are crate-private
    language == crate::language::Language::Rust
        && !node_text.starts_with("pub")
        && (node_text.starts_with("fn ") || node_text.starts_with("struct "))
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Current significance tier of a node, re-exported for pipeline callers.
pub fn tier_of(result: &ParseResult, index: u32) -> NodeTier {
    NodeClassifier::new().classify(result, index).tier
}
