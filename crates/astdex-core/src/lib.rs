//! Astdex Core - AST parsing, annotation, and change analysis
//!
//! This crate provides the ingest-side building blocks:
//! - Language registry and process-lifetime grammar cache
//! - Tree-sitter parser adapter producing a normalized AST node stream
//! - Table-driven node classification (significance tiers, role tags)
//! - Annotation engine (signatures, complexity, dependencies, summaries)
//! - Incremental update engine with rename detection and dependency closure

pub mod annotate;
pub mod ast;
pub mod classify;
pub mod delta;
pub mod language;
pub mod parser;

// Re-exports for convenience
pub use annotate::{
    scan_imports, Annotation, AnnotationConfig, AnnotationEngine, BatchOutcome,
    ComplexityAnalyzer, ComplexityScore, DependencyAnalyzer, SignatureExtractor,
    SummaryGenerator, ANNOTATION_SCHEMA_VERSION,
};
pub use ast::{generate_node_id, AstNode, ParseErrorInfo, ParseResult};
pub use classify::{Classification, NodeClassifier, NodeRole, NodeTier};
pub use delta::{
    normalized_content_hash, ChangeSet, DeltaEngine, DeltaError, DependencyTracker,
    EventCoalescer, ExclusionFilter, RenamedFile, RENAME_WINDOW,
};
pub use language::{GrammarCache, Language, LanguageError, LanguageTier};
pub use parser::{ParserAdapter, ParserError};
