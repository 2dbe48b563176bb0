//! Parser Adapter
//!
//! Turns source text into the normalized `AstNode` stream. Parsing is
//! best-effort: malformed input never fails a parse; syntax errors are
//! reported as `ParseErrorInfo` entries alongside the recovered node stream.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

use crate::ast::{generate_node_id, AstNode, ParseErrorInfo, ParseResult};
use crate::language::{GrammarCache, Language, LanguageError};

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur around a parse (never from malformed input).
#[derive(Debug, Error)]
pub enum ParserError {
    /// Language resolution failed
    #[error(transparent)]
    Language(#[from] LanguageError),

    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// No language could be inferred for a file
    #[error("cannot infer language for file: {0}")]
    UnknownExtension(String),
}

/// Result type for parser operations.
pub type Result<T> = std::result::Result<T, ParserError>;

// ============================================================================
// Parser Adapter
// ============================================================================

/// Tree-sitter backed parser adapter.
///
/// Holds one `tree_sitter::Parser` per language, created lazily from the
/// shared grammar cache. Parsers are reused across calls; `dispose` releases
/// them.
pub struct ParserAdapter {
    grammars: Arc<GrammarCache>,
    parsers: Mutex<HashMap<Language, Parser>>,
}

impl ParserAdapter {
    /// Create an adapter over a shared grammar cache.
    pub fn new(grammars: Arc<GrammarCache>) -> Self {
        Self {
            grammars,
            parsers: Mutex::new(HashMap::new()),
        }
    }

    /// Parse source text as the given language.
    ///
    /// Always returns a result: on syntax errors the node stream is the
    /// recovered best-effort tree and `errors` lists the broken regions.
    pub fn parse_code(&self, text: &str, language: Language, file_path: &str) -> Result<ParseResult> {
        let start = Instant::now();

        let mut parsers = self.parsers.lock();
        let parser = match parsers.entry(language) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let grammar = self.grammars.load_language(language)?;
                let mut parser = Parser::new();
                parser
                    .set_language(&grammar)
                    .map_err(|e| LanguageError::BackendUnavailable {
                        language: language.as_str().to_string(),
                        reason: e.to_string(),
                    })?;
                entry.insert(parser)
            }
        };

        let tree = parser.parse(text, None);
        drop(parsers);

        let (nodes, errors) = match tree {
            Some(tree) => flatten_tree(tree.root_node(), text, language, file_path),
            None => {
                // The backend gave up entirely (timeout or cancellation);
                // surface an empty stream with one whole-file error.
                warn!("Parser produced no tree for {}", file_path);
                (
                    Vec::new(),
                    vec![ParseErrorInfo {
                        start_byte: 0,
                        end_byte: text.len(),
                        message: "parser produced no tree".to_string(),
                    }],
                )
            }
        };

        let parse_time_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Parsed {} as {}: {} nodes, {} errors in {}ms",
            file_path,
            language,
            nodes.len(),
            errors.len(),
            parse_time_ms
        );

        Ok(ParseResult {
            nodes,
            errors,
            language,
            parse_time_ms,
        })
    }

    /// Read a file and parse it.
    ///
    /// The language is inferred from the extension unless `language_override`
    /// is given.
    pub fn parse_file(&self, path: &Path, language_override: Option<Language>) -> Result<ParseResult> {
        let language = match language_override {
            Some(lang) => lang,
            None => Language::from_path(path)
                .ok_or_else(|| ParserError::UnknownExtension(path.display().to_string()))?,
        };

        let text = std::fs::read_to_string(path).map_err(|e| ParserError::Read {
            path: path.display().to_string(),
            source: e,
        })?;

        self.parse_code(&text, language, &path.to_string_lossy().replace('\\', "/"))
    }

    /// Release backend parser resources.
    ///
    /// The adapter remains usable; parsers are recreated lazily.
    pub fn dispose(&self) {
        self.parsers.lock().clear();
    }
}

/// Flatten a tree-sitter tree into the arena model.
///
/// Only named nodes are kept; anonymous tokens (punctuation, keywords) carry
/// no structure worth annotating. ERROR and MISSING nodes become error
/// records and are excluded from the stream.
fn flatten_tree(
    root: Node<'_>,
    source: &str,
    language: Language,
    file_path: &str,
) -> (Vec<AstNode>, Vec<ParseErrorInfo>) {
    let line_starts = compute_line_starts(source);
    let mut nodes: Vec<AstNode> = Vec::new();
    let mut errors: Vec<ParseErrorInfo> = Vec::new();

    // (ts node, arena parent index)
    let mut stack: Vec<(Node<'_>, Option<u32>)> = vec![(root, None)];

    while let Some((node, parent)) = stack.pop() {
        if node.is_error() || node.is_missing() {
            errors.push(ParseErrorInfo {
                start_byte: node.start_byte(),
                end_byte: node.end_byte(),
                message: if node.is_missing() {
                    format!("missing {}", node.kind())
                } else {
                    "syntax error".to_string()
                },
            });
            continue;
        }

        let index = nodes.len() as u32;
        let (start_line, start_col) =
            position_of(node.start_byte(), source, &line_starts);

        nodes.push(AstNode {
            id: generate_node_id(file_path, node.start_byte(), node.end_byte(), node.kind()),
            kind: node.kind().to_string(),
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line,
            start_col,
            parent,
            children: Vec::new(),
            language,
            file_path: file_path.to_string(),
        });

        if let Some(parent_idx) = parent {
            nodes[parent_idx as usize].children.push(index);
        }

        // Push named children in reverse so they pop in source order
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push((child, Some(index)));
        }
    }

    (nodes, errors)
}

/// Byte offsets of every line start.
fn compute_line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0usize];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// 1-based (line, column) of a byte offset; columns count Unicode scalars.
fn position_of(byte: usize, source: &str, line_starts: &[usize]) -> (usize, usize) {
    let line_idx = match line_starts.binary_search(&byte) {
        Ok(i) => i,
        Err(i) => i.saturating_sub(1),
    };
    let line_start = line_starts[line_idx];
    let col = source
        .get(line_start..byte)
        .map(|prefix| prefix.chars().count())
        .unwrap_or(0);
    (line_idx + 1, col + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> ParserAdapter {
        ParserAdapter::new(Arc::new(GrammarCache::new()))
    }

    #[test]
    fn test_parse_typescript_function() {
        let result = adapter()
            .parse_code(
                "export function add(x: number, y: number) { return x + y; }",
                Language::TypeScript,
                "a.ts",
            )
            .unwrap();

        assert!(!result.nodes.is_empty());
        assert!(result.errors.is_empty());
        assert_eq!(result.language, Language::TypeScript);
        assert!(result
            .nodes
            .iter()
            .any(|n| n.kind == "function_declaration"));
    }

    #[test]
    fn test_parse_python_function() {
        let result = adapter()
            .parse_code("def mul(x, y):\n    return x * y\n", Language::Python, "b.py")
            .unwrap();

        assert!(result
            .nodes
            .iter()
            .any(|n| n.kind == "function_definition"));
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_malformed_input_never_fails() {
        let result = adapter()
            .parse_code("def broken(:\n  ???", Language::Python, "broken.py")
            .unwrap();

        // Best-effort nodes plus recorded errors
        assert!(result.has_errors());
        for err in &result.errors {
            assert!(err.end_byte >= err.start_byte);
        }
    }

    #[test]
    fn test_tree_invariant_parent_contains_child() {
        let result = adapter()
            .parse_code(
                "class Greeter {\n  greet(name: string) { return `hi ${name}`; }\n}\n",
                Language::TypeScript,
                "greeter.ts",
            )
            .unwrap();

        for node in &result.nodes {
            if let Some(parent_idx) = node.parent {
                let parent = result.node(parent_idx).unwrap();
                assert!(parent.start_byte <= node.start_byte);
                assert!(parent.end_byte >= node.end_byte);
            }
        }
    }

    #[test]
    fn test_node_ids_stable_across_reparse() {
        let src = "def mul(x, y):\n    return x * y\n";
        let a = adapter().parse_code(src, Language::Python, "b.py").unwrap();
        let b = adapter().parse_code(src, Language::Python, "b.py").unwrap();

        let ids_a: Vec<&str> = a.nodes.iter().map(|n| n.id.as_str()).collect();
        let ids_b: Vec<&str> = b.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_positions_are_one_based_scalar_columns() {
        // Multi-byte character before the function keyword
        let src = "// á\nfn main() {}\n";
        let result = adapter().parse_code(src, Language::Rust, "m.rs").unwrap();

        let func = result
            .nodes
            .iter()
            .find(|n| n.kind == "function_item")
            .unwrap();
        assert_eq!(func.start_line, 2);
        assert_eq!(func.start_col, 1);
    }

    #[test]
    fn test_parse_file_infers_language() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.go");
        std::fs::write(&path, "package main\n\nfunc main() {}\n").unwrap();

        let result = adapter().parse_file(&path, None).unwrap();
        assert_eq!(result.language, Language::Go);
    }

    #[test]
    fn test_parse_file_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let result = adapter().parse_file(&path, None);
        assert!(matches!(result, Err(ParserError::UnknownExtension(_))));
    }

    #[test]
    fn test_dispose_then_reuse() {
        let adapter = adapter();
        adapter
            .parse_code("fn a() {}", Language::Rust, "a.rs")
            .unwrap();
        adapter.dispose();
        let result = adapter.parse_code("fn b() {}", Language::Rust, "b.rs");
        assert!(result.is_ok());
    }
}
