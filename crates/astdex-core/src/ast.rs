//! Universal AST Node Model
//!
//! Every backend's raw tree is flattened into this arena representation.
//! Nodes reference each other by arena index; the `id` field is a content
//! hash of `(file_path, start_byte, end_byte, kind)` and is therefore stable
//! across re-parses of unchanged regions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::language::Language;

/// A normalized AST node.
///
/// Byte offsets are UTF-8; `start_line` and `start_col` are 1-based, with
/// columns measured in Unicode scalar values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstNode {
    /// Content-hash identifier, stable across re-parses of unchanged regions
    pub id: String,
    /// Grammar node kind (e.g. `function_declaration`)
    pub kind: String,
    /// Start byte offset (inclusive)
    pub start_byte: usize,
    /// End byte offset (exclusive)
    pub end_byte: usize,
    /// 1-based start line
    pub start_line: usize,
    /// 1-based start column in Unicode scalar values
    pub start_col: usize,
    /// Arena index of the parent (`None` for the root)
    pub parent: Option<u32>,
    /// Arena indices of the children, in source order
    pub children: Vec<u32>,
    /// Language the node was parsed as
    pub language: Language,
    /// Repository-relative file path
    pub file_path: String,
}

impl AstNode {
    /// Byte length of the node's span.
    pub fn byte_len(&self) -> usize {
        self.end_byte.saturating_sub(self.start_byte)
    }

    /// Slice the node's text out of its source.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start_byte..self.end_byte.min(source.len())]
    }
}

/// Generate the content-hash id for a node.
///
/// SHA-256 over `(file_path, start_byte, end_byte, kind)`, truncated to
/// 16 bytes and hex-encoded.
pub fn generate_node_id(file_path: &str, start_byte: usize, end_byte: usize, kind: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(start_byte.to_le_bytes());
    hasher.update(end_byte.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(kind.as_bytes());
    let digest = hasher.finalize();

    let mut id = String::with_capacity(32);
    for byte in &digest[..16] {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}

/// A syntax error surfaced by a best-effort parse.
///
/// Parse errors never fail the parse; they are reported alongside the node
/// stream so callers can decide how much of the file to trust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseErrorInfo {
    /// Start byte of the offending region
    pub start_byte: usize,
    /// End byte of the offending region
    pub end_byte: usize,
    /// Human-readable description
    pub message: String,
}

/// Result of parsing one unit of source text.
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Flattened node arena; index 0 is the root when non-empty
    pub nodes: Vec<AstNode>,
    /// Syntax errors found during the parse
    pub errors: Vec<ParseErrorInfo>,
    /// Language the text was parsed as
    pub language: Language,
    /// Wall-clock parse time in milliseconds
    pub parse_time_ms: u64,
}

impl ParseResult {
    /// The root node, if the parse produced any nodes.
    pub fn root(&self) -> Option<&AstNode> {
        self.nodes.first()
    }

    /// Look up a node by arena index.
    pub fn node(&self, index: u32) -> Option<&AstNode> {
        self.nodes.get(index as usize)
    }

    /// Whether the parse encountered syntax errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Depth of a node (root = 0).
    pub fn depth(&self, index: u32) -> usize {
        let mut depth = 0;
        let mut current = self.nodes.get(index as usize).and_then(|n| n.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes.get(parent as usize).and_then(|n| n.parent);
        }
        depth
    }

    /// Arena indices of a node's subtree (the node itself included),
    /// in depth-first order.
    pub fn subtree(&self, index: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut stack = vec![index];
        while let Some(idx) = stack.pop() {
            if let Some(node) = self.nodes.get(idx as usize) {
                out.push(idx);
                for &child in node.children.iter().rev() {
                    stack.push(child);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_deterministic() {
        let a = generate_node_id("src/a.ts", 0, 42, "function_declaration");
        let b = generate_node_id("src/a.ts", 0, 42, "function_declaration");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_node_id_varies_with_inputs() {
        let base = generate_node_id("src/a.ts", 0, 42, "function_declaration");
        assert_ne!(base, generate_node_id("src/b.ts", 0, 42, "function_declaration"));
        assert_ne!(base, generate_node_id("src/a.ts", 1, 42, "function_declaration"));
        assert_ne!(base, generate_node_id("src/a.ts", 0, 43, "function_declaration"));
        assert_ne!(base, generate_node_id("src/a.ts", 0, 42, "class_declaration"));
    }

    fn make_node(id: u32, parent: Option<u32>, children: Vec<u32>) -> AstNode {
        AstNode {
            id: format!("node{id}"),
            kind: "statement".to_string(),
            start_byte: 0,
            end_byte: 10,
            start_line: 1,
            start_col: 1,
            parent,
            children,
            language: Language::Python,
            file_path: "test.py".to_string(),
        }
    }

    #[test]
    fn test_depth_and_subtree() {
        // 0 -> 1 -> 2, 0 -> 3
        let result = ParseResult {
            nodes: vec![
                make_node(0, None, vec![1, 3]),
                make_node(1, Some(0), vec![2]),
                make_node(2, Some(1), vec![]),
                make_node(3, Some(0), vec![]),
            ],
            errors: vec![],
            language: Language::Python,
            parse_time_ms: 0,
        };

        assert_eq!(result.depth(0), 0);
        assert_eq!(result.depth(2), 2);
        assert_eq!(result.subtree(0), vec![0, 1, 2, 3]);
        assert_eq!(result.subtree(1), vec![1, 2]);
    }

    #[test]
    fn test_node_text() {
        let source = "def mul(x, y):";
        let mut node = make_node(0, None, vec![]);
        node.start_byte = 4;
        node.end_byte = 7;
        assert_eq!(node.text(source), "mul");
    }
}
