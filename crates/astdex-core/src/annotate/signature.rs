//! Signature extraction
//!
//! Per-language rules live in a small data table: each language declares how
//! a declaration's header is delimited from its body, and the extractor
//! slices and normalizes the header text.

use crate::ast::{AstNode, ParseResult};
use crate::language::Language;

/// Longest signature we will keep, in characters.
const MAX_SIGNATURE_CHARS: usize = 300;

/// How a language separates a declaration header from its body.
struct SignatureRule {
    /// Characters that open the body
    body_open: &'static [char],
    /// Prefixes stripped from the front (decorators, attributes)
    strip_prefixes: &'static [&'static str],
}

fn rule_for(language: Language) -> SignatureRule {
    match language {
        Language::Python => SignatureRule {
            body_open: &[':'],
            strip_prefixes: &["@"],
        },
        Language::TypeScript
        | Language::Tsx
        | Language::JavaScript
        | Language::Rust
        | Language::Go
        | Language::C
        | Language::Cpp
        | Language::CSharp => SignatureRule {
            body_open: &['{'],
            strip_prefixes: &["#[", "@"],
        },
    }
}

/// Extracts normalized signatures from declaration nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureExtractor;

impl SignatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the signature of a node.
    ///
    /// The header runs from the node start to the body opener (exclusive);
    /// whitespace is collapsed and attribute/decorator lines are dropped.
    pub fn extract(&self, node: &AstNode, source: &str) -> String {
        let text = node.text(source);
        let rule = rule_for(node.language);

        // Python headers end at the colon after the parameter list; colons
        // inside parentheses are parameter annotations
        let header_end = if node.language == Language::Python {
            let mut depth = 0i32;
            let mut end = text.len();
            for (i, c) in text.char_indices() {
                match c {
                    '(' | '[' => depth += 1,
                    ')' | ']' => depth -= 1,
                    ':' if depth == 0 => {
                        end = i;
                        break;
                    }
                    _ => {}
                }
            }
            end
        } else {
            text.char_indices()
                .find(|(_, c)| rule.body_open.contains(c))
                .map(|(i, _)| i)
                .unwrap_or(text.len())
        };

        let header = &text[..header_end];

        let mut parts: Vec<&str> = Vec::new();
        for line in header.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if rule
                .strip_prefixes
                .iter()
                .any(|prefix| trimmed.starts_with(prefix))
            {
                continue;
            }
            parts.push(trimmed);
        }

        let mut signature = parts.join(" ");
        signature = signature.split_whitespace().collect::<Vec<_>>().join(" ");

        if signature.chars().count() > MAX_SIGNATURE_CHARS {
            signature = signature.chars().take(MAX_SIGNATURE_CHARS).collect();
        }
        signature
    }

    /// Name of the declared symbol, when one exists.
    ///
    /// Searches children and grandchildren for the first identifier-like
    /// node, matching the classifier's naming rules.
    pub fn declared_name<'a>(
        &self,
        result: &ParseResult,
        index: u32,
        source: &'a str,
    ) -> Option<&'a str> {
        let node = result.node(index)?;
        let is_name_kind =
            |kind: &str| kind.contains("identifier") || kind == "name" || kind == "word";

        for &child_idx in &node.children {
            let child = result.node(child_idx)?;
            if is_name_kind(&child.kind) {
                return Some(child.text(source));
            }
            for &grandchild_idx in &child.children {
                if let Some(grandchild) = result.node(grandchild_idx) {
                    if is_name_kind(&grandchild.kind) {
                        return Some(grandchild.text(source));
                    }
                }
            }
        }
        None
    }

    /// Parameter list text, when the node has one.
    pub fn parameter_list<'a>(
        &self,
        result: &ParseResult,
        index: u32,
        source: &'a str,
    ) -> Option<&'a str> {
        let node = result.node(index)?;
        for &child_idx in &node.children {
            let child = result.node(child_idx)?;
            if child.kind.contains("parameter") {
                return Some(child.text(source));
            }
            for &grandchild_idx in &child.children {
                if let Some(grandchild) = result.node(grandchild_idx) {
                    if grandchild.kind.contains("parameter") {
                        return Some(grandchild.text(source));
                    }
                }
            }
        }
        None
    }
}
