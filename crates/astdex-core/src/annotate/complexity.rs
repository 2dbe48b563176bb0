//! Complexity analysis
//!
//! Computes cyclomatic and cognitive complexity from the node arena.
//! Cyclomatic counts decision points plus one; cognitive weights each
//! decision by how deeply it nests inside other decisions.

use crate::ast::ParseResult;
use crate::language::Language;

/// Grammar kinds that count as decision points.
fn decision_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::TypeScript | Language::Tsx | Language::JavaScript => &[
            "if_statement",
            "for_statement",
            "for_in_statement",
            "while_statement",
            "do_statement",
            "switch_case",
            "catch_clause",
            "ternary_expression",
        ],
        Language::Python => &[
            "if_statement",
            "elif_clause",
            "for_statement",
            "while_statement",
            "except_clause",
            "conditional_expression",
            "case_clause",
        ],
        Language::Rust => &[
            "if_expression",
            "while_expression",
            "for_expression",
            "loop_expression",
            "match_arm",
        ],
        Language::Go => &[
            "if_statement",
            "for_statement",
            "expression_case",
            "type_case",
            "select_statement",
        ],
        Language::C | Language::Cpp => &[
            "if_statement",
            "for_statement",
            "while_statement",
            "do_statement",
            "case_statement",
            "conditional_expression",
        ],
        Language::CSharp => &[
            "if_statement",
            "for_statement",
            "foreach_statement",
            "while_statement",
            "do_statement",
            "switch_section",
            "catch_clause",
            "conditional_expression",
        ],
    }
}

/// Logical operators that add decision paths.
fn logical_operators(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &[" and ", " or "],
        _ => &["&&", "||"],
    }
}

/// Complexity measurements for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplexityScore {
    /// Cyclomatic complexity (decision points + 1)
    pub cyclomatic: u32,
    /// Cognitive complexity (decisions weighted by nesting)
    pub cognitive: u32,
}

/// Computes complexity scores over node subtrees.
#[derive(Debug, Default, Clone, Copy)]
pub struct ComplexityAnalyzer;

impl ComplexityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze the subtree rooted at `index`.
    pub fn analyze(&self, result: &ParseResult, index: u32, source: &str) -> ComplexityScore {
        let Some(root) = result.node(index) else {
            return ComplexityScore {
                cyclomatic: 1,
                cognitive: 0,
            };
        };

        let kinds = decision_kinds(root.language);

        let mut decisions = 0u32;
        let mut cognitive = 0u32;

        // DFS carrying the count of enclosing decisions inside this subtree
        let mut stack: Vec<(u32, u32)> = vec![(index, 0)];
        while let Some((idx, nesting)) = stack.pop() {
            let Some(node) = result.node(idx) else {
                continue;
            };

            let is_decision = idx != index && kinds.contains(&node.kind.as_str());
            if is_decision {
                decisions += 1;
                cognitive += 1 + nesting;
            }

            let child_nesting = nesting + u32::from(is_decision);
            for &child in &node.children {
                stack.push((child, child_nesting));
            }
        }

        // Logical operators add paths without adding nodes
        let text = root.text(source);
        for op in logical_operators(root.language) {
            decisions += text.matches(op).count() as u32;
            cognitive += text.matches(op).count() as u32;
        }

        ComplexityScore {
            cyclomatic: decisions + 1,
            cognitive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::GrammarCache;
    use crate::parser::ParserAdapter;
    use std::sync::Arc;

    fn parse(src: &str, language: Language) -> ParseResult {
        ParserAdapter::new(Arc::new(GrammarCache::new()))
            .parse_code(src, language, "test")
            .unwrap()
    }

    fn find(result: &ParseResult, kind: &str) -> u32 {
        result.nodes.iter().position(|n| n.kind == kind).unwrap() as u32
    }

    #[test]
    fn test_straight_line_code() {
        let src = "def f(x):\n    return x + 1\n";
        let result = parse(src, Language::Python);
        let score =
            ComplexityAnalyzer::new().analyze(&result, find(&result, "function_definition"), src);

        assert_eq!(score.cyclomatic, 1);
        assert_eq!(score.cognitive, 0);
    }

    #[test]
    fn test_single_branch() {
        let src = "def f(x):\n    if x > 0:\n        return x\n    return 0\n";
        let result = parse(src, Language::Python);
        let score =
            ComplexityAnalyzer::new().analyze(&result, find(&result, "function_definition"), src);

        assert_eq!(score.cyclomatic, 2);
        assert_eq!(score.cognitive, 1);
    }

    #[test]
    fn test_nested_branches_cost_more_cognitively() {
        let nested = "def f(xs):\n    for x in xs:\n        if x > 0:\n            return x\n    return 0\n";
        let flat = "def f(xs):\n    for x in xs:\n        pass\n    if xs:\n        return 1\n    return 0\n";

        let analyzer = ComplexityAnalyzer::new();

        let nested_result = parse(nested, Language::Python);
        let nested_score =
            analyzer.analyze(&nested_result, find(&nested_result, "function_definition"), nested);

        let flat_result = parse(flat, Language::Python);
        let flat_score =
            analyzer.analyze(&flat_result, find(&flat_result, "function_definition"), flat);

        assert_eq!(nested_score.cyclomatic, flat_score.cyclomatic);
        assert!(nested_score.cognitive > flat_score.cognitive);
    }

    #[test]
    fn test_logical_operators_add_paths() {
        let src = "function f(a, b) { if (a && b) { return 1; } return 0; }";
        let result = parse(src, Language::JavaScript);
        let score =
            ComplexityAnalyzer::new().analyze(&result, find(&result, "function_declaration"), src);

        // if + && = 2 decisions
        assert_eq!(score.cyclomatic, 3);
    }

    #[test]
    fn test_rust_match_arms() {
        let src = "fn f(x: u8) -> u8 {\n    match x {\n        0 => 1,\n        1 => 2,\n        _ => 0,\n    }\n}\n";
        let result = parse(src, Language::Rust);
        let score =
            ComplexityAnalyzer::new().analyze(&result, find(&result, "function_item"), src);

        assert_eq!(score.cyclomatic, 4);
    }
}
