//! Node Classifier
//!
//! Assigns each AST node a significance tier and a role tag. Per-language
//! behavior lives in data tables, not subclasses: each language contributes
//! an ordered rule list mapping grammar kinds to (role, tier). Earlier rules
//! win, which implements the node-type tie-break; among surviving candidates
//! the shallower node wins.
//!
//! Tier policy: declarations of named symbols and exported items are
//! significant; call sites and control-flow blocks are supporting; leaf
//! literals, comments, and whitespace are ignored. Only significant nodes
//! are annotated and embedded.

use serde::{Deserialize, Serialize};

use crate::ast::ParseResult;
use crate::language::Language;

/// Significance tier of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeTier {
    /// Annotated and embedded
    Significant,
    /// Tracked for context, never annotated
    Supporting,
    /// Skipped entirely
    Ignored,
}

/// Role tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Function,
    Class,
    Method,
    Import,
    Type,
    Statement,
    Expression,
    Comment,
}

impl NodeRole {
    /// Stable ordering used for the node-type tie-break.
    fn precedence(&self) -> u8 {
        match self {
            NodeRole::Function => 0,
            NodeRole::Method => 1,
            NodeRole::Class => 2,
            NodeRole::Type => 3,
            NodeRole::Import => 4,
            NodeRole::Statement => 5,
            NodeRole::Expression => 6,
            NodeRole::Comment => 7,
        }
    }
}

/// Result of classifying one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub tier: NodeTier,
    pub role: NodeRole,
}

/// One table row: grammar kinds that map to a role and tier.
struct RoleRule {
    kinds: &'static [&'static str],
    role: NodeRole,
    tier: NodeTier,
}

/// Container kinds per language, used to turn functions into methods.
fn container_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::TypeScript | Language::Tsx | Language::JavaScript => {
            &["class_declaration", "class"]
        }
        Language::Python => &["class_definition"],
        Language::Rust => &["impl_item", "trait_item"],
        Language::Go => &[],
        Language::C => &[],
        Language::Cpp => &["class_specifier", "struct_specifier"],
        Language::CSharp => &["class_declaration", "struct_declaration", "interface_declaration"],
    }
}

/// Ordered classification rules per language.
fn rules(language: Language) -> &'static [RoleRule] {
    use NodeRole::*;
    use NodeTier::*;

    match language {
        Language::TypeScript | Language::Tsx | Language::JavaScript => &[
            RoleRule {
                kinds: &["function_declaration", "generator_function_declaration"],
                role: Function,
                tier: Significant,
            },
            RoleRule {
                kinds: &["method_definition"],
                role: Method,
                tier: Significant,
            },
            RoleRule {
                kinds: &["class_declaration"],
                role: Class,
                tier: Significant,
            },
            RoleRule {
                kinds: &[
                    "interface_declaration",
                    "type_alias_declaration",
                    "enum_declaration",
                ],
                role: Type,
                tier: Significant,
            },
            RoleRule {
                kinds: &["import_statement"],
                role: Import,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["export_statement"],
                role: Statement,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["call_expression", "new_expression", "arrow_function"],
                role: Expression,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["comment"],
                role: Comment,
                tier: Ignored,
            },
        ],
        Language::Python => &[
            RoleRule {
                kinds: &["function_definition"],
                role: Function,
                tier: Significant,
            },
            RoleRule {
                kinds: &["class_definition"],
                role: Class,
                tier: Significant,
            },
            RoleRule {
                kinds: &["import_statement", "import_from_statement"],
                role: Import,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["call"],
                role: Expression,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["comment"],
                role: Comment,
                tier: Ignored,
            },
        ],
        Language::Rust => &[
            RoleRule {
                kinds: &["function_item", "function_signature_item"],
                role: Function,
                tier: Significant,
            },
            RoleRule {
                kinds: &["impl_item", "mod_item"],
                role: Class,
                tier: Significant,
            },
            RoleRule {
                kinds: &["struct_item", "enum_item", "trait_item", "type_item", "union_item"],
                role: Type,
                tier: Significant,
            },
            RoleRule {
                kinds: &["use_declaration", "extern_crate_declaration"],
                role: Import,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["call_expression", "macro_invocation"],
                role: Expression,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["line_comment", "block_comment"],
                role: Comment,
                tier: Ignored,
            },
        ],
        Language::Go => &[
            RoleRule {
                kinds: &["function_declaration"],
                role: Function,
                tier: Significant,
            },
            RoleRule {
                kinds: &["method_declaration"],
                role: Method,
                tier: Significant,
            },
            RoleRule {
                kinds: &["type_declaration"],
                role: Type,
                tier: Significant,
            },
            RoleRule {
                kinds: &["import_declaration"],
                role: Import,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["call_expression"],
                role: Expression,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["comment"],
                role: Comment,
                tier: Ignored,
            },
        ],
        Language::C => &[
            RoleRule {
                kinds: &["function_definition"],
                role: Function,
                tier: Significant,
            },
            RoleRule {
                kinds: &["struct_specifier", "enum_specifier", "union_specifier", "type_definition"],
                role: Type,
                tier: Significant,
            },
            RoleRule {
                kinds: &["preproc_include"],
                role: Import,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["call_expression"],
                role: Expression,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["comment"],
                role: Comment,
                tier: Ignored,
            },
        ],
        Language::Cpp => &[
            RoleRule {
                kinds: &["function_definition"],
                role: Function,
                tier: Significant,
            },
            RoleRule {
                kinds: &["class_specifier"],
                role: Class,
                tier: Significant,
            },
            RoleRule {
                kinds: &["struct_specifier", "enum_specifier", "type_definition", "alias_declaration"],
                role: Type,
                tier: Significant,
            },
            RoleRule {
                kinds: &["preproc_include", "using_declaration"],
                role: Import,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["call_expression"],
                role: Expression,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["comment"],
                role: Comment,
                tier: Ignored,
            },
        ],
        Language::CSharp => &[
            RoleRule {
                kinds: &["method_declaration", "local_function_statement"],
                role: Method,
                tier: Significant,
            },
            RoleRule {
                kinds: &["class_declaration", "namespace_declaration"],
                role: Class,
                tier: Significant,
            },
            RoleRule {
                kinds: &[
                    "interface_declaration",
                    "struct_declaration",
                    "enum_declaration",
                    "record_declaration",
                ],
                role: Type,
                tier: Significant,
            },
            RoleRule {
                kinds: &["using_directive"],
                role: Import,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["invocation_expression"],
                role: Expression,
                tier: Supporting,
            },
            RoleRule {
                kinds: &["comment"],
                role: Comment,
                tier: Ignored,
            },
        ],
    }
}

/// Kinds that are leaf literals, ignored in every language.
const LITERAL_KINDS: &[&str] = &[
    "string",
    "string_literal",
    "string_fragment",
    "number",
    "integer",
    "integer_literal",
    "float",
    "float_literal",
    "true",
    "false",
    "none",
    "null",
    "nil",
    "boolean_literal",
    "char_literal",
    "escape_sequence",
];

// ============================================================================
// Classifier
// ============================================================================

/// Table-driven node classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeClassifier;

impl NodeClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a single node within its parse result.
    pub fn classify(&self, result: &ParseResult, index: u32) -> Classification {
        let Some(node) = result.node(index) else {
            return Classification {
                tier: NodeTier::Ignored,
                role: NodeRole::Expression,
            };
        };

        for rule in rules(node.language) {
            if rule.kinds.contains(&node.kind.as_str()) {
                let mut role = rule.role;
                let mut tier = rule.tier;

                // A function nested in a container is a method
                if role == NodeRole::Function && self.has_container_ancestor(result, index) {
                    role = NodeRole::Method;
                }

                // Exported declarations stay significant; a supporting kind
                // that wraps a declaration never demotes it
                if tier == NodeTier::Significant && !self.has_name(result, index) {
                    tier = NodeTier::Supporting;
                }

                return Classification { tier, role };
            }
        }

        if LITERAL_KINDS.contains(&node.kind.as_str()) {
            return Classification {
                tier: NodeTier::Ignored,
                role: NodeRole::Expression,
            };
        }

        // Generic fallbacks by kind suffix
        if node.kind.ends_with("_statement") || node.kind.ends_with("_declaration") {
            return Classification {
                tier: NodeTier::Supporting,
                role: NodeRole::Statement,
            };
        }
        if node.kind.ends_with("_expression") {
            return Classification {
                tier: NodeTier::Supporting,
                role: NodeRole::Expression,
            };
        }

        Classification {
            tier: NodeTier::Supporting,
            role: NodeRole::Statement,
        }
    }

    /// Indices of all significant nodes, ordered for annotation.
    ///
    /// Ordering is (role precedence, depth, arena index): the node-type
    /// tie-break first, then shallower nodes win.
    pub fn significant_nodes(&self, result: &ParseResult) -> Vec<u32> {
        let mut out: Vec<(u8, usize, u32)> = Vec::new();

        for index in 0..result.nodes.len() as u32 {
            let classification = self.classify(result, index);
            if classification.tier == NodeTier::Significant {
                out.push((classification.role.precedence(), result.depth(index), index));
            }
        }

        out.sort_unstable();
        out.into_iter().map(|(_, _, index)| index).collect()
    }

    /// Whether any ancestor is a class-like container.
    fn has_container_ancestor(&self, result: &ParseResult, index: u32) -> bool {
        let containers = result
            .node(index)
            .map(|n| container_kinds(n.language))
            .unwrap_or(&[]);

        let mut current = result.node(index).and_then(|n| n.parent);
        while let Some(parent_idx) = current {
            let Some(parent) = result.node(parent_idx) else {
                break;
            };
            if containers.contains(&parent.kind.as_str()) {
                return true;
            }
            current = parent.parent;
        }
        false
    }

    /// Whether the node declares a named symbol.
    ///
    /// Looks for an identifier among children and grandchildren; C-family
    /// grammars nest the name one level down inside a declarator.
    fn has_name(&self, result: &ParseResult, index: u32) -> bool {
        let Some(node) = result.node(index) else {
            return false;
        };

        let is_name_kind =
            |kind: &str| kind.contains("identifier") || kind == "name" || kind == "word";

        for &child_idx in &node.children {
            let Some(child) = result.node(child_idx) else {
                continue;
            };
            if is_name_kind(&child.kind) {
                return true;
            }
            for &grandchild_idx in &child.children {
                if let Some(grandchild) = result.node(grandchild_idx) {
                    if is_name_kind(&grandchild.kind) {
                        return true;
                    }
                }
            }
        }
        false
    }
}
