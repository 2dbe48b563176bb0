//! Dependency analysis
//!
//! Collects what a node depends on: imported modules referenced in its span,
//! calls it makes, and type names it mentions. Import syntax is matched by
//! per-language regex tables rather than per-language subclasses.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::ParseResult;
use crate::language::Language;

/// Cap on dependencies reported per node.
const MAX_DEPENDENCIES: usize = 24;

static ES_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\s+(?:[^'"]+?\s+from\s+)?['"]([^'"]+)['"]"#).unwrap()
});
static ES_REQUIRE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static PY_FROM_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*from\s+([\w\.]+)\s+import\b").unwrap());
static PY_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*import\s+([\w\.]+)").unwrap());
static RUST_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:pub\s+)?use\s+([\w:]+)").unwrap());
static GO_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).unwrap());
static C_INCLUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"#include\s*[<"]([^>"]+)[>"]"#).unwrap());
static CSHARP_USING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*using\s+([\w\.]+)\s*;").unwrap());

/// Extract module specifiers from import-like text.
pub fn scan_imports(text: &str, language: Language) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    let push_all = |regex: &Regex, out: &mut Vec<String>| {
        for capture in regex.captures_iter(text) {
            if let Some(m) = capture.get(1) {
                let spec = m.as_str().to_string();
                if !out.contains(&spec) {
                    out.push(spec);
                }
            }
        }
    };

    match language {
        Language::TypeScript | Language::Tsx | Language::JavaScript => {
            push_all(&ES_IMPORT, &mut out);
            push_all(&ES_REQUIRE, &mut out);
        }
        Language::Python => {
            push_all(&PY_FROM_IMPORT, &mut out);
            push_all(&PY_IMPORT, &mut out);
        }
        Language::Rust => push_all(&RUST_USE, &mut out),
        Language::Go => push_all(&GO_IMPORT, &mut out),
        Language::C | Language::Cpp => push_all(&C_INCLUDE, &mut out),
        Language::CSharp => push_all(&CSHARP_USING, &mut out),
    }

    out
}

/// Dependencies of one node.
#[derive(Debug, Clone, Default)]
pub struct NodeDependencies {
    /// Modules imported by the enclosing file that the node's span mentions
    pub imports: Vec<String>,
    /// Function/method names the node calls
    pub calls: Vec<String>,
    /// Type names the node references
    pub type_refs: Vec<String>,
}

impl NodeDependencies {
    /// Flatten into the annotation's dependency list, capped and sorted.
    pub fn into_list(self) -> Vec<String> {
        let mut set: BTreeSet<String> = BTreeSet::new();
        set.extend(self.imports);
        set.extend(self.calls);
        set.extend(self.type_refs);
        set.into_iter().take(MAX_DEPENDENCIES).collect()
    }
}

/// Per-node dependency analyzer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze the subtree rooted at `index`.
    ///
    /// `file_source` is the whole file so file-level imports can be related
    /// to the node's span.
    pub fn analyze(&self, result: &ParseResult, index: u32, file_source: &str) -> NodeDependencies {
        let Some(root) = result.node(index) else {
            return NodeDependencies::default();
        };

        let node_text = root.text(file_source);
        let language = root.language;

        // File-level imports the node actually mentions
        let imports = scan_imports(file_source, language)
            .into_iter()
            .filter(|spec| {
                let leaf = spec
                    .rsplit(['/', '.', ':'])
                    .next()
                    .unwrap_or(spec.as_str());
                !leaf.is_empty() && node_text.contains(leaf)
            })
            .collect();

        let mut calls = Vec::new();
        let mut type_refs = Vec::new();

        for idx in result.subtree(index) {
            let Some(node) = result.node(idx) else {
                continue;
            };

            if is_call_kind(&node.kind) {
                if let Some(name) = callee_name(result, idx, file_source) {
                    if !calls.contains(&name) {
                        calls.push(name);
                    }
                }
            } else if node.kind == "type_identifier" {
                let name = node.text(file_source).to_string();
                if !type_refs.contains(&name) {
                    type_refs.push(name);
                }
            }
        }

        NodeDependencies {
            imports,
            calls,
            type_refs,
        }
    }
}

fn is_call_kind(kind: &str) -> bool {
    matches!(
        kind,
        "call_expression" | "call" | "invocation_expression" | "macro_invocation"
    )
}

/// Name of the called function: the first identifier under the call node.
fn callee_name(result: &ParseResult, index: u32, source: &str) -> Option<String> {
    let node = result.node(index)?;
    let first_child = result.node(*node.children.first()?)?;

    if first_child.kind.contains("identifier") {
        return Some(first_child.text(source).to_string());
    }

    // Member calls: take the rightmost identifier of the callee expression
    for &idx in first_child.children.iter().rev() {
        if let Some(child) = result.node(idx) {
            if child.kind.contains("identifier") {
                return Some(child.text(source).to_string());
            }
        }
    }
    None
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

    #[test]
    fn test_scan_es_imports() {
        let imports = scan_imports(
            "import { a } from './a';\nimport b from \"lib/b\";\nconst c = require('c');\n",
            Language::TypeScript,
        );
        assert_eq!(imports, vec!["./a", "lib/b", "c"]);
    }

    #[test]
    fn test_scan_python_imports() {
        let imports = scan_imports(
            "from os.path import join\nimport json\n",
            Language::Python,
        );
        assert_eq!(imports, vec!["os.path", "json"]);
    }

    #[test]
    fn test_scan_rust_use() {
        let imports = scan_imports("use std::fs;\npub use crate::ast::AstNode;\n", Language::Rust);
        assert_eq!(imports, vec!["std::fs", "crate::ast::AstNode"]);
    }

    #[test]
    fn test_scan_c_includes() {
        let imports = scan_imports(
            "#include <stdio.h>\n#include \"util.h\"\n",
            Language::C,
        );
        assert_eq!(imports, vec!["stdio.h", "util.h"]);
    }

    #[test]
    fn test_calls_collected() {
        let src = "def f(x):\n    g(x)\n    return h(x)\n";
        let result = parse(src, Language::Python);
        let index = result
            .nodes
            .iter()
            .position(|n| n.kind == "function_definition")
            .unwrap() as u32;

        let deps = DependencyAnalyzer::new().analyze(&result, index, src);
        assert_eq!(deps.calls, vec!["g", "h"]);
    }

    #[test]
    fn test_imports_filtered_to_node_span() {
        let src = "import json\nimport os\n\ndef f(x):\n    return json.dumps(x)\n";
        let result = parse(src, Language::Python);
        let index = result
            .nodes
            .iter()
            .position(|n| n.kind == "function_definition")
            .unwrap() as u32;

        let deps = DependencyAnalyzer::new().analyze(&result, index, src);
        assert!(deps.imports.contains(&"json".to_string()));
        assert!(!deps.imports.contains(&"os".to_string()));
    }

    #[test]
    fn test_dependency_list_is_deduped_and_capped() {
        let deps = NodeDependencies {
            imports: vec!["a".to_string(), "b".to_string()],
            calls: vec!["a".to_string(), "c".to_string()],
            type_refs: vec!["D".to_string()],
        };
        let list = deps.into_list();
        assert_eq!(list, vec!["D", "a", "b", "c"]);
    }
}
