//! Summary and purpose generation
//!
//! Builds short natural-language descriptions of annotated nodes for
//! embedding and display. Summaries follow a fixed template (entity, file,
//! calls, purpose); the purpose phrase comes from name/content pattern
//! rules.

use crate::classify::NodeRole;

/// Maximum calls listed in a summary.
const MAX_SUMMARY_CALLS: usize = 4;

/// Inputs gathered by the annotation engine for one node.
#[derive(Debug, Clone, Default)]
pub struct SummaryInputs<'a> {
    pub name: Option<&'a str>,
    pub role: Option<NodeRole>,
    pub file_path: &'a str,
    pub language: &'a str,
    pub parameters: Option<&'a str>,
    pub calls: &'a [String],
    pub is_async: bool,
    pub is_exported: bool,
}

/// (substring pattern, purpose phrase) rules, first match wins.
const PURPOSE_RULES: &[(&str, &str)] = &[
    ("test", "test coverage"),
    ("spec", "test coverage"),
    ("mock", "test fixtures"),
    ("parse", "parsing"),
    ("serial", "serialization"),
    ("encode", "encoding"),
    ("decode", "decoding"),
    ("valid", "validation"),
    ("auth", "authentication"),
    ("login", "authentication"),
    ("config", "configuration"),
    ("setting", "configuration"),
    ("handle", "event handling"),
    ("listen", "event handling"),
    ("dispatch", "event handling"),
    ("render", "rendering"),
    ("fetch", "data retrieval"),
    ("load", "data retrieval"),
    ("query", "data retrieval"),
    ("save", "persistence"),
    ("store", "persistence"),
    ("write", "persistence"),
    ("cache", "caching"),
    ("log", "logging"),
    ("error", "error handling"),
    ("except", "error handling"),
    ("retry", "error handling"),
    ("convert", "data transformation"),
    ("transform", "data transformation"),
    ("map", "data transformation"),
    ("format", "formatting"),
    ("calc", "computation"),
    ("compute", "computation"),
    ("sum", "computation"),
    ("add", "computation"),
    ("mul", "computation"),
    ("count", "computation"),
    ("init", "initialization"),
    ("setup", "initialization"),
    ("create", "construction"),
    ("build", "construction"),
    ("new", "construction"),
    ("get", "data access"),
    ("set", "data access"),
    ("find", "lookup"),
    ("search", "lookup"),
    ("sort", "ordering"),
    ("compare", "ordering"),
    ("send", "communication"),
    ("request", "communication"),
    ("connect", "communication"),
];

/// Template-based summary generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryGenerator;

impl SummaryGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Build the summary sentence for a node.
    pub fn summarize(&self, inputs: &SummaryInputs<'_>) -> String {
        let mut parts: Vec<String> = Vec::new();

        let mut head = String::new();
        if inputs.is_exported {
            head.push_str("exported ");
        }
        if inputs.is_async {
            head.push_str("async ");
        }
        head.push_str(role_word(inputs.role));

        if let Some(name) = inputs.name {
            head.push(' ');
            head.push_str(name);
        }
        if let Some(params) = inputs.parameters {
            head.push_str(&compact(params));
        }
        parts.push(head);

        parts.push(format!("in {}", inputs.file_path));

        if !inputs.calls.is_empty() {
            let listed: Vec<&str> = inputs
                .calls
                .iter()
                .take(MAX_SUMMARY_CALLS)
                .map(|s| s.as_str())
                .collect();
            parts.push(format!("calls {}", listed.join(", ")));
        }

        let purpose = self.purpose(inputs);
        if !purpose.is_empty() {
            parts.push(format!("handles {purpose}"));
        }

        parts.join(". ")
    }

    /// Short purpose phrase for a node, empty when nothing matches.
    pub fn purpose(&self, inputs: &SummaryInputs<'_>) -> String {
        let haystack = inputs.name.unwrap_or("").to_lowercase();

        for (pattern, phrase) in PURPOSE_RULES {
            if haystack.contains(pattern) {
                return (*phrase).to_string();
            }
        }

        // Fall back to call names when the node's own name says nothing
        for call in inputs.calls {
            let call = call.to_lowercase();
            for (pattern, phrase) in PURPOSE_RULES {
                if call.contains(pattern) {
                    return (*phrase).to_string();
                }
            }
        }

        String::new()
    }
}

fn role_word(role: Option<NodeRole>) -> &'static str {
    match role {
        Some(NodeRole::Function) => "function",
        Some(NodeRole::Method) => "method",
        Some(NodeRole::Class) => "class",
        Some(NodeRole::Type) => "type",
        Some(NodeRole::Import) => "import",
        Some(NodeRole::Statement) => "statement",
        Some(NodeRole::Expression) => "expression",
        Some(NodeRole::Comment) => "comment",
        None => "symbol",
    }
}

fn compact(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_template() {
        let calls = vec!["validate".to_string(), "persist".to_string()];
        let inputs = SummaryInputs {
            name: Some("saveUser"),
            role: Some(NodeRole::Method),
            file_path: "src/users.ts",
            language: "typescript",
            parameters: Some("(user: User)"),
            calls: &calls,
            is_async: true,
            is_exported: false,
        };

        let summary = SummaryGenerator::new().summarize(&inputs);
        assert_eq!(
            summary,
            "async method saveUser(user: User). in src/users.ts. calls validate, persist. handles persistence"
        );
    }

    #[test]
    fn test_purpose_from_name() {
        let inputs = SummaryInputs {
            name: Some("parseConfig"),
            ..Default::default()
        };
        assert_eq!(SummaryGenerator::new().purpose(&inputs), "parsing");
    }

    #[test]
    fn test_purpose_from_calls_when_name_is_opaque() {
        let calls = vec!["fetchRows".to_string()];
        let inputs = SummaryInputs {
            name: Some("f"),
            calls: &calls,
            ..Default::default()
        };
        assert_eq!(SummaryGenerator::new().purpose(&inputs), "data retrieval");
    }

    #[test]
    fn test_purpose_empty_when_nothing_matches() {
        let inputs = SummaryInputs {
            name: Some("zzz"),
            ..Default::default()
        };
        assert_eq!(SummaryGenerator::new().purpose(&inputs), "");
    }

    #[test]
    fn test_exported_function_summary() {
        let inputs = SummaryInputs {
            name: Some("add"),
            role: Some(NodeRole::Function),
            file_path: "a.ts",
            language: "typescript",
            parameters: Some("(x: number, y: number)"),
            calls: &[],
            is_async: false,
            is_exported: true,
        };

        let summary = SummaryGenerator::new().summarize(&inputs);
        assert!(summary.starts_with("exported function add"));
        assert!(summary.contains("in a.ts"));
        assert!(summary.contains("handles computation"));
    }
}
