//! Language Registry and Grammar Cache
//!
//! Resolves canonical language identifiers to ready-to-use tree-sitter
//! grammars. Grammar handles are immutable after load and cached for the
//! process lifetime; resolution never touches the network.
//!
//! ## Supported Languages
//!
//! Tier 1: TypeScript, JavaScript, Python, Rust
//! Tier 2: Go, C, C++, C#
//!
//! Tier-3 identifiers are recognized by the registry tables but resolve to
//! `UnsupportedLanguage` until a grammar is compiled in.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tree_sitter::Parser;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while resolving a language to a parser backend.
#[derive(Debug, Error)]
pub enum LanguageError {
    /// Language id is not in the registry
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Native grammar could not be initialized
    #[error("parser backend unavailable for {language}: {reason}")]
    BackendUnavailable { language: String, reason: String },
}

/// Result type for language operations.
pub type Result<T> = std::result::Result<T, LanguageError>;

// ============================================================================
// Supported Languages
// ============================================================================

/// Language tier. Tier 1 and 2 are compiled in; anything else is gated
/// behind configuration and an available grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageTier {
    Tier1,
    Tier2,
}

/// Languages with a compiled-in grammar.
///
/// Identifiers use canonical snake_case forms (`c_sharp`, not `csharp`),
/// in memory and in serialized form alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "typescript")]
    TypeScript,
    #[serde(rename = "tsx")]
    Tsx,
    #[serde(rename = "javascript")]
    JavaScript,
    #[serde(rename = "python")]
    Python,
    #[serde(rename = "rust")]
    Rust,
    #[serde(rename = "go")]
    Go,
    #[serde(rename = "c")]
    C,
    #[serde(rename = "cpp")]
    Cpp,
    #[serde(rename = "c_sharp")]
    CSharp,
}

impl Language {
    /// Canonical identifier for this language.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "c_sharp",
        }
    }

    /// Resolve a canonical identifier.
    ///
    /// Accepts only snake_case canonical forms; `csharp` or `C#` are not
    /// recognized.
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "typescript" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "javascript" => Some(Language::JavaScript),
            "python" => Some(Language::Python),
            "rust" => Some(Language::Rust),
            "go" => Some(Language::Go),
            "c" => Some(Language::C),
            "cpp" => Some(Language::Cpp),
            "c_sharp" => Some(Language::CSharp),
            _ => None,
        }
    }

    /// Language tier for index gating.
    pub fn tier(&self) -> LanguageTier {
        match self {
            Language::TypeScript | Language::Tsx | Language::JavaScript | Language::Python
            | Language::Rust => LanguageTier::Tier1,
            Language::Go | Language::C | Language::Cpp | Language::CSharp => LanguageTier::Tier2,
        }
    }

    /// Get the tree-sitter grammar for this language.
    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
        }
    }

    /// Detect language from file extension.
    ///
    /// Returns `None` if the extension is not recognized.
    pub fn from_extension(ext: &str) -> Option<Self> {
        get_extension_map()
            .get(ext.to_lowercase().as_str())
            .copied()
    }

    /// Detect language from file path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// All supported file extensions.
    pub fn all_extensions() -> &'static [&'static str] {
        &[
            "ts", "tsx", "js", "mjs", "cjs", "py", "rs", "go", "c", "h", "cpp", "hpp", "cc",
            "cxx", "cs",
        ]
    }

    /// All compiled-in languages.
    pub fn all() -> &'static [Language] {
        &[
            Language::TypeScript,
            Language::Tsx,
            Language::JavaScript,
            Language::Python,
            Language::Rust,
            Language::Go,
            Language::C,
            Language::Cpp,
            Language::CSharp,
        ]
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static extension to language mapping.
static EXTENSION_MAP: OnceLock<HashMap<&'static str, Language>> = OnceLock::new();

fn get_extension_map() -> &'static HashMap<&'static str, Language> {
    EXTENSION_MAP.get_or_init(|| {
        let mut map = HashMap::new();
        // TypeScript
        map.insert("ts", Language::TypeScript);
        map.insert("tsx", Language::Tsx);
        // JavaScript
        map.insert("js", Language::JavaScript);
        map.insert("mjs", Language::JavaScript);
        map.insert("cjs", Language::JavaScript);
        // Python
        map.insert("py", Language::Python);
        // Rust
        map.insert("rs", Language::Rust);
        // Go
        map.insert("go", Language::Go);
        // C
        map.insert("c", Language::C);
        map.insert("h", Language::C);
        // C++
        map.insert("cpp", Language::Cpp);
        map.insert("hpp", Language::Cpp);
        map.insert("cc", Language::Cpp);
        map.insert("cxx", Language::Cpp);
        // C#
        map.insert("cs", Language::CSharp);
        map
    })
}

// ============================================================================
// Grammar Cache
// ============================================================================

/// Process-lifetime cache of initialized grammar handles.
///
/// `load(lang)` is idempotent and concurrency-safe: the first caller
/// initializes the grammar, later callers get the cached handle. Handles are
/// immutable after load and shared freely.
pub struct GrammarCache {
    loaded: DashMap<Language, tree_sitter::Language>,
}

impl Default for GrammarCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GrammarCache {
    /// Create an empty cache; grammars load lazily.
    pub fn new() -> Self {
        Self {
            loaded: DashMap::new(),
        }
    }

    /// Resolve a canonical language id to a cached grammar handle.
    ///
    /// # Errors
    ///
    /// `UnsupportedLanguage` when the id is not in the registry;
    /// `BackendUnavailable` when the grammar cannot drive a parser.
    pub fn load(&self, id: &str) -> Result<tree_sitter::Language> {
        let language =
            Language::from_id(id).ok_or_else(|| LanguageError::UnsupportedLanguage(id.to_string()))?;
        self.load_language(language)
    }

    /// Resolve a typed language to a cached grammar handle.
    pub fn load_language(&self, language: Language) -> Result<tree_sitter::Language> {
        if let Some(handle) = self.loaded.get(&language) {
            return Ok(handle.clone());
        }

        let grammar = language.grammar();

        // Probe the grammar by binding it to a parser once
        let mut probe = Parser::new();
        probe
            .set_language(&grammar)
            .map_err(|e| LanguageError::BackendUnavailable {
                language: language.as_str().to_string(),
                reason: e.to_string(),
            })?;

        debug!("Loaded grammar for {}", language);
        self.loaded.insert(language, grammar.clone());
        Ok(grammar)
    }

    /// Check whether a language id resolves to a working backend.
    ///
    /// Returns `false` for unknown identifiers or unloadable grammars.
    pub fn verify_integrity(&self, id: &str) -> bool {
        self.load(id).is_ok()
    }

    /// Number of grammars loaded so far.
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_ids() {
        assert_eq!(Language::CSharp.as_str(), "c_sharp");
        assert_eq!(Language::from_id("c_sharp"), Some(Language::CSharp));
        // Non-canonical spellings are rejected
        assert_eq!(Language::from_id("csharp"), None);
        assert_eq!(Language::from_id("C#"), None);
    }

    #[test]
    fn test_serialized_form_matches_canonical_id() {
        for language in Language::all() {
            let json = serde_json::to_string(language).unwrap();
            assert_eq!(json, format!("\"{}\"", language.as_str()));
        }
    }

    #[test]
    fn test_extension_detection() {
        assert_eq!(Language::from_extension("ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("PY"), Some(Language::Python));
        assert_eq!(Language::from_extension("hpp"), Some(Language::Cpp));
        assert_eq!(Language::from_extension("unknown"), None);
    }

    #[test]
    fn test_path_detection() {
        assert_eq!(
            Language::from_path(Path::new("src/main.rs")),
            Some(Language::Rust)
        );
        assert_eq!(Language::from_path(Path::new("README.md")), None);
        assert_eq!(Language::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn test_tiers() {
        assert_eq!(Language::TypeScript.tier(), LanguageTier::Tier1);
        assert_eq!(Language::Rust.tier(), LanguageTier::Tier1);
        assert_eq!(Language::Go.tier(), LanguageTier::Tier2);
        assert_eq!(Language::CSharp.tier(), LanguageTier::Tier2);
    }

    #[test]
    fn test_grammar_cache_load() {
        let cache = GrammarCache::new();
        assert_eq!(cache.loaded_count(), 0);

        let handle = cache.load("python");
        assert!(handle.is_ok());
        assert_eq!(cache.loaded_count(), 1);

        // Idempotent
        let again = cache.load("python");
        assert!(again.is_ok());
        assert_eq!(cache.loaded_count(), 1);
    }

    #[test]
    fn test_grammar_cache_unknown_language() {
        let cache = GrammarCache::new();
        let result = cache.load("cobol");
        assert!(matches!(result, Err(LanguageError::UnsupportedLanguage(_))));
    }

    #[test]
    fn test_verify_integrity() {
        let cache = GrammarCache::new();
        assert!(cache.verify_integrity("rust"));
        assert!(cache.verify_integrity("c_sharp"));
        assert!(!cache.verify_integrity("fortran"));
        assert!(!cache.verify_integrity(""));
    }
}
