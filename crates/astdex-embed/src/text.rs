//! Embedding text builder
//!
//! Builds the text that actually gets embedded for an annotation. The shape
//! is tuned for retrieval: signature first, then the summary sentence, then
//! purpose, tags, and dependencies as loose keywords.

use astdex_core::Annotation;

/// Most dependencies included in the embedding text.
const MAX_TEXT_DEPENDENCIES: usize = 8;

/// Compose the embedding text for an annotation.
pub fn embedding_text(annotation: &Annotation) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(annotation.signature.clone());
    parts.push(annotation.summary.clone());

    if !annotation.purpose.is_empty() {
        parts.push(annotation.purpose.clone());
    }

    if !annotation.tags.is_empty() {
        parts.push(annotation.tags.join(" "));
    }

    if !annotation.dependencies.is_empty() {
        let deps: Vec<&str> = annotation
            .dependencies
            .iter()
            .take(MAX_TEXT_DEPENDENCIES)
            .map(|d| d.as_str())
            .collect();
        parts.push(format!("uses {}", deps.join(" ")));
    }

    parts.push(annotation.file_path.clone());

    parts.join(". ")
}
