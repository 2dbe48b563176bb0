//! Cache fingerprints
//!
//! A fingerprint is the deterministic hash of (query text, canonicalized
//! options, active model id). Two requests with equal fingerprints are
//! answerable from each other's cached responses.

use sha2::{Digest, Sha256};

use crate::types::QueryOptions;

/// Canonical JSON form of the options.
///
/// Struct fields serialize in declaration order, so the output is stable for
/// equal option values.
pub fn canonical_options(options: &QueryOptions) -> String {
    serde_json::to_string(options).unwrap_or_else(|_| "{}".to_string())
}

/// Fingerprint for a (text, options, model) triple.
pub fn fingerprint(text: &str, options: &QueryOptions, model_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_options(options).as_bytes());
    hasher.update(b"\0");
    hasher.update(model_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let options = QueryOptions::default();
        let a = fingerprint("add two numbers", &options, "feature-hash");
        let b = fingerprint("add two numbers", &options, "feature-hash");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_varies_by_component() {
        let options = QueryOptions::default();
        let base = fingerprint("add", &options, "feature-hash");

        assert_ne!(base, fingerprint("mul", &options, "feature-hash"));
        assert_ne!(base, fingerprint("add", &options, "other-model"));

        let mut changed = QueryOptions::default();
        changed.max_results = 3;
        assert_ne!(base, fingerprint("add", &changed, "feature-hash"));
    }
}
