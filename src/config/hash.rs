//! Document hashing for change detection.
//!
//! Every change set stores the hash of the rendered documents it was built
//! from, so a re-run with identical input can be recognised at a glance.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::definition::DesignDefinition;

/// Hasher for rendered design documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentHasher;

impl DocumentHasher {
    /// Creates a new document hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes the rendered documents of one run, in build order.
    #[must_use]
    pub fn hash_documents(&self, documents: &[Value]) -> String {
        let mut hasher = Sha256::new();
        for document in documents {
            hasher.update(document.to_string().as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Hashes the parts of a definition that change what a run builds.
    #[must_use]
    pub fn hash_definition(&self, definition: &DesignDefinition) -> String {
        let mut hasher = Sha256::new();

        hasher.update(definition.design.name.as_bytes());
        hasher.update(definition.design.version.as_bytes());
        hasher.update(definition.design.mode.to_string().as_bytes());
        hasher.update(definition.schema.as_bytes());
        for template in &definition.templates {
            hasher.update(template.as_bytes());
        }

        // Extensions are order independent
        let mut extensions: Vec<_> = definition.extensions.iter().collect();
        extensions.sort();
        for extension in extensions {
            hasher.update(extension.as_bytes());
        }

        hasher.update(Value::Object(definition.context.data.clone()).to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_hash_deterministic() {
        let hasher = DocumentHasher::new();
        let docs = vec![json!({"sites": [{"name": "s1"}]})];
        assert_eq!(hasher.hash_documents(&docs), hasher.hash_documents(&docs));
        assert_ne!(
            hasher.hash_documents(&docs),
            hasher.hash_documents(&[json!({"sites": [{"name": "s2"}]})])
        );
    }

    #[test]
    fn test_document_boundaries_matter() {
        let hasher = DocumentHasher::new();
        let split = vec![json!("ab"), json!("c")];
        let joined = vec![json!("a"), json!("bc")];
        assert_ne!(hasher.hash_documents(&split), hasher.hash_documents(&joined));
    }

    #[test]
    fn test_definition_hash_ignores_extension_order() {
        let parse = |extensions: &str| -> DesignDefinition {
            serde_yaml::from_str(&format!(
                "design: {{name: d}}\nschema: s.yaml\ntemplates: [a.yaml]\nextensions: {extensions}\n"
            ))
            .expect("parse")
        };
        let hasher = DocumentHasher::new();
        assert_eq!(
            hasher.hash_definition(&parse("[lookup, context_file]")),
            hasher.hash_definition(&parse("[context_file, lookup]"))
        );
    }

    #[test]
    fn test_short_hash_and_match() {
        let hasher = DocumentHasher::new();
        assert_eq!(hasher.short_hash("abcdef1234567890"), "abcdef12");
        assert!(DocumentHasher::hashes_match("abc123", "abc123"));
        assert!(!DocumentHasher::hashes_match("abc123", "abc12"));
    }
}
