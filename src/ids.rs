//! Deterministic identity derivation for nodes and edges (invariant 1, §8).

use sha2::{Digest, Sha256};

use crate::types::EntityType;

/// Collapse internal whitespace to single spaces, trim, and lowercase — the
/// normalization used both for node identity and for entity-name linking
/// during relation extraction.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// `id = H(normalize(name) | type)`. Stable across calls, collision-free
/// across distinct `(normalized_name, type)` pairs for any practical input
/// set since the normalized name and type are hashed with an explicit
/// separator that cannot appear inside either component.
pub fn node_id(name: &str, node_type: EntityType) -> String {
    let normalized = normalize_name(name);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"|");
    hasher.update(node_type.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic edge id, so repeated extraction of the same triplet
/// upserts rather than duplicates.
pub fn edge_id(source_id: &str, relation: &str, target_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"|");
    hasher.update(relation.to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(target_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 over exact bytes, hex-encoded — used for `ProcessedDocument.hash`.
/// No normalization: any whitespace change creates a new identity.
pub fn document_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_deterministic() {
        let a = node_id("React", EntityType::Technology);
        let b = node_id("react", EntityType::Technology);
        let c = node_id("  react  ", EntityType::Technology);
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn node_id_differs_by_type() {
        let a = node_id("Python", EntityType::Technology);
        let b = node_id("Python", EntityType::Concept);
        assert_ne!(a, b);
    }

    #[test]
    fn node_id_differs_by_normalized_name() {
        let a = node_id("React", EntityType::Technology);
        let b = node_id("ComponentTree", EntityType::Technology);
        assert_ne!(a, b);
    }

    #[test]
    fn document_hash_sensitive_to_whitespace() {
        assert_ne!(document_hash("hello world"), document_hash("hello  world"));
    }

    #[test]
    fn normalize_collapses_internal_whitespace() {
        assert_eq!(normalize_name("  Component   Tree "), "component tree");
    }
}
