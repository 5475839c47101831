//! Property-based tests: invariants that must hold for all inputs, not just
//! the handful of examples exercised by unit tests.
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// NAME NORMALIZATION / NODE IDENTITY
// ============================================================================

mod identity_tests {
    use super::*;
    use graphmem::ids::{document_hash, edge_id, node_id, normalize_name};
    use graphmem::types::EntityType;

    proptest! {
        /// Invariant: normalize_name never panics on any string input.
        #[test]
        fn normalize_name_never_panics(s in ".*") {
            let _ = normalize_name(&s);
        }

        /// Invariant: normalizing is idempotent.
        #[test]
        fn normalize_name_idempotent(s in "\\PC{0,100}") {
            let once = normalize_name(&s);
            let twice = normalize_name(&once);
            prop_assert_eq!(once, twice);
        }

        /// Invariant: normalized output never contains consecutive spaces or
        /// uppercase ASCII letters.
        #[test]
        fn normalize_name_output_shape(s in "\\PC{1,100}") {
            let normalized = normalize_name(&s);
            prop_assert!(!normalized.contains("  "));
            prop_assert!(!normalized.chars().any(|c| c.is_ascii_uppercase()));
        }

        /// Invariant: node_id is deterministic and depends only on the
        /// normalized name and the type, never on incidental casing or
        /// extra whitespace.
        #[test]
        fn node_id_stable_under_whitespace_and_case(name in "[a-zA-Z ]{1,30}") {
            let a = node_id(&name, EntityType::Concept);
            let b = node_id(&name.to_uppercase(), EntityType::Concept);
            let c = node_id(&format!("  {name}  "), EntityType::Concept);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(&a, &c);
        }

        /// Invariant: node_id is always a 64-character lowercase hex string
        /// (a hex-encoded SHA-256 digest), for any name.
        #[test]
        fn node_id_is_well_formed_hex(name in ".*") {
            let id = node_id(&name, EntityType::Concept);
            prop_assert_eq!(id.len(), 64);
            prop_assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }

        /// Invariant: edge_id is deterministic for identical inputs and
        /// differs when any component changes.
        #[test]
        fn edge_id_deterministic_and_sensitive_to_each_component(
            a in "[a-z]{1,10}", b in "[a-z]{1,10}", c in "[a-z]{1,10}",
        ) {
            prop_assume!(a != b);
            let base = edge_id(&a, "relates_to", &c);
            let again = edge_id(&a, "relates_to", &c);
            prop_assert_eq!(&base, &again);
            let swapped_source = edge_id(&b, "relates_to", &c);
            prop_assert_ne!(base, swapped_source);
        }

        /// Invariant: document_hash never panics and is sensitive to exact
        /// bytes (no normalization).
        #[test]
        fn document_hash_never_panics_and_is_exact(s in "\\PC{0,500}") {
            let a = document_hash(&s);
            let b = document_hash(&format!("{s} "));
            prop_assert_eq!(a.len(), 64);
            if !s.is_empty() || true {
                prop_assert_ne!(document_hash(&s), b);
            }
        }
    }
}

// ============================================================================
// DECAY CURVE
// ============================================================================

mod decay_tests {
    use super::*;
    use graphmem::lifecycle::decay;

    proptest! {
        /// Invariant: decay never panics and always stays within [0, 1].
        #[test]
        fn decay_bounded(age in -1000.0f64..10_000.0, half_life in -10.0f64..10_000.0) {
            let value = decay(age, half_life);
            prop_assert!((0.0..=1.0).contains(&value));
        }

        /// Invariant: for a fixed positive half-life, decay is monotonically
        /// non-increasing in age.
        #[test]
        fn decay_monotonic_in_age(half_life in 1.0f64..365.0, age_a in 0.0f64..5000.0, age_b in 0.0f64..5000.0) {
            let (younger, older) = if age_a <= age_b { (age_a, age_b) } else { (age_b, age_a) };
            let value_young = decay(younger, half_life);
            let value_old = decay(older, half_life);
            prop_assert!(value_young >= value_old - 1e-9);
        }

        /// Invariant: zero age never decays, regardless of half-life.
        #[test]
        fn decay_at_zero_age_is_one(half_life in 0.0001f64..10_000.0) {
            prop_assert!((decay(0.0, half_life) - 1.0).abs() < 1e-9);
        }
    }
}

// ============================================================================
// JSON ARRAY NORMALIZATION (LLM RESPONSE COERCION)
// ============================================================================

mod json_normalization_tests {
    use super::*;
    use graphmem::llm::normalize_json_arrays;
    use serde_json::Value;

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            "[a-z]{0,8}".prop_map(Value::String),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = arb_leaf();
        leaf.prop_recursive(3, 16, 5, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec(("[a-z]{1,6}", inner), 0..4)
                    .prop_map(|pairs| Value::Object(pairs.into_iter().collect())),
            ]
        })
    }

    proptest! {
        /// Invariant: normalization never panics on arbitrary JSON shapes.
        #[test]
        fn never_panics(mut value in arb_value()) {
            let _ = normalize_json_arrays(&mut value, true);
        }

        /// Invariant: running normalization twice is the same as running it
        /// once (a second pass reports no further change).
        #[test]
        fn idempotent(mut value in arb_value()) {
            normalize_json_arrays(&mut value, true);
            let once = value.clone();
            let changed_again = normalize_json_arrays(&mut value, true);
            prop_assert!(!changed_again);
            prop_assert_eq!(value, once);
        }
    }
}

// ============================================================================
// ENUM WIRE-STRING ROUND TRIPS
// ============================================================================

mod roundtrip_tests {
    use super::*;
    use graphmem::types::{EntityType, RetentionPolicy};

    proptest! {
        /// Invariant: every entity type round-trips through its string form,
        /// case-insensitively.
        #[test]
        fn entity_type_roundtrip(idx in 0usize..EntityType::ALL.len()) {
            let entity_type = EntityType::ALL[idx];
            let s = entity_type.as_str();
            let parsed: EntityType = s.parse().unwrap();
            prop_assert_eq!(entity_type, parsed);
            let parsed_lower: EntityType = s.to_lowercase().parse().unwrap();
            prop_assert_eq!(entity_type, parsed_lower);
        }

        /// Invariant: every retention policy round-trips through its string
        /// form.
        #[test]
        fn retention_policy_roundtrip(idx in 0usize..5) {
            let policy = [
                RetentionPolicy::Permanent,
                RetentionPolicy::Decision,
                RetentionPolicy::Standard,
                RetentionPolicy::Ephemeral,
                RetentionPolicy::Session,
            ][idx];
            let s = policy.as_str();
            let parsed: RetentionPolicy = s.parse().unwrap();
            prop_assert_eq!(policy, parsed);
        }

        /// Invariant: unknown strings never parse as a retention policy.
        #[test]
        fn retention_policy_unknown_strings_fail(s in "[a-z]{5,20}") {
            let known = ["permanent", "decision", "standard", "ephemeral", "session"];
            if !known.contains(&s.as_str()) {
                let result: Result<RetentionPolicy, _> = s.parse();
                prop_assert!(result.is_err());
            }
        }
    }
}
