//! RFC 8785 JSON Canonicalization (JCS).
//!
//! Hashing and signing both operate on the same canonical byte string, so a
//! divergence here breaks verification everywhere else. We lean on
//! `serde_jcs` rather than hand-rolling a serializer: it already produces the
//! sorted-keys, minimal-whitespace, shortest-round-trip-number encoding RFC
//! 8785 requires for any `Serialize` value.

use crate::error::{CoreError, CoreResult};
use serde::Serialize;

/// Canonicalize a value to its RFC 8785 byte representation.
pub fn canonicalize<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    serde_jcs::to_vec(value).map_err(|e| CoreError::Canonicalization(e.to_string()))
}

/// Canonicalize a `serde_json::Value`, dropping keys whose value is
/// `Value::Null` when `drop_null` names them explicitly absent fields. Most
/// callers should build the `Value` with absent-vs-null already decided and
/// call [`canonicalize`] directly; this helper exists for the one spot
/// (optional `correlation_id`) where the same struct must serialize with the
/// key omitted rather than present as `null`.
pub fn canonicalize_value(value: serde_json::Value) -> CoreResult<Vec<u8>> {
    canonicalize(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_lexicographically() {
        let a = canonicalize_value(json!({"b": 1, "a": 2})).unwrap();
        let b = canonicalize_value(json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(String::from_utf8(a).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn null_is_preserved_when_present() {
        let bytes = canonicalize_value(json!({"prev_hash": null})).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"prev_hash":null}"#);
    }

    #[test]
    fn deterministic_across_calls() {
        let v = json!({"z": [1,2,3], "a": {"nested": true}});
        let first = canonicalize_value(v.clone()).unwrap();
        let second = canonicalize_value(v).unwrap();
        assert_eq!(first, second);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        /// Canonicalizing the same logical object twice always yields
        /// byte-identical output, independent of the field values chosen.
        #[test]
        fn repeated_canonicalization_is_byte_identical(
            a in any::<i64>(), b in ".*", c in any::<bool>(),
        ) {
            let v = json!({"a": a, "b": b, "c": c});
            let first = canonicalize_value(v.clone()).unwrap();
            let second = canonicalize_value(v).unwrap();
            prop_assert_eq!(first, second);
        }

        /// Field insertion order never affects the canonical bytes: JCS sorts
        /// keys lexicographically regardless of how the object was built.
        #[test]
        fn key_order_does_not_affect_output(a in any::<i64>(), b in any::<i64>()) {
            let forward = json!({"alpha": a, "beta": b});
            let backward = json!({"beta": b, "alpha": a});
            prop_assert_eq!(
                canonicalize_value(forward).unwrap(),
                canonicalize_value(backward).unwrap()
            );
        }
    }
}
