//! Deterministic byte encoding for every value that ends up under a hash.
//!
//! Canonical form is JSON with object keys sorted by UTF-8 code point, no
//! insignificant whitespace, minimal-decimal integers, and the escaping rules
//! below. Two logically equal values canonicalize to bitwise-identical bytes
//! on every machine, which is what makes the commitments in this workspace
//! reproducible by third parties.

use serde_json::Value;
use thiserror::Error;

/// Nesting bound for canonical encoding. `serde_json` values are acyclic by
/// construction, so a depth guard is the remaining defense against
/// adversarially deep payloads blowing the stack.
const MAX_DEPTH: usize = 128;

/// How `null` object values are treated during canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullPolicy {
    /// Keep keys whose value is `null` (the default).
    #[default]
    Preserve,
    /// Drop keys whose value is `null` before sorting.
    Drop,
}

/// Canonicalization failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonError {
    /// A number that is not an integer appeared in a hashed payload.
    /// Durations, counts, and sequence numbers are all integral; fractional
    /// values have no agreed decimal encoding and are rejected.
    #[error("non-integer number in canonical payload: {0}")]
    NonIntegerNumber(String),
    /// Value nesting exceeded [`MAX_DEPTH`].
    #[error("canonical value nesting exceeds depth limit of {0}")]
    DepthExceeded(usize),
    /// The value could not be represented as canonical JSON at all
    /// (for example a structure whose serde serialization fails).
    #[error("value not representable in canonical form: {0}")]
    Unrepresentable(String),
}

/// Canonicalize a value with the default null policy.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, CanonError> {
    canonicalize_with(value, NullPolicy::Preserve)
}

/// Canonicalize a value under an explicit null policy.
pub fn canonicalize_with(value: &Value, policy: NullPolicy) -> Result<Vec<u8>, CanonError> {
    let mut out = String::new();
    write_value(&mut out, value, policy, 0)?;
    Ok(out.into_bytes())
}

fn write_value(
    out: &mut String,
    value: &Value,
    policy: NullPolicy,
    depth: usize,
) -> Result<(), CanonError> {
    if depth > MAX_DEPTH {
        return Err(CanonError::DepthExceeded(MAX_DEPTH));
    }
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            // Minimal decimal form: i64/u64 display is already canonical.
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                return Err(CanonError::NonIntegerNumber(n.to_string()));
            }
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item, policy, depth + 1)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            // serde_json maps cannot hold duplicate keys, so sorting the key
            // set is the whole canonical-order story.
            let mut keys: Vec<&String> = map
                .iter()
                .filter(|(_, v)| policy == NullPolicy::Preserve || !v.is_null())
                .map(|(k, _)| k)
                .collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()], policy, depth + 1)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// JSON string escaping, pinned here rather than delegated so the canonical
/// byte form cannot drift with a serializer upgrade: `"` and `\` escape with
/// a backslash, the named control escapes are used where they exist, all
/// other control characters use `\u00XX`, and everything else is literal
/// UTF-8.
fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{09}' => out.push_str("\\t"),
            '\u{0A}' => out.push_str("\\n"),
            '\u{0C}' => out.push_str("\\f"),
            '\u{0D}' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon_str(value: &Value) -> String {
        String::from_utf8(canonicalize(value).unwrap()).unwrap()
    }

    #[test]
    fn sorts_object_keys_by_code_point() {
        let value = json!({"b": 1, "a": 2, "ab": 3, "A": 4});
        assert_eq!(canon_str(&value), r#"{"A":4,"a":2,"ab":3,"b":1}"#);
    }

    #[test]
    fn sorts_nested_objects() {
        let value = json!({"outer": {"z": 1, "a": {"y": 2, "b": 3}}});
        assert_eq!(canon_str(&value), r#"{"outer":{"a":{"b":3,"y":2},"z":1}}"#);
    }

    #[test]
    fn preserves_array_order() {
        let value = json!([3, 1, 2, {"b": 1, "a": 2}]);
        assert_eq!(canon_str(&value), r#"[3,1,2,{"a":2,"b":1}]"#);
    }

    #[test]
    fn integers_use_minimal_decimal() {
        let value = json!({"neg": -7, "zero": 0, "big": u64::MAX});
        assert_eq!(
            canon_str(&value),
            format!(r#"{{"big":{},"neg":-7,"zero":0}}"#, u64::MAX)
        );
    }

    #[test]
    fn rejects_fractional_numbers() {
        let value = json!({"x": 1.5});
        assert_eq!(
            canonicalize(&value),
            Err(CanonError::NonIntegerNumber("1.5".into()))
        );
    }

    #[test]
    fn escapes_strings() {
        let value = json!({"s": "a\"b\\c\nd\u{01}é"});
        assert_eq!(canon_str(&value), "{\"s\":\"a\\\"b\\\\c\\nd\\u0001é\"}");
    }

    #[test]
    fn null_policy_preserve_keeps_nulls() {
        let value = json!({"a": null, "b": 1});
        assert_eq!(canon_str(&value), r#"{"a":null,"b":1}"#);
    }

    #[test]
    fn null_policy_drop_removes_null_keys() {
        let value = json!({"a": null, "b": 1, "c": {"d": null}});
        let bytes = canonicalize_with(&value, NullPolicy::Drop).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"b":1,"c":{}}"#);
    }

    #[test]
    fn depth_guard_trips() {
        let mut value = json!(1);
        for _ in 0..200 {
            value = json!([value]);
        }
        assert_eq!(canonicalize(&value), Err(CanonError::DepthExceeded(128)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_value() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(|i| Value::Number(i.into())),
                "[ -~]{0,12}".prop_map(Value::String),
            ];
            leaf.prop_recursive(4, 32, 6, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        proptest! {
            #[test]
            fn canonicalization_is_deterministic_and_stable(value in arb_value()) {
                let first = canonicalize(&value).unwrap();
                let second = canonicalize(&value).unwrap();
                prop_assert_eq!(&first, &second);
                let reparsed: Value = serde_json::from_slice(&first).unwrap();
                prop_assert_eq!(canonicalize(&reparsed).unwrap(), first);
            }
        }
    }

    #[test]
    fn canonical_output_reparses_to_same_value() {
        let value = json!({
            "run": {"id": "r-1", "events": [{"seq": 0, "ok": true}, {"seq": 1, "ok": false}]},
            "note": "trailing\tdata",
            "empty": {},
            "none": null
        });
        let first = canonicalize(&value).unwrap();
        let reparsed: Value = serde_json::from_slice(&first).unwrap();
        assert_eq!(reparsed, value);
        let second = canonicalize(&reparsed).unwrap();
        assert_eq!(first, second);
    }
}
