//! Canonical JSON serialization for vote equality.
//!
//! Two parsed results are the same vote iff their canonical serializations
//! are byte-equal. The encoding sorts object keys recursively, emits no
//! insignificant whitespace, and preserves Unicode unescaped, so semantic
//! equality implies byte equality.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Serializes any `Serialize` value to its canonical form.
///
/// # Errors
///
/// Returns an error if the value cannot be represented as JSON.
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(canonical_json(&value))
}

/// Renders a JSON value with sorted keys and minimal whitespace.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Sort explicitly rather than relying on the map's iteration order.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                if let Some(item) = map.get(key) {
                    write_value(out, item);
                }
            }
            out.push('}');
        }
    }
}

/// JSON string escaping without Unicode escapes for printable characters.
fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
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
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted() {
        let value = json!({"zeta": 1, "alpha": 2, "mid": {"b": 1, "a": 2}});
        assert_eq!(
            canonical_json(&value),
            r#"{"alpha":2,"mid":{"a":2,"b":1},"zeta":1}"#
        );
    }

    #[test]
    fn test_scalars() {
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(true)), "true");
        assert_eq!(canonical_json(&json!(42)), "42");
        assert_eq!(canonical_json(&json!(-1.5)), "-1.5");
        assert_eq!(canonical_json(&json!("hi")), "\"hi\"");
    }

    #[test]
    fn test_unicode_preserved() {
        let value = json!({"name": "日本語テキスト"});
        let out = canonical_json(&value);
        assert!(out.contains("日本語テキスト"));
        assert!(!out.contains("\\u65e5"));
    }

    #[test]
    fn test_escapes() {
        let value = json!({"s": "a\"b\\c\nd\te\u{1}"});
        assert_eq!(canonical_json(&value), r#"{"s":"a\"b\\c\nd\te"}"#);
    }

    #[test]
    fn test_arrays_keep_order() {
        let value = json!([3, 1, 2]);
        assert_eq!(canonical_json(&value), "[3,1,2]");
    }

    #[test]
    fn test_semantically_equal_objects_are_byte_equal() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": [true, null]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{ "y" : [ true , null ] , "x" : 1 }"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn test_typed_value() {
        #[derive(serde::Serialize)]
        struct Payload {
            v: u32,
        }
        let out = to_canonical_string(&Payload { v: 1 }).unwrap();
        assert_eq!(out, r#"{"v":1}"#);
    }

    /// Strategy producing arbitrary scalar/dict/list JSON trees.
    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 _\\-]{0,12}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn canonical_round_trips_exactly(value in arb_json()) {
            let encoded = canonical_json(&value);
            let decoded: Value = serde_json::from_str(&encoded).unwrap();
            prop_assert_eq!(&decoded, &value);
            // A second encode of the decoded value is byte-identical.
            prop_assert_eq!(canonical_json(&decoded), encoded);
        }
    }
}
