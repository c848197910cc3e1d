/// Canonical JSON serialization used as hashing input.
///
/// Two logically identical payloads must serialize to identical bytes
/// regardless of map insertion order at the call site:
/// - object keys sorted lexicographically, recursively
/// - compact separators (no whitespace)
/// - numbers rendered through serde_json's fixed representation
/// - strings escaped per JSON, UTF-8
use serde_json::{Map, Value};

use crate::error::{AuditError, Result};

/// Serialize a JSON value canonically.
pub fn to_canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Validate an event payload and serialize it canonically.
///
/// A payload must be a non-empty JSON object; anything else is a
/// programmer error on the producing side, rejected at capture.
pub fn canonical_payload(payload: &Map<String, Value>) -> Result<String> {
    if payload.is_empty() {
        return Err(AuditError::InvalidPayload(
            "payload must not be empty".into(),
        ));
    }
    Ok(to_canonical_json(&Value::Object(payload.clone())))
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
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
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()]);
            }
            out.push('}');
        }
    }
}

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
    use serde_json::json;

    #[test]
    fn test_keys_sorted() {
        let v = json!({"zebra": 1, "apple": 2, "mango": 3});
        assert_eq!(
            to_canonical_json(&v),
            r#"{"apple":2,"mango":3,"zebra":1}"#
        );
    }

    #[test]
    fn test_nested_objects_sorted() {
        let v = json!({"outer": {"b": 1, "a": {"d": 4, "c": 3}}});
        assert_eq!(
            to_canonical_json(&v),
            r#"{"outer":{"a":{"c":3,"d":4},"b":1}}"#
        );
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap();
        assert_eq!(to_canonical_json(&a), to_canonical_json(&b));
    }

    #[test]
    fn test_numbers_fixed_representation() {
        let v = json!({"int": 42, "neg": -7, "float": 1.5});
        assert_eq!(
            to_canonical_json(&v),
            r#"{"float":1.5,"int":42,"neg":-7}"#
        );
    }

    #[test]
    fn test_string_escapes() {
        let v = json!({"k": "line\nbreak \"quoted\""});
        assert_eq!(
            to_canonical_json(&v),
            r#"{"k":"line\nbreak \"quoted\""}"#
        );
    }

    #[test]
    fn test_empty_payload_rejected() {
        let empty = Map::new();
        assert!(matches!(
            canonical_payload(&empty),
            Err(AuditError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_arrays_preserve_order() {
        let v = json!({"items": [3, 1, 2]});
        assert_eq!(to_canonical_json(&v), r#"{"items":[3,1,2]}"#);
    }
}
