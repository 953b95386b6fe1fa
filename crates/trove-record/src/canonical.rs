//! Canonical JSON serialization.
//!
//! Object keys are written in sorted order at every depth and no whitespace
//! is emitted. Two semantically equal values therefore serialize to the same
//! bytes regardless of how their maps were built, which is what makes
//! record digests usable for change detection.

use serde_json::Value;

use crate::error::RecordResult;

/// Serialize `value` as canonical JSON.
pub fn to_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Serialize `value` as canonical JSON bytes.
pub fn to_vec(value: &Value) -> Vec<u8> {
    to_string(value).into_bytes()
}

/// Parse JSON text. Accepts any formatting, not just canonical output.
pub fn parse(text: &str) -> RecordResult<Value> {
    Ok(serde_json::from_str(text)?)
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()]);
            }
            out.push('}');
        }
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
        Value::String(s) => write_string(out, s),
        // Scalars: serde_json's compact Display is already canonical.
        other => out.push_str(&other.to_string()),
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push_str(&Value::String(s.to_string()).to_string());
}
