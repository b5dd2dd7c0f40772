//! Canonical JSON serialization and stable hashing.
//!
//! Checkpoints and replay hashes must be byte-identical across runs and
//! across the languages that read them, so this module serializes values
//! with object keys sorted by their raw UTF-8 bytes (not Unicode
//! collation), compact separators, and no slash escaping. Hash
//! comparisons are over these bytes, never over parsed structure.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a value to canonical JSON: sorted keys, compact, no trailing
/// whitespace.
#[must_use]
pub fn to_canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Hex-encoded SHA-256 of the canonical JSON bytes of `value`.
#[must_use]
pub fn canonical_hash(value: &Value) -> String {
    hex_digest(to_canonical_json(value).as_bytes())
}

/// Hex-encoded SHA-256 of arbitrary bytes.
#[must_use]
pub fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        // serde_json renders numbers via itoa/ryu: integers without a
        // fractional part, floats in shortest round-trip form.
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
            keys.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_value(out, v);
                }
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // serde_json escapes control characters, quotes, and backslashes only;
    // forward slashes pass through unescaped, which the format requires.
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}
