//! Content hashing of canonical structures.
//!
//! Canonical JSON is compact JSON with object keys sorted at every level, so
//! two structurally identical values always produce the same bytes no matter
//! how their mappings were built.

use crate::canonical::CanonicalParams;
use crate::identity::{sha256_hex, InputHash};
use serde_json::{Map, Value};

/// Clone `value` with every object's keys in sorted order.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                if let Some(child) = map.get(key) {
                    out.insert(key.clone(), sorted(child));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Serialize to canonical JSON text (sorted keys, no insignificant whitespace).
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

/// SHA-256 hex digest of the canonical JSON text of `value`.
pub fn hash_canonical(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Input hash of a call: digest of `{"args": [...], "kwargs": {...}}`.
pub fn input_hash(params: &CanonicalParams) -> InputHash {
    InputHash::new(hash_canonical(&params.to_value()))
}
