//! Canonicalization of call arguments and results.
//!
//! Rules, applied recursively:
//! - numeric arrays become nested plain-number sequences
//! - tracked values become tagged objects exposing their content and
//!   attributes; their origin trace is collected into `consumes`
//! - sets become sequences sorted by [`canonical_order`], duplicates removed
//! - everything else maps structurally onto JSON
//!
//! A value with no serializable form fails the whole call.

use crate::hash::{canonical_json, input_hash};
use crate::{
    CallArgs, CallResult, CallValue, CanonicalizationError, InputHash, InvocationId, NdArray,
    NdData, TrackedValue,
};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Tag key marking a serialized tracked value.
pub const TRACKED_TAG: &str = "__tracked";

const CONTENT_KEY: &str = "content";
const ORIGIN_TRACE_KEY: &str = "origin_trace";

/// Canonical form of one call's parameters plus its causal inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalParams {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    /// Invocations whose tracked outputs appear anywhere in the arguments.
    pub consumes: BTreeSet<InvocationId>,
}

impl CanonicalParams {
    /// The hashed structure: `{"args": [...], "kwargs": {...}}`.
    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        root.insert("args".to_string(), Value::Array(self.args.clone()));
        root.insert("kwargs".to_string(), Value::Object(self.kwargs.clone()));
        Value::Object(root)
    }

    pub fn input_hash(&self) -> InputHash {
        input_hash(self)
    }
}

/// Recursive walker that accumulates the `consumes` set.
#[derive(Debug, Default)]
pub struct Canonicalizer {
    consumes: BTreeSet<InvocationId>,
}

impl Canonicalizer {
    /// Canonicalize positional and keyword arguments of one call.
    pub fn canonicalize(call: &CallArgs) -> Result<CanonicalParams, CanonicalizationError> {
        let mut walker = Canonicalizer::default();

        let mut args = Vec::with_capacity(call.args.len());
        for (i, arg) in call.args.iter().enumerate() {
            args.push(walker.value(arg, &format!("args[{}]", i))?);
        }

        let mut kwargs = Map::new();
        for (name, arg) in &call.kwargs {
            let canonical = walker.value(arg, &format!("kwargs.{}", name))?;
            kwargs.insert(name.clone(), canonical);
        }

        Ok(CanonicalParams {
            args,
            kwargs,
            consumes: walker.consumes,
        })
    }

    /// Canonicalize a single value, returning it with the origins it carries.
    pub fn canonicalize_value(
        value: &CallValue,
    ) -> Result<(Value, BTreeSet<InvocationId>), CanonicalizationError> {
        let mut walker = Canonicalizer::default();
        let canonical = walker.value(value, "$")?;
        Ok((canonical, walker.consumes))
    }

    fn value(&mut self, value: &CallValue, path: &str) -> Result<Value, CanonicalizationError> {
        match value {
            CallValue::Null => Ok(Value::Null),
            CallValue::Bool(b) => Ok(Value::Bool(*b)),
            CallValue::Int(i) => Ok(Value::from(*i)),
            CallValue::UInt(u) => Ok(Value::from(*u)),
            CallValue::Float(f) => float(*f, path),
            CallValue::Str(s) => Ok(Value::String(s.clone())),
            CallValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.value(item, &format!("{}[{}]", path, i))?);
                }
                Ok(Value::Array(out))
            }
            CallValue::Map(entries) => {
                let mut out = Map::new();
                for (key, item) in entries {
                    if out.contains_key(key) {
                        return Err(CanonicalizationError::DuplicateKey {
                            path: path.to_string(),
                            key: key.clone(),
                        });
                    }
                    let canonical = self.value(item, &format!("{}.{}", path, key))?;
                    out.insert(key.clone(), canonical);
                }
                Ok(Value::Object(out))
            }
            CallValue::Set(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.value(item, &format!("{}{{{}}}", path, i))?);
                }
                out.sort_by(canonical_order);
                out.dedup();
                Ok(Value::Array(out))
            }
            CallValue::NdArray(array) => nd_array(array, path),
            CallValue::Tracked(tracked) => {
                self.consumes.extend(tracked.origin_trace.iter().cloned());
                Ok(tracked_object(tracked))
            }
            CallValue::Opaque { type_name } => Err(CanonicalizationError::Unserializable {
                type_name: type_name.clone(),
                path: path.to_string(),
            }),
        }
    }
}

fn float(f: f64, path: &str) -> Result<Value, CanonicalizationError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| CanonicalizationError::NonFiniteFloat {
            path: path.to_string(),
        })
}

fn nd_array(array: &NdArray, path: &str) -> Result<Value, CanonicalizationError> {
    let len = array.data.len();
    if array.expected_len() != Some(len) || !rows_backed(&array.shape, len) {
        return Err(CanonicalizationError::ShapeMismatch {
            path: path.to_string(),
            shape: array.shape.clone(),
            len,
        });
    }

    let flat: Vec<Value> = match &array.data {
        NdData::Int(values) => values.iter().map(|v| Value::from(*v)).collect(),
        NdData::Float(values) => {
            let mut out = Vec::with_capacity(values.len());
            for (i, v) in values.iter().enumerate() {
                out.push(float(*v, &format!("{}[{}]", path, i))?);
            }
            out
        }
    };

    Ok(nest(&array.shape, &flat))
}

/// Sequences built above the first empty dimension must be backed by data;
/// an empty array may only have unit dimensions before its zero.
fn rows_backed(shape: &[usize], len: usize) -> bool {
    let mut rows = 1usize;
    for &dim in shape {
        if dim == 0 {
            break;
        }
        match rows.checked_mul(dim) {
            Some(next) => rows = next,
            None => return false,
        }
    }
    rows <= len.max(1)
}

/// Fold a flat row-major buffer into nested sequences following `shape`.
fn nest(shape: &[usize], flat: &[Value]) -> Value {
    match shape.split_first() {
        None => flat.first().cloned().unwrap_or(Value::Null),
        Some((&outer, rest)) => {
            let stride = rest.iter().fold(1usize, |acc, &dim| acc.saturating_mul(dim));
            let rows = (0..outer)
                .map(|i| {
                    let start = (i * stride).min(flat.len());
                    let end = ((i + 1) * stride).min(flat.len());
                    nest(rest, &flat[start..end])
                })
                .collect();
            Value::Array(rows)
        }
    }
}

fn tracked_object(tracked: &TrackedValue) -> Value {
    let mut obj = Map::new();
    // Reserved keys are written last so attributes can never shadow them.
    for (key, value) in &tracked.attributes {
        obj.insert(key.clone(), value.clone());
    }
    obj.insert(
        CONTENT_KEY.to_string(),
        Value::String(tracked.content.clone()),
    );
    obj.insert(
        ORIGIN_TRACE_KEY.to_string(),
        Value::Array(
            tracked
                .origin_trace
                .iter()
                .map(|id| Value::String(id.as_str().to_string()))
                .collect(),
        ),
    );
    obj.insert(TRACKED_TAG.to_string(), Value::Bool(true));
    Value::Object(obj)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over canonical values used to sort set elements.
///
/// Values of different kinds order by kind (null, bool, number, string,
/// sequence, mapping). Numbers compare numerically with ties broken by their
/// text, strings lexicographically, and sequences or mappings by their
/// canonical JSON text.
pub fn canonical_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let fx = x.as_f64().unwrap_or(0.0);
            let fy = y.as_f64().unwrap_or(0.0);
            fx.total_cmp(&fy)
                .then_with(|| x.to_string().cmp(&y.to_string()))
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            canonical_json(a).cmp(&canonical_json(b))
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Serialize every item of a program result for storage.
pub fn canonical_results(result: &CallResult) -> Result<Vec<Value>, CanonicalizationError> {
    let mut walker = Canonicalizer::default();
    let mut out = Vec::new();
    for (i, item) in result.items().into_iter().enumerate() {
        out.push(walker.value(item, &format!("result[{}]", i))?);
    }
    Ok(out)
}

/// Rebuild a value from its stored form; tagged objects become tracked values.
pub fn decode_result_item(value: &Value) -> Result<CallValue, CanonicalizationError> {
    match value {
        Value::Object(map) if map.get(TRACKED_TAG) == Some(&Value::Bool(true)) => {
            decode_tracked(map).map(CallValue::Tracked)
        }
        Value::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (key, item) in map {
                entries.push((key.clone(), decode_result_item(item)?));
            }
            Ok(CallValue::Map(entries))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(decode_result_item(item)?);
            }
            Ok(CallValue::List(out))
        }
        other => Ok(CallValue::from(other.clone())),
    }
}

/// Rebuild a full result; exactly one item comes back unwrapped.
pub fn decode_results(items: &[Value]) -> Result<CallResult, CanonicalizationError> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        values.push(decode_result_item(item)?);
    }
    Ok(CallResult::from_items(values))
}

fn decode_tracked(map: &Map<String, Value>) -> Result<TrackedValue, CanonicalizationError> {
    let content = map
        .get(CONTENT_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| CanonicalizationError::MalformedResult {
            reason: "tracked value without string content".to_string(),
        })?
        .to_string();

    let mut origin_trace = BTreeSet::new();
    if let Some(trace) = map.get(ORIGIN_TRACE_KEY) {
        let ids = trace
            .as_array()
            .ok_or_else(|| CanonicalizationError::MalformedResult {
                reason: "origin_trace is not a sequence".to_string(),
            })?;
        for id in ids {
            let id = id.as_str().ok_or_else(|| CanonicalizationError::MalformedResult {
                reason: "origin_trace entry is not a string".to_string(),
            })?;
            origin_trace.insert(InvocationId::from_string(id));
        }
    }

    let attributes: BTreeMap<String, Value> = map
        .iter()
        .filter(|(key, _)| {
            !matches!(key.as_str(), TRACKED_TAG | CONTENT_KEY | ORIGIN_TRACE_KEY)
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(TrackedValue {
        content,
        origin_trace,
        attributes,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> InvocationId {
        InvocationId::from_string(s)
    }

    #[test]
    fn test_primitives_pass_through() {
        let call = CallArgs::new()
            .arg(5)
            .arg("text")
            .arg(true)
            .arg(CallValue::Null)
            .kwarg("ratio", 0.5);
        let params = Canonicalizer::canonicalize(&call).unwrap();
        assert_eq!(params.to_value(), json!({"args": [5, "text", true, null], "kwargs": {"ratio": 0.5}}));
        assert!(params.consumes.is_empty());
    }

    #[test]
    fn test_add_one_example_hash() {
        let params = Canonicalizer::canonicalize(&CallArgs::new().arg(5)).unwrap();
        assert_eq!(
            params.input_hash().as_str(),
            crate::sha256_hex(br#"{"args":[5],"kwargs":{}}"#)
        );
    }

    #[test]
    fn test_set_is_sorted_and_deduplicated() {
        let call = CallArgs::new().arg(CallValue::set(vec![
            CallValue::Int(10),
            CallValue::Int(9),
            CallValue::Int(10),
            CallValue::Int(-1),
        ]));
        let params = Canonicalizer::canonicalize(&call).unwrap();
        assert_eq!(params.args[0], json!([-1, 9, 10]));
    }

    #[test]
    fn test_set_with_mixed_kinds_has_total_order() {
        let forward = CallValue::set(vec![
            CallValue::str("b"),
            CallValue::Int(2),
            CallValue::Null,
            CallValue::list(vec![CallValue::Int(1)]),
            CallValue::Bool(true),
            CallValue::str("a"),
        ]);
        let backward = match &forward {
            CallValue::Set(items) => CallValue::Set(items.iter().rev().cloned().collect()),
            _ => unreachable!(),
        };
        let (a, _) = Canonicalizer::canonicalize_value(&forward).unwrap();
        let (b, _) = Canonicalizer::canonicalize_value(&backward).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, json!([null, true, 2, "a", "b", [1]]));
    }

    #[test]
    fn test_nd_array_becomes_nested_lists() {
        let array = NdArray::from_i64(vec![2, 3], vec![1, 2, 3, 4, 5, 6]);
        let (value, _) = Canonicalizer::canonicalize_value(&CallValue::NdArray(array)).unwrap();
        assert_eq!(value, json!([[1, 2, 3], [4, 5, 6]]));
    }

    #[test]
    fn test_nd_array_scalar_and_empty() {
        let scalar = NdArray::from_f64(vec![], vec![1.5]);
        let (value, _) = Canonicalizer::canonicalize_value(&CallValue::NdArray(scalar)).unwrap();
        assert_eq!(value, json!(1.5));

        let empty = NdArray::from_f64(vec![1, 0], vec![]);
        let (value, _) = Canonicalizer::canonicalize_value(&CallValue::NdArray(empty)).unwrap();
        assert_eq!(value, json!([[]]));

        let flat = NdArray::from_f64(vec![0, 4], vec![]);
        let (value, _) = Canonicalizer::canonicalize_value(&CallValue::NdArray(flat)).unwrap();
        assert_eq!(value, json!([]));
    }

    #[test]
    fn test_nd_array_overflowing_shape_fails() {
        let array = NdArray::from_i64(vec![usize::MAX, 2], vec![]);
        let result = Canonicalizer::canonicalize(&CallArgs::new().arg(array));
        assert!(matches!(
            result,
            Err(CanonicalizationError::ShapeMismatch { ref path, len: 0, .. }) if path == "args[0]"
        ));
    }

    #[test]
    fn test_nd_array_empty_rows_must_be_backed() {
        for shape in [vec![usize::MAX, 0], vec![2, 0], vec![3, usize::MAX, 0]] {
            let array = NdArray::from_i64(shape.clone(), vec![]);
            let result = Canonicalizer::canonicalize_value(&CallValue::NdArray(array));
            assert!(
                matches!(result, Err(CanonicalizationError::ShapeMismatch { .. })),
                "shape {:?} accepted",
                shape
            );
        }
    }

    #[test]
    fn test_duplicate_map_key_fails() {
        let first = CallValue::Map(vec![
            ("x".to_string(), CallValue::Int(1)),
            ("x".to_string(), CallValue::Int(2)),
        ]);
        let second = CallValue::Map(vec![
            ("x".to_string(), CallValue::Int(2)),
            ("x".to_string(), CallValue::Int(1)),
        ]);
        for value in [first, second] {
            let result = Canonicalizer::canonicalize(&CallArgs::new().arg(value));
            assert!(matches!(
                result,
                Err(CanonicalizationError::DuplicateKey { ref path, ref key })
                    if path == "args[0]" && key == "x"
            ));
        }
    }

    #[test]
    fn test_map_entry_order_does_not_change_hash() {
        let forward = CallValue::map([("a", CallValue::Int(1)), ("b", CallValue::Int(2))]);
        let backward = CallValue::map([("b", CallValue::Int(2)), ("a", CallValue::Int(1))]);
        let a = Canonicalizer::canonicalize(&CallArgs::new().arg(forward)).unwrap();
        let b = Canonicalizer::canonicalize(&CallArgs::new().arg(backward)).unwrap();
        assert_eq!(a.input_hash(), b.input_hash());
    }

    #[test]
    fn test_nd_array_shape_mismatch_fails() {
        let array = NdArray::from_i64(vec![2, 2], vec![1, 2, 3]);
        let result = Canonicalizer::canonicalize(&CallArgs::new().arg(array));
        assert!(matches!(
            result,
            Err(CanonicalizationError::ShapeMismatch { ref path, len: 3, .. }) if path == "args[0]"
        ));
    }

    #[test]
    fn test_tracked_value_is_tagged_and_consumed() {
        let tracked = TrackedValue::from_origin("hello", &id("invocation-a"))
            .with_attribute("model", json!("gpt"));
        let call = CallArgs::new().kwarg("greeting", tracked);
        let params = Canonicalizer::canonicalize(&call).unwrap();

        assert_eq!(
            params.kwargs["greeting"],
            json!({
                "__tracked": true,
                "content": "hello",
                "origin_trace": ["invocation-a"],
                "model": "gpt",
            })
        );
        assert!(params.consumes.contains(&id("invocation-a")));
    }

    #[test]
    fn test_nested_tracked_values_union_consumes() {
        let a = TrackedValue::from_origin("a", &id("invocation-a"));
        let b = TrackedValue::from_origin("b", &id("invocation-b")).with_origin(id("invocation-c"));
        let call = CallArgs::new().arg(CallValue::list(vec![
            CallValue::map(vec![("inner", CallValue::Tracked(a))]),
            CallValue::set(vec![CallValue::Tracked(b)]),
        ]));
        let params = Canonicalizer::canonicalize(&call).unwrap();
        let expected: BTreeSet<_> = ["invocation-a", "invocation-b", "invocation-c"]
            .into_iter()
            .map(id)
            .collect();
        assert_eq!(params.consumes, expected);
    }

    #[test]
    fn test_opaque_value_is_fatal() {
        let call = CallArgs::new().kwarg(
            "conn",
            CallValue::list(vec![CallValue::Int(1), CallValue::opaque("Socket")]),
        );
        let result = Canonicalizer::canonicalize(&call);
        match result {
            Err(CanonicalizationError::Unserializable { type_name, path }) => {
                assert_eq!(type_name, "Socket");
                assert_eq!(path, "kwargs.conn[1]");
            }
            other => panic!("expected Unserializable, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_float_is_fatal() {
        let result = Canonicalizer::canonicalize(&CallArgs::new().arg(f64::NAN));
        assert!(matches!(
            result,
            Err(CanonicalizationError::NonFiniteFloat { .. })
        ));
    }

    #[test]
    fn test_map_key_order_does_not_change_hash() {
        let first = CallArgs::new().arg(CallValue::map(vec![
            ("x", CallValue::Int(1)),
            ("y", CallValue::Int(2)),
        ]));
        let second = CallArgs::new().arg(CallValue::map(vec![
            ("y", CallValue::Int(2)),
            ("x", CallValue::Int(1)),
        ]));
        assert_eq!(
            Canonicalizer::canonicalize(&first).unwrap().input_hash(),
            Canonicalizer::canonicalize(&second).unwrap().input_hash()
        );
    }

    #[test]
    fn test_results_decode_back_to_tracked_values() {
        let origin = id("invocation-a");
        let result = CallResult::Many(vec![
            CallValue::Tracked(TrackedValue::from_origin("one", &origin)),
            CallValue::Tracked(TrackedValue::from_origin("two", &origin)),
        ]);
        let stored = canonical_results(&result).unwrap();
        let decoded = decode_results(&stored).unwrap();
        assert_eq!(decoded, result);
    }

    #[test]
    fn test_single_result_decodes_unwrapped() {
        let stored = canonical_results(&CallResult::One(CallValue::Int(6))).unwrap();
        assert_eq!(stored, vec![json!(6)]);
        assert_eq!(decode_results(&stored).unwrap(), CallResult::One(CallValue::Int(6)));
    }

    #[test]
    fn test_malformed_tracked_result() {
        let stored = json!({"__tracked": true, "origin_trace": []});
        assert!(matches!(
            decode_result_item(&stored),
            Err(CanonicalizationError::MalformedResult { .. })
        ));
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
