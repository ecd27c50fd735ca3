//! Call values, tracked values and call results.
//!
//! `CallValue` is the dynamic value model that tracked programs take as
//! arguments and hand back as results. It is deliberately close to JSON, with
//! three extra shapes the canonicalizer treats specially: unordered sets,
//! numeric arrays and tracked values.

use crate::{CanonicalizationError, InvocationId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// TRACKED VALUE
// ============================================================================

/// A string payload carrying the set of invocations that produced it.
///
/// Passing a tracked value into another tracked program adds its origin trace
/// to that invocation's `consumes` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedValue {
    pub content: String,
    #[serde(default)]
    pub origin_trace: BTreeSet<InvocationId>,
    /// Extra serializable attributes (e.g. logits, model name).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl TrackedValue {
    /// A tracked value with an empty origin trace.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            origin_trace: BTreeSet::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// A tracked value produced by a single invocation.
    pub fn from_origin(content: impl Into<String>, origin: &InvocationId) -> Self {
        let mut value = Self::new(content);
        value.origin_trace.insert(origin.clone());
        value
    }

    pub fn with_origin(mut self, origin: InvocationId) -> Self {
        self.origin_trace.insert(origin);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn origin_trace(&self) -> &BTreeSet<InvocationId> {
        &self.origin_trace
    }

    /// Concatenate two tracked values; the result descends from both.
    pub fn concat(&self, other: &TrackedValue) -> TrackedValue {
        let mut origin_trace = self.origin_trace.clone();
        origin_trace.extend(other.origin_trace.iter().cloned());
        TrackedValue {
            content: format!("{}{}", self.content, other.content),
            origin_trace,
            attributes: BTreeMap::new(),
        }
    }
}

impl fmt::Display for TrackedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content)
    }
}

// ============================================================================
// NUMERIC ARRAYS
// ============================================================================

/// Flat element storage of a numeric array.
#[derive(Debug, Clone, PartialEq)]
pub enum NdData {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl NdData {
    pub fn len(&self) -> usize {
        match self {
            NdData::Int(v) => v.len(),
            NdData::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row-major numeric array with an explicit shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub data: NdData,
}

impl NdArray {
    pub fn from_f64(shape: Vec<usize>, data: Vec<f64>) -> Self {
        Self {
            shape,
            data: NdData::Float(data),
        }
    }

    pub fn from_i64(shape: Vec<usize>, data: Vec<i64>) -> Self {
        Self {
            shape,
            data: NdData::Int(data),
        }
    }

    /// One-dimensional float array.
    pub fn vector(data: Vec<f64>) -> Self {
        Self::from_f64(vec![data.len()], data)
    }

    /// Number of elements the shape describes, `None` if it overflows.
    pub fn expected_len(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }
}

// ============================================================================
// CALL VALUE
// ============================================================================

/// Dynamic value passed to or returned from a tracked program.
#[derive(Debug, Clone, PartialEq)]
pub enum CallValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    List(Vec<CallValue>),
    /// String-keyed mapping; key order carries no meaning.
    Map(Vec<(String, CallValue)>),
    /// Unordered collection; iteration order carries no meaning.
    Set(Vec<CallValue>),
    NdArray(NdArray),
    Tracked(TrackedValue),
    /// A value with no serializable representation (handles, closures, sockets).
    Opaque { type_name: String },
}

impl CallValue {
    pub fn str(s: impl Into<String>) -> Self {
        CallValue::Str(s.into())
    }

    pub fn list(items: impl IntoIterator<Item = CallValue>) -> Self {
        CallValue::List(items.into_iter().collect())
    }

    pub fn set(items: impl IntoIterator<Item = CallValue>) -> Self {
        CallValue::Set(items.into_iter().collect())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, CallValue)>) -> Self {
        CallValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn opaque(type_name: impl Into<String>) -> Self {
        CallValue::Opaque {
            type_name: type_name.into(),
        }
    }

    /// Run any serde-serializable value through the structural serializer.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, CanonicalizationError> {
        let json = serde_json::to_value(value).map_err(|e| CanonicalizationError::Structural {
            path: "$".to_string(),
            reason: e.to_string(),
        })?;
        Ok(CallValue::from(json))
    }

    pub fn as_tracked(&self) -> Option<&TrackedValue> {
        match self {
            CallValue::Tracked(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CallValue::Int(i) => Some(*i),
            CallValue::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CallValue::Str(s) => Some(s),
            CallValue::Tracked(t) => Some(&t.content),
            _ => None,
        }
    }

    /// Short name of the variant, used in error paths and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CallValue::Null => "null",
            CallValue::Bool(_) => "bool",
            CallValue::Int(_) => "int",
            CallValue::UInt(_) => "uint",
            CallValue::Float(_) => "float",
            CallValue::Str(_) => "str",
            CallValue::List(_) => "list",
            CallValue::Map(_) => "map",
            CallValue::Set(_) => "set",
            CallValue::NdArray(_) => "ndarray",
            CallValue::Tracked(_) => "tracked",
            CallValue::Opaque { .. } => "opaque",
        }
    }
}

impl From<serde_json::Value> for CallValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CallValue::Null,
            serde_json::Value::Bool(b) => CallValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    CallValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    CallValue::UInt(u)
                } else {
                    CallValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => CallValue::Str(s),
            serde_json::Value::Array(items) => {
                CallValue::List(items.into_iter().map(CallValue::from).collect())
            }
            serde_json::Value::Object(map) => CallValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, CallValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for CallValue {
    fn from(b: bool) -> Self {
        CallValue::Bool(b)
    }
}

impl From<i32> for CallValue {
    fn from(i: i32) -> Self {
        CallValue::Int(i64::from(i))
    }
}

impl From<i64> for CallValue {
    fn from(i: i64) -> Self {
        CallValue::Int(i)
    }
}

impl From<u32> for CallValue {
    fn from(u: u32) -> Self {
        CallValue::Int(i64::from(u))
    }
}

impl From<u64> for CallValue {
    fn from(u: u64) -> Self {
        CallValue::UInt(u)
    }
}

impl From<f64> for CallValue {
    fn from(f: f64) -> Self {
        CallValue::Float(f)
    }
}

impl From<&str> for CallValue {
    fn from(s: &str) -> Self {
        CallValue::Str(s.to_string())
    }
}

impl From<String> for CallValue {
    fn from(s: String) -> Self {
        CallValue::Str(s)
    }
}

impl From<TrackedValue> for CallValue {
    fn from(t: TrackedValue) -> Self {
        CallValue::Tracked(t)
    }
}

impl From<NdArray> for CallValue {
    fn from(a: NdArray) -> Self {
        CallValue::NdArray(a)
    }
}

impl From<Vec<CallValue>> for CallValue {
    fn from(items: Vec<CallValue>) -> Self {
        CallValue::List(items)
    }
}

// ============================================================================
// CALL ARGUMENTS AND RESULTS
// ============================================================================

/// Positional and keyword arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<CallValue>,
    pub kwargs: BTreeMap<String, CallValue>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(args: impl IntoIterator<Item = CallValue>) -> Self {
        Self {
            args: args.into_iter().collect(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<CallValue>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<CallValue>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, index: usize) -> Option<&CallValue> {
        self.args.get(index)
    }

    pub fn get_kwarg(&self, name: &str) -> Option<&CallValue> {
        self.kwargs.get(name)
    }
}

/// What a tracked program hands back: one value or an ordered list of values.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    One(CallValue),
    Many(Vec<CallValue>),
}

impl CallResult {
    /// Rebuild a result from stored items; exactly one item is returned unwrapped.
    pub fn from_items(mut items: Vec<CallValue>) -> Self {
        if items.len() == 1 {
            CallResult::One(items.remove(0))
        } else {
            CallResult::Many(items)
        }
    }

    /// Items in storage order.
    pub fn items(&self) -> Vec<&CallValue> {
        match self {
            CallResult::One(v) => vec![v],
            CallResult::Many(vs) => vs.iter().collect(),
        }
    }

    pub fn into_items(self) -> Vec<CallValue> {
        match self {
            CallResult::One(v) => vec![v],
            CallResult::Many(vs) => vs,
        }
    }

    pub fn as_one(&self) -> Option<&CallValue> {
        match self {
            CallResult::One(v) => Some(v),
            CallResult::Many(_) => None,
        }
    }
}

impl From<CallValue> for CallResult {
    fn from(value: CallValue) -> Self {
        CallResult::One(value)
    }
}
