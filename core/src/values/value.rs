//! The tagged-union value type flowing through compilation, evaluation and
//! host interop.
//!
//! Values are immutable once constructed. Composites own their elements and
//! are shared behind `Arc`, so a `Program`'s constant pool can be referenced
//! by many concurrently running machines without copies or locks.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use ecow::EcoString;
use thiserror::Error;

use super::number::Number;

/// A policy value.
///
/// The total order over values sorts first by type tag
/// (null < bool < number < string < array < set < object), then by the
/// type-specific comparison. `Set` and `Object` rely on this order for key
/// canonicalization, so iteration order is always deterministic regardless of
/// insertion order.
#[derive(Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(EcoString),
    Array(Arc<Vec<Value>>),
    Set(Arc<BTreeSet<Value>>),
    Object(Arc<BTreeMap<Value, Value>>),
}

/// Two data documents disagree about the value at a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("data conflict at {path}")]
pub struct DataConflict {
    pub path: EcoString,
}

impl Value {
    /// Create an empty object.
    pub fn new_object() -> Value {
        Value::Object(Arc::new(BTreeMap::new()))
    }

    /// Create an empty set.
    pub fn new_set() -> Value {
        Value::Set(Arc::new(BTreeSet::new()))
    }

    /// Create an empty array.
    pub fn new_array() -> Value {
        Value::Array(Arc::new(Vec::new()))
    }

    /// Human-readable name of this value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Object(_) => "object",
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Set(_) => 5,
            Value::Object(_) => 6,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<Value>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<Value, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Object field lookup.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.as_object().and_then(|o| o.get(key))
    }

    /// Object field lookup by string key.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.get(&Value::from(key))
    }

    pub fn is_empty_object(&self) -> bool {
        matches!(self, Value::Object(o) if o.is_empty())
    }

    /// Recursively merge `other` into `self`.
    ///
    /// Objects merge key-wise; a key present on both sides with non-object
    /// values must agree, otherwise the merge is rejected with the
    /// conflicting path.
    pub fn merge(&mut self, other: Value) -> Result<(), DataConflict> {
        self.merge_at("data", other)
    }

    fn merge_at(&mut self, path: &str, other: Value) -> Result<(), DataConflict> {
        match (self, other) {
            (Value::Object(dest), Value::Object(src)) => {
                let dest = Arc::make_mut(dest);
                for (k, v) in src.iter() {
                    match dest.get_mut(k) {
                        Some(existing) => {
                            let sub = match k.as_str() {
                                Some(s) => format!("{}.{}", path, s),
                                None => format!("{}.{}", path, k),
                            };
                            existing.merge_at(&sub, v.clone())?;
                        }
                        None => {
                            dest.insert(k.clone(), v.clone());
                        }
                    }
                }
                Ok(())
            }
            (dest, src) => {
                if *dest == src {
                    Ok(())
                } else {
                    Err(DataConflict { path: path.into() })
                }
            }
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.iter().cmp(b.iter()),
            (Value::Set(a), Value::Set(b)) => a.iter().cmp(b.iter()),
            (Value::Object(a), Value::Object(b)) => a.iter().cmp(b.iter()),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Value {
    /// Canonical JSON rendering; see [`super::json`].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match super::json::to_json_str(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<unrenderable>"),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<EcoString> for Value {
    fn from(s: EcoString) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(Arc::new(v))
    }
}

impl From<BTreeSet<Value>> for Value {
    fn from(s: BTreeSet<Value>) -> Self {
        Value::Set(Arc::new(s))
    }
}

impl From<BTreeMap<Value, Value>> for Value {
    fn from(m: BTreeMap<Value, Value>) -> Self {
        Value::Object(Arc::new(m))
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Value::Array(Arc::new(iter.into_iter().collect()))
    }
}

impl FromIterator<(Value, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        Value::Object(Arc::new(iter.into_iter().collect()))
    }
}
