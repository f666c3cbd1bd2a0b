//! JSON boundary for values.
//!
//! Parsing goes through `serde_json::Value` so that number literals arrive as
//! exact decimal text (`serde_json` is compiled with `arbitrary_precision`).
//! Rendering is canonical: object keys in the value total order, sets as
//! arrays in element order, numbers without precision loss.

use std::borrow::Cow;

use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use super::number::Number;
use super::value::Value;

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n
                .to_json_number()
                .ok_or_else(|| S::Error::custom("number has no JSON representation"))?
                .serialize(serializer),
            Value::String(s) => serializer.serialize_str(s.as_str()),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            // Sets have no JSON analogue; they render as arrays in the
            // element order given by the value total order.
            Value::Set(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields.iter() {
                    map.serialize_entry(&json_key(k), v)?;
                }
                map.end()
            }
        }
    }
}

/// JSON object keys must be strings; non-string keys render through their
/// canonical JSON text.
fn json_key(key: &Value) -> Cow<'_, str> {
    match key {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(to_json_str(other).unwrap_or_default()),
    }
}

/// Canonical JSON rendering of a value.
pub fn to_json_str(value: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Parse a JSON document into a value.
pub fn from_json_str(json: &str) -> Result<Value, serde_json::Error> {
    let parsed: serde_json::Value = serde_json::from_str(json)?;
    from_json_value(&parsed)
}

/// Convert an already-parsed JSON document into a value.
pub fn from_json_value(json: &serde_json::Value) -> Result<Value, serde_json::Error> {
    use serde::de::Error as _;
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            // `to_string` yields the original literal text under
            // arbitrary_precision, so nothing is routed through f64 here.
            let number = Number::parse(&n.to_string())
                .ok_or_else(|| <serde_json::Error as serde::de::Error>::custom(format!("unreadable number {n}")))?;
            Value::Number(number)
        }
        serde_json::Value::String(s) => Value::String(s.as_str().into()),
        serde_json::Value::Array(items) => items
            .iter()
            .map(from_json_value)
            .collect::<Result<Vec<_>, _>>()?
            .into(),
        serde_json::Value::Object(fields) => {
            let mut object = std::collections::BTreeMap::new();
            for (k, v) in fields {
                object.insert(Value::from(k.as_str()), from_json_value(v)?);
            }
            object.into()
        }
    })
}
