//! Conversion between `Value` and JSON.
//!
//! DateTimes serialize as their millisecond timestamp. Non-finite floats
//! have no JSON form and fail with `Error::Serialization` before any output
//! is produced.

use crate::error::{Error, Result};
use crate::value::Value;
use alloc::format;
use alloc::string::String;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number};

impl Value {
    /// Converts the value into a `serde_json::Value`.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Int64(i) | Value::DateTime(i) => serde_json::Value::Number((*i).into()),
            Value::Float64(f) => match Number::from_f64(*f) {
                Some(n) => serde_json::Value::Number(n),
                None => return Err(Error::serialization(format!("non-finite float {}", f))),
            },
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<_>>()?,
            ),
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                serde_json::Value::Object(out)
            }
        })
    }

    /// Serializes the value to a JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        let json = self.to_json()?;
        serde_json::to_string(&json).map_err(|e| Error::serialization(format!("{}", e)))
    }

    /// Parses a JSON string into a value.
    pub fn from_json_str(input: &str) -> Result<Value> {
        serde_json::from_str::<serde_json::Value>(input)
            .map(Value::from)
            .map_err(|e| Error::serialization(format!("{}", e)))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int64(i),
                None => Value::Float64(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        use serde::ser::Error as _;
        self.to_json()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}
