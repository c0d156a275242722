//! Row keys.

use crate::value::Value;
use alloc::format;
use alloc::string::{String, ToString};
use core::fmt;
use serde::{Deserialize, Serialize};

/// The identity of a row inside one collection.
///
/// Keys are either integers or strings. Rows derived by joins, groupings
/// and distinct projections get composite string keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    /// Extracts a key from a scalar value.
    ///
    /// Integral floats are accepted; everything else yields `None`.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Int64(i) => Some(Key::Int(*i)),
            Value::Float64(f) if f.fract() == 0.0 && f.is_finite() => Some(Key::Int(*f as i64)),
            Value::String(s) => Some(Key::Str(s.clone())),
            _ => None,
        }
    }

    /// Converts the key back into a value.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::Int64(*i),
            Key::Str(s) => Value::String(s.clone()),
        }
    }

    /// Builds the `[left,right]` key of a joined row.
    ///
    /// A missing side (outer joins) renders as `null`.
    pub fn composite(left: Option<&Key>, right: Option<&Key>) -> Key {
        fn part(key: Option<&Key>) -> String {
            match key {
                Some(Key::Int(i)) => i.to_string(),
                Some(Key::Str(s)) => format!("{:?}", s),
                None => "null".to_string(),
            }
        }
        Key::Str(format!("[{},{}]", part(left), part(right)))
    }

    /// Builds a key from the rendering of an arbitrary value.
    pub fn of_value(value: &Value) -> Key {
        Key::Str(value.to_string())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::Int(v as i64)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Str(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Str(v)
    }
}
