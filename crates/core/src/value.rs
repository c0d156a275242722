//! Value type definitions.
//!
//! `Value` is the dynamically typed payload carried by every row, every
//! expression literal and every index bucket. Rows are usually
//! `Value::Object`s; nested fields are addressed with a path of segments.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};

/// A dynamically typed value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Null / absent value
    #[default]
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
    /// UTF-8 string
    String(String),
    /// DateTime stored as Unix timestamp in milliseconds
    DateTime(i64),
    /// Ordered list of values
    Array(Vec<Value>),
    /// Field name to value mapping
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Creates an object value from `(field, value)` pairs.
    pub fn object<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns true if this value is Null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the boolean value if this is a Boolean, None otherwise.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the i64 value if this is an Int64, None otherwise.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the f64 value if this is a Float64, None otherwise.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of Int64, Float64 and DateTime values.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) | Value::DateTime(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a reference to the string if this is a String, None otherwise.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Returns the datetime timestamp if this is a DateTime, None otherwise.
    pub fn as_datetime(&self) -> Option<i64> {
        match self {
            Value::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    /// True for values that `min`/`max` aggregate over.
    pub fn is_orderable_scalar(&self) -> bool {
        matches!(self, Value::Int64(_) | Value::Float64(_) | Value::DateTime(_))
    }

    /// Looks up a direct field of an object.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(field),
            _ => None,
        }
    }

    /// Follows a field path through nested objects and arrays.
    ///
    /// Array elements are addressed by their decimal position.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let mut current = self;
        for segment in path {
            let segment = segment.as_ref();
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Writes `value` at `path`, creating intermediate objects as needed.
    ///
    /// Non-object intermediates are replaced by objects.
    pub fn set_path<S: AsRef<str>>(&mut self, path: &[S], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            *self = value;
            return;
        };
        let mut current = self;
        for segment in parents {
            current = ensure_object(current)
                .entry(segment.as_ref().to_string())
                .or_insert(Value::Null);
        }
        ensure_object(current).insert(last.as_ref().to_string(), value);
    }

    /// SQL-style comparison used by predicates.
    ///
    /// Returns `None` when either side is Null or the types cannot be
    /// compared. Int64 and Float64 compare numerically.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
                if self == other {
                    Some(Ordering::Equal)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// SQL equality: `Some(true)`/`Some(false)`, or `None` when unknown.
    pub fn sql_eq(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
                Some(self == other)
            }
            _ => Some(self.sql_cmp(other) == Some(Ordering::Equal)),
        }
    }

    /// Ordering between type families used by the total order.
    fn type_order(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int64(_) | Value::Float64(_) => 2,
            Value::String(_) => 3,
            Value::DateTime(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
        }
    }
}

fn ensure_object(value: &mut Value) -> &mut BTreeMap<String, Value> {
    if !matches!(value, Value::Object(_)) {
        *value = Value::Object(BTreeMap::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}

fn float_cmp(a: f64, b: f64) -> Ordering {
    // NaN sorts after every other float
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Int64(i) => i.hash(state),
            Value::Float64(f) => {
                // 0.0 == -0.0 and NaN == NaN, so they must hash alike
                let bits = if *f == 0.0 {
                    0u64
                } else if f.is_nan() {
                    f64::NAN.to_bits()
                } else {
                    f.to_bits()
                };
                bits.hash(state)
            }
            Value::String(s) => s.hash(state),
            Value::DateTime(d) => d.hash(state),
            Value::Array(items) => items.hash(state),
            Value::Object(map) => {
                map.len().hash(state);
                for (k, v) in map {
                    k.hash(state);
                    v.hash(state);
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

/// Total order: Null first, then booleans, numbers, strings, datetimes,
/// arrays and objects. Int64 and Float64 interleave by numeric value, with
/// Int64 first when numerically equal.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => float_cmp(*a, *b),
            (Value::Int64(a), Value::Float64(b)) => {
                float_cmp(*a as f64, *b).then(Ordering::Less)
            }
            (Value::Float64(a), Value::Int64(b)) => {
                float_cmp(*a, *b as f64).then(Ordering::Greater)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Object(a), Value::Object(b)) => a.iter().cmp(b.iter()),
            _ => self.type_order().cmp(&other.type_order()),
        }
    }
}

/// JSON-like rendering, also used to build composite keys.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float64(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::DateTime(d) => write!(f, "@{}", d),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Object(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{:?}:{}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Object(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::vec;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Boolean(true).as_bool(), Some(true));
        assert_eq!(Value::Int64(100).as_i64(), Some(100));
        assert_eq!(Value::Float64(3.5).as_f64(), Some(3.5));
        assert_eq!(Value::String("hello".into()).as_str(), Some("hello"));
        assert_eq!(Value::DateTime(1234567890).as_datetime(), Some(1234567890));
        assert_eq!(Value::Int64(3).to_f64(), Some(3.0));
        assert!(Value::Null.is_null());
    }

    #[test]
    fn test_value_ordering() {
        assert!(Value::Int64(1) < Value::Int64(2));
        assert!(Value::String("a".into()) < Value::String("b".into()));
        assert!(Value::Null < Value::Int64(0));
        assert!(Value::Int64(2) < Value::Float64(2.5));
        assert!(Value::Float64(2.5) < Value::Int64(3));
        assert!(Value::Int64(2) < Value::Float64(2.0));
        assert!(Value::Int64(i64::MAX) < Value::String(String::new()));
    }

    #[test]
    fn test_equality_is_consistent_with_order() {
        let a = Value::Int64(1);
        let b = Value::Float64(1.0);
        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a.sql_cmp(&b), Some(Ordering::Equal));
        assert_eq!(a.sql_eq(&b), Some(true));
    }

    #[test]
    fn test_sql_cmp_null_and_mismatch() {
        assert_eq!(Value::Null.sql_cmp(&Value::Int64(1)), None);
        assert_eq!(Value::String("1".into()).sql_cmp(&Value::Int64(1)), None);
        assert_eq!(Value::Null.sql_eq(&Value::Null), None);
    }

    #[test]
    fn test_paths() {
        let mut row = Value::object([("id", Value::Int64(1))]);
        row.set_path(&["meta", "tags"], Value::Array(vec!["a".into(), "b".into()]));
        assert_eq!(row.get_path(&["meta", "tags", "1"]), Some(&Value::from("b")));
        assert_eq!(row.get_path(&["id"]), Some(&Value::Int64(1)));
        assert_eq!(row.get_path(&["missing", "x"]), None);

        row.set_path(&["id", "nested"], Value::Boolean(true));
        assert_eq!(row.get_path(&["id", "nested"]), Some(&Value::Boolean(true)));
    }

    #[test]
    fn test_display() {
        let v = Value::Array(vec![Value::Int64(1), Value::from("x"), Value::Null]);
        assert_eq!(format!("{}", v), "[1,\"x\",null]");
        let o = Value::object([("b", 2i64), ("a", 1i64)]);
        assert_eq!(format!("{}", o), "{\"a\":1,\"b\":2}");
    }

    #[test]
    fn test_value_from_impls() {
        let v: Value = 42i32.into();
        assert_eq!(v.as_i64(), Some(42));

        let v: Value = "hello".into();
        assert_eq!(v.as_str(), Some("hello"));

        let v: Value = Some(100i64).into();
        assert_eq!(v.as_i64(), Some(100));

        let v: Value = None::<i64>.into();
        assert!(v.is_null());
    }

    #[test]
    fn test_negative_zero_hash() {
        use core::hash::BuildHasher;
        let state = hashbrown::hash_map::DefaultHashBuilder::default();
        let a = state.hash_one(&Value::Float64(0.0));
        let b = state.hash_one(&Value::Float64(-0.0));
        assert_eq!(Value::Float64(0.0), Value::Float64(-0.0));
        assert_eq!(a, b);
    }
}
