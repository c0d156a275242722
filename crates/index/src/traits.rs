//! Index trait definitions for strand.
//!
//! This module defines the `Index` trait every secondary index satisfies,
//! the operations an index can answer and the value ranges used by range
//! scans.

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;
use strand_core::{CompareOptions, Key, Result, Value};
use strand_query::ast::{Expr, Func};

/// Operations answerable by `Index::lookup`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexOperation {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Like,
    Ilike,
}

impl IndexOperation {
    /// Maps an expression operator to an index operation.
    pub fn from_func(func: Func) -> Option<Self> {
        Some(match func {
            Func::Eq => IndexOperation::Eq,
            Func::Gt => IndexOperation::Gt,
            Func::Gte => IndexOperation::Gte,
            Func::Lt => IndexOperation::Lt,
            Func::Lte => IndexOperation::Lte,
            Func::In => IndexOperation::In,
            Func::Like => IndexOperation::Like,
            Func::Ilike => IndexOperation::Ilike,
            _ => return None,
        })
    }
}

/// A range of values for index scans.
///
/// Bounds compare with SQL semantics: Null and values of another type
/// family never fall inside a range.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueRange {
    /// All non-null values
    All,
    /// A single value (equality)
    Only(Value),
    /// Values >= lower bound
    LowerBound { value: Value, exclusive: bool },
    /// Values <= upper bound
    UpperBound { value: Value, exclusive: bool },
    /// Values between lower and upper bounds
    Bound {
        lower: Value,
        upper: Value,
        lower_exclusive: bool,
        upper_exclusive: bool,
    },
}

impl ValueRange {
    pub fn all() -> Self {
        ValueRange::All
    }

    pub fn only(value: Value) -> Self {
        ValueRange::Only(value)
    }

    pub fn lower_bound(value: Value, exclusive: bool) -> Self {
        ValueRange::LowerBound { value, exclusive }
    }

    pub fn upper_bound(value: Value, exclusive: bool) -> Self {
        ValueRange::UpperBound { value, exclusive }
    }

    pub fn bound(lower: Value, upper: Value, lower_exclusive: bool, upper_exclusive: bool) -> Self {
        ValueRange::Bound {
            lower,
            upper,
            lower_exclusive,
            upper_exclusive,
        }
    }

    /// The range matching `field <op> value`, for comparison operations.
    pub fn for_operation(op: IndexOperation, value: &Value) -> Option<Self> {
        let value = value.clone();
        Some(match op {
            IndexOperation::Eq => ValueRange::Only(value),
            IndexOperation::Gt => ValueRange::lower_bound(value, true),
            IndexOperation::Gte => ValueRange::lower_bound(value, false),
            IndexOperation::Lt => ValueRange::upper_bound(value, true),
            IndexOperation::Lte => ValueRange::upper_bound(value, false),
            _ => return None,
        })
    }

    /// The lower bound, if any.
    pub fn lower(&self) -> Option<&Value> {
        match self {
            ValueRange::Only(v) | ValueRange::LowerBound { value: v, .. } => Some(v),
            ValueRange::Bound { lower, .. } => Some(lower),
            _ => None,
        }
    }

    /// True when `value` lies past the upper bound of this range.
    pub fn is_past_upper(&self, value: &Value) -> bool {
        let (upper, exclusive) = match self {
            ValueRange::Only(v) => (v, false),
            ValueRange::UpperBound { value: v, exclusive } => (v, *exclusive),
            ValueRange::Bound {
                upper,
                upper_exclusive,
                ..
            } => (upper, *upper_exclusive),
            _ => return false,
        };
        match value.sql_cmp(upper) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => exclusive,
            // Another type family sorts after the whole numeric block
            Some(Ordering::Less) => false,
            None => true,
        }
    }

    /// Checks if a value is within this range.
    pub fn contains(&self, value: &Value) -> bool {
        let above = |bound: &Value, exclusive: bool| match value.sql_cmp(bound) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => !exclusive,
            _ => false,
        };
        let below = |bound: &Value, exclusive: bool| match value.sql_cmp(bound) {
            Some(Ordering::Less) => true,
            Some(Ordering::Equal) => !exclusive,
            _ => false,
        };
        match self {
            ValueRange::All => !value.is_null(),
            ValueRange::Only(v) => value.sql_eq(v) == Some(true),
            ValueRange::LowerBound { value: v, exclusive } => above(v, *exclusive),
            ValueRange::UpperBound { value: v, exclusive } => below(v, *exclusive),
            ValueRange::Bound {
                lower,
                upper,
                lower_exclusive,
                upper_exclusive,
            } => above(lower, *lower_exclusive) && below(upper, *upper_exclusive),
        }
    }
}

/// Static description of an index.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexMeta {
    pub id: u64,
    pub name: String,
    /// Expression over a single row producing the indexed value.
    pub expression: Expr,
    /// Sort order of the index.
    pub options: CompareOptions,
}

impl IndexMeta {
    pub fn new(id: u64, name: impl Into<String>, expression: Expr) -> Self {
        Self {
            id,
            name: name.into(),
            expression,
            options: CompareOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompareOptions) -> Self {
        self.options = options;
        self
    }

    /// True when the index expression is a plain reference to `path`.
    pub fn matches_field(&self, path: &[String]) -> bool {
        matches!(&self.expression, Expr::Ref(r) if r.path == path)
    }
}

/// Core trait for all secondary indexes.
///
/// An index owns the mapping from extracted value to the set of row keys
/// holding it. Rows are handed in whole; the index evaluates its own
/// expression.
pub trait Index {
    /// Static description of this index.
    fn meta(&self) -> &IndexMeta;

    /// Indexes `item` under `key`.
    fn add(&mut self, key: &Key, item: &Value) -> Result<()>;

    /// Removes `key` from the bucket of `item`'s indexed value.
    fn remove(&mut self, key: &Key, item: &Value) -> Result<()>;

    /// Moves `key` from the bucket of `old` to the bucket of `new`.
    fn update(&mut self, key: &Key, old: &Value, new: &Value) -> Result<()> {
        self.remove(key, old)?;
        self.add(key, new)
    }

    /// Replaces the contents with `entries`.
    fn build(&mut self, entries: &mut dyn Iterator<Item = (&Key, &Value)>) -> Result<()> {
        self.clear();
        for (key, item) in entries {
            self.add(key, item)?;
        }
        Ok(())
    }

    /// Removes every entry.
    fn clear(&mut self);

    /// Keys whose indexed value satisfies `op` against `value`.
    fn lookup(&self, op: IndexOperation, value: &Value) -> BTreeSet<Key>;

    /// Whether `lookup` answers `op`.
    fn supports(&self, op: IndexOperation) -> bool;

    fn matches_field(&self, path: &[String]) -> bool {
        self.meta().matches_field(path)
    }

    /// Number of indexed keys.
    fn key_count(&self) -> usize;

    /// The distinct indexed values in index order.
    fn distinct_values(&self) -> Vec<Value>;

    /// Keys whose value is in `range`, in ascending value order.
    fn range_query(&self, range: &ValueRange) -> Vec<Key>;

    /// Keys whose value is in `range`, in descending value order.
    fn range_query_reversed(&self, range: &ValueRange) -> Vec<Key> {
        let mut keys = self.range_query(range);
        keys.reverse();
        keys
    }

    /// Up to `n` keys whose value sorts strictly after `from` in index order.
    ///
    /// `None` starts from the beginning. Keys rejected by `filter` are
    /// skipped and do not count towards `n`.
    fn take(&self, n: usize, from: Option<&Value>, filter: &dyn Fn(&Key) -> bool) -> Vec<Key>;

    /// Like `take`, walking backwards from `from`.
    fn take_reversed(
        &self,
        n: usize,
        from: Option<&Value>,
        filter: &dyn Fn(&Key) -> bool,
    ) -> Vec<Key>;
}
