//! Ordering options shared by `orderBy` clauses and ordered indexes.

use crate::value::Value;
use core::cmp::Ordering;

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Where Null values go, independent of direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Nulls {
    #[default]
    First,
    Last,
}

/// How strings compare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum StringSort {
    /// Byte-wise comparison.
    #[default]
    Lexical,
    /// Compare lower-cased strings, falling back to byte order on ties.
    CaseInsensitive,
}

/// Comparator configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct CompareOptions {
    pub direction: Direction,
    pub nulls: Nulls,
    pub string_sort: StringSort,
}

impl CompareOptions {
    /// Ascending, nulls first.
    pub fn asc() -> Self {
        Self::default()
    }

    /// Descending, nulls first.
    pub fn desc() -> Self {
        Self {
            direction: Direction::Desc,
            ..Self::default()
        }
    }

    pub fn with_nulls(mut self, nulls: Nulls) -> Self {
        self.nulls = nulls;
        self
    }

    pub fn with_string_sort(mut self, string_sort: StringSort) -> Self {
        self.string_sort = string_sort;
        self
    }

    /// Compares two values under these options.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => {
                return match self.nulls {
                    Nulls::First => Ordering::Less,
                    Nulls::Last => Ordering::Greater,
                }
            }
            (false, true) => {
                return match self.nulls {
                    Nulls::First => Ordering::Greater,
                    Nulls::Last => Ordering::Less,
                }
            }
            (false, false) => {}
        }

        let ord = match (self.string_sort, a, b) {
            (StringSort::CaseInsensitive, Value::String(x), Value::String(y)) => x
                .chars()
                .flat_map(char::to_lowercase)
                .cmp(y.chars().flat_map(char::to_lowercase))
                .then_with(|| x.cmp(y)),
            _ => a.cmp(b),
        };

        match self.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    }
}

/// Lexicographic comparison of two sort tuples, one option set per column.
pub fn compare_tuples(options: &[CompareOptions], a: &[Value], b: &[Value]) -> Ordering {
    for (i, opts) in options.iter().enumerate() {
        let ord = match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => opts.compare(x, y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
