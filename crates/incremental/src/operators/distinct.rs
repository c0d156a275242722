//! Incremental distinct operator.

use crate::delta::{Delta, KeyedRow};
use alloc::vec::Vec;
use hashbrown::HashMap;
use strand_core::{Key, Result, Value};
use strand_query::eval::Evaluator;

/// Emits one row per distinct projected value.
///
/// Each distinct value is keyed by its rendering. The row emitted for a
/// value is the first row that produced it; it is retracted once the
/// value's multiplicity drops to zero.
pub struct IncrementalDistinct {
    by: Evaluator,
    counts: HashMap<Key, (i64, Value)>,
}

impl IncrementalDistinct {
    pub fn new(by: Evaluator) -> Self {
        Self {
            by,
            counts: HashMap::new(),
        }
    }

    /// Number of distinct values currently present.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn process(&mut self, deltas: Vec<Delta<KeyedRow>>) -> Result<Vec<Delta<KeyedRow>>> {
        let mut output = Vec::new();
        for delta in deltas {
            if delta.is_noop() {
                continue;
            }
            let key = Key::of_value(&(self.by)(&delta.data.value)?);
            let (count, row) = self
                .counts
                .entry(key.clone())
                .or_insert_with(|| (0, delta.data.value.clone()));
            let before = *count;
            *count += delta.diff as i64;
            match (before > 0, *count > 0) {
                (false, true) => {
                    *row = delta.data.value;
                    output.push(Delta::insert(KeyedRow::new(key, row.clone())));
                }
                (true, false) => {
                    output.push(Delta::delete(KeyedRow::new(key.clone(), row.clone())));
                    self.counts.remove(&key);
                }
                (false, false) => {
                    self.counts.remove(&key);
                }
                (true, true) => {}
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use strand_query::ast::Expr;
    use strand_query::eval::compile;

    fn row(id: i64, color: &str) -> KeyedRow {
        KeyedRow::new(
            Key::Int(id),
            Value::object([("$selected", Value::object([("color", Value::from(color))]))]),
        )
    }

    #[test]
    fn test_distinct_counts_multiplicity() {
        let mut distinct = IncrementalDistinct::new(compile(&Expr::col("$selected")));
        let out = distinct
            .process(vec![Delta::insert(row(1, "red")), Delta::insert(row(2, "red"))])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_insert());
        assert_eq!(distinct.len(), 1);

        assert!(distinct.process(vec![Delta::delete(row(1, "red"))]).unwrap().is_empty());
        let out = distinct.process(vec![Delta::delete(row(2, "red"))]).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_delete());
        assert!(distinct.is_empty());
    }

    #[test]
    fn test_distinct_keys_by_value() {
        let mut distinct = IncrementalDistinct::new(compile(&Expr::col("$selected")));
        let out = distinct
            .process(vec![Delta::insert(row(1, "red")), Delta::insert(row(2, "blue"))])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_ne!(out[0].data.key, out[1].data.key);
    }
}
