//! Incremental filter operator.

use crate::delta::{Delta, KeyedRow};
use alloc::vec::Vec;
use strand_core::Result;
use strand_query::eval::Predicate;

/// Applies a fallible filter predicate to a batch of deltas.
///
/// Only deltas whose data satisfies the predicate are passed through.
/// The diff values are preserved. The first predicate error aborts the
/// batch.
///
/// # Example
///
/// ```
/// use strand_incremental::{filter_incremental, Delta};
///
/// let deltas = vec![Delta::insert(10), Delta::insert(5), Delta::delete(20)];
/// let filtered = filter_incremental(deltas, |&x| Ok(x > 8)).unwrap();
/// assert_eq!(filtered, vec![Delta::insert(10), Delta::delete(20)]);
/// ```
pub fn filter_incremental<T, F>(input: Vec<Delta<T>>, predicate: F) -> Result<Vec<Delta<T>>>
where
    F: Fn(&T) -> Result<bool>,
{
    let mut output = Vec::with_capacity(input.len());
    for delta in input {
        if predicate(&delta.data)? {
            output.push(delta);
        }
    }
    Ok(output)
}

/// Filters row deltas by evaluating `predicate` against each row value.
pub fn filter_rows(input: Vec<Delta<KeyedRow>>, predicate: &Predicate) -> Result<Vec<Delta<KeyedRow>>> {
    filter_incremental(input, |row| predicate(&row.value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use strand_core::{Error, Key, Value};
    use strand_query::ast::Expr;
    use strand_query::eval::compile_predicate;

    #[test]
    fn test_filter_incremental_preserves_diff() {
        let deltas = vec![Delta::insert(10), Delta::delete(20), Delta::insert(3)];
        let filtered = filter_incremental(deltas, |&x| Ok(x > 5)).unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered[0].is_insert());
        assert!(filtered[1].is_delete());
    }

    #[test]
    fn test_filter_incremental_error_aborts() {
        let deltas = vec![Delta::insert(1), Delta::insert(2)];
        let result = filter_incremental(deltas, |&x| {
            if x == 2 {
                Err(Error::expression("boom"))
            } else {
                Ok(true)
            }
        });
        assert_eq!(result, Err(Error::expression("boom")));
    }

    #[test]
    fn test_filter_rows_three_valued() {
        let row = |id: i64, done: Value| {
            KeyedRow::new(
                Key::Int(id),
                Value::object([("todo", Value::object([("done", done)]))]),
            )
        };
        let predicate = compile_predicate(&Expr::eq(Expr::col("todo.done"), Expr::val(false)));
        let deltas = vec![
            Delta::insert(row(1, Value::Boolean(false))),
            Delta::insert(row(2, Value::Boolean(true))),
            Delta::insert(row(3, Value::Null)),
        ];
        let filtered = filter_rows(deltas, &predicate).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].data.key, Key::Int(1));
    }
}
