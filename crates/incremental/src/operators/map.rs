//! Incremental map operator.

use crate::delta::{Delta, KeyedRow};
use alloc::vec::Vec;
use strand_core::Result;
use strand_query::eval::Evaluator;

/// Applies a fallible mapper function to a batch of deltas.
///
/// Each delta's data is transformed using the mapper function.
/// The diff values are preserved.
pub fn map_incremental<T, U, F>(input: Vec<Delta<T>>, mapper: F) -> Result<Vec<Delta<U>>>
where
    F: Fn(T) -> Result<U>,
{
    input
        .into_iter()
        .map(|d| Ok(Delta::new(mapper(d.data)?, d.diff)))
        .collect()
}

/// Replaces each row value with `mapper(value)`, keeping key and index.
pub fn map_rows(input: Vec<Delta<KeyedRow>>, mapper: &Evaluator) -> Result<Vec<Delta<KeyedRow>>> {
    map_incremental(input, |row| {
        Ok(KeyedRow {
            value: mapper(&row.value)?,
            ..row
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::string::{String, ToString};
    use alloc::vec;
    use strand_core::{Key, Value};

    #[test]
    fn test_map_incremental_preserves_diff() {
        let deltas = vec![Delta::insert(1i32), Delta::delete(2i32)];
        let mapped: Vec<Delta<String>> = map_incremental(deltas, |x| Ok(x.to_string())).unwrap();
        assert_eq!(mapped, vec![Delta::insert("1".to_string()), Delta::delete("2".to_string())]);
    }

    #[test]
    fn test_map_rows_keeps_key_and_index() {
        let mapper: Evaluator = Rc::new(|v: &Value| -> Result<Value> { Ok(Value::object([("wrapped", v.clone())])) });
        let row = KeyedRow::new(Key::Int(4), Value::Int64(9)).with_index("V".to_string());
        let mapped = map_rows(vec![Delta::delete(row)], &mapper).unwrap();
        assert_eq!(mapped[0].diff, -1);
        assert_eq!(mapped[0].data.key, Key::Int(4));
        assert_eq!(mapped[0].data.index.as_deref(), Some("V"));
        assert_eq!(mapped[0].data.value.get("wrapped"), Some(&Value::Int64(9)));
    }
}
