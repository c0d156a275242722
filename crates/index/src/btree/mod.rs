//! Ordered index implementation for strand.
//!
//! `BTreeIndex` keeps one bucket of row keys per distinct indexed value in a
//! `BTreeMap`, plus a separate bucket for Null. Iteration order follows the
//! index's `CompareOptions`: direction flips the walk over the map, null
//! placement decides whether the null bucket comes first or last.

use crate::traits::{Index, IndexMeta, IndexOperation, ValueRange};
use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::ops::Bound;
use strand_core::{pattern_match, Direction, Key, Nulls, Result, Value};
use strand_query::eval::evaluate;

/// Ordered secondary index.
#[derive(Debug)]
pub struct BTreeIndex {
    meta: IndexMeta,
    buckets: BTreeMap<Value, BTreeSet<Key>>,
    nulls: BTreeSet<Key>,
    len: usize,
}

impl BTreeIndex {
    pub fn new(meta: IndexMeta) -> Self {
        Self {
            meta,
            buckets: BTreeMap::new(),
            nulls: BTreeSet::new(),
            len: 0,
        }
    }

    fn extract(&self, item: &Value) -> Result<Value> {
        evaluate(&self.meta.expression, item)
    }

    fn insert_value(&mut self, key: &Key, value: Value) {
        let bucket = if value.is_null() {
            &mut self.nulls
        } else {
            self.buckets.entry(value).or_default()
        };
        if bucket.insert(key.clone()) {
            self.len += 1;
        }
    }

    fn remove_value(&mut self, key: &Key, value: &Value) {
        if value.is_null() {
            if self.nulls.remove(key) {
                self.len -= 1;
            }
            return;
        }
        if let Some(bucket) = self.buckets.get_mut(value) {
            if bucket.remove(key) {
                self.len -= 1;
            }
            if bucket.is_empty() {
                self.buckets.remove(value);
            }
        }
    }

    /// Keys stored under `value`.
    pub fn get(&self, value: &Value) -> Option<&BTreeSet<Key>> {
        if value.is_null() {
            Some(&self.nulls).filter(|b| !b.is_empty())
        } else {
            self.buckets.get(value)
        }
    }

    /// Buckets whose value lies in `range`, in ascending value order.
    fn range_buckets<'a>(
        &'a self,
        range: &'a ValueRange,
    ) -> impl Iterator<Item = (&'a Value, &'a BTreeSet<Key>)> + 'a {
        // Int and Float values interleave numerically in the map, with the
        // Int variant first on ties; start from the smaller variant.
        let start = match range.lower() {
            Some(Value::Float64(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Bound::Included(Value::Int64(*f as i64))
            }
            Some(v) => Bound::Included(v.clone()),
            None => Bound::Unbounded,
        };
        let anchor = range.lower().cloned().or_else(|| match range {
            ValueRange::UpperBound { value, .. } => Some(value.clone()),
            _ => None,
        });
        let family = move |v: &Value| anchor.as_ref().map_or(true, |a| v.sql_cmp(a).is_some());

        self.buckets
            .range((start, Bound::Unbounded))
            .skip_while({
                let family = family.clone();
                move |(v, _)| !family(*v)
            })
            .take_while(move |(v, _)| family(*v) && !range.is_past_upper(v))
            .filter(move |(v, _)| range.contains(v))
    }

    /// Non-null buckets in index order.
    fn ordered_buckets(&self) -> Box<dyn Iterator<Item = (&Value, &BTreeSet<Key>)> + '_> {
        match self.meta.options.direction {
            Direction::Asc => Box::new(self.buckets.iter()),
            Direction::Desc => Box::new(self.buckets.iter().rev()),
        }
    }

    /// Buckets strictly after `from` in index order, nulls included where
    /// the options place them.
    fn buckets_after<'a>(&'a self, from: Option<&Value>) -> Vec<&'a BTreeSet<Key>> {
        let nulls_first = self.meta.options.nulls == Nulls::First;
        let mut out = Vec::new();
        match from {
            None => {
                if nulls_first {
                    out.push(&self.nulls);
                }
                out.extend(self.ordered_buckets().map(|(_, b)| b));
                if !nulls_first {
                    out.push(&self.nulls);
                }
            }
            Some(Value::Null) => {
                if nulls_first {
                    out.extend(self.ordered_buckets().map(|(_, b)| b));
                }
            }
            Some(from) => {
                let excluded = (Bound::Excluded(from), Bound::Unbounded);
                let upto = (Bound::Unbounded, Bound::Excluded(from));
                match self.meta.options.direction {
                    Direction::Asc => out.extend(self.buckets.range::<Value, _>(excluded).map(|(_, b)| b)),
                    Direction::Desc => out.extend(self.buckets.range::<Value, _>(upto).rev().map(|(_, b)| b)),
                }
                if !nulls_first {
                    out.push(&self.nulls);
                }
            }
        }
        out
    }

    /// Buckets strictly before `from` in index order, walking backwards.
    fn buckets_before<'a>(&'a self, from: Option<&Value>) -> Vec<&'a BTreeSet<Key>> {
        let nulls_first = self.meta.options.nulls == Nulls::First;
        let mut out = Vec::new();
        let backward = |out: &mut Vec<&'a BTreeSet<Key>>| {
            let all: Vec<_> = self.ordered_buckets().map(|(_, b)| b).collect();
            out.extend(all.into_iter().rev());
        };
        match from {
            None => {
                if !nulls_first {
                    out.push(&self.nulls);
                }
                backward(&mut out);
                if nulls_first {
                    out.push(&self.nulls);
                }
            }
            Some(Value::Null) => {
                if !nulls_first {
                    backward(&mut out);
                }
            }
            Some(from) => {
                let excluded = (Bound::Excluded(from), Bound::Unbounded);
                let upto = (Bound::Unbounded, Bound::Excluded(from));
                match self.meta.options.direction {
                    Direction::Asc => out.extend(self.buckets.range::<Value, _>(upto).rev().map(|(_, b)| b)),
                    Direction::Desc => out.extend(self.buckets.range::<Value, _>(excluded).map(|(_, b)| b)),
                }
                if nulls_first {
                    out.push(&self.nulls);
                }
            }
        }
        out
    }

    fn collect_keys<'a>(
        buckets: impl IntoIterator<Item = &'a BTreeSet<Key>>,
        n: usize,
        reversed: bool,
        filter: &dyn Fn(&Key) -> bool,
    ) -> Vec<Key> {
        let mut out = Vec::new();
        for bucket in buckets {
            let keys: Box<dyn Iterator<Item = &'a Key> + 'a> = if reversed {
                Box::new(bucket.iter().rev())
            } else {
                Box::new(bucket.iter())
            };
            for key in keys {
                if out.len() >= n {
                    return out;
                }
                if filter(key) {
                    out.push(key.clone());
                }
            }
        }
        out
    }
}

impl Index for BTreeIndex {
    fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    fn add(&mut self, key: &Key, item: &Value) -> Result<()> {
        let value = self.extract(item)?;
        self.insert_value(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &Key, item: &Value) -> Result<()> {
        let value = self.extract(item)?;
        self.remove_value(key, &value);
        Ok(())
    }

    fn update(&mut self, key: &Key, old: &Value, new: &Value) -> Result<()> {
        let old_value = self.extract(old)?;
        let new_value = self.extract(new)?;
        if old_value != new_value {
            self.remove_value(key, &old_value);
            self.insert_value(key, new_value);
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.nulls.clear();
        self.len = 0;
    }

    fn lookup(&self, op: IndexOperation, value: &Value) -> BTreeSet<Key> {
        let mut out = BTreeSet::new();
        match op {
            IndexOperation::In => {
                for v in value.as_array().unwrap_or(&[]) {
                    out.extend(self.lookup(IndexOperation::Eq, v));
                }
            }
            IndexOperation::Like | IndexOperation::Ilike => {
                let Some(pattern) = value.as_str() else {
                    return out;
                };
                let matcher = if op == IndexOperation::Like {
                    pattern_match::like
                } else {
                    pattern_match::ilike
                };
                for (v, keys) in &self.buckets {
                    if let Some(s) = v.as_str() {
                        if matcher(s, pattern) {
                            out.extend(keys.iter().cloned());
                        }
                    }
                }
            }
            _ => {
                if let Some(range) = ValueRange::for_operation(op, value) {
                    for (_, keys) in self.range_buckets(&range) {
                        out.extend(keys.iter().cloned());
                    }
                }
            }
        }
        out
    }

    fn supports(&self, _op: IndexOperation) -> bool {
        true
    }

    fn key_count(&self) -> usize {
        self.len
    }

    fn distinct_values(&self) -> Vec<Value> {
        let nulls_first = self.meta.options.nulls == Nulls::First;
        let null = (!self.nulls.is_empty()).then_some(Value::Null);
        let mut out: Vec<Value> = Vec::with_capacity(self.buckets.len() + 1);
        if nulls_first {
            out.extend(null.clone());
        }
        out.extend(self.ordered_buckets().map(|(v, _)| v.clone()));
        if !nulls_first {
            out.extend(null);
        }
        out
    }

    fn range_query(&self, range: &ValueRange) -> Vec<Key> {
        self.range_buckets(range)
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    fn take(&self, n: usize, from: Option<&Value>, filter: &dyn Fn(&Key) -> bool) -> Vec<Key> {
        Self::collect_keys(self.buckets_after(from), n, false, filter)
    }

    fn take_reversed(
        &self,
        n: usize,
        from: Option<&Value>,
        filter: &dyn Fn(&Key) -> bool,
    ) -> Vec<Key> {
        Self::collect_keys(self.buckets_before(from), n, true, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use strand_core::CompareOptions;
    use strand_query::ast::Expr;

    fn row(id: i64, score: Option<i64>) -> Value {
        Value::object([("id", Value::Int64(id)), ("score", Value::from(score))])
    }

    fn index_with(options: CompareOptions, rows: &[(i64, Option<i64>)]) -> BTreeIndex {
        let meta = IndexMeta::new(1, "by_score", Expr::col("score")).with_options(options);
        let mut index = BTreeIndex::new(meta);
        for &(id, score) in rows {
            index.add(&Key::Int(id), &row(id, score)).unwrap();
        }
        index
    }

    fn keys(ids: &[i64]) -> Vec<Key> {
        ids.iter().map(|&i| Key::Int(i)).collect()
    }

    fn sample() -> Vec<(i64, Option<i64>)> {
        vec![(1, Some(10)), (2, Some(20)), (3, None), (4, Some(20)), (5, Some(5))]
    }

    #[test]
    fn test_add_and_lookup() {
        let index = index_with(CompareOptions::asc(), &sample());
        assert_eq!(index.key_count(), 5);
        let eq: Vec<_> = index.lookup(IndexOperation::Eq, &Value::Int64(20)).into_iter().collect();
        assert_eq!(eq, keys(&[2, 4]));
        // Null never equals anything
        assert!(index.lookup(IndexOperation::Eq, &Value::Null).is_empty());
        // Float literal matches integer values
        assert_eq!(index.lookup(IndexOperation::Eq, &Value::Float64(10.0)).len(), 1);
    }

    #[test]
    fn test_range_lookups() {
        let index = index_with(CompareOptions::asc(), &sample());
        let gt: Vec<_> = index.lookup(IndexOperation::Gt, &Value::Int64(10)).into_iter().collect();
        assert_eq!(gt, keys(&[2, 4]));
        let lte: Vec<_> = index.lookup(IndexOperation::Lte, &Value::Int64(10)).into_iter().collect();
        assert_eq!(lte, keys(&[1, 5]));
        let gte = index.lookup(IndexOperation::Gte, &Value::Float64(10.0));
        assert_eq!(gte.len(), 3);
    }

    #[test]
    fn test_in_and_like() {
        let index = index_with(CompareOptions::asc(), &sample());
        let list = Value::Array(vec![Value::Int64(5), Value::Int64(10), Value::Int64(99)]);
        assert_eq!(index.lookup(IndexOperation::In, &list).len(), 2);

        let meta = IndexMeta::new(2, "by_title", Expr::col("title"));
        let mut titles = BTreeIndex::new(meta);
        for (id, title) in [(1, "Write docs"), (2, "write tests"), (3, "ship")] {
            let item = Value::object([("title", Value::from(title))]);
            titles.add(&Key::Int(id), &item).unwrap();
        }
        assert_eq!(titles.lookup(IndexOperation::Like, &Value::from("write%")).len(), 1);
        assert_eq!(titles.lookup(IndexOperation::Ilike, &Value::from("write%")).len(), 2);
    }

    #[test]
    fn test_update_and_remove() {
        let mut index = index_with(CompareOptions::asc(), &sample());
        index
            .update(&Key::Int(1), &row(1, Some(10)), &row(1, Some(30)))
            .unwrap();
        assert!(index.get(&Value::Int64(10)).is_none());
        assert!(index.get(&Value::Int64(30)).unwrap().contains(&Key::Int(1)));

        index.remove(&Key::Int(3), &row(3, None)).unwrap();
        assert!(index.get(&Value::Null).is_none());
        assert_eq!(index.key_count(), 4);
    }

    #[test]
    fn test_range_query_order() {
        let index = index_with(CompareOptions::asc(), &sample());
        assert_eq!(index.range_query(&ValueRange::all()), keys(&[5, 1, 2, 4]));
        assert_eq!(
            index.range_query_reversed(&ValueRange::bound(Value::Int64(5), Value::Int64(20), true, false)),
            keys(&[4, 2, 1])
        );
    }

    #[test]
    fn test_take_ascending_nulls_first() {
        let index = index_with(CompareOptions::asc(), &sample());
        let all = |_: &Key| true;
        assert_eq!(index.take(10, None, &all), keys(&[3, 5, 1, 2, 4]));
        assert_eq!(index.take(2, Some(&Value::Int64(5)), &all), keys(&[1, 2]));
        assert_eq!(index.take(10, Some(&Value::Null), &all), keys(&[5, 1, 2, 4]));
        let odd = |k: &Key| matches!(k, Key::Int(i) if i % 2 == 1);
        assert_eq!(index.take(10, None, &odd), keys(&[3, 5, 1]));
    }

    #[test]
    fn test_take_descending_nulls_last() {
        let options = CompareOptions::desc().with_nulls(Nulls::Last);
        let index = index_with(options, &sample());
        let all = |_: &Key| true;
        assert_eq!(index.take(10, None, &all), keys(&[2, 4, 1, 5, 3]));
        assert_eq!(index.take(10, Some(&Value::Int64(20)), &all), keys(&[1, 5, 3]));
        assert_eq!(index.take_reversed(10, Some(&Value::Int64(5)), &all), keys(&[1, 4, 2]));
        assert_eq!(index.take_reversed(2, None, &all), keys(&[3, 5]));
        assert_eq!(
            index.distinct_values(),
            vec![Value::Int64(20), Value::Int64(10), Value::Int64(5), Value::Null]
        );
    }

    #[test]
    fn test_build_replaces_contents() {
        let mut index = index_with(CompareOptions::asc(), &sample());
        let rows = vec![(Key::Int(9), row(9, Some(1)))];
        index.build(&mut rows.iter().map(|(k, v)| (k, v))).unwrap();
        assert_eq!(index.key_count(), 1);
        assert_eq!(index.distinct_values(), vec![Value::Int64(1)]);
    }
}
