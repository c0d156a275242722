//! Property-based tests for strand-index using proptest.

use proptest::prelude::*;
use std::collections::BTreeMap;
use strand_core::{CompareOptions, Key, Nulls, Value};
use strand_index::{BTreeIndex, Index, IndexMeta, IndexOperation, ValueRange};
use strand_query::ast::Expr;

#[derive(Clone, Debug)]
enum Op {
    Add(i64, Option<i64>),
    Remove(i64),
    Update(i64, Option<i64>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let score = prop::option::weighted(0.9, -50i64..50);
    prop_oneof![
        (0i64..40, score.clone()).prop_map(|(k, s)| Op::Add(k, s)),
        (0i64..40).prop_map(Op::Remove),
        (0i64..40, score).prop_map(|(k, s)| Op::Update(k, s)),
    ]
}

fn row(score: Option<i64>) -> Value {
    Value::object([("score", Value::from(score))])
}

fn new_index(options: CompareOptions) -> BTreeIndex {
    BTreeIndex::new(IndexMeta::new(1, "by_score", Expr::col("score")).with_options(options))
}

/// Applies `ops` to both the index and a plain map of key -> score.
fn apply(index: &mut BTreeIndex, ops: &[Op]) -> BTreeMap<i64, Option<i64>> {
    let mut model: BTreeMap<i64, Option<i64>> = BTreeMap::new();
    for op in ops {
        match *op {
            Op::Add(k, s) => {
                if !model.contains_key(&k) {
                    index.add(&Key::Int(k), &row(s)).unwrap();
                    model.insert(k, s);
                }
            }
            Op::Remove(k) => {
                if let Some(s) = model.remove(&k) {
                    index.remove(&Key::Int(k), &row(s)).unwrap();
                }
            }
            Op::Update(k, s) => {
                if let Some(old) = model.insert(k, s) {
                    index.update(&Key::Int(k), &row(old), &row(s)).unwrap();
                } else {
                    model.remove(&k);
                }
            }
        }
    }
    model
}

proptest! {
    /// Property: every row sits in exactly the bucket of its current value.
    #[test]
    fn buckets_consistent_after_interleaved_ops(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mut index = new_index(CompareOptions::asc());
        let model = apply(&mut index, &ops);
        prop_assert_eq!(index.key_count(), model.len());
        for (&k, &s) in &model {
            let bucket = index.get(&Value::from(s)).cloned().unwrap_or_default();
            prop_assert!(bucket.contains(&Key::Int(k)), "key {} missing from bucket {:?}", k, s);
        }
        let distinct: std::collections::BTreeSet<Option<i64>> = model.values().cloned().collect();
        prop_assert_eq!(index.distinct_values().len(), distinct.len());
    }

    /// Property: range queries equal a linear scan with the same bounds.
    #[test]
    fn range_query_equals_linear_scan(
        ops in prop::collection::vec(op_strategy(), 1..200),
        lo in -60i64..60,
        width in 0i64..60,
        lower_exclusive in any::<bool>(),
        upper_exclusive in any::<bool>(),
    ) {
        let mut index = new_index(CompareOptions::asc());
        let model = apply(&mut index, &ops);
        let range = ValueRange::bound(Value::Int64(lo), Value::Int64(lo + width), lower_exclusive, upper_exclusive);

        let mut expected: Vec<(i64, i64)> = model
            .iter()
            .filter_map(|(&k, &s)| s.map(|s| (s, k)))
            .filter(|&(s, _)| range.contains(&Value::Int64(s)))
            .collect();
        expected.sort();
        let expected: Vec<Key> = expected.into_iter().map(|(_, k)| Key::Int(k)).collect();
        prop_assert_eq!(index.range_query(&range), expected);
    }

    /// Property: lookups agree with evaluating the comparison per row.
    #[test]
    fn lookup_matches_scan(ops in prop::collection::vec(op_strategy(), 1..100), v in -60i64..60) {
        let mut index = new_index(CompareOptions::asc());
        let model = apply(&mut index, &ops);
        for op in [
            IndexOperation::Gt,
            IndexOperation::Gte,
            IndexOperation::Lt,
            IndexOperation::Lte,
            IndexOperation::Eq,
        ] {
            let keep = |s: i64| match op {
                IndexOperation::Gt => s > v,
                IndexOperation::Gte => s >= v,
                IndexOperation::Lt => s < v,
                IndexOperation::Lte => s <= v,
                _ => s == v,
            };
            let expected: std::collections::BTreeSet<Key> = model
                .iter()
                .filter(|(_, s)| s.map_or(false, keep))
                .map(|(&k, _)| Key::Int(k))
                .collect();
            prop_assert_eq!(index.lookup(op, &Value::Int64(v)), expected);
        }
    }

    /// Property: paging with take() from the last seen value walks the whole
    /// index in comparator order without gaps or repeats across buckets.
    #[test]
    fn take_pages_follow_comparator(
        ops in prop::collection::vec(op_strategy(), 1..150),
        desc in any::<bool>(),
        nulls_last in any::<bool>(),
    ) {
        let mut options = if desc { CompareOptions::desc() } else { CompareOptions::asc() };
        if nulls_last {
            options = options.with_nulls(Nulls::Last);
        }
        let mut index = new_index(options);
        let model = apply(&mut index, &ops);

        let all = |_: &Key| true;
        let walked = index.take(usize::MAX, None, &all);
        prop_assert_eq!(walked.len(), model.len());

        let score_of = |k: &Key| match k {
            Key::Int(i) => Value::from(model[i]),
            Key::Str(_) => Value::Null,
        };
        for pair in walked.windows(2) {
            let ord = options.compare(&score_of(&pair[0]), &score_of(&pair[1]));
            prop_assert!(ord.is_le(), "{:?} before {:?}", pair[0], pair[1]);
        }

        // Everything after a value is exactly the suffix past that value's bucket
        if let Some(first) = walked.first() {
            let cursor = score_of(first);
            let rest = index.take(usize::MAX, Some(&cursor), &all);
            let expected: Vec<Key> = walked
                .iter()
                .filter(|k| options.compare(&score_of(*k), &cursor).is_gt())
                .cloned()
                .collect();
            prop_assert_eq!(rest, expected);
        }
    }
}
