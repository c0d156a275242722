//! Property-based tests for incremental group-by aggregation.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::rc::Rc;
use strand_core::{Key, Result, Value};
use strand_incremental::{Aggregate, Delta, GroupAggregateState, KeyedRow};
use strand_query::ast::{AggregateFunc, Expr};
use strand_query::eval::{compile, Evaluator};

#[derive(Clone, Debug)]
enum Op {
    Insert(i64, i64, Option<i64>),
    Delete(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i64..25, 0i64..4, prop::option::weighted(0.8, -100i64..100))
            .prop_map(|(k, g, a)| Op::Insert(k, g, a)),
        2 => (0i64..25).prop_map(Op::Delete),
    ]
}

fn order(id: i64, group: i64, amount: Option<i64>) -> KeyedRow {
    KeyedRow::new(
        Key::Int(id),
        Value::object([(
            "o",
            Value::object([("group", Value::Int64(group)), ("amount", Value::from(amount))]),
        )]),
    )
}

fn group_state() -> GroupAggregateState {
    let key_fn: Evaluator = Rc::new(|row: &Value| -> Result<Value> {
        let group = row.get_path(&["o", "group"]).cloned().unwrap_or_default();
        Ok(Value::object([("group", group)]))
    });
    let amount = || compile(&Expr::col("o.amount"));
    GroupAggregateState::new(
        key_fn,
        vec![
            ("count".to_string(), Aggregate::builtin(AggregateFunc::Count, amount())),
            ("sum".to_string(), Aggregate::builtin(AggregateFunc::Sum, amount())),
            ("avg".to_string(), Aggregate::builtin(AggregateFunc::Avg, amount())),
            ("max".to_string(), Aggregate::builtin(AggregateFunc::Max, amount())),
        ],
    )
}

/// Recomputes every group's output row from the current rows.
fn recompute(rows: &BTreeMap<i64, (i64, Option<i64>)>) -> BTreeMap<i64, (i64, i64, Value, Value)> {
    let mut groups: BTreeMap<i64, Vec<Option<i64>>> = BTreeMap::new();
    for (group, amount) in rows.values() {
        groups.entry(*group).or_default().push(*amount);
    }
    groups
        .into_iter()
        .map(|(group, amounts)| {
            let present: Vec<i64> = amounts.iter().flatten().copied().collect();
            let count = present.len() as i64;
            let sum: i64 = present.iter().sum();
            let avg = if count == 0 {
                Value::Null
            } else {
                Value::Float64(sum as f64 / count as f64)
            };
            let max = present.iter().max().map_or(Value::Null, |m| Value::Int64(*m));
            (group, (count, sum, avg, max))
        })
        .collect()
}

proptest! {
    #[test]
    fn aggregates_match_recompute(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut state = group_state();
        let mut rows: BTreeMap<i64, (i64, Option<i64>)> = BTreeMap::new();
        // Materialized output: group -> row
        let mut view: BTreeMap<Key, Value> = BTreeMap::new();

        for op in ops {
            let mut batch = Vec::new();
            match op {
                Op::Insert(id, group, amount) => {
                    if let Some((g, a)) = rows.insert(id, (group, amount)) {
                        batch.push(Delta::delete(order(id, g, a)));
                    }
                    batch.push(Delta::insert(order(id, group, amount)));
                }
                Op::Delete(id) => {
                    if let Some((g, a)) = rows.remove(&id) {
                        batch.push(Delta::delete(order(id, g, a)));
                    }
                }
            }
            for delta in state.process_deltas(batch).unwrap() {
                if delta.is_delete() {
                    prop_assert_eq!(view.remove(&delta.data.key), Some(delta.data.value));
                } else {
                    prop_assert!(view.insert(delta.data.key, delta.data.value).is_none());
                }
            }

            let expected = recompute(&rows);
            prop_assert_eq!(state.len(), expected.len());
            prop_assert_eq!(view.len(), expected.len());
            for row in view.values() {
                let Some(Value::Int64(group)) = row.get("group") else {
                    return Err(TestCaseError::fail("group field missing"));
                };
                let (count, sum, avg, max) = &expected[group];
                prop_assert_eq!(row.get("count"), Some(&Value::Int64(*count)));
                prop_assert_eq!(row.get("sum"), Some(&Value::Int64(*sum)));
                prop_assert_eq!(row.get("avg"), Some(avg));
                prop_assert_eq!(row.get("max"), Some(max));
            }
        }
    }
}
