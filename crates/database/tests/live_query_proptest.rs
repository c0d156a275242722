//! Property-based tests: a live query always equals the query recomputed
//! over the collection's current rows.

use proptest::prelude::*;
use std::collections::BTreeMap;
use strand_core::Value;
use strand_db::{CollectionConfig, Database, TransactionConfig};
use strand_query::ast::Expr;
use strand_query::Query;

#[derive(Clone, Debug)]
enum Op {
    Upsert(i64, i64, bool),
    Delete(i64),
    /// Several writes in one transaction
    Batch(Vec<(i64, i64, bool)>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let row = (0i64..30, 0i64..5, any::<bool>());
    prop_oneof![
        4 => row.clone().prop_map(|(id, p, done)| Op::Upsert(id, p, done)),
        2 => (0i64..30).prop_map(Op::Delete),
        1 => prop::collection::vec(row, 1..6).prop_map(Op::Batch),
    ]
}

fn todo(id: i64, priority: i64, done: bool) -> Value {
    Value::object([
        ("id", Value::Int64(id)),
        ("priority", Value::Int64(priority)),
        ("done", Value::Boolean(done)),
    ])
}

/// Ids of open todos by priority descending, then id, windowed.
fn expected(rows: &BTreeMap<i64, (i64, bool)>, offset: usize, limit: usize) -> Vec<i64> {
    let mut open: Vec<(i64, i64)> = rows
        .iter()
        .filter(|(_, (_, done))| !done)
        .map(|(id, (priority, _))| (*priority, *id))
        .collect();
    open.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    open.into_iter().skip(offset).take(limit).map(|(_, id)| id).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn windowed_query_matches_recompute(
        ops in prop::collection::vec(op_strategy(), 1..40),
        offset in 0usize..3,
        limit in 1usize..6,
    ) {
        let db = Database::new();
        let todos = db.create_collection(CollectionConfig::keyed_by("todos", "id")).unwrap();
        let ir = Query::from("todo", "todos")
            .where_(Expr::eq(Expr::col("todo.done"), Expr::val(false)))
            .order_by_desc(Expr::col("todo.priority"))
            .order_by_asc(Expr::col("todo.id"))
            .offset(offset)
            .limit(limit)
            .build()
            .unwrap();
        let query = db.live_query(ir).unwrap();
        let mut model: BTreeMap<i64, (i64, bool)> = BTreeMap::new();

        let upsert = |model: &mut BTreeMap<i64, (i64, bool)>, id: i64, priority: i64, done: bool| {
            let result = if model.contains_key(&id) {
                todos.update(id, |row| {
                    row.set_path(&["priority"], Value::Int64(priority));
                    row.set_path(&["done"], Value::Boolean(done));
                })
            } else {
                todos.insert(todo(id, priority, done))
            };
            result.map(|_| {
                model.insert(id, (priority, done));
            })
        };

        for op in ops {
            match op {
                Op::Upsert(id, priority, done) => upsert(&mut model, id, priority, done).unwrap(),
                Op::Delete(id) => {
                    if model.remove(&id).is_some() {
                        todos.delete(id).unwrap();
                    }
                }
                Op::Batch(rows) => {
                    let tx = db.transaction(TransactionConfig::default().with_auto_commit(true));
                    tx.mutate(|| {
                        for (id, priority, done) in rows {
                            upsert(&mut model, id, priority, done)?;
                        }
                        Ok(())
                    })
                    .unwrap();
                }
            }
            let ids: Vec<i64> = query
                .to_vec()
                .iter()
                .filter_map(|row| match row.get("id") {
                    Some(Value::Int64(id)) => Some(*id),
                    _ => None,
                })
                .collect();
            prop_assert_eq!(ids, expected(&model, offset, limit));
        }
    }

    #[test]
    fn grouped_count_matches_recompute(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let db = Database::new();
        let todos = db.create_collection(CollectionConfig::keyed_by("todos", "id")).unwrap();
        let ir = Query::from("todo", "todos")
            .group_by(vec![Expr::col("todo.priority")])
            .select(vec![
                ("priority", Expr::col("todo.priority")),
                ("count", Expr::count(Expr::col("todo.id"))),
            ])
            .build()
            .unwrap();
        let query = db.live_query(ir).unwrap();
        let mut model: BTreeMap<i64, (i64, bool)> = BTreeMap::new();

        for op in ops {
            let writes = match op {
                Op::Upsert(id, p, done) => vec![(id, Some((p, done)))],
                Op::Delete(id) => vec![(id, None)],
                Op::Batch(rows) => rows.into_iter().map(|(id, p, done)| (id, Some((p, done)))).collect(),
            };
            for (id, row) in writes {
                match (row, model.contains_key(&id)) {
                    (Some((p, done)), true) => {
                        todos.update(id, |r| *r = todo(id, p, done)).unwrap();
                        model.insert(id, (p, done));
                    }
                    (Some((p, done)), false) => {
                        todos.insert(todo(id, p, done)).unwrap();
                        model.insert(id, (p, done));
                    }
                    (None, true) => {
                        todos.delete(id).unwrap();
                        model.remove(&id);
                    }
                    (None, false) => {}
                }
            }

            let mut counts: BTreeMap<i64, i64> = BTreeMap::new();
            for (p, _) in model.values() {
                *counts.entry(*p).or_default() += 1;
            }
            let mut live: BTreeMap<i64, i64> = BTreeMap::new();
            for row in query.to_vec() {
                if let (Some(Value::Int64(p)), Some(Value::Int64(n))) = (row.get("priority"), row.get("count")) {
                    live.insert(*p, *n);
                }
            }
            prop_assert_eq!(live, counts);
        }
    }
}
