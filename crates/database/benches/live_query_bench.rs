//! Benchmarks for strand-db live queries.
//!
//! Target: one row update reaching a windowed live query < 50μs

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use strand_core::Value;
use strand_db::{Collection, CollectionConfig, Database, TransactionConfig};
use strand_query::ast::Expr;
use strand_query::Query;

fn todo(id: i64, done: bool) -> Value {
    Value::object([
        ("id", Value::Int64(id)),
        ("done", Value::Boolean(done)),
        ("priority", Value::Int64(id % 7)),
    ])
}

fn seeded(rows: i64) -> (Database, Collection) {
    let db = Database::new();
    let todos = db.create_collection(CollectionConfig::keyed_by("todos", "id")).unwrap();
    todos.insert_many((0..rows).map(|i| todo(i, i % 2 == 0)).collect()).unwrap();
    (db, todos)
}

fn bench_windowed_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("windowed_update");
    for rows in [1_000i64, 10_000] {
        let (db, todos) = seeded(rows);
        let ir = Query::from("todo", "todos")
            .where_(Expr::eq(Expr::col("todo.done"), Expr::val(false)))
            .order_by_desc(Expr::col("todo.priority"))
            .limit(20)
            .build()
            .unwrap();
        let query = db.live_query(ir).unwrap();
        let mut flip = false;
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, rows| {
            b.iter(|| {
                flip = !flip;
                let key = black_box(rows / 2);
                todos
                    .update(key, |row| row.set_path(&["done"], Value::Boolean(flip)))
                    .unwrap();
                black_box(query.collection().size())
            })
        });
    }
    group.finish();
}

fn bench_grouped_transaction(c: &mut Criterion) {
    let (db, todos) = seeded(5_000);
    let ir = Query::from("todo", "todos")
        .group_by(vec![Expr::col("todo.priority")])
        .select(vec![
            ("priority", Expr::col("todo.priority")),
            ("open", Expr::count(Expr::col("todo.id"))),
        ])
        .build()
        .unwrap();
    let query = db.live_query(ir).unwrap();
    let mut next = 5_000i64;
    c.bench_function("grouped_transaction_100_inserts", |b| {
        b.iter(|| {
            let tx = db.transaction(TransactionConfig::default());
            tx.mutate(|| {
                for _ in 0..100 {
                    next += 1;
                    todos.insert(todo(next, false))?;
                }
                Ok(())
            })
            .unwrap();
            tx.rollback().unwrap();
            black_box(query.to_vec().len())
        })
    });
}

criterion_group!(benches, bench_windowed_update, bench_grouped_transaction);
criterion_main!(benches);
