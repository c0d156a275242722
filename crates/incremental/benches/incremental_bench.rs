//! Benchmarks for strand-incremental.
//!
//! Target: single row update through a windowed pipeline < 100μs

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::rc::Rc;
use strand_core::{CompareOptions, Key, Value};
use strand_incremental::{
    consolidate, key_between, Aggregate, DataflowGraph, DataflowNode, Delta, GroupAggregateState,
    IncrementalHashJoin, KeyedRow, SortKeyFn, TopK,
};
use strand_query::ast::{AggregateFunc, Expr, JoinType};
use strand_query::eval::{compile, compile_predicate, sort_tuple};

fn item(id: i64, score: i64) -> KeyedRow {
    KeyedRow::new(
        Key::Int(id),
        Value::object([
            ("id", Value::Int64(id)),
            ("score", Value::Int64(score)),
            ("group", Value::Int64(id % 10)),
        ]),
    )
}

fn scored(row: KeyedRow) -> KeyedRow {
    KeyedRow {
        value: Value::object([("item", row.value)]),
        ..row
    }
}

fn by_score(offset: usize, limit: Option<usize>) -> TopK {
    let order = vec![Expr::col("item.score")];
    let sort_fn: SortKeyFn = Rc::new(move |row: &Value| sort_tuple(&order, row));
    TopK::new(sort_fn, vec![CompareOptions::desc()], offset, limit)
}

fn bench_fractional(c: &mut Criterion) {
    let mut group = c.benchmark_group("fractional");
    group.bench_function("append_100", |b| {
        b.iter(|| {
            let mut key = key_between(None, None);
            for _ in 0..100 {
                key = key_between(Some(&key), None);
            }
            black_box(key)
        })
    });
    group.bench_function("bisect_50", |b| {
        b.iter(|| {
            let mut lo = key_between(None, None);
            let hi = key_between(Some(&lo), None);
            for _ in 0..50 {
                lo = key_between(Some(&lo), Some(&hi));
            }
            black_box(lo)
        })
    });
    group.finish();
}

fn bench_top_k(c: &mut Criterion) {
    let mut group = c.benchmark_group("top_k");

    for size in [100i64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("load", size), &size, |b, &size| {
            b.iter(|| {
                let mut topk = by_score(0, Some(20));
                let batch = (0..size).map(|i| Delta::insert(scored(item(i, (i * 7919) % 1000)))).collect();
                black_box(topk.process(batch).unwrap())
            })
        });

        let mut topk = by_score(0, Some(20));
        let batch = (0..size).map(|i| Delta::insert(scored(item(i, (i * 7919) % 1000)))).collect();
        topk.process(batch).unwrap();
        group.bench_with_input(BenchmarkId::new("update_into_window", size), &size, |b, _| {
            let mut flip = false;
            b.iter(|| {
                let (old, new) = if flip { (5_000, 0) } else { (0, 5_000) };
                flip = !flip;
                let batch = vec![
                    Delta::delete(scored(item(-1, old))),
                    Delta::insert(scored(item(-1, new))),
                ];
                black_box(topk.process(batch).unwrap())
            })
        });
    }

    group.bench_function("set_window_page", |b| {
        let mut topk = by_score(0, Some(50));
        let batch = (0..5_000).map(|i| Delta::insert(scored(item(i, i)))).collect();
        topk.process(batch).unwrap();
        let mut page = 0;
        b.iter(|| {
            page = (page + 1) % 100;
            black_box(topk.set_window(page * 50, Some(50)))
        })
    });

    group.finish();
}

fn bench_group_by(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_by");
    let key_fn = compile(&Expr::col("item.group"));
    let key_fn: strand_query::eval::Evaluator = Rc::new(move |row: &Value| {
        Ok(Value::object([("group", key_fn(row)?)]))
    });
    let aggregates = || {
        vec![
            ("count".to_string(), Aggregate::builtin(AggregateFunc::Count, compile(&Expr::col("item.score")))),
            ("sum".to_string(), Aggregate::builtin(AggregateFunc::Sum, compile(&Expr::col("item.score")))),
            ("max".to_string(), Aggregate::builtin(AggregateFunc::Max, compile(&Expr::col("item.score")))),
        ]
    };

    group.bench_function("single_insert", |b| {
        let mut state = GroupAggregateState::new(key_fn.clone(), aggregates());
        let batch: Vec<_> = (0..1_000).map(|i| Delta::insert(scored(item(i, i)))).collect();
        state.process_deltas(batch).unwrap();
        let mut next = 1_000;
        b.iter(|| {
            next += 1;
            black_box(state.process_deltas(vec![Delta::insert(scored(item(next, next)))]).unwrap())
        })
    });

    group.finish();
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("join");

    fn setup_join() -> IncrementalHashJoin {
        let mut join = IncrementalHashJoin::new(
            JoinType::Inner,
            compile(&Expr::col("emp.dept")),
            compile(&Expr::col("dept.id")),
        );
        let depts = (0..10)
            .map(|i| {
                Delta::insert(KeyedRow::new(
                    Key::Int(i),
                    Value::object([("dept", Value::object([("id", Value::Int64(i))]))]),
                ))
            })
            .collect();
        join.on_right(depts).unwrap();
        join
    }

    let emp = |id: i64| {
        KeyedRow::new(
            Key::Int(id),
            Value::object([("emp", Value::object([("dept", Value::Int64(id % 10))]))]),
        )
    };

    group.bench_function("single_left_insert", |b| {
        let mut join = setup_join();
        let mut id = 0;
        b.iter(|| {
            id += 1;
            black_box(join.on_left(vec![Delta::insert(emp(id))]).unwrap())
        })
    });

    for size in [10i64, 100] {
        group.bench_with_input(BenchmarkId::new("batch_left_insert", size), &size, |b, &size| {
            b.iter(|| {
                let mut join = setup_join();
                black_box(join.on_left((0..size).map(|i| Delta::insert(emp(i))).collect()).unwrap())
            })
        });
    }

    group.finish();
}

fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");

    group.bench_function("filter_top_k_update", |b| {
        let root = DataflowNode::top_k(
            DataflowNode::filter(
                DataflowNode::source("item"),
                compile_predicate(&Expr::gt(Expr::col("item.score"), Expr::val(100i64))),
            ),
            by_score(0, Some(10)),
        );
        let mut graph = DataflowGraph::new(root);
        graph
            .push("item", (0..1_000).map(|i| Delta::insert(item(i, i))).collect())
            .unwrap();
        graph.run().unwrap();
        let mut flip = false;
        b.iter(|| {
            let (old, new) = if flip { (2_000, 500) } else { (500, 2_000) };
            flip = !flip;
            graph
                .push("item", vec![Delta::delete(item(7, old)), Delta::insert(item(7, new))])
                .unwrap();
            black_box(graph.run().unwrap())
        })
    });

    group.bench_function("consolidate_1000", |b| {
        let batch: Vec<_> = (0..1_000)
            .flat_map(|i| [Delta::insert(item(i % 300, i)), Delta::delete(item(i % 300, i - 1))])
            .collect();
        b.iter(|| black_box(consolidate(batch.clone())))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_fractional,
    bench_top_k,
    bench_group_by,
    bench_join,
    bench_graph,
);

criterion_main!(benches);
