//! Benchmarks for predicate evaluation and subset reasoning.
//!
//! Load-subset dedupe runs the subset check against every earlier request,
//! so both the check itself and the union of many requests are measured.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use strand_core::Value;
use strand_query::ast::Expr;
use strand_query::eval::{compile_predicate, evaluate};
use strand_query::predicate::{is_where_subset, union_where_predicates};

fn range(lo: i64, hi: i64) -> Expr {
    Expr::and(vec![
        Expr::gte(Expr::col("x"), Expr::val(lo)),
        Expr::lt(Expr::col("x"), Expr::val(hi)),
    ])
}

fn bench_evaluate(c: &mut Criterion) {
    let expr = Expr::and(vec![
        Expr::eq(Expr::col("todo.done"), Expr::val(false)),
        Expr::gt(Expr::col("todo.priority"), Expr::val(2i64)),
        Expr::like(Expr::col("todo.title"), "%docs%"),
    ]);
    let row = Value::object([(
        "todo",
        Value::object([
            ("done", Value::Boolean(false)),
            ("priority", Value::Int64(3)),
            ("title", Value::from("write the docs")),
        ]),
    )]);

    c.bench_function("evaluate_conjunction", |b| {
        b.iter(|| evaluate(black_box(&expr), black_box(&row)))
    });

    let compiled = compile_predicate(&expr);
    c.bench_function("compiled_predicate", |b| b.iter(|| compiled(black_box(&row))));
}

fn bench_subset(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_where_subset");
    for width in [1usize, 8, 64] {
        let superset = Expr::or((0..width as i64).map(|i| range(i * 100, i * 100 + 50)).collect());
        let candidate = range((width as i64 - 1) * 100 + 10, (width as i64 - 1) * 100 + 20);
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| is_where_subset(Some(black_box(&candidate)), Some(black_box(&superset))))
        });
    }
    group.finish();
}

fn bench_union(c: &mut Criterion) {
    let mut group = c.benchmark_group("union_where_predicates");
    for count in [10usize, 100] {
        let preds: Vec<Option<Expr>> = (0..count as i64)
            .map(|i| Some(Expr::eq(Expr::col("id"), Expr::val(i))))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &preds, |b, preds| {
            b.iter(|| union_where_predicates(black_box(preds)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_subset, bench_union);
criterion_main!(benches);
