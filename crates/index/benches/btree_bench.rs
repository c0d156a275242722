//! Benchmarks for strand-index using criterion.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use strand_core::{CompareOptions, Key, Value};
use strand_index::{BTreeIndex, Index, IndexMeta, IndexOperation, ValueRange};
use strand_query::ast::Expr;

fn row(score: i64) -> Value {
    Value::object([("score", Value::Int64(score))])
}

fn populated(size: i64) -> BTreeIndex {
    let mut index = BTreeIndex::new(IndexMeta::new(1, "by_score", Expr::col("score")));
    for i in 0..size {
        index.add(&Key::Int(i), &row(i % 1000)).unwrap();
    }
    index
}

fn btree_insert_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_insert");

    for size in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(populated(size)));
        });
    }

    group.finish();
}

fn btree_lookup_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_lookup_eq");

    for size in [1000, 10000, 100000].iter() {
        let index = populated(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                for v in (0..100).map(|x| x * 10) {
                    black_box(index.lookup(IndexOperation::Eq, &Value::Int64(v)));
                }
            });
        });
    }

    group.finish();
}

fn btree_range_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_range");
    let index = populated(100000);

    for width in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, &width| {
            let range = ValueRange::bound(Value::Int64(100), Value::Int64(100 + width), false, true);
            b.iter(|| black_box(index.range_query(&range)));
        });
    }

    group.finish();
}

fn btree_take_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_take");
    let mut index = BTreeIndex::new(
        IndexMeta::new(1, "by_score", Expr::col("score")).with_options(CompareOptions::desc()),
    );
    for i in 0..100000i64 {
        index.add(&Key::Int(i), &row(i)).unwrap();
    }
    let all = |_: &Key| true;

    for n in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            b.iter(|| black_box(index.take(n, Some(&Value::Int64(50000)), &all)));
        });
    }

    group.finish();
}

fn btree_update_benchmark(c: &mut Criterion) {
    c.bench_function("btree_update_1000", |b| {
        b.iter_batched(
            || populated(10000),
            |mut index| {
                for i in 0..1000i64 {
                    index
                        .update(&Key::Int(i), &row(i % 1000), &row((i + 7) % 1000))
                        .unwrap();
                }
                black_box(index)
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    btree_insert_benchmark,
    btree_lookup_benchmark,
    btree_range_benchmark,
    btree_take_benchmark,
    btree_update_benchmark,
);
criterion_main!(benches);
