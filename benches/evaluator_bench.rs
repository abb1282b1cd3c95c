//! Criterion benchmarks for the evaluator, focused on `$reduce`.
//!
//! Each group folds arrays of increasing size through the three callable
//! shapes (builtin reference, declared function, inline lambda) so their
//! dispatch cost can be compared directly.
//!
//! Run:
//!   cargo bench
//!   cargo bench -- reduce_callables   # one group

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use jsonata_fold::ast::AstNode;
use jsonata_fold::evaluator::Evaluator;
use jsonata_fold::parser;
use jsonata_fold::value::JValue;

// ── Data builders ─────────────────────────────────────────────────────────────

/// `{"values": [0.0, 1.0, ..., (n-1).0]}`
fn numeric_array(n: usize) -> JValue {
    let values: Vec<JValue> = (0..n).map(|i| JValue::from(i as f64)).collect();
    let mut root = IndexMap::new();
    root.insert("values".to_string(), JValue::array(values));
    JValue::object(root)
}

/// `{"rows": [[0], [1], ...]}`, input for folding with `$append`.
fn singleton_rows(n: usize) -> JValue {
    let rows: Vec<JValue> = (0..n)
        .map(|i| JValue::array(vec![JValue::from(i as f64)]))
        .collect();
    let mut root = IndexMap::new();
    root.insert("rows".to_string(), JValue::array(rows));
    JValue::object(root)
}

/// 100 order lines: {sku, price, quantity}.
fn order_lines_100() -> JValue {
    let lines: Vec<JValue> = (0..100_usize)
        .map(|i| {
            let mut m = IndexMap::new();
            m.insert("sku".to_string(), JValue::string(format!("SKU-{i}")));
            m.insert("price".to_string(), JValue::from(5.0 + i as f64 * 1.25));
            m.insert("quantity".to_string(), JValue::from((i % 7 + 1) as f64));
            JValue::object(m)
        })
        .collect();
    let mut root = IndexMap::new();
    root.insert("lines".to_string(), JValue::array(lines));
    JValue::object(root)
}

// ── Helper: evaluate expression on data ───────────────────────────────────────

#[inline]
fn eval(ast: &AstNode, data: &JValue) -> JValue {
    Evaluator::new().evaluate(ast, data).unwrap()
}

// ── Bench groups ──────────────────────────────────────────────────────────────

fn bench_reduce_callables(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_callables");

    let inline = parser::parse("$reduce(values, function($a, $b){ $a + $b })").unwrap();
    let declared =
        parser::parse("($add := function($a, $b){ $a + $b }; $reduce(values, $add))").unwrap();
    let builtin = parser::parse("$reduce(rows, $append)").unwrap();

    for n in [100_usize, 1000, 10000] {
        let numbers = numeric_array(n);
        group.bench_with_input(BenchmarkId::new("inline_lambda", n), &numbers, |b, data| {
            b.iter(|| black_box(eval(black_box(&inline), black_box(data))))
        });
        group.bench_with_input(BenchmarkId::new("declared_function", n), &numbers, |b, data| {
            b.iter(|| black_box(eval(black_box(&declared), black_box(data))))
        });

        // $append copies the accumulator on every step, keep it small
        if n <= 1000 {
            let rows = singleton_rows(n);
            group.bench_with_input(BenchmarkId::new("builtin", n), &rows, |b, data| {
                b.iter(|| black_box(eval(black_box(&builtin), black_box(data))))
            });
        }
    }

    group.finish();
}

fn bench_reduce_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_frames");
    let data = numeric_array(1000);

    // 2, 3 and 4 parameter callables bind progressively more of the frame
    let cases = [
        ("two_params", "$reduce(values, function($a, $v){ $a + $v })"),
        ("three_params", "$reduce(values, function($a, $v, $i){ $a + $i })"),
        ("four_params", "$reduce(values, function($a, $v, $i, $all){ $a + $v })"),
        ("with_seed", "$reduce(values, function($a, $v){ $a + $v }, 0)"),
    ];
    for (name, expr) in cases {
        let ast = parser::parse(expr).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| black_box(eval(black_box(&ast), black_box(&data))))
        });
    }

    group.finish();
}

fn bench_realistic_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("realistic_workload");
    let data = order_lines_100();

    {
        let ast = parser::parse(
            "$reduce(lines, function($total, $line){ $total + $line.price * $line.quantity }, 0)",
        )
        .unwrap();
        group.bench_function("order_total", |b| {
            b.iter(|| black_box(eval(black_box(&ast), black_box(&data))))
        });
    }

    {
        let ast = parser::parse(
            "$reduce(lines, function($acc, $line){ $merge([$acc, {$line.sku: $line.quantity}]) }, {})",
        )
        .unwrap();
        group.bench_function("index_by_sku", |b| {
            b.iter(|| black_box(eval(black_box(&ast), black_box(&data))))
        });
    }

    {
        let ast = parser::parse("lines.price ~> $reduce(function($m, $p){ $p > $m ? $p : $m })").unwrap();
        group.bench_function("chained_max", |b| {
            b.iter(|| black_box(eval(black_box(&ast), black_box(&data))))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_reduce_callables,
    bench_reduce_frames,
    bench_realistic_workload
);
criterion_main!(benches);
