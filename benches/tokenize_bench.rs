//! Benchmark: command parsing
//!
//! Measures tokenize, expand and the full parse across command sizes.
//! Run: cargo bench --bench tokenize_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kurl::{expand, parse_command, tokenize, VarMap};

/// A pasted multi-line command with N headers
fn generate_command(header_count: usize) -> String {
    let mut command = String::from("curl -X POST 'https://api.test/v1/items?page=1' \\\n");
    for i in 0..header_count {
        command.push_str(&format!("  -H \"X-Header-{i}: value-$TOKEN-{i}\" \\\n"));
    }
    command.push_str("  --data-raw '{\"name\":\"kurl\",\"tags\":[\"a\",\"b\"]}' \\\n");
    command.push_str("  --retry 3 --compressed -L");
    command
}

fn bench_tokenize(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokenize");
    for size in [1, 10, 50] {
        let command = generate_command(size);
        group.throughput(Throughput::Bytes(command.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &command, |b, command| {
            b.iter(|| tokenize(black_box(command)))
        });
    }
    group.finish();
}

fn bench_expand(c: &mut Criterion) {
    let vars = VarMap::new().with("TOKEN", "abc123");
    let mut group = c.benchmark_group("expand");
    for size in [1, 10, 50] {
        let tokens = tokenize(&generate_command(size)).unwrap_or_default();
        group.bench_with_input(BenchmarkId::from_parameter(size), &tokens, |b, tokens| {
            b.iter(|| expand(black_box(tokens), &vars))
        });
    }
    group.finish();
}

fn bench_parse_command(c: &mut Criterion) {
    let vars = VarMap::new().with("TOKEN", "abc123");
    let mut group = c.benchmark_group("parse_command");
    for size in [1, 10, 50] {
        let command = generate_command(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &command, |b, command| {
            b.iter(|| parse_command(black_box(command), &vars))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tokenize, bench_expand, bench_parse_command);
criterion_main!(benches);
