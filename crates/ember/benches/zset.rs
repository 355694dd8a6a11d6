use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use ember::SortedSet;

fn filled(n: usize) -> SortedSet {
    let mut zs = SortedSet::new();
    for i in 0..n {
        zs.insert(format!("member-{i:06}").as_bytes(), (i % 1_000) as f64);
    }
    zs
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("zset_insert_10k", |b| {
        b.iter(|| black_box(filled(10_000)));
    });
}

fn bench_range(c: &mut Criterion) {
    let zs = filled(100_000);
    c.bench_function("zset_range_mid_100", |b| {
        b.iter(|| black_box(zs.range(50_000, 50_099)));
    });
    c.bench_function("zset_range_full", |b| {
        b.iter(|| black_box(zs.range(0, -1)));
    });
}

fn bench_score(c: &mut Criterion) {
    let zs = filled(100_000);
    c.bench_function("zset_score_hit", |b| {
        b.iter(|| black_box(zs.score(b"member-012345")));
    });
}

criterion_group!(benches, bench_insert, bench_range, bench_score);
criterion_main!(benches);
