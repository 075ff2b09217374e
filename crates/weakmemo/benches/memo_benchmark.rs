use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use weakmemo::{memoize, AsKey, IdentityKeyStore, SharedCache};

/// Generate argument lists of the given arity
fn generate_args(arity: usize, seed: u64) -> Vec<u64> {
    (0..arity as u64).map(|i| i.wrapping_mul(seed)).collect()
}

/// Benchmark cache hits against the arity of the argument list
fn bench_private_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("private_hits");

    for arity in [0usize, 1, 4, 8].iter() {
        let sum = memoize(|args: Vec<u64>| args.iter().sum::<u64>());
        let args = generate_args(*arity, 7);
        sum.call(args.clone());

        group.bench_with_input(BenchmarkId::new("call", arity), arity, |b, _| {
            b.iter(|| black_box(sum.call(black_box(args.clone()))));
        });
    }

    group.finish();
}

/// Benchmark first-time evaluation, which builds a new trie path per call
fn bench_private_misses(c: &mut Criterion) {
    c.bench_function("private_miss", |b| {
        let square = memoize(|(n,): (u64,)| n * n);
        let mut next = 0u64;
        b.iter(|| {
            next += 1;
            black_box(square.call((next,)))
        });
    });
}

/// Benchmark heap-identity keys, including the amortised sweep of dead keys
fn bench_weak_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("weak_keys");

    group.bench_function("store_set_dropped_key", |b| {
        let mut store = IdentityKeyStore::new();
        b.iter(|| {
            let key = Arc::new(fastrand::u64(..));
            store.set(key.as_key(), 1u8);
        });
    });

    group.bench_function("store_get_live_key", |b| {
        let mut store = IdentityKeyStore::new();
        let key = Arc::new(0u64);
        store.set(key.as_key(), 1u8);
        let lookup = key.as_key();
        b.iter(|| black_box(store.get(&lookup)));
    });

    group.finish();
}

/// Benchmark the shared cache, which branches on the function first
fn bench_shared(c: &mut Criterion) {
    let cache = SharedCache::default();
    let add = cache.memoize(|(x, y): (u64, u64)| x + y);
    add.call((1, 2));

    c.bench_function("shared_hit", |b| {
        b.iter(|| black_box(add.call(black_box((1, 2)))));
    });
}

criterion_group!(
    benches,
    bench_private_hits,
    bench_private_misses,
    bench_weak_keys,
    bench_shared
);
criterion_main!(benches);
