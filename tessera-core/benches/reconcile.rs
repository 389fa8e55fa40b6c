//! Reconciliation Benchmarks
//!
//! Measures the keyed planner on its own and a keyed tree driven through
//! full ticks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_core::graph::plan;
use tessera_core::Runtime;

/// `len` keys with every `stride`-th one moved to the end.
fn shuffled(len: usize, stride: usize) -> Vec<usize> {
    let (moved, mut kept): (Vec<usize>, Vec<usize>) = (0..len).partition(|k| k % stride == 0);
    kept.extend(moved);
    kept
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    for len in [16usize, 256, 4096] {
        let old: Vec<usize> = (0..len).collect();
        let reversed: Vec<usize> = old.iter().rev().copied().collect();
        let moved = shuffled(len, 7);
        group.throughput(Throughput::Elements(len as u64));

        group.bench_with_input(BenchmarkId::new("unchanged", len), &old, |b, new| {
            b.iter(|| plan(black_box(&old), black_box(new)))
        });
        group.bench_with_input(BenchmarkId::new("reversed", len), &reversed, |b, new| {
            b.iter(|| plan(black_box(&old), black_box(new)))
        });
        group.bench_with_input(BenchmarkId::new("moved", len), &moved, |b, new| {
            b.iter(|| plan(black_box(&old), black_box(new)))
        });
    }
    group.finish();
}

fn bench_keyed_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyed_tick");
    for len in [16usize, 256, 1024] {
        let runtime = Runtime::new();
        let items = runtime.mutable_state((0..len).collect::<Vec<usize>>());
        let root = {
            let items = items.clone();
            runtime.create_root(move |scope| {
                let items = items.get();
                scope.repeat_by_array(
                    &items,
                    |key, _| key.to_string(),
                    |scope, key, _| {
                        let key = *key;
                        let value = scope.remember(move || key * 2)?;
                        black_box(value);
                        Ok(())
                    },
                )?;
                Ok(())
            })
        };
        if runtime.tick(root).is_err() {
            continue;
        }

        let forward: Vec<usize> = (0..len).collect();
        let moved = shuffled(len, 5);
        let mut flip = false;
        group.throughput(Throughput::Elements(len as u64));
        group.bench_function(BenchmarkId::new("move_and_restore", len), |b| {
            b.iter(|| {
                flip = !flip;
                items.set(if flip { moved.clone() } else { forward.clone() });
                black_box(runtime.tick(root))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_plan, bench_keyed_tick);
criterion_main!(benches);
