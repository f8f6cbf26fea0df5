//! Benchmarks for commit and rollback throughput
//!
//! Run with: cargo bench --bench commit_rollback

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use memstate::prelude::*;
use serde_json::json;
use std::thread;

struct NoopHook;

impl Hook for NoopHook {
    fn on_write(&self, _change: &Change<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

fn store_with_hooks(hooks: usize) -> MemoryStore {
    let mut builder = MemoryStore::builder(Arc::new(InMemoryFactStore::new()));
    for _ in 0..hooks {
        builder = builder.with_hook(Arc::new(NoopHook));
    }
    builder.build().unwrap()
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    group.throughput(Throughput::Elements(1));

    for hooks in [0, 1, 4].iter() {
        group.bench_with_input(BenchmarkId::new("insert", hooks), hooks, |b, &hooks| {
            let memory = store_with_hooks(hooks);
            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                let fact = Fact::from_json("note", json!({"n": n})).unwrap();
                black_box(memory.commit(fact, CommitOptions::new()).unwrap());
            });
        });
    }

    group.bench_function("singleton_update", |b| {
        let memory = store_with_hooks(1);
        memory
            .registry()
            .register_constraint("user", Constraint::singleton("username"));
        let mut level = 0u64;
        b.iter(|| {
            level += 1;
            let fact = Fact::from_json("user", json!({"username": "neo", "level": level})).unwrap();
            black_box(memory.commit(fact, CommitOptions::new()).unwrap());
        });
    });

    group.finish();
}

fn bench_concurrent_commits(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_commits");

    for num_threads in [1, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*num_threads as u64 * 100));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_threads),
            num_threads,
            |b, &num_threads| {
                b.iter_batched(
                    || Arc::new(store_with_hooks(1)),
                    |memory| {
                        let handles: Vec<_> = (0..num_threads)
                            .map(|t| {
                                let memory = memory.clone();
                                thread::spawn(move || {
                                    for n in 0..100 {
                                        let fact =
                                            Fact::from_json("note", json!({"t": t, "n": n}))
                                                .unwrap();
                                        memory.commit(fact, CommitOptions::new()).unwrap();
                                    }
                                })
                            })
                            .collect();
                        for handle in handles {
                            handle.join().unwrap();
                        }
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("rollback");

    for steps in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*steps as u64));
        group.bench_with_input(BenchmarkId::from_parameter(steps), steps, |b, &steps| {
            b.iter_batched(
                || {
                    let memory = store_with_hooks(1);
                    for n in 0..steps {
                        let fact = Fact::from_json("note", json!({"n": n})).unwrap();
                        memory
                            .commit(fact, CommitOptions::new().with_session("bench"))
                            .unwrap();
                    }
                    memory
                },
                |memory| black_box(memory.rollback(steps, Some("bench")).unwrap()),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_commit, bench_concurrent_commits, bench_rollback);
criterion_main!(benches);
