use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use elastic_runtime::config::PoolConfig;
use elastic_runtime::job::InlineWorkerFactory;
use elastic_runtime::prelude::*;

fn submit_single(c: &mut Criterion) {
    let pool = ElasticExecutor::new(
        InlineWorkerFactory,
        PoolConfig {
            min_workers: 2,
            max_workers: 2,
            ..Default::default()
        },
        Arc::new(OsSpawner),
    )
    .unwrap();

    c.bench_function("submit single job", |b| {
        b.iter(|| {
            pool.submit(Box::new(|| {
                black_box(1 + 1);
            }))
            .unwrap()
        })
    });
}

fn submit_burst(c: &mut Criterion) {
    let pool = ElasticExecutor::new(
        InlineWorkerFactory,
        PoolConfig {
            min_workers: 4,
            max_workers: 4,
            ..Default::default()
        },
        Arc::new(OsSpawner),
    )
    .unwrap();

    c.bench_function("submit 10k job burst", |b| {
        b.iter(|| {
            for _ in 0..10_000 {
                let _ = pool.submit(Box::new(|| {
                    black_box(1 + 1);
                }));
            }
            pool.wait_until_idle(Some(std::time::Duration::from_secs(30)));
        })
    });
}

criterion_group!(submit, submit_single, submit_burst);
criterion_main!(submit);
