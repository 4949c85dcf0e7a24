use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use idalloc::{Engine, EngineConfig, RequestContext, cache::MemoryCache, store::MemoryStore};
use std::{sync::Arc, time::Duration};
use tokio::runtime::Builder;

fn engine(batch_size: i64) -> Engine {
    Engine::new(
        EngineConfig {
            batch_size,
            ..EngineConfig::default()
        },
        Arc::new(MemoryCache::new()),
        Arc::new(MemoryStore::new()),
    )
    .expect("valid config")
}

fn bench_allocate(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let ctx = RequestContext::new("bench");

    for batch_size in [1_000, 10_000, 100_000] {
        let engine = rt.block_on(async { engine(batch_size) });
        rt.block_on(engine.allocate(&ctx, "bench", 1)).unwrap();

        let mut group = c.benchmark_group("engine/allocate");
        for count in [1_i64, 10, 100] {
            let (engine, ctx) = (&engine, &ctx);
            group.throughput(Throughput::Elements(count as u64));
            group.bench_function(format!("batch/{batch_size}/count/{count}"), |b| {
                b.to_async(&rt).iter(|| async move {
                    black_box(engine.allocate(ctx, "bench", count).await.unwrap())
                });
            });
        }
        group.finish();

        rt.block_on(engine.shutdown(Duration::from_secs(5)));
    }
}

fn bench_contended(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let engine = Arc::new(rt.block_on(async { engine(10_000) }));

    let mut group = c.benchmark_group("engine/allocate_contended");
    for tasks in [2_u64, 8, 32] {
        group.throughput(Throughput::Elements(tasks * 10));
        group.bench_function(format!("tasks/{tasks}"), |b| {
            b.to_async(&rt).iter(|| {
                let engine = Arc::clone(&engine);
                async move {
                    let handles: Vec<_> = (0..tasks)
                        .map(|_| {
                            let engine = Arc::clone(&engine);
                            tokio::spawn(async move {
                                let ctx = RequestContext::new("bench");
                                engine.allocate(&ctx, "bench", 10).await.unwrap()
                            })
                        })
                        .collect();
                    for handle in handles {
                        black_box(handle.await.unwrap());
                    }
                }
            });
        });
    }
    group.finish();

    rt.block_on(engine.shutdown(Duration::from_secs(5)));
}

criterion_group!(benches, bench_allocate, bench_contended);
criterion_main!(benches);
