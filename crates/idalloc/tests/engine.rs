use idalloc::{
    AllocationState, CacheCounter, Engine, EngineConfig, RequestContext,
    cache::{CacheTier, MemoryCache},
    store::{DurableStore, MemoryStore, SqliteStore},
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn config() -> EngineConfig {
    EngineConfig {
        batch_size: 100,
        max_alloc_count: 50,
        // Persist every reservation so a restart never sees a lagging row.
        write_every_n: 1,
        recover_every_n: 100,
        sync_workers: 4,
        sync_channel_size: 256,
        ..EngineConfig::default()
    }
}

fn ctx(name: &str) -> RequestContext {
    RequestContext::new(name)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_after_cache_loss_stays_monotonic() {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    // A single worker applies write-throughs in order, so none is dropped
    // for lock contention and the durable row covers every issued segment.
    let config = EngineConfig {
        sync_workers: 1,
        ..config()
    };

    let engine = Engine::new(config.clone(), cache.clone(), store.clone()).unwrap();
    engine.start(&ctx("boot-1")).await.unwrap();
    let mut before = Vec::new();
    for _ in 0..20 {
        before.extend(engine.allocate(&ctx("req"), "orders", 37).await.unwrap());
    }
    engine.shutdown(WAIT).await;
    let highest = *before.iter().max().unwrap();

    // The cache tier loses everything while the process is down.
    cache.clear();
    assert_eq!(cache.read("idalloc:alloc_info_orders").await.unwrap(), None);

    let engine = Engine::new(config, cache.clone(), store.clone()).unwrap();
    engine.start(&ctx("boot-2")).await.unwrap();
    assert_eq!(engine.services(), vec!["orders".to_string()]);

    let after = engine.allocate(&ctx("req"), "orders", 10).await.unwrap();
    assert!(
        after[0] > highest,
        "restarted at {} but {highest} was already issued",
        after[0]
    );
    engine.shutdown(WAIT).await;
}

#[tokio::test]
async fn startup_recovery_repairs_stale_counter() {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryStore::new());
    store
        .insert_state(&AllocationState::new("users", 9_000, 90))
        .await
        .unwrap();
    // A stale counter left behind by an old cache snapshot.
    cache.set("idalloc:alloc_info_users", CacheCounter::new(2_000, 20));

    let engine = Engine::new(config(), cache.clone(), store.clone()).unwrap();
    engine.start(&ctx("boot")).await.unwrap();

    let ids = engine.allocate(&ctx("req"), "users", 1).await.unwrap();
    assert_eq!(ids, vec![9_001]);

    let snapshot = engine.snapshot(&ctx("req"), "users").await.unwrap();
    assert!(snapshot.active);
    assert!(snapshot.cache.is_some_and(|c| c.data_version > 90));
    engine.shutdown(WAIT).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engines_sharing_a_cache_never_collide() {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(Engine::new(config(), cache.clone(), store.clone()).unwrap());
    let b = Arc::new(Engine::new(config(), cache.clone(), store.clone()).unwrap());

    let tasks: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .flat_map(|engine| {
            (0..4).map(move |worker| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let ctx = RequestContext::new(format!("worker-{worker}"));
                    let mut ids = Vec::new();
                    for _ in 0..40 {
                        ids.extend(engine.allocate(&ctx, "orders", 13).await.unwrap());
                    }
                    ids
                })
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id), "id {id} issued twice");
        }
    }
    assert_eq!(seen.len(), 2 * 4 * 40 * 13);

    a.shutdown(WAIT).await;
    b.shutdown(WAIT).await;

    // Contended write-throughs may be dropped, but the durable row never
    // runs ahead of the cache and never goes backwards.
    let counter = cache
        .read("idalloc:alloc_info_orders")
        .await
        .unwrap()
        .unwrap();
    let row = store.get("orders").unwrap();
    assert!(row.data_version >= 1);
    assert!(row.data_version <= counter.data_version);
    assert_eq!(row.last_alloc_value, row.data_version * 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_services_are_independent() {
    let engine = Arc::new(
        Engine::new(
            config(),
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap(),
    );

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let service = format!("svc{i}");
                let ctx = RequestContext::new(format!("req-{i}"));
                let mut ids = Vec::new();
                for _ in 0..30 {
                    ids.extend(engine.allocate(&ctx, &service, 9).await.unwrap());
                }
                ids
            })
        })
        .collect();

    for task in tasks {
        let ids = task.await.unwrap();
        // Each service starts from 1 and hands out a contiguous run.
        assert_eq!(ids, (1..=270).collect::<Vec<_>>());
    }
    assert_eq!(engine.services().len(), 8);
    engine.shutdown(WAIT).await;
}

#[tokio::test]
async fn durable_version_tracks_reservations() {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(
        EngineConfig {
            write_every_n: 5,
            sync_workers: 1,
            ..config()
        },
        cache.clone(),
        store.clone(),
    )
    .unwrap();

    let mut versions = Vec::new();
    for _ in 0..30 {
        engine.allocate(&ctx("req"), "orders", 50).await.unwrap();
        tokio::task::yield_now().await;
        if let Some(row) = store.get("orders") {
            versions.push(row.data_version);
        }
    }
    engine.shutdown(WAIT).await;

    assert!(versions.windows(2).all(|w| w[0] <= w[1]));
    let row = store.get("orders").unwrap();
    assert_eq!(row.data_version % 5, 0);
    assert_eq!(row.last_alloc_value, row.data_version * 100);
}
