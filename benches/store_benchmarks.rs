use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use sessionkeeper::observability::NoopSink;
use sessionkeeper::sessions::{
    InMemorySessionStore, SessionIdentity, SessionState, SessionStore, StateUpdater, UpdateMode,
};

fn bench_record_user_query(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("record_user_query");

    for mode in [UpdateMode::Legacy, UpdateMode::Locked, UpdateMode::Optimistic] {
        let store = Arc::new(InMemorySessionStore::new());
        let identity = SessionIdentity::new("Bot", "bench", mode.as_str());
        rt.block_on(store.create(&identity, SessionState::new()))
            .expect("create session");
        let updater = StateUpdater::new(store.clone(), Arc::new(NoopSink), mode);

        group.bench_function(mode.as_str(), |b| {
            b.to_async(&rt).iter(|| async {
                // Reset so the history does not grow without bound.
                store
                    .create(&identity, SessionState::new())
                    .await
                    .expect("reset session");
                updater.record_user_query(&identity, "benchmark query").await
            });
        });
    }

    group.finish();
}

fn bench_get_snapshot(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let store = InMemorySessionStore::new();
    let identity = SessionIdentity::new("Bot", "bench", "snapshot");
    rt.block_on(store.create(&identity, SessionState::new()))
        .expect("create session");

    c.bench_function("get_snapshot", |b| {
        b.to_async(&rt)
            .iter(|| async { store.get(&identity).await.expect("session exists") });
    });
}

criterion_group!(benches, bench_record_user_query, bench_get_snapshot);
criterion_main!(benches);
