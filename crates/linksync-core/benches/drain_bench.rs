//! Benchmarks for queue replay and inbound event application
//!
//! Run with: cargo bench -p linksync-core

use std::sync::Arc;

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use linksync_core::{
    ChangeEvent, Correlation, EntityKind, Folder, FolderFields, InMemoryRemote, LocalRef,
    MemoryStore, Operation, PendingQueue, Record, RecordStore, RemoteId, SyncConfig, SyncEngine,
    SyncMeta,
};

// ============================================================================
// Fixtures
// ============================================================================

/// An engine whose queue holds `n` folder creations, half of them nested.
fn engine_with_backlog(n: usize) -> (SyncEngine, Arc<InMemoryRemote>) {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let queue = PendingQueue::new(store.clone());
    let mut parent = None;

    for i in 0..n {
        let record = Record::Folder(Folder {
            meta: SyncMeta::unsynced(0),
            name: format!("Folder {}", i),
            note: String::new(),
            parent: parent.map(LocalRef::Local),
            archived: false,
        });
        let id = store.insert(record).unwrap();
        let created = store.get(EntityKind::Folder, id).unwrap().unwrap();
        queue.enqueue(&Operation::recreate(&created).unwrap()).unwrap();
        parent = if i % 2 == 0 { Some(id) } else { None };
    }

    let remote = Arc::new(InMemoryRemote::new());
    let engine = SyncEngine::new(store, remote.clone(), SyncConfig::default()).unwrap();
    (engine, remote)
}

fn inbound_events(n: usize) -> Vec<ChangeEvent> {
    let correlation = Correlation::generate("bench-peer");
    (0..n)
        .map(|i| {
            let mut folder = FolderFields::named(format!("Remote {}", i));
            // Reference the next folder so most parents arrive late
            if i + 1 < n {
                folder.parent = Some(RemoteId(1_000 + i as i64 + 1));
            }
            ChangeEvent {
                operation: Operation::CreateFolder {
                    id: Some(RemoteId(1_000 + i as i64)),
                    folder,
                },
                correlation: correlation.clone(),
                event_timestamp: i as i64 + 1,
            }
        })
        .collect()
}

// ============================================================================
// Drain Benchmarks
// ============================================================================

fn bench_drain(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("drain");

    for n in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("folder_creations", n), &n, |b, &n| {
            b.to_async(&runtime).iter_batched(
                || engine_with_backlog(n),
                |(engine, remote)| async move {
                    let report = engine.drain().await.unwrap();
                    black_box((report, remote))
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// ============================================================================
// Apply Benchmarks
// ============================================================================

fn bench_apply_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_batch");

    for n in [10usize, 100, 1000] {
        let events = inbound_events(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("dangling_chain", n), &events, |b, events| {
            b.iter_batched(
                || {
                    SyncEngine::new(
                        Arc::new(MemoryStore::new()),
                        Arc::new(InMemoryRemote::new()),
                        SyncConfig::default(),
                    )
                    .unwrap()
                },
                |engine| black_box(engine.applier().apply_batch(events)),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_drain, bench_apply_batch);
criterion_main!(benches);
