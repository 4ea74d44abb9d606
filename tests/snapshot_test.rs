//! Snapshot and hydration tests
//!
//! Whole-store images written through the snapshot manager and restored into
//! a fresh store, on the local filesystem and through a failing object store.

use incr::aggregation::{RangeHint, ResolutionLadder, ResolutionSpec};
use incr::clock::SimulatedClock;
use incr::persistence::object_store::IoFuture;
use incr::persistence::{
    decode_snapshot, HydrateOutcome, InMemoryObjectStore, LocalFsObjectStore, ObjectStore,
    SnapshotConfig, SnapshotManager, SnapshotReader,
};
use incr::store::{AggregationStore, Submission};
use std::io::Error as IoError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NOW: i64 = 1_700_000_000;
const HINTS: [&str; 5] = ["total", "live", "hourly", "daily", "weekly"];

fn store_at(clock: &SimulatedClock) -> AggregationStore<SimulatedClock> {
    AggregationStore::with_clock(Arc::new(ResolutionLadder::default()), clock.clone())
}

fn populate(store: &AggregationStore<SimulatedClock>, clock: &SimulatedClock) {
    for step in 0..40 {
        let sender = format!("user-{}", step % 7);
        store
            .submit(&Submission::new("web", "views", step as f64).with_sender(&sender))
            .unwrap();
        store.submit(&Submission::new("web", "errors", 1.0)).unwrap();
        if step % 10 == 0 {
            store.submit(&Submission::new("api", "calls", 0.5)).unwrap();
        }
        clock.advance(3_600);
    }
}

fn assert_same(a: &AggregationStore<SimulatedClock>, b: &AggregationStore<SimulatedClock>) {
    for ns in ["web", "api"] {
        assert_eq!(a.list(ns), b.list(ns));
        for name in a.list(ns) {
            for hint in HINTS {
                let hint: RangeHint = hint.parse().unwrap();
                assert_eq!(
                    a.query(ns, &name, &hint).unwrap(),
                    b.query(ns, &name, &hint).unwrap(),
                    "{}:{} {:?}",
                    ns,
                    name,
                    hint
                );
            }
        }
    }
}

#[tokio::test]
async fn test_local_fs_roundtrip_all_resolutions() {
    let dir = tempfile::tempdir().unwrap();
    let objects = Arc::new(LocalFsObjectStore::new(dir.path()));
    let clock = SimulatedClock::new(NOW);

    let original = store_at(&clock);
    populate(&original, &clock);
    let stats = SnapshotManager::new(original.clone(), Arc::clone(&objects), SnapshotConfig::test())
        .snapshot_once()
        .await
        .unwrap();
    assert_eq!(stats.counters, 3);

    let on_disk = std::fs::read(dir.path().join("events.snapshot")).unwrap();
    assert_eq!(on_disk.len(), stats.size_bytes);
    let reader = SnapshotReader::open(&on_disk).unwrap();
    assert_eq!(reader.counter_count(), 3);
    assert_eq!(reader.created_at(), clock_secs(&clock));
    assert!(!dir.path().join("events.snapshot.tmp").exists());

    let restored = store_at(&clock);
    let outcome = SnapshotManager::new(restored.clone(), objects, SnapshotConfig::test())
        .hydrate()
        .await;
    assert_eq!(outcome, HydrateOutcome::Restored { counters: 3 });
    assert_same(&original, &restored);
}

fn clock_secs(clock: &SimulatedClock) -> i64 {
    use incr::clock::Clock;
    clock.now().as_secs()
}

#[tokio::test]
async fn test_restored_estimator_continues() {
    let objects = Arc::new(InMemoryObjectStore::new());
    let clock = SimulatedClock::new(NOW);
    let original = store_at(&clock);
    for sender in ["alice", "bob", "carol"] {
        original
            .submit(&Submission::new("web", "visits", 1.0).with_sender(sender))
            .unwrap();
    }
    SnapshotManager::new(original, Arc::clone(&objects), SnapshotConfig::test())
        .snapshot_once()
        .await
        .unwrap();

    let restored = store_at(&clock);
    SnapshotManager::new(restored.clone(), objects, SnapshotConfig::test())
        .hydrate()
        .await;

    let daily = RangeHint::Resolution("daily".into());
    assert_eq!(restored.query("web", "visits", &daily).unwrap()[0].unique, 3);

    // A repeat sender does not count twice after restart; a new one does
    restored
        .submit(&Submission::new("web", "visits", 1.0).with_sender("bob"))
        .unwrap();
    let head = restored.query("web", "visits", &daily).unwrap()[0];
    assert_eq!((head.count, head.unique), (4, 3));

    restored
        .submit(&Submission::new("web", "visits", 1.0).with_sender("dave"))
        .unwrap();
    let head = restored.query("web", "visits", &daily).unwrap()[0];
    assert_eq!((head.count, head.unique), (5, 4));
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let objects = Arc::new(LocalFsObjectStore::new(dir.path()));
    let clock = SimulatedClock::new(NOW);

    let original = store_at(&clock);
    populate(&original, &clock);
    SnapshotManager::new(original, Arc::clone(&objects), SnapshotConfig::test())
        .snapshot_once()
        .await
        .unwrap();

    let path = dir.path().join("events.snapshot");
    let mut bytes = std::fs::read(&path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x5a;
    std::fs::write(&path, &bytes).unwrap();

    let fresh = store_at(&clock);
    let outcome = SnapshotManager::new(fresh.clone(), objects, SnapshotConfig::test())
        .hydrate()
        .await;
    assert!(matches!(outcome, HydrateOutcome::Discarded { .. }));
    assert!(fresh.is_empty());
}

#[tokio::test]
async fn test_snapshot_for_other_ladder_is_discarded() {
    let objects = Arc::new(InMemoryObjectStore::new());
    let clock = SimulatedClock::new(NOW);
    let original = store_at(&clock);
    populate(&original, &clock);
    SnapshotManager::new(original, Arc::clone(&objects), SnapshotConfig::test())
        .snapshot_once()
        .await
        .unwrap();

    let ladder = ResolutionLadder::new(vec![
        ResolutionSpec::total("total"),
        ResolutionSpec::history("minute", 60, 60),
    ])
    .unwrap();
    let fresh = AggregationStore::with_clock(Arc::new(ladder), clock.clone());
    let outcome = SnapshotManager::new(fresh.clone(), objects, SnapshotConfig::test())
        .hydrate()
        .await;
    assert!(matches!(outcome, HydrateOutcome::Discarded { .. }));
    assert!(fresh.is_empty());
}

/// Object store whose writes fail while `failing` is set
#[derive(Clone, Default)]
struct FlakyObjectStore {
    inner: InMemoryObjectStore,
    failing: Arc<AtomicBool>,
}

impl FlakyObjectStore {
    fn check(&self) -> std::io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IoError::other("injected write failure"));
        }
        Ok(())
    }
}

impl ObjectStore for FlakyObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> IoFuture<'a, ()> {
        Box::pin(async move {
            self.check()?;
            self.inner.put(key, data).await
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> IoFuture<'a, Vec<u8>> {
        self.inner.get(key)
    }

    fn exists<'a>(&'a self, key: &'a str) -> IoFuture<'a, bool> {
        self.inner.exists(key)
    }

    fn delete<'a>(&'a self, key: &'a str) -> IoFuture<'a, ()> {
        self.inner.delete(key)
    }

    fn list<'a>(&'a self, prefix: &'a str) -> IoFuture<'a, Vec<String>> {
        self.inner.list(prefix)
    }

    fn rename<'a>(&'a self, from: &'a str, to: &'a str) -> IoFuture<'a, ()> {
        Box::pin(async move {
            self.check()?;
            self.inner.rename(from, to).await
        })
    }
}

#[tokio::test]
async fn test_failed_cycles_are_retried() {
    let objects = Arc::new(FlakyObjectStore::default());
    objects.failing.store(true, Ordering::SeqCst);
    let clock = SimulatedClock::new(NOW);
    let store = store_at(&clock);
    store.submit(&Submission::new("web", "views", 1.0)).unwrap();

    let manager = SnapshotManager::new(store.clone(), Arc::clone(&objects), SnapshotConfig::test());
    assert!(manager.snapshot_once().await.is_err());
    let handle = manager.spawn();

    // Several failing ticks go by; the store keeps serving
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!objects.inner.exists("events.snapshot").await.unwrap());
    store.submit(&Submission::new("web", "views", 1.0)).unwrap();

    objects.failing.store(false, Ordering::SeqCst);
    let mut written = false;
    for _ in 0..100 {
        if objects.inner.exists("events.snapshot").await.unwrap() {
            written = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(written, "snapshot never written after failures cleared");
    handle.shutdown().await;

    let image = decode_snapshot(&objects.inner.get("events.snapshot").await.unwrap()).unwrap();
    assert_eq!(image.counters.len(), 1);
    assert!(!objects.inner.exists("events.snapshot.tmp").await.unwrap());
}
