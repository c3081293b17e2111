use core::time::Duration;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::scope;

use serde_json::json;
use tempfile::TempDir;

use crate::{
    AllocatorConfig, Block, BlockAllocator, Counter, CounterConnection, CounterStore, Document,
    Error, FileStore, MemoryConnection, MemoryStore, StoreError,
};

const COLLECTION: &str = AllocatorConfig::DEFAULT_COLLECTION_NAME;

fn memory_allocator(config: AllocatorConfig) -> (MemoryStore, BlockAllocator<MemoryStore>) {
    let store = MemoryStore::new();
    (store.clone(), BlockAllocator::new(store, config))
}

fn file_allocator(config: AllocatorConfig) -> (TempDir, BlockAllocator<FileStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("counters.json"));
    (dir, BlockAllocator::new(store, config))
}

/// A store whose compare-and-swap always loses to a simulated rival writer
/// for the first `rivals` attempts. Each rival reserves `stride` ids.
struct RivalStore {
    inner: MemoryStore,
    rivals: AtomicU32,
    stride: i64,
}

struct RivalConnection<'a> {
    inner: MemoryConnection<'a>,
    rivals: &'a AtomicU32,
    stride: i64,
}

impl CounterStore for RivalStore {
    type Conn<'a> = RivalConnection<'a>;

    fn connect(&self) -> Result<Self::Conn<'_>, StoreError> {
        Ok(RivalConnection {
            inner: self.inner.connect()?,
            rivals: &self.rivals,
            stride: self.stride,
        })
    }
}

impl CounterConnection for RivalConnection<'_> {
    fn collection_exists(&mut self, collection: &str) -> Result<bool, StoreError> {
        self.inner.collection_exists(collection)
    }

    fn ensure_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        self.inner.ensure_collection(collection)
    }

    fn find_one(&mut self, collection: &str, name: &str) -> Result<Option<Document>, StoreError> {
        self.inner.find_one(collection, name)
    }

    fn insert(&mut self, collection: &str, counter: &Counter) -> Result<(), StoreError> {
        self.inner.insert(collection, counter)
    }

    fn atomic_update(
        &mut self,
        collection: &str,
        name: &str,
        expected: i64,
        new_value: i64,
    ) -> Result<bool, StoreError> {
        let rival_turn = self
            .rivals
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if rival_turn {
            let rival_won =
                self.inner
                    .atomic_update(collection, name, expected, expected + self.stride)?;
            assert!(rival_won);
        }
        self.inner
            .atomic_update(collection, name, expected, new_value)
    }
}

/// A store where a rival creates the counter between our lookup and insert.
struct BootstrapRaceStore {
    inner: MemoryStore,
    rival_value: i64,
}

struct BootstrapRaceConnection<'a> {
    inner: MemoryConnection<'a>,
    rival_value: i64,
}

impl CounterStore for BootstrapRaceStore {
    type Conn<'a> = BootstrapRaceConnection<'a>;

    fn connect(&self) -> Result<Self::Conn<'_>, StoreError> {
        Ok(BootstrapRaceConnection {
            inner: self.inner.connect()?,
            rival_value: self.rival_value,
        })
    }
}

impl CounterConnection for BootstrapRaceConnection<'_> {
    fn collection_exists(&mut self, collection: &str) -> Result<bool, StoreError> {
        self.inner.collection_exists(collection)
    }

    fn ensure_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        self.inner.ensure_collection(collection)
    }

    fn find_one(&mut self, collection: &str, name: &str) -> Result<Option<Document>, StoreError> {
        self.inner.find_one(collection, name)
    }

    fn insert(&mut self, collection: &str, counter: &Counter) -> Result<(), StoreError> {
        self.inner
            .insert(collection, &Counter::new(&counter.name, self.rival_value))?;
        self.inner.insert(collection, counter)
    }

    fn atomic_update(
        &mut self,
        collection: &str,
        name: &str,
        expected: i64,
        new_value: i64,
    ) -> Result<bool, StoreError> {
        self.inner
            .atomic_update(collection, name, expected, new_value)
    }
}

fn assert_contiguous(block: &Block, size: u64) {
    let values = block.to_vec();
    assert_eq!(values.len() as u64, size);
    for pair in values.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "block is not contiguous: {values:?}");
    }
}

fn run_first_allocation_starts_at_initial_value<S: CounterStore>(allocator: &BlockAllocator<S>) {
    assert_eq!(allocator.allocate("order_id", 1).unwrap().to_vec(), vec![100]);
    assert_eq!(
        allocator.allocate("order_id", 3).unwrap().to_vec(),
        vec![101, 102, 103]
    );
    assert_eq!(allocator.peek("order_id").unwrap(), Some(103));
}

fn run_sequential_blocks_tile_the_range<S: CounterStore>(allocator: &BlockAllocator<S>) {
    let initial = allocator.config().initial_value;
    let sizes = [1_u64, 5, 2, 10, 3, 1, 64];

    let mut all = Vec::new();
    let mut previous_high = initial - 1;
    for size in sizes {
        let block = allocator.allocate("tiles", size).unwrap();
        assert_contiguous(&block, size);
        assert_eq!(block.first(), Some(previous_high + 1));
        previous_high = block.last().unwrap();
        all.extend(block);
    }

    let total: u64 = sizes.iter().sum();
    let expected: Vec<i64> = (initial..initial + total as i64).collect();
    assert_eq!(all, expected);
    assert_eq!(allocator.peek("tiles").unwrap(), Some(previous_high));
}

fn run_counters_are_independent_per_name<S: CounterStore>(allocator: &BlockAllocator<S>) {
    assert_eq!(allocator.allocate("a", 2).unwrap().to_vec(), vec![0, 1]);
    assert_eq!(allocator.allocate("b", 1).unwrap().to_vec(), vec![0]);
    assert_eq!(allocator.allocate("a", 1).unwrap().to_vec(), vec![2]);
    assert_eq!(allocator.peek("b").unwrap(), Some(0));
    assert_eq!(allocator.peek("never").unwrap(), None);
}

fn run_rejects_invalid_requests<S: CounterStore>(allocator: &BlockAllocator<S>) {
    assert!(matches!(
        allocator.allocate("", 1),
        Err(Error::InvalidRequest { .. })
    ));
    assert!(matches!(
        allocator.allocate("huge", u64::MAX),
        Err(Error::InvalidRequest { .. })
    ));
    assert!(matches!(allocator.peek(""), Err(Error::InvalidRequest { .. })));
    // Zero-sized requests short-circuit before any validation.
    assert!(allocator.allocate("", 0).unwrap().is_empty());
}

fn run_threaded_callers_get_disjoint_ids<S>(make_allocator: impl Fn() -> BlockAllocator<S>, per_thread: usize)
where
    S: CounterStore + Send + Sync,
{
    let threads = num_cpus::get().clamp(2, 8) * 2;
    let seen = Arc::new(Mutex::new(HashSet::with_capacity(threads * per_thread)));

    scope(|s| {
        for _ in 0..threads {
            // One allocator per thread, as if each were its own process.
            let allocator = make_allocator();
            let seen = Arc::clone(&seen);
            s.spawn(move || {
                for _ in 0..per_thread {
                    let block = allocator.allocate("shared", 1).unwrap();
                    assert_eq!(block.len(), 1);
                    assert!(seen.lock().unwrap().insert(block.first().unwrap()));
                }
            });
        }
    });

    let total = threads * per_thread;
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), total, "expected {total} unique ids");
    // No gaps: exactly 0..total was handed out.
    assert_eq!(seen.iter().copied().min(), Some(0));
    assert_eq!(seen.iter().copied().max(), Some(total as i64 - 1));
    assert_eq!(make_allocator().peek("shared").unwrap(), Some(total as i64 - 1));
}

#[test]
fn memory_first_allocation_starts_at_initial_value() {
    let (_, allocator) = memory_allocator(AllocatorConfig::default().with_initial_value(100));
    run_first_allocation_starts_at_initial_value(&allocator);
}

#[test]
fn file_first_allocation_starts_at_initial_value() {
    let (_dir, allocator) = file_allocator(AllocatorConfig::default().with_initial_value(100));
    run_first_allocation_starts_at_initial_value(&allocator);
}

#[test]
fn memory_sequential_blocks_tile_the_range() {
    let (_, allocator) = memory_allocator(AllocatorConfig::default().with_initial_value(-20));
    run_sequential_blocks_tile_the_range(&allocator);
}

#[test]
fn file_sequential_blocks_tile_the_range() {
    let (_dir, allocator) = file_allocator(AllocatorConfig::default().with_initial_value(7));
    run_sequential_blocks_tile_the_range(&allocator);
}

#[test]
fn memory_counters_are_independent_per_name() {
    let (_, allocator) = memory_allocator(AllocatorConfig::default());
    run_counters_are_independent_per_name(&allocator);
}

#[test]
fn file_counters_are_independent_per_name() {
    let (_dir, allocator) = file_allocator(AllocatorConfig::default());
    run_counters_are_independent_per_name(&allocator);
}

#[test]
fn memory_rejects_invalid_requests() {
    let (store, allocator) = memory_allocator(AllocatorConfig::default());
    run_rejects_invalid_requests(&allocator);
    assert_eq!(store.stats().mutations(), 0);
}

#[test]
fn file_rejects_invalid_requests() {
    let (_dir, allocator) = file_allocator(AllocatorConfig::default());
    run_rejects_invalid_requests(&allocator);
}

#[test]
fn zero_size_never_touches_the_store() {
    let (store, allocator) = memory_allocator(AllocatorConfig::default());
    store.set_available(false);

    let block = allocator.allocate("order_id", 0).unwrap();
    assert!(block.is_empty());
    assert_eq!(store.stats(), Default::default());
}

#[test]
fn collections_keep_separate_counters() {
    let store = MemoryStore::new();
    let left = BlockAllocator::new(store.clone(), AllocatorConfig::default());
    let right = BlockAllocator::new(
        store.clone(),
        AllocatorConfig::default().with_collection_name("Other"),
    );

    assert_eq!(left.allocate("id", 2).unwrap().to_vec(), vec![0, 1]);
    assert_eq!(right.allocate("id", 1).unwrap().to_vec(), vec![0]);
    assert_eq!(
        store.document("Other", "id").unwrap(),
        Some(json!({"name": "id", "value": 0}))
    );
}

#[test]
fn persisted_value_equals_last_value_returned() {
    let (store, allocator) = memory_allocator(AllocatorConfig::default().with_initial_value(1));
    let block = allocator.allocate("id", 10).unwrap();
    assert_eq!(block.last(), Some(10));
    assert_eq!(
        store.document(COLLECTION, "id").unwrap(),
        Some(json!({"name": "id", "value": 10}))
    );

    // One insert + one update for the first call, one update afterwards.
    allocator.allocate("id", 1).unwrap();
    let stats = store.stats();
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.updates, 2);
}

#[test]
fn missing_required_collection_is_a_configuration_error() {
    let (store, allocator) = memory_allocator(
        AllocatorConfig::default()
            .with_collection_name("Sequences")
            .with_require_existing_collection(true),
    );

    let err = allocator.allocate("id", 1).unwrap_err();
    assert_eq!(
        err,
        Error::Configuration {
            collection: "Sequences".into()
        }
    );
    assert!(!err.is_retryable());
    assert_eq!(allocator.peek("id").unwrap_err(), err);

    let stats = store.stats();
    assert_eq!(stats.mutations(), 0);
    assert_eq!(store.document("Sequences", "id").unwrap(), None);
    assert_eq!(stats.open_connections, 0);
    assert_eq!(stats.connects, stats.releases);
}

#[test]
fn existing_required_collection_is_used() {
    let (store, allocator) =
        memory_allocator(AllocatorConfig::default().with_require_existing_collection(true));
    store.create_collection(COLLECTION).unwrap();

    assert_eq!(allocator.allocate("id", 2).unwrap().to_vec(), vec![0, 1]);
    assert_eq!(store.stats().collections_created, 0);
}

#[test]
fn missing_collection_is_created_on_demand() {
    let (store, allocator) = memory_allocator(AllocatorConfig::default());
    assert_eq!(allocator.peek("id").unwrap(), None);
    assert_eq!(store.stats().collections_created, 0);

    allocator.allocate("id", 1).unwrap();
    allocator.allocate("id", 1).unwrap();
    assert_eq!(store.stats().collections_created, 1);
}

#[test]
fn corrupt_counter_is_reported_and_left_alone() {
    let (store, allocator) = memory_allocator(AllocatorConfig::default());
    let damaged = json!({"name": "id", "value": "twelve"});
    store
        .put_document(COLLECTION, "id", damaged.clone())
        .unwrap();

    let err = allocator.allocate("id", 1).unwrap_err();
    assert!(matches!(err, Error::CorruptState { ref name, .. } if name == "id"));
    assert!(!err.is_retryable());
    assert!(matches!(
        allocator.peek("id"),
        Err(Error::CorruptState { .. })
    ));

    assert_eq!(store.document(COLLECTION, "id").unwrap(), Some(damaged));
    assert_eq!(store.stats().open_connections, 0);
}

#[test]
fn counter_without_value_is_corrupt() {
    let (store, allocator) = memory_allocator(AllocatorConfig::default());
    store
        .put_document(COLLECTION, "id", json!({"name": "id"}))
        .unwrap();
    assert!(matches!(
        allocator.allocate("id", 1),
        Err(Error::CorruptState { .. })
    ));
}

#[test]
fn store_outage_is_surfaced_and_retryable() {
    let (store, allocator) = memory_allocator(AllocatorConfig::default());
    allocator.allocate("id", 1).unwrap();

    store.set_available(false);
    let err = allocator.allocate("id", 1).unwrap_err();
    assert!(matches!(
        err,
        Error::StoreUnavailable(StoreError::Unavailable { .. })
    ));
    assert!(err.is_retryable());

    store.set_available(true);
    assert_eq!(allocator.allocate("id", 1).unwrap().to_vec(), vec![1]);
}

#[test]
fn connection_limit_is_surfaced_as_unavailable() {
    let store = MemoryStore::new().with_max_connections(1);
    let allocator = BlockAllocator::with_defaults(store.clone());

    let held = store.connect().unwrap();
    assert!(matches!(
        allocator.allocate("id", 1),
        Err(Error::StoreUnavailable(_))
    ));
    drop(held);
    assert_eq!(allocator.allocate("id", 1).unwrap().to_vec(), vec![0]);
}

#[test]
fn connection_is_released_on_every_path() {
    let (store, allocator) = memory_allocator(AllocatorConfig::default());

    allocator.allocate("ok", 3).unwrap();
    store
        .put_document(COLLECTION, "bad", json!(42))
        .unwrap();
    allocator.allocate("bad", 1).unwrap_err();
    store
        .put_document(COLLECTION, "full", json!({"name": "full", "value": i64::MAX}))
        .unwrap();
    allocator.allocate("full", 1).unwrap_err();
    allocator.peek("ok").unwrap();

    let stats = store.stats();
    assert_eq!(stats.connects, 4);
    assert_eq!(stats.releases, 4);
    assert_eq!(stats.open_connections, 0);
}

#[test]
fn lost_compare_and_swap_is_retried() {
    let store = RivalStore {
        inner: MemoryStore::new(),
        rivals: AtomicU32::new(2),
        stride: 10,
    };
    let inner = store.inner.clone();
    let allocator = BlockAllocator::with_defaults(store);

    // Rivals take 0..=9 and 10..=19 before our third attempt lands.
    let block = allocator.allocate("id", 1).unwrap();
    assert_eq!(block.to_vec(), vec![20]);

    let stats = inner.stats();
    assert_eq!(stats.updates, 3);
    assert_eq!(stats.cas_misses, 2);
    assert_eq!(
        inner.document(COLLECTION, "id").unwrap(),
        Some(json!({"name": "id", "value": 20}))
    );
}

#[test]
fn exhausted_compare_and_swap_surfaces_conflict() {
    let store = RivalStore {
        inner: MemoryStore::new(),
        rivals: AtomicU32::new(u32::MAX),
        stride: 1,
    };
    let inner = store.inner.clone();
    let allocator = BlockAllocator::new(store, AllocatorConfig::default().with_max_cas_attempts(3));

    let err = allocator.allocate("id", 5).unwrap_err();
    assert_eq!(
        err,
        Error::Conflict {
            name: "id".into(),
            attempts: 3
        }
    );
    assert!(err.is_retryable());

    // Only the rivals advanced the counter.
    assert_eq!(inner.stats().updates, 3);
    assert_eq!(inner.document(COLLECTION, "id").unwrap().unwrap()["value"], 2);
    assert_eq!(inner.stats().open_connections, 0);
}

#[test]
fn bootstrap_race_resumes_from_rival_counter() {
    let store = BootstrapRaceStore {
        inner: MemoryStore::new(),
        rival_value: 49,
    };
    let inner = store.inner.clone();
    let allocator = BlockAllocator::with_defaults(store);

    assert_eq!(allocator.allocate("id", 2).unwrap().to_vec(), vec![50, 51]);
    assert_eq!(inner.stats().inserts, 1);
    assert_eq!(
        inner.document(COLLECTION, "id").unwrap(),
        Some(json!({"name": "id", "value": 51}))
    );
}

#[test]
fn counter_cannot_overflow() {
    let (store, allocator) = memory_allocator(AllocatorConfig::default());
    store
        .put_document(
            COLLECTION,
            "id",
            json!({"name": "id", "value": i64::MAX - 2}),
        )
        .unwrap();

    assert!(matches!(
        allocator.allocate("id", 3),
        Err(Error::Overflow { size: 3, .. })
    ));
    assert_eq!(
        allocator.allocate("id", 2).unwrap().to_vec(),
        vec![i64::MAX - 1, i64::MAX]
    );
    assert!(matches!(
        allocator.allocate("id", 1),
        Err(Error::Overflow { value: i64::MAX, .. })
    ));
    assert_eq!(allocator.peek("id").unwrap(), Some(i64::MAX));
}

#[test]
fn minimum_initial_value_cannot_be_seeded() {
    let (store, allocator) =
        memory_allocator(AllocatorConfig::default().with_initial_value(i64::MIN));
    assert!(matches!(
        allocator.allocate("id", 1),
        Err(Error::Overflow { .. })
    ));
    let stats = store.stats();
    assert_eq!(stats.connects, 0);
    assert_eq!(stats.mutations(), 0);
}

#[test]
fn memory_threaded_callers_get_disjoint_ids() {
    let store = MemoryStore::new();
    run_threaded_callers_get_disjoint_ids(|| BlockAllocator::with_defaults(store.clone()), 500);
}

#[test]
fn file_threaded_callers_get_disjoint_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counters.json");
    run_threaded_callers_get_disjoint_ids(
        || {
            BlockAllocator::with_defaults(
                FileStore::new(&path).with_lock_timeout(Duration::from_secs(30)),
            )
        },
        10,
    );
}

#[test]
fn clones_share_the_counter() {
    let (_, allocator) = memory_allocator(AllocatorConfig::default());
    let clone = allocator.clone();
    assert_eq!(allocator.allocate("id", 1).unwrap().to_vec(), vec![0]);
    assert_eq!(clone.allocate("id", 1).unwrap().to_vec(), vec![1]);
}
