use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Counter, CounterConnection, CounterStore, Document, StoreError,
    mutex::{self, Mutex, MutexGuard},
    store::compare_and_set,
};

type Collection = HashMap<String, Document>;

/// An in-process [`CounterStore`].
///
/// Collections live behind a single mutex and every clone of a
/// `MemoryStore` shares them, so clones behave like independent clients of
/// one database. Each connection operation takes the lock once, which makes
/// [`CounterConnection::atomic_update`] a genuine compare-and-swap.
///
/// Beyond the trait, the store exposes knobs used to exercise failure paths:
/// a connection cap, a simulated outage switch, raw document seeding, and
/// access counters.
///
/// ```
/// use seqblock::{BlockAllocator, MemoryStore};
///
/// let store = MemoryStore::new();
/// let allocator = BlockAllocator::with_defaults(store.clone());
///
/// allocator.allocate("id", 0).unwrap();
/// assert_eq!(store.stats().connects, 0);
///
/// allocator.allocate("id", 2).unwrap();
/// assert_eq!(store.stats().connects, 1);
/// assert_eq!(store.stats().open_connections, 0);
/// ```
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

struct Shared {
    collections: Mutex<HashMap<String, Collection>>,
    offline: AtomicBool,
    max_connections: AtomicUsize,
    open: AtomicUsize,
    counters: AccessCounters,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            max_connections: AtomicUsize::new(usize::MAX),
            open: AtomicUsize::new(0),
            counters: AccessCounters::default(),
        }
    }
}

#[derive(Default)]
struct AccessCounters {
    connects: AtomicU64,
    releases: AtomicU64,
    lookups: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    cas_misses: AtomicU64,
    collections_created: AtomicU64,
}

/// Snapshot of how a [`MemoryStore`] has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Connections successfully acquired.
    pub connects: u64,
    /// Connections released.
    pub releases: u64,
    /// Connections currently held.
    pub open_connections: usize,
    /// `find_one` calls.
    pub lookups: u64,
    /// Counter documents inserted.
    pub inserts: u64,
    /// Successful compare-and-swap updates.
    pub updates: u64,
    /// Compare-and-swap calls that found a different value.
    pub cas_misses: u64,
    /// Collections created through `ensure_collection`.
    pub collections_created: u64,
}

impl StoreStats {
    /// Total number of writes applied to the store.
    pub const fn mutations(&self) -> u64 {
        self.inserts + self.updates + self.collections_created
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of simultaneously open connections. Further
    /// [`CounterStore::connect`] calls fail with [`StoreError::Unavailable`]
    /// until a connection is released.
    #[must_use]
    pub fn with_max_connections(self, max: usize) -> Self {
        self.shared.max_connections.store(max, Ordering::Relaxed);
        self
    }

    /// Toggles a simulated outage. While unavailable, connecting and every
    /// operation on an open connection fail with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.shared.offline.store(!available, Ordering::Release);
    }

    /// Creates an empty collection, leaving an existing one untouched.
    ///
    /// # Errors
    ///
    /// Fails only if the internal lock is poisoned.
    pub fn create_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.shared
            .lock()?
            .entry(collection.to_owned())
            .or_default();
        Ok(())
    }

    /// Stores `doc` under `name` verbatim, bypassing every check. Creates the
    /// collection if needed. Useful for seeding legacy or damaged data.
    ///
    /// # Errors
    ///
    /// Fails only if the internal lock is poisoned.
    pub fn put_document(
        &self,
        collection: &str,
        name: &str,
        doc: Document,
    ) -> Result<(), StoreError> {
        self.shared
            .lock()?
            .entry(collection.to_owned())
            .or_default()
            .insert(name.to_owned(), doc);
        Ok(())
    }

    /// Returns a copy of the raw document stored under `name`.
    ///
    /// # Errors
    ///
    /// Fails only if the internal lock is poisoned.
    pub fn document(&self, collection: &str, name: &str) -> Result<Option<Document>, StoreError> {
        Ok(self
            .shared
            .lock()?
            .get(collection)
            .and_then(|docs| docs.get(name))
            .cloned())
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.shared.counters;
        StoreStats {
            connects: c.connects.load(Ordering::Acquire),
            releases: c.releases.load(Ordering::Acquire),
            open_connections: self.shared.open.load(Ordering::Acquire),
            lookups: c.lookups.load(Ordering::Acquire),
            inserts: c.inserts.load(Ordering::Acquire),
            updates: c.updates.load(Ordering::Acquire),
            cas_misses: c.cas_misses.load(Ordering::Acquire),
            collections_created: c.collections_created.load(Ordering::Acquire),
        }
    }
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Collection>>, StoreError> {
        mutex::lock(&self.collections)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(StoreError::unavailable("memory store is offline"));
        }
        Ok(())
    }
}

impl CounterStore for MemoryStore {
    type Conn<'a> = MemoryConnection<'a>;

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn connect(&self) -> Result<Self::Conn<'_>, StoreError> {
        self.shared.check_online()?;

        let max = self.shared.max_connections.load(Ordering::Relaxed);
        self.shared
            .open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < max).then_some(open + 1)
            })
            .map_err(|_| {
                StoreError::unavailable(format!("connection limit of {max} reached"))
            })?;

        self.shared.counters.connects.fetch_add(1, Ordering::AcqRel);
        Ok(MemoryConnection {
            shared: &self.shared,
        })
    }
}

/// A connection borrowed from a [`MemoryStore`]. Released on drop.
pub struct MemoryConnection<'a> {
    shared: &'a Shared,
}

impl Drop for MemoryConnection<'_> {
    fn drop(&mut self) {
        self.shared.open.fetch_sub(1, Ordering::AcqRel);
        self.shared.counters.releases.fetch_add(1, Ordering::AcqRel);
    }
}

impl CounterConnection for MemoryConnection<'_> {
    fn collection_exists(&mut self, collection: &str) -> Result<bool, StoreError> {
        self.shared.check_online()?;
        Ok(self.shared.lock()?.contains_key(collection))
    }

    fn ensure_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        self.shared.check_online()?;
        let mut collections = self.shared.lock()?;
        if !collections.contains_key(collection) {
            collections.insert(collection.to_owned(), Collection::new());
            self.shared
                .counters
                .collections_created
                .fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn find_one(&mut self, collection: &str, name: &str) -> Result<Option<Document>, StoreError> {
        self.shared.check_online()?;
        self.shared.counters.lookups.fetch_add(1, Ordering::AcqRel);
        Ok(self
            .shared
            .lock()?
            .get(collection)
            .and_then(|docs| docs.get(name))
            .cloned())
    }

    fn insert(&mut self, collection: &str, counter: &Counter) -> Result<(), StoreError> {
        self.shared.check_online()?;
        let mut collections = self.shared.lock()?;
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound {
                collection: collection.to_owned(),
            })?;

        if docs.contains_key(&counter.name) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_owned(),
                name: counter.name.clone(),
            });
        }

        docs.insert(counter.name.clone(), counter.to_document());
        self.shared.counters.inserts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn atomic_update(
        &mut self,
        collection: &str,
        name: &str,
        expected: i64,
        new_value: i64,
    ) -> Result<bool, StoreError> {
        self.shared.check_online()?;
        let mut collections = self.shared.lock()?;
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound {
                collection: collection.to_owned(),
            })?;

        let swapped = docs
            .get_mut(name)
            .is_some_and(|doc| compare_and_set(doc, expected, new_value));

        let counter = if swapped {
            &self.shared.counters.updates
        } else {
            &self.shared.counters.cas_misses
        };
        counter.fetch_add(1, Ordering::AcqRel);

        Ok(swapped)
    }
}
