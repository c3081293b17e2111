use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    AllocatorConfig, Block, Counter, CounterConnection, CounterStore, Error, Result, StoreError,
};

/// Reserves contiguous blocks of identifiers from named counters.
///
/// The allocator keeps no mutable state of its own: the counter document in
/// the store is the only source of truth. Any number of allocators, in any
/// number of processes, may serve the same counter name concurrently as long
/// as they share the store. The read-modify-write of the counter value is a
/// compare-and-swap ([`CounterConnection::atomic_update`]) retried up to
/// [`AllocatorConfig::max_cas_attempts`] times, so concurrent callers never
/// receive overlapping blocks.
///
/// Cloning is cheap; clones share the store handle.
///
/// ## Allocation steps
///
/// 1. A zero-sized request returns [`Block::empty`] without touching the
///    store.
/// 2. A connection is acquired and held until the call returns.
/// 3. The collection is checked (or created, unless
///    [`AllocatorConfig::require_existing_collection`] is set).
/// 4. The counter is looked up. A missing counter is inserted with
///    `initial_value - 1`; losing that insert to a concurrent creator is
///    detected through [`StoreError::DuplicateKey`] and the lookup resumes.
/// 5. The counter is re-read, advanced by `size` with compare-and-swap, and
///    the block `value + 1 ..= value + size` is returned.
pub struct BlockAllocator<S> {
    store: Arc<S>,
    config: AllocatorConfig,
}

impl<S> Clone for BlockAllocator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S> core::fmt::Debug for BlockAllocator<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> BlockAllocator<S>
where
    S: CounterStore,
{
    /// Creates an allocator over `store` with the given configuration.
    pub fn new(store: S, config: AllocatorConfig) -> Self {
        Self::from_shared(Arc::new(store), config)
    }

    /// Creates an allocator over an already shared store handle.
    pub fn from_shared(store: Arc<S>, config: AllocatorConfig) -> Self {
        Self { store, config }
    }

    /// Creates an allocator using [`AllocatorConfig::default`].
    pub fn with_defaults(store: S) -> Self {
        Self::new(store, AllocatorConfig::default())
    }

    pub const fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reserves the next `size` identifiers for the counter `name`.
    ///
    /// The returned block is contiguous and ascending, and every value in it
    /// is greater than any value returned by a previously completed call for
    /// the same name. After success the persisted counter equals the block's
    /// last value. The call is all-or-nothing: it either returns the whole
    /// block or an error, never a shorter block.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `name` is empty or `size` exceeds
    ///   `i64::MAX`.
    /// - [`Error::Configuration`] if the collection must already exist but
    ///   does not.
    /// - [`Error::StoreUnavailable`] if the store fails. Safe to retry.
    /// - [`Error::CorruptState`] if the stored counter is malformed.
    /// - [`Error::Conflict`] if every compare-and-swap attempt lost.
    /// - [`Error::Overflow`] if the counter would leave the `i64` range.
    ///
    /// # Example
    ///
    /// ```
    /// use seqblock::{AllocatorConfig, BlockAllocator, MemoryStore};
    ///
    /// let allocator = BlockAllocator::with_defaults(MemoryStore::new());
    ///
    /// assert!(allocator.allocate("sku", 0).unwrap().is_empty());
    /// assert_eq!(allocator.allocate("sku", 3).unwrap().to_vec(), vec![0, 1, 2]);
    /// assert_eq!(allocator.allocate("sku", 2).unwrap().to_vec(), vec![3, 4]);
    /// ```
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(collection = %self.config.collection_name))
    )]
    pub fn allocate(&self, name: &str, size: u64) -> Result<Block> {
        if size == 0 {
            return Ok(Block::empty());
        }
        validate_name(name)?;
        let step = i64::try_from(size).map_err(|_| Error::InvalidRequest {
            reason: format!("block size {size} exceeds {}", i64::MAX),
        })?;

        let seed = self.config.seed_value(name)?;

        let mut conn = self.store.connect()?;
        self.prepare_collection(&mut conn)?;

        let max_attempts = self.config.max_cas_attempts.max(1);
        let mut counter = self.locate_or_create(&mut conn, name, seed)?;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let base = counter.value;
            let high = base.checked_add(step).ok_or_else(|| Error::Overflow {
                name: name.to_owned(),
                value: base,
                size,
            })?;

            if conn.atomic_update(&self.config.collection_name, name, base, high)? {
                #[cfg(feature = "tracing")]
                tracing::debug!(base, high, attempts, "reserved block");
                return Ok(Block::new(base + 1, size));
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(base, attempts, "compare-and-swap lost to a concurrent writer");

            if attempts >= max_attempts {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempts, "giving up after repeated compare-and-swap conflicts");
                return Err(Error::Conflict {
                    name: name.to_owned(),
                    attempts,
                });
            }

            counter = self.read_existing(&mut conn, name)?;
        }
    }

    /// Returns the current high-water mark of `name` without advancing it.
    ///
    /// `None` means no identifier has been allocated for `name` yet. Never
    /// creates the collection or the counter.
    ///
    /// # Errors
    ///
    /// Same as [`Self::allocate`], minus the conflict and overflow cases.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(collection = %self.config.collection_name))
    )]
    pub fn peek(&self, name: &str) -> Result<Option<i64>> {
        validate_name(name)?;
        let collection = &self.config.collection_name;
        let mut conn = self.store.connect()?;

        if !conn.collection_exists(collection)? {
            if self.config.require_existing_collection {
                return Err(self.missing_collection());
            }
            return Ok(None);
        }

        conn.find_one(collection, name)?
            .map(|doc| Counter::from_document(name, &doc).map(|counter| counter.value))
            .transpose()
    }

    fn prepare_collection<C: CounterConnection>(&self, conn: &mut C) -> Result<()> {
        let collection = &self.config.collection_name;
        if self.config.require_existing_collection {
            if !conn.collection_exists(collection)? {
                #[cfg(feature = "tracing")]
                tracing::error!("required collection is missing");
                return Err(self.missing_collection());
            }
            return Ok(());
        }
        conn.ensure_collection(collection)?;
        Ok(())
    }

    /// Finds the counter, inserting it with the seed value if absent.
    fn locate_or_create<C: CounterConnection>(
        &self,
        conn: &mut C,
        name: &str,
        seed: i64,
    ) -> Result<Counter> {
        let collection = &self.config.collection_name;
        if let Some(doc) = conn.find_one(collection, name)? {
            return Counter::from_document(name, &doc);
        }

        let seed = Counter::new(name, seed);
        match conn.insert(collection, &seed) {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(seed = seed.value, "created counter");
            }
            Err(StoreError::DuplicateKey { .. }) => {
                // Another caller created it between our lookup and insert.
                #[cfg(feature = "tracing")]
                tracing::debug!("counter created concurrently, resuming from stored value");
            }
            Err(e) => return Err(e.into()),
        }

        self.read_existing(conn, name)
    }

    fn read_existing<C: CounterConnection>(&self, conn: &mut C, name: &str) -> Result<Counter> {
        match conn.find_one(&self.config.collection_name, name)? {
            Some(doc) => Counter::from_document(name, &doc),
            None => Err(Error::corrupt(name, "counter document disappeared")),
        }
    }

    fn missing_collection(&self) -> Error {
        Error::Configuration {
            collection: self.config.collection_name.clone(),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidRequest {
            reason: "counter name must not be empty".to_owned(),
        });
    }
    Ok(())
}
