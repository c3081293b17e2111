use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Block, BlockAllocator, CounterStore, Error, Result,
    mutex::{self, Mutex, MutexGuard},
};

/// Hands out single identifiers for one counter name from a locally cached
/// [`Block`].
///
/// Each refill reserves `batch_size` identifiers through the wrapped
/// [`BlockAllocator`], so the store is touched once per batch instead of once
/// per identifier. Identifiers left in the cache when the generator is
/// dropped are never handed out; sequences may therefore have gaps but never
/// duplicates.
///
/// The cache sits behind an [`Arc<Mutex<_>>`], so clones share it and values
/// from one generator (and its clones) are strictly ascending. Separate
/// generators for the same name stay disjoint because each refill is a
/// regular allocation.
///
/// ```
/// use seqblock::{BlockAllocator, MemoryStore, SequenceGenerator};
///
/// let store = MemoryStore::new();
/// let generator =
///     SequenceGenerator::new(BlockAllocator::with_defaults(store.clone()), "ticket", 10);
///
/// assert_eq!(generator.next_value().unwrap(), 0);
/// assert_eq!(generator.next_values(3).unwrap(), vec![1, 2, 3]);
///
/// // One store round-trip served all four values.
/// assert_eq!(store.stats().connects, 1);
/// ```
pub struct SequenceGenerator<S> {
    allocator: BlockAllocator<S>,
    name: String,
    batch_size: u64,
    state: Arc<Mutex<Block>>,
}

impl<S> Clone for SequenceGenerator<S> {
    fn clone(&self) -> Self {
        Self {
            allocator: self.allocator.clone(),
            name: self.name.clone(),
            batch_size: self.batch_size,
            state: Arc::clone(&self.state),
        }
    }
}

impl<S> core::fmt::Debug for SequenceGenerator<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SequenceGenerator")
            .field("name", &self.name)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl<S> SequenceGenerator<S>
where
    S: CounterStore,
{
    /// Creates a generator for `name` that reserves `batch_size` identifiers
    /// per refill. A `batch_size` of `0` is treated as `1`.
    pub fn new(allocator: BlockAllocator<S>, name: impl Into<String>, batch_size: u64) -> Self {
        Self {
            allocator,
            name: name.into(),
            batch_size: batch_size.max(1),
            state: Arc::new(Mutex::new(Block::empty())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Returns the next identifier, refilling the cache if it is empty.
    ///
    /// # Errors
    ///
    /// Propagates any [`Error`](crate::Error) from the refill allocation, or
    /// [`Error::LockPoisoned`](crate::Error::LockPoisoned) if a thread
    /// panicked while holding the cache.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self), fields(name = %self.name)))]
    pub fn next_value(&self) -> Result<i64> {
        let mut cache = self.lock()?;
        if cache.is_empty() {
            *cache = self.refill(self.batch_size)?;
        }
        let taken = cache.take_front(1);
        // A refill never returns an empty block for a non-zero size.
        Ok(taken.first().unwrap_or_default())
    }

    /// Returns the next `n` identifiers in ascending order.
    ///
    /// Cached identifiers are drained first. If more are needed, a single
    /// refill reserves at least the shortfall.
    ///
    /// # Errors
    ///
    /// Same as [`Self::next_value`]. On error, identifiers already drained
    /// from the cache by this call are lost. Returns
    /// [`Error::InvalidRequest`](crate::Error::InvalidRequest) without
    /// touching the cache if `n` exceeds `i64::MAX`.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self), fields(name = %self.name)))]
    pub fn next_values(&self, n: usize) -> Result<Vec<i64>> {
        let mut remaining = u64::try_from(n)
            .ok()
            .filter(|&n| i64::try_from(n).is_ok())
            .ok_or_else(|| Error::InvalidRequest {
                reason: format!("cannot generate {n} values, at most {} fit", i64::MAX),
            })?;

        let mut cache = self.lock()?;
        let batch = usize::try_from(self.batch_size).unwrap_or(usize::MAX);
        let mut out = Vec::with_capacity(n.min(batch));

        while remaining > 0 {
            if cache.is_empty() {
                *cache = self.refill(self.batch_size.max(remaining))?;
            }
            let taken = cache.take_front(remaining);
            remaining -= taken.len();
            out.extend(taken);
        }
        Ok(out)
    }

    fn refill(&self, size: u64) -> Result<Block> {
        let block = self.allocator.allocate(&self.name, size)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(first = ?block.first(), len = block.len(), "refilled cache");
        Ok(block)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Block>> {
        mutex::lock(&self.state)
    }
}
