//! Error types for counter stores and block allocation.
//!
//! [`StoreError`] is what a [`CounterStore`] driver reports. [`Error`] is what
//! callers of [`BlockAllocator`] see: store failures are folded into
//! [`Error::StoreUnavailable`] except for duplicate-key conflicts, which the
//! allocator resolves internally.
//!
//! ## Error Cases
//! - `Configuration`: the backing collection must exist but does not.
//! - `StoreUnavailable`: the store could not be reached or an operation
//!   failed. Safe to retry the whole allocation.
//! - `CorruptState`: the stored counter document is malformed. Never
//!   repaired automatically.
//! - `Conflict`: every compare-and-swap attempt lost to a concurrent writer.
//! - `Overflow`: the counter cannot advance without leaving the `i64` range.
//! - `InvalidRequest`: the caller asked for something that cannot be served.
//!
//! [`CounterStore`]: crate::CounterStore
//! [`BlockAllocator`]: crate::BlockAllocator

/// Result alias defaulting to the allocator [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Failures reported by a counter store driver.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// A connection could not be acquired or an operation failed.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// An insert violated the uniqueness constraint on the counter name.
    #[error("duplicate counter `{name}` in collection `{collection}`")]
    DuplicateKey { collection: String, name: String },

    /// The operation targeted a collection that does not exist.
    #[error("collection `{collection}` not found")]
    CollectionNotFound { collection: String },

    /// The operation was cancelled or timed out before it completed.
    #[error("store operation interrupted: {reason}")]
    Interrupted { reason: String },
}

impl StoreError {
    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Unified error type for block allocation.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The backing collection is required to exist but is missing.
    #[error("collection `{collection}` does not exist and auto-creation is disabled")]
    Configuration { collection: String },

    /// The store could not serve the request.
    #[error("counter store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The stored counter document is malformed.
    #[error("counter `{name}` is corrupt: {reason}")]
    CorruptState { name: String, reason: String },

    /// Every compare-and-swap attempt lost to a concurrent writer.
    #[error("counter `{name}` lost {attempts} consecutive compare-and-swap attempts")]
    Conflict { name: String, attempts: u32 },

    /// Advancing the counter would leave the `i64` range.
    #[error("counter `{name}` cannot advance by {size} from {value} without overflowing")]
    Overflow { name: String, value: i64, size: u64 },

    /// The request itself is invalid.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A local lock was poisoned by a panicking thread.
    #[error("lock poisoned")]
    LockPoisoned,
}

impl Error {
    /// Returns `true` if repeating the whole allocation may succeed.
    ///
    /// Store outages and exhausted compare-and-swap retries are transient;
    /// configuration mistakes, corrupt documents and overflow are not.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Conflict { .. })
    }

    pub(crate) fn corrupt(name: &str, reason: impl Into<String>) -> Self {
        Self::CorruptState {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

#[cfg(not(feature = "parking-lot"))]
use crate::mutex::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
// Convert all poisoned lock errors to a simplified `LockPoisoned`
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}

#[cfg(not(feature = "parking-lot"))]
impl<T> From<PoisonError<MutexGuard<'_, T>>> for StoreError {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::unavailable("store lock poisoned")
    }
}
