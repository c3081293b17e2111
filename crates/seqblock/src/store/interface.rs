use crate::{Counter, Document, StoreError};

/// A document store able to hold counter collections.
///
/// The store hands out scoped connections. A connection is released when it
/// is dropped, so every exit path of an allocation (success, error, early
/// return) gives it back.
pub trait CounterStore {
    /// Connection type borrowed from the store for the duration of one
    /// allocation.
    type Conn<'a>: CounterConnection
    where
        Self: 'a;

    /// Acquires a connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no connection can be acquired,
    /// or [`StoreError::Interrupted`] if acquisition timed out.
    fn connect(&self) -> Result<Self::Conn<'_>, StoreError>;
}

/// Operations the allocator needs from a connected store.
///
/// Documents within a collection are keyed by counter name and the store must
/// enforce uniqueness on that key: a second insert for the same name fails
/// with [`StoreError::DuplicateKey`], distinguishable from other failures.
pub trait CounterConnection {
    fn collection_exists(&mut self, collection: &str) -> Result<bool, StoreError>;

    /// Creates the collection if absent. No-op if present.
    fn ensure_collection(&mut self, collection: &str) -> Result<(), StoreError>;

    /// Looks up the raw document stored under `name`.
    fn find_one(&mut self, collection: &str, name: &str) -> Result<Option<Document>, StoreError>;

    /// Inserts a new counter document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateKey`] if a document for the same name
    /// already exists.
    fn insert(&mut self, collection: &str, counter: &Counter) -> Result<(), StoreError>;

    /// Compare-and-swap on the counter value.
    ///
    /// Sets the stored value to `new_value` and returns `true` only if it
    /// still equals `expected`. Returns `false` on mismatch or if the
    /// document has disappeared, leaving the store untouched.
    fn atomic_update(
        &mut self,
        collection: &str,
        name: &str,
        expected: i64,
        new_value: i64,
    ) -> Result<bool, StoreError>;
}
