use crate::{Error, Result};

/// Options controlling where counters live and how they start.
///
/// Passed to [`BlockAllocator::new`] at construction. Defaults match the
/// conventional setup: counters are kept in the `IncrementTable` collection,
/// the first identifier ever handed out is `0`, and the collection is created
/// on demand.
///
/// ```
/// use seqblock::AllocatorConfig;
///
/// let config = AllocatorConfig::default()
///     .with_collection_name("Sequences")
///     .with_initial_value(1_000)
///     .with_require_existing_collection(true);
///
/// assert_eq!(config.collection_name, "Sequences");
/// assert_eq!(config.seed_value("orders").unwrap(), 999);
/// ```
///
/// [`BlockAllocator::new`]: crate::BlockAllocator::new
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Name of the collection holding counter documents.
    pub collection_name: String,
    /// First identifier returned for a brand-new counter.
    pub initial_value: i64,
    /// Fail with [`Error::Configuration`] instead of creating a missing
    /// collection.
    pub require_existing_collection: bool,
    /// Upper bound on compare-and-swap attempts per allocation before
    /// [`Error::Conflict`] is surfaced.
    pub max_cas_attempts: u32,
}

impl AllocatorConfig {
    pub const DEFAULT_COLLECTION_NAME: &'static str = "IncrementTable";
    pub const DEFAULT_INITIAL_VALUE: i64 = 0;
    pub const DEFAULT_MAX_CAS_ATTEMPTS: u32 = 16;

    #[must_use]
    pub fn with_collection_name(mut self, collection_name: impl Into<String>) -> Self {
        self.collection_name = collection_name.into();
        self
    }

    #[must_use]
    pub const fn with_initial_value(mut self, initial_value: i64) -> Self {
        self.initial_value = initial_value;
        self
    }

    #[must_use]
    pub const fn with_require_existing_collection(mut self, require: bool) -> Self {
        self.require_existing_collection = require;
        self
    }

    /// Sets the compare-and-swap retry bound. A value of `0` is raised to `1`
    /// so every allocation makes at least one attempt.
    #[must_use]
    pub fn with_max_cas_attempts(mut self, attempts: u32) -> Self {
        self.max_cas_attempts = attempts.max(1);
        self
    }

    /// Value stored in a freshly created counter document: one below
    /// [`Self::initial_value`], so the first allocation yields exactly the
    /// initial value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overflow`] when `initial_value` is `i64::MIN`.
    pub fn seed_value(&self, name: &str) -> Result<i64> {
        self.initial_value
            .checked_sub(1)
            .ok_or_else(|| Error::Overflow {
                name: name.to_owned(),
                value: self.initial_value,
                size: 1,
            })
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            collection_name: Self::DEFAULT_COLLECTION_NAME.to_owned(),
            initial_value: Self::DEFAULT_INITIAL_VALUE,
            require_existing_collection: false,
            max_cas_attempts: Self::DEFAULT_MAX_CAS_ATTEMPTS,
        }
    }
}
