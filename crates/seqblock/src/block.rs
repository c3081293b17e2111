use core::ops::RangeInclusive;

/// A contiguous, ascending run of identifiers reserved by one allocation.
///
/// A block never owns its values individually; it is the pair `(first, len)`
/// and yields `first, first + 1, ..., first + len - 1`. Empty blocks are
/// produced for zero-sized requests.
///
/// ```
/// use seqblock::{BlockAllocator, MemoryStore};
///
/// let allocator = BlockAllocator::with_defaults(MemoryStore::new());
/// let block = allocator.allocate("invoice_id", 4).unwrap();
///
/// assert_eq!(block.first(), Some(0));
/// assert_eq!(block.last(), Some(3));
/// assert_eq!(block.iter().sum::<i64>(), 6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    first: i64,
    len: u64,
}

impl Block {
    /// A block holding no identifiers.
    pub const fn empty() -> Self {
        Self { first: 0, len: 0 }
    }

    /// Callers guarantee `first + len - 1` fits in an `i64`.
    pub(crate) const fn new(first: i64, len: u64) -> Self {
        if len == 0 {
            return Self::empty();
        }
        Self { first, len }
    }

    pub const fn len(&self) -> u64 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lowest identifier in the block.
    pub const fn first(&self) -> Option<i64> {
        if self.is_empty() {
            None
        } else {
            Some(self.first)
        }
    }

    /// Highest identifier in the block, which is also the counter's
    /// high-water mark right after this block was reserved.
    pub const fn last(&self) -> Option<i64> {
        if self.is_empty() {
            None
        } else {
            Some(self.first + (self.len - 1) as i64)
        }
    }

    pub const fn contains(&self, value: i64) -> bool {
        match self.last() {
            Some(last) => self.first <= value && value <= last,
            None => false,
        }
    }

    /// The block as an inclusive range. Empty blocks yield an empty range.
    pub fn as_range(&self) -> RangeInclusive<i64> {
        match self.last() {
            Some(last) => self.first..=last,
            #[allow(clippy::reversed_empty_ranges)]
            None => 1..=0,
        }
    }

    pub fn iter(&self) -> RangeInclusive<i64> {
        self.as_range()
    }

    pub fn to_vec(&self) -> Vec<i64> {
        self.iter().collect()
    }

    /// Splits off the first `n` identifiers, leaving the remainder in `self`.
    /// Takes the whole block when `n >= len`.
    pub(crate) fn take_front(&mut self, n: u64) -> Self {
        let n = n.min(self.len);
        let front = Self::new(self.first, n);
        if n == self.len {
            *self = Self::empty();
        } else {
            self.first += n as i64;
            self.len -= n;
        }
        front
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::empty()
    }
}

impl IntoIterator for Block {
    type Item = i64;
    type IntoIter = RangeInclusive<i64>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_range()
    }
}

impl IntoIterator for &Block {
    type Item = i64;
    type IntoIter = RangeInclusive<i64>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_range()
    }
}
