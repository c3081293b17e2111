mod file;
mod interface;
mod memory;

pub use file::*;
pub use interface::*;
pub use memory::*;

use crate::{Counter, Document};

/// Swaps the `value` field of a stored document iff it currently holds
/// `expected`. Malformed documents never match.
pub(crate) fn compare_and_set(doc: &mut Document, expected: i64, new_value: i64) -> bool {
    match doc.get_mut(Counter::VALUE_FIELD) {
        Some(value) if value.as_i64() == Some(expected) => {
            *value = Document::from(new_value);
            true
        }
        _ => false,
    }
}
