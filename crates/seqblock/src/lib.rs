//! Contiguous blocks of monotonically increasing `i64` identifiers, reserved
//! from a named counter document in a shared store.
//!
//! Every process that needs primary keys for the same logical key talks to
//! the same counter document. Each [`BlockAllocator::allocate`] call reserves
//! a disjoint, ascending [`Block`] and advances the persisted high-water mark
//! with a compare-and-swap, so uncoordinated callers never receive
//! overlapping ranges.
//!
//! ```
//! use seqblock::{AllocatorConfig, BlockAllocator, MemoryStore};
//!
//! let allocator = BlockAllocator::new(
//!     MemoryStore::new(),
//!     AllocatorConfig::default().with_initial_value(100),
//! );
//!
//! let first = allocator.allocate("order_id", 1).unwrap();
//! assert_eq!(first.to_vec(), vec![100]);
//!
//! let next = allocator.allocate("order_id", 3).unwrap();
//! assert_eq!(next.to_vec(), vec![101, 102, 103]);
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

mod allocator;
mod block;
mod config;
mod counter;
mod error;
mod generator;
mod mutex;
mod runtime;
mod store;

pub use crate::allocator::*;
pub use crate::block::*;
pub use crate::config::*;
pub use crate::counter::*;
pub use crate::error::*;
pub use crate::generator::*;
#[cfg(feature = "async-tokio")]
pub use crate::runtime::*;
pub use crate::store::*;
