//! # Ordered Trees
//!
//! Two tree flavors back every lookup structure in the store:
//!
//! - [`Tree`]: variable-length byte keys and values, sorted by raw byte
//!   comparison. Used for the catalog, table metadata, primary-key indexes,
//!   and general secondary indexes.
//! - [`FixedTree`]: `u64` keys (stored big-endian so byte order matches
//!   numeric order) with an optional `u64` value. Used for fixed-key
//!   secondary indexes, per-key record-id sets, and the section bookkeeping
//!   sets.
//!
//! ## On-Disk Shape
//!
//! A tree is a root page plus a forward-linked chain of sorted leaf pages:
//!
//! ```text
//! TreeRoot ──> TreeLeaf ──> TreeLeaf ──> ... ──> TreeLeaf
//! ```
//!
//! The root stores the first leaf and the entry count. Each leaf packs
//! sorted `[klen u16][vlen u16][key][value]` cells back to back. Keys are
//! globally sorted across the chain, so range scans are a linear walk with
//! an in-leaf binary search to start.
//!
//! Lookups are zero-copy: `read` and cursors hand out slices that borrow
//! the mmap'd page directly.

mod fixed;
mod tree;

pub use fixed::{FixedCursor, FixedTree};
pub use tree::{Cursor, Tree};
