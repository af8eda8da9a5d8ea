//! # stonetable
//!
//! An embedded record store over a single memory-mapped file. Records are
//! variable-length byte blobs addressed by a primary key and any number of
//! secondary indexes; small records are packed many-per-page, large ones
//! get dedicated overflow pages, and partially-emptied pages are compacted
//! away as deletes accumulate.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                Store / Transaction          │
//! ├─────────────────────────────────────────────┤
//! │        Table (placement + index upkeep)     │
//! ├──────────────┬───────────────┬──────────────┤
//! │ Tree         │ FixedTree     │ RawSection   │
//! │ (byte keys)  │ (u64 keys)    │ (small recs) │
//! ├──────────────┴───────────────┴──────────────┤
//! │          Pager (freelist, overflow)         │
//! ├─────────────────────────────────────────────┤
//! │          MmapStorage (16KB pages)           │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Reads are zero-copy: record views and cursor slices borrow the mapped
//! pages directly, with lifetimes pinned to the owning transaction by the
//! borrow checker.
//!
//! ## Example
//!
//! ```no_run
//! use stonetable::{RecordBuilder, SchemaIndexDef, Store, TableSchema};
//!
//! # fn main() -> eyre::Result<()> {
//! let schema = TableSchema::new(SchemaIndexDef::new_general("pk", 0, 1, false)?)?
//!     .with_index(SchemaIndexDef::new_fixed("by-age", 2))?;
//!
//! let mut store = Store::create("people.stb")?;
//! let mut txn = store.begin();
//! txn.create_table(&schema, "people")?;
//!
//! let mut table = txn.open_table(&schema, "people")?;
//! let mut builder = RecordBuilder::new();
//! builder
//!     .add_field(b"people/1")
//!     .add_field(b"Arava")
//!     .add_field(&32u64.to_le_bytes());
//! table.insert(&builder)?;
//!
//! let view = table.read_by_key(b"people/1")?.unwrap();
//! assert_eq!(view.field(1)?, b"Arava");
//! # txn.commit()
//! # }
//! ```

#[macro_use]
mod macros;

pub mod records;
pub mod storage;
pub mod store;
pub mod table;
pub mod tree;

pub use records::{RecordBuilder, RecordView};
pub use store::{Store, Transaction};
pub use table::{
    IndexKind, RecordIter, SchemaIndexDef, SeekIter, SeekKey, SeekResult, Table, TableSchema,
};
