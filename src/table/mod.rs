//! # Tables
//!
//! Schema definitions and the record store itself. See `table` for the
//! placement, index-maintenance, and section-reclamation design.

mod schema;
#[allow(clippy::module_inception)]
mod table;

pub use schema::{IndexKind, SchemaIndexDef, TableSchema};
pub use table::{
    CANDIDATE_DENSITY, COMPACT_DENSITY, RecordIter, SeekIter, SeekKey, SeekResult, Table,
};
