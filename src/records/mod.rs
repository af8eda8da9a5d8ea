//! # Record Format
//!
//! Records are flat byte blobs with an index of field boundaries up front,
//! so any field (or run of adjacent fields) can be sliced out of the mmap
//! without parsing the payload.
//!
//! ## Layout
//!
//! ```text
//! Offset        Size  Description
//! ------------  ----  ------------------------------------------
//! 0             2     field_count (u16 LE)
//! 2             4*N   end offset of each field (u32 LE, cumulative,
//!                     relative to the payload start)
//! 2 + 4*N       ...   payload: field bytes back to back
//! ```
//!
//! Field `i` spans `payload[end[i-1]..end[i]]` (with `end[-1] = 0`).
//! Because fields are stored back to back, a run of adjacent fields is one
//! contiguous slice; index definitions exploit this to extract composite
//! keys without copying.
//!
//! [`RecordBuilder`] assembles a record in memory; [`RecordView`] validates
//! and reads one in place.

mod builder;
mod view;

pub use builder::RecordBuilder;
pub use view::RecordView;

pub(crate) const RECORD_HEADER_BASE: usize = 2;
pub(crate) const FIELD_OFFSET_SIZE: usize = 4;
