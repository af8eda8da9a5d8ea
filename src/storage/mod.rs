//! # Storage Module
//!
//! This module provides the paged storage layer for stonetable: a memory-mapped
//! file of fixed-size pages, a pager that allocates and frees pages through a
//! trunk-page freelist, and the raw-data sections that pack small records.
//!
//! ## Architecture Overview
//!
//! The storage layer is built around memory-mapped I/O. Instead of copying
//! page data between kernel buffers and a user-space page cache, the database
//! file is mapped directly into the process address space:
//!
//! - **Zero-copy reads**: Record and key access returns `&[u8]` slices that
//!   point straight into the mmap region
//! - **Minimal syscall overhead**: Page faults are handled transparently by
//!   the OS
//! - **Compile-time safety**: Growing the mapping requires `&mut self`, so
//!   the borrow checker guarantees no stale page references survive a remap
//!
//! ## File Layout
//!
//! A store is a single file of 16KB pages:
//!
//! ```text
//! Page 0:   128-byte file header (magic, version, freelist, catalog root)
//! Page 1+:  tree roots, tree leaves, raw-data sections, overflow runs,
//!           freelist trunks
//! ```
//!
//! Every page except page 0 starts with a 16-byte [`PageHeader`] identifying
//! its type. Overflow records occupy a contiguous run of pages; only the first
//! page of the run carries a header, the payload continues raw across the
//! following pages.
//!
//! ## Module Organization
//!
//! - `mmap`: low-level memory-mapped storage (`MmapStorage`)
//! - `page`: page type tags and the 16-byte page header
//! - `headers`: the crc-protected 128-byte file header on page 0
//! - `pager`: page allocation, freelist trunks, overflow runs (`Pager`)
//! - `section`: small-record packing inside a single page (`RawSection`)

mod headers;
mod mmap;
mod page;
mod pager;
mod section;

pub use headers::FileHeader;
pub use mmap::MmapStorage;
pub use page::{PageHeader, PageType, expect_page_type};
pub use pager::Pager;
pub use section::{Allocation, DataMoved, RawSection};

pub const PAGE_SIZE: usize = 16384;
pub const PAGE_HEADER_SIZE: usize = 16;
pub const PAGE_USABLE_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;
pub const FILE_HEADER_SIZE: usize = 128;
