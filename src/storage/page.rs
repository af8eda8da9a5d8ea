//! # Page Types and Header Layout
//!
//! Every 16KB page except page 0 begins with a 16-byte header describing the
//! page contents. Page 0 carries the 128-byte file header instead (see
//! `headers`).
//!
//! ## Page Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field          Description
//! ------  ----  -------------  ----------------------------------------
//! 0       1     page_type      Type of page (TreeLeaf, RawSection, ...)
//! 1       1     flags          Reserved flag bits
//! 2       2     cell_count     Entries in this page (tree leaves, trunks)
//! 4       2     free_start     Offset where free space begins
//! 6       2     reserved       Reserved for future use
//! 8       4     next_page      Next leaf / next trunk in a chain (0 = none)
//! 12      4     overflow_size  Byte length of an overflow record
//! ```
//!
//! The header is deliberately shared across page kinds; each kind uses the
//! fields it needs and leaves the rest zero:
//!
//! - **TreeRoot** (0x01): tree bookkeeping follows the header
//! - **TreeLeaf** (0x02): `cell_count`, `free_start`, `next_page`
//! - **RawSection** (0x03): section bookkeeping follows the header
//! - **Overflow** (0x20): `overflow_size`; payload starts at offset 16 and
//!   continues raw across the following pages of the run
//! - **FreeList** (0x30): `cell_count`, `next_page` (trunk chain)
//!
//! ## Zero-Copy Access
//!
//! `PageHeader` uses `zerocopy` for safe transmutation from raw bytes, so
//! headers are read directly from mmap'd pages without copying.

use eyre::{Result, ensure};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::zerocopy_accessors;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unknown = 0x00,
    TreeRoot = 0x01,
    TreeLeaf = 0x02,
    RawSection = 0x03,
    Overflow = 0x20,
    FreeList = 0x30,
}

impl PageType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PageType::TreeRoot,
            0x02 => PageType::TreeLeaf,
            0x03 => PageType::RawSection,
            0x20 => PageType::Overflow,
            0x30 => PageType::FreeList,
            _ => PageType::Unknown,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_type: u8,
    flags: u8,
    cell_count: U16,
    free_start: U16,
    reserved: U16,
    next_page: U32,
    overflow_size: U32,
}

const _: () = assert!(size_of::<PageHeader>() == super::PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type: page_type as u8,
            flags: 0,
            cell_count: U16::new(0),
            free_start: U16::new(super::PAGE_HEADER_SIZE as u16),
            reserved: U16::new(0),
            next_page: U32::new(0),
            overflow_size: U32::new(0),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        Self::ref_from_bytes(&data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        Self::mut_from_bytes(&mut data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        data[..size_of::<Self>()].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.page_type)
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.page_type = page_type as u8;
    }

    zerocopy_accessors! {
        cell_count: u16,
        free_start: u16,
        next_page: u32,
        overflow_size: u32,
    }
}

/// Reads the header of a page and checks it carries the expected type.
pub fn expect_page_type(data: &[u8], expected: PageType) -> Result<&PageHeader> {
    let header = PageHeader::from_bytes(data)?;
    ensure!(
        header.page_type() == expected,
        "unexpected page type {:?} (expected {:?})",
        header.page_type(),
        expected
    );
    Ok(header)
}
