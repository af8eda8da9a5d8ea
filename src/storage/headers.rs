//! # File Header
//!
//! The first 128 bytes of page 0 hold the store's file header. It identifies
//! the file, pins the page size, and anchors the two persistent roots the
//! pager needs to bootstrap: the freelist trunk chain and the catalog tree.
//!
//! ## Layout (128 bytes)
//!
//! ```text
//! Offset  Size  Field           Description
//! ------  ----  --------------  ----------------------------------------
//! 0       8     magic           b"STONETB\0"
//! 8       4     version         Format version (currently 1)
//! 12      4     page_size       Must equal PAGE_SIZE
//! 16      4     next_page       High-water mark: first never-used page
//! 20      4     freelist_head   First freelist trunk page (0 = empty)
//! 24      4     freelist_count  Free pages reachable through the trunks
//! 28      4     catalog_root    Root page of the catalog tree (0 = unset)
//! 32      4     flags           Reserved flag bits
//! 36      88    reserved        Zero
//! 124     4     checksum        CRC-32/iSCSI over bytes 0..124
//! ```
//!
//! The checksum is refreshed on every `Pager::sync()` and validated on open,
//! catching truncated or foreign files before any page is interpreted.

use crc::{CRC_32_ISCSI, Crc};
use eyre::{Result, ensure};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{FILE_HEADER_SIZE, PAGE_SIZE};
use crate::zerocopy_accessors;

pub const STORE_MAGIC: &[u8; 8] = b"STONETB\0";
pub const CURRENT_VERSION: u32 = 1;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    magic: [u8; 8],
    version: U32,
    page_size: U32,
    next_page: U32,
    freelist_head: U32,
    freelist_count: U32,
    catalog_root: U32,
    flags: U32,
    reserved: [u8; 88],
    checksum: U32,
}

const _: () = assert!(size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    pub fn new() -> Self {
        Self {
            magic: *STORE_MAGIC,
            version: U32::new(CURRENT_VERSION),
            page_size: U32::new(PAGE_SIZE as u32),
            next_page: U32::new(1),
            freelist_head: U32::new(0),
            freelist_count: U32::new(0),
            catalog_root: U32::new(0),
            flags: U32::new(0),
            reserved: [0u8; 88],
            checksum: U32::new(0),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for FileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse FileHeader: {:?}", e))?;

        ensure!(&header.magic == STORE_MAGIC, "invalid magic bytes in store");

        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported store version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );

        ensure!(
            header.page_size.get() == PAGE_SIZE as u32,
            "store page size {} does not match compiled page size {}",
            header.page_size.get(),
            PAGE_SIZE
        );

        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for FileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        Self::mut_from_bytes(&mut bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse FileHeader: {:?}", e))
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    zerocopy_accessors! {
        next_page: u32,
        freelist_head: u32,
        freelist_count: u32,
        catalog_root: u32,
        flags: u32,
    }

    /// Recomputes the checksum from the current header contents.
    pub fn refresh_checksum(&mut self) {
        let crc = CASTAGNOLI.checksum(&self.as_bytes()[..FILE_HEADER_SIZE - 4]);
        self.checksum = U32::new(crc);
    }

    pub fn validate_checksum(&self) -> Result<()> {
        let expected = CASTAGNOLI.checksum(&self.as_bytes()[..FILE_HEADER_SIZE - 4]);
        ensure!(
            self.checksum.get() == expected,
            "file header checksum mismatch: stored {:#010x}, computed {:#010x}",
            self.checksum.get(),
            expected
        );
        Ok(())
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_size_is_128_bytes() {
        assert_eq!(size_of::<FileHeader>(), 128);
    }

    #[test]
    fn new_header_has_defaults() {
        let header = FileHeader::new();

        assert_eq!(header.version(), CURRENT_VERSION);
        assert_eq!(header.page_size(), PAGE_SIZE as u32);
        assert_eq!(header.next_page(), 1);
        assert_eq!(header.freelist_head(), 0);
        assert_eq!(header.catalog_root(), 0);
    }

    #[test]
    fn from_bytes_rejects_bad_magic() {
        let mut header = FileHeader::new();
        header.magic[0] = b'X';
        let bytes = header.as_bytes().to_vec();

        assert!(FileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn from_bytes_rejects_wrong_version() {
        let mut header = FileHeader::new();
        header.version = U32::new(99);
        let bytes = header.as_bytes().to_vec();

        assert!(FileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn checksum_roundtrip() {
        let mut header = FileHeader::new();
        header.set_next_page(42);
        header.refresh_checksum();

        assert!(header.validate_checksum().is_ok());

        header.set_next_page(43);
        assert!(header.validate_checksum().is_err());
    }
}
