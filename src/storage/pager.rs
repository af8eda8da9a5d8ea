//! # Pager
//!
//! The pager owns the mmap'd store file and hands out pages. It tracks two
//! sources of allocatable pages:
//!
//! - the **high-water mark** (`next_page` in the file header): pages that
//!   have never been used; growing past the end of the file remaps it
//! - the **freelist**: previously-freed pages, chained through trunk pages
//!
//! ## Trunk Page Layout
//!
//! Freed pages are recorded in trunk pages, SQLite-style. A trunk reuses the
//! standard page header: `next_page` links to the next trunk, `cell_count`
//! counts the page numbers stored in the trunk body:
//!
//! ```text
//! Offset  Size      Description
//! ------  --------  ----------------------------------------
//! 0       16        PageHeader (type = FreeList)
//! 16      4*N       page_numbers: array of free page numbers
//! ```
//!
//! With 16KB pages each trunk stores (16384 - 16) / 4 = 4092 page numbers.
//! A freed page becomes a new trunk itself when the head trunk is full, so
//! the freelist consumes no extra space. When a trunk's array drains, the
//! trunk page itself is handed out next.
//!
//! ## Overflow Runs
//!
//! Records too large for a raw-data section get a dedicated contiguous run
//! of pages. Only the first page carries a header (type = Overflow, with the
//! byte length in `overflow_size`); the payload continues raw across the rest
//! of the run. Runs are always carved from the high-water mark so they are
//! contiguous; freed run pages re-enter the single-page freelist.
//!
//! ## Thread Safety
//!
//! `Pager` is not thread-safe. The store enforces a single writer by handing
//! out transactions through `&mut self`.

use std::path::Path;

use eyre::{Result, ensure};

use super::headers::FileHeader;
use super::mmap::MmapStorage;
use super::page::{PageHeader, PageType, expect_page_type};
use super::{FILE_HEADER_SIZE, PAGE_HEADER_SIZE, PAGE_SIZE};

const INITIAL_PAGE_COUNT: u32 = 8;
const TRUNK_CAPACITY: usize = (PAGE_SIZE - PAGE_HEADER_SIZE) / 4;

#[derive(Debug)]
pub struct Pager {
    storage: MmapStorage,
}

impl Pager {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut storage = MmapStorage::create(path, INITIAL_PAGE_COUNT)?;

        let mut header = FileHeader::new();
        header.refresh_checksum();

        use zerocopy::IntoBytes;
        let page = storage.page_mut(0)?;
        page[..FILE_HEADER_SIZE].copy_from_slice(header.as_bytes());

        Ok(Self { storage })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let storage = MmapStorage::open(path)?;

        let header = FileHeader::from_bytes(storage.page(0)?)?;
        header.validate_checksum()?;

        ensure!(
            header.next_page() <= storage.page_count(),
            "file header claims {} used pages but the file holds only {}",
            header.next_page(),
            storage.page_count()
        );

        Ok(Self { storage })
    }

    fn header(&self) -> Result<&FileHeader> {
        FileHeader::from_bytes(self.storage.page(0)?)
    }

    fn header_mut(&mut self) -> Result<&mut FileHeader> {
        FileHeader::from_bytes_mut(self.storage.page_mut(0)?)
    }

    pub fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    pub fn catalog_root(&self) -> Result<u32> {
        Ok(self.header()?.catalog_root())
    }

    pub fn set_catalog_root(&mut self, page_no: u32) -> Result<()> {
        self.header_mut()?.set_catalog_root(page_no);
        Ok(())
    }

    /// Number of freed pages currently waiting for reuse.
    pub fn free_page_count(&self) -> Result<u32> {
        Ok(self.header()?.freelist_count())
    }

    pub fn page(&self, page_no: u32) -> Result<&[u8]> {
        self.storage.page(page_no)
    }

    pub fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        self.storage.page_mut(page_no)
    }

    /// Allocates a single page, preferring the freelist over file growth.
    /// The returned page keeps whatever bytes it last held; callers
    /// initialize their own layout.
    pub fn allocate_page(&mut self) -> Result<u32> {
        let head = self.header()?.freelist_head();

        if head != 0 {
            let trunk = self.storage.page(head)?;
            let trunk_header = expect_page_type(trunk, PageType::FreeList)?;
            let count = trunk_header.cell_count() as usize;
            let next_trunk = trunk_header.next_page();

            if count > 0 {
                let off = PAGE_HEADER_SIZE + (count - 1) * 4;
                let page_no = u32::from_le_bytes([
                    trunk[off],
                    trunk[off + 1],
                    trunk[off + 2],
                    trunk[off + 3],
                ]);

                let trunk = self.storage.page_mut(head)?;
                PageHeader::from_bytes_mut(trunk)?.set_cell_count(count as u16 - 1);

                let header = self.header_mut()?;
                header.set_freelist_count(header.freelist_count() - 1);
                return Ok(page_no);
            }

            // drained trunk: the trunk page itself is the allocation
            let header = self.header_mut()?;
            header.set_freelist_head(next_trunk);
            header.set_freelist_count(header.freelist_count() - 1);
            return Ok(head);
        }

        self.grow_tail(1)
    }

    /// Allocates `n` contiguous pages. Multi-page runs always come from the
    /// high-water mark; the freelist only serves single pages.
    pub fn allocate_pages(&mut self, n: u32) -> Result<u32> {
        ensure!(n >= 1, "cannot allocate zero pages");

        if n == 1 {
            return self.allocate_page();
        }

        self.grow_tail(n)
    }

    fn grow_tail(&mut self, n: u32) -> Result<u32> {
        let start = self.header()?.next_page();
        let end = start + n;

        if end > self.storage.page_count() {
            let amortized = self.storage.page_count() + self.storage.page_count() / 2;
            self.storage.grow(end.max(amortized))?;
        }

        self.header_mut()?.set_next_page(end);
        Ok(start)
    }

    pub fn free_page(&mut self, page_no: u32) -> Result<()> {
        ensure!(page_no != 0, "cannot free the header page");
        ensure!(
            page_no < self.header()?.next_page(),
            "cannot free never-allocated page {}",
            page_no
        );

        let head = self.header()?.freelist_head();

        if head != 0 {
            let trunk = self.storage.page(head)?;
            let count = expect_page_type(trunk, PageType::FreeList)?.cell_count() as usize;

            if count < TRUNK_CAPACITY {
                let trunk = self.storage.page_mut(head)?;
                let off = PAGE_HEADER_SIZE + count * 4;
                trunk[off..off + 4].copy_from_slice(&page_no.to_le_bytes());
                PageHeader::from_bytes_mut(trunk)?.set_cell_count(count as u16 + 1);

                let header = self.header_mut()?;
                header.set_freelist_count(header.freelist_count() + 1);
                return Ok(());
            }
        }

        // head trunk missing or full: the freed page becomes the new trunk
        let page = self.storage.page_mut(page_no)?;
        let mut trunk_header = PageHeader::new(PageType::FreeList);
        trunk_header.set_next_page(head);
        trunk_header.write_to(page)?;

        let header = self.header_mut()?;
        header.set_freelist_head(page_no);
        header.set_freelist_count(header.freelist_count() + 1);
        Ok(())
    }

    /// Number of pages an overflow record of `size` bytes occupies,
    /// accounting for the header on the first page.
    pub fn overflow_page_count(size: usize) -> u32 {
        (PAGE_HEADER_SIZE + size).div_ceil(PAGE_SIZE) as u32
    }

    pub fn allocate_overflow(&mut self, size: usize) -> Result<u32> {
        ensure!(
            size <= u32::MAX as usize,
            "overflow record of {} bytes exceeds the maximum record size",
            size
        );

        let n = Self::overflow_page_count(size);
        let start = self.allocate_pages(n)?;

        let page = self.storage.page_mut(start)?;
        let mut header = PageHeader::new(PageType::Overflow);
        header.set_overflow_size(size as u32);
        header.write_to(page)?;

        Ok(start)
    }

    pub fn overflow_size(&self, page_no: u32) -> Result<usize> {
        let page = self.storage.page(page_no)?;
        let header = expect_page_type(page, PageType::Overflow)?;
        Ok(header.overflow_size() as usize)
    }

    pub fn set_overflow_size(&mut self, page_no: u32, size: usize) -> Result<()> {
        let page = self.storage.page_mut(page_no)?;
        let header = PageHeader::from_bytes_mut(page)?;
        ensure!(
            header.page_type() == PageType::Overflow,
            "page {} is not an overflow page",
            page_no
        );
        header.set_overflow_size(size as u32);
        Ok(())
    }

    /// Zero-copy view of an overflow record's payload, possibly spanning
    /// multiple pages.
    pub fn overflow_read(&self, page_no: u32) -> Result<&[u8]> {
        let size = self.overflow_size(page_no)?;
        let n = Self::overflow_page_count(size);
        if n > 1 {
            self.storage.prefetch_pages(page_no, n);
        }

        let span = self.storage.span(page_no, PAGE_HEADER_SIZE + size)?;
        Ok(&span[PAGE_HEADER_SIZE..])
    }

    /// Writable payload slot of an overflow run. The caller must have sized
    /// the run (or updated `overflow_size`) to `size` beforehand.
    pub fn overflow_slot_mut(&mut self, page_no: u32, size: usize) -> Result<&mut [u8]> {
        let stored = self.overflow_size(page_no)?;
        ensure!(
            stored == size,
            "overflow slot size mismatch on page {}: stored {}, requested {}",
            page_no,
            stored,
            size
        );

        let span = self.storage.span_mut(page_no, PAGE_HEADER_SIZE + size)?;
        Ok(&mut span[PAGE_HEADER_SIZE..])
    }

    pub fn free_overflow(&mut self, page_no: u32) -> Result<()> {
        let size = self.overflow_size(page_no)?;
        let n = Self::overflow_page_count(size);

        for i in 0..n {
            self.free_page(page_no + i)?;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.header_mut()?.refresh_checksum();
        self.storage.sync()
    }
}
