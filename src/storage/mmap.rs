//! # Memory-Mapped File Storage
//!
//! This module implements `MmapStorage`, the lowest building block of the
//! storage layer. It maps the store file directly into the process address
//! space and hands out bounds-checked page slices.
//!
//! ## Safety Model
//!
//! Memory-mapped regions become invalid when the file is grown and remapped.
//! Instead of runtime guards (hazard pointers, epochs, reference counting),
//! stonetable leans on the borrow checker:
//!
//! ```text
//! page(&self) -> &[u8]              // Immutable borrow of self
//! page_mut(&mut self) -> &mut [u8]  // Mutable borrow of self
//! grow(&mut self)                   // Mutable borrow (exclusive)
//! ```
//!
//! Since `grow()` requires `&mut self`, the compiler ensures no page
//! references exist when the mapping is replaced. Zero runtime overhead,
//! and dangling-pointer bugs are caught by rustc.
//!
//! ## Spans
//!
//! Overflow records occupy a contiguous run of pages. Because the whole file
//! is one mapping, a multi-page record can be read as a single contiguous
//! slice via `span()` without reassembly.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{Result, WrapErr, ensure};
use memmap2::MmapMut;

use super::PAGE_SIZE;

#[derive(Debug)]
pub struct MmapStorage {
    file: File,
    mmap: MmapMut,
    page_count: u32,
}

impl MmapStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?;

        let file_size = metadata.len();

        ensure!(
            file_size > 0,
            "cannot open empty store file '{}'",
            path.display()
        );

        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "store file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        let page_count = (file_size / PAGE_SIZE as u64) as u32;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can
        // be modified externally, leading to undefined behavior. This is safe
        // because:
        // 1. The file is opened with exclusive write access (read+write mode)
        // 2. Store files are not meant to be modified by external processes
        // 3. The mmap lifetime is tied to MmapStorage, preventing use-after-unmap
        // 4. All access goes through page()/span() which bounds-check offsets
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            page_count,
        })
    }

    pub fn create<P: AsRef<Path>>(path: P, initial_page_count: u32) -> Result<Self> {
        let path = path.as_ref();

        ensure!(
            initial_page_count > 0,
            "initial page count must be at least 1"
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create store file '{}'", path.display()))?;

        let file_size = initial_page_count as u64 * PAGE_SIZE as u64;

        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to set file size to {} bytes", file_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can
        // be modified externally. This is safe because:
        // 1. We just created this file with exclusive access (truncate=true)
        // 2. The file size is set to a valid multiple of PAGE_SIZE
        // 3. The mmap lifetime is tied to MmapStorage, preventing use-after-unmap
        // 4. All access goes through page()/span() which bounds-check offsets
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            page_count: initial_page_count,
        })
    }

    pub fn page(&self, page_no: u32) -> Result<&[u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );

        let offset = page_no as usize * PAGE_SIZE;
        Ok(&self.mmap[offset..offset + PAGE_SIZE])
    }

    pub fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );

        let offset = page_no as usize * PAGE_SIZE;
        Ok(&mut self.mmap[offset..offset + PAGE_SIZE])
    }

    /// Contiguous byte range starting at the given page. Used for overflow
    /// records whose payload spans multiple pages.
    pub fn span(&self, page_no: u32, len: usize) -> Result<&[u8]> {
        let offset = page_no as usize * PAGE_SIZE;
        let end = offset + len;

        ensure!(
            end <= self.page_count as usize * PAGE_SIZE,
            "span of {} bytes at page {} exceeds file size ({} pages)",
            len,
            page_no,
            self.page_count
        );

        Ok(&self.mmap[offset..end])
    }

    pub fn span_mut(&mut self, page_no: u32, len: usize) -> Result<&mut [u8]> {
        let offset = page_no as usize * PAGE_SIZE;
        let end = offset + len;

        ensure!(
            end <= self.page_count as usize * PAGE_SIZE,
            "span of {} bytes at page {} exceeds file size ({} pages)",
            len,
            page_no,
            self.page_count
        );

        Ok(&mut self.mmap[offset..end])
    }

    pub fn grow(&mut self, new_page_count: u32) -> Result<()> {
        if new_page_count <= self.page_count {
            return Ok(());
        }

        self.mmap
            .flush()
            .wrap_err("failed to flush mmap before grow")?;

        let new_size = new_page_count as u64 * PAGE_SIZE as u64;

        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to extend file to {} bytes", new_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because the old mmap becomes
        // invalid. This is safe because:
        // 1. grow() requires &mut self, so no page references can exist
        // 2. We flushed the old mmap above, ensuring data reached the file
        // 3. The file was extended to new_size before remapping
        // 4. The old mmap is dropped when we assign the new one
        self.mmap =
            unsafe { MmapMut::map_mut(&self.file).wrap_err("failed to remap file after grow")? };

        self.page_count = new_page_count;

        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync mmap to disk")
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn file_size(&self) -> u64 {
        self.page_count as u64 * PAGE_SIZE as u64
    }

    pub fn prefetch_pages(&self, start_page: u32, count: u32) {
        if start_page >= self.page_count {
            return;
        }

        let end_page = (start_page + count).min(self.page_count);
        let start_offset = start_page as usize * PAGE_SIZE;
        let len = (end_page - start_page) as usize * PAGE_SIZE;

        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is a hint to the kernel. This is
        // safe because:
        // 1. start_page was bounds-checked above
        // 2. end_page is clamped to self.page_count, never exceeding the mmap
        // 3. start_offset + len is at most page_count * PAGE_SIZE = file_size
        unsafe {
            libc::madvise(
                self.mmap.as_ptr().add(start_offset) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }

        #[cfg(not(unix))]
        {
            let _ = (start_offset, len);
        }
    }
}
