//! # Raw-Data Sections
//!
//! A raw-data section packs many small variable-length records into a single
//! 16KB page. Records above [`RawSection::MAX_ITEM_SIZE`] never enter a
//! section; they get dedicated overflow runs instead.
//!
//! ## Record Ids
//!
//! A section record id encodes its placement:
//!
//! ```text
//! id = page_no * PAGE_SIZE + entry_offset
//! ```
//!
//! Entry offsets start past the page and section headers (offset >= 32), so
//! a section id is never a multiple of PAGE_SIZE. Overflow record ids are
//! exactly `first_page * PAGE_SIZE`. Readers dispatch on `id % PAGE_SIZE`.
//!
//! Because the id pins down the owning page, `direct_read` and `free` work
//! for ids of *any* section, not just the one a handle points at.
//!
//! ## Section Layout
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  ----------------------------------------
//! 0       16    PageHeader (type = RawSection)
//! 16      16    SectionHeader: next_alloc, live_count, live_bytes
//! 32      ...   entries: [used u16][alloc u16][bytes]
//! ```
//!
//! Entries are bump-allocated; `alloc` is fixed at allocation time while
//! `used` may shrink on an in-place rewrite (or become FREED). Freed space
//! is reclaimed two ways:
//!
//! - **in-place defrag**: when a fresh allocation does not fit the bump tail
//!   but the live bytes would fit a compact layout, the section rewrites
//!   itself and reports every moved record as a [`DataMoved`] event. The
//!   caller owns the indexes that reference the old ids and must consume the
//!   events to correct them.
//! - **whole-section compaction**: the table relocates every live record out
//!   of a low-density section and frees the page (see the table module).
//!
//! ## Density
//!
//! `free` returns the section's fill density (live bytes over capacity)
//! after the free, which drives the table's candidate/compaction policy.

use eyre::{Result, bail, ensure};
use smallvec::SmallVec;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::page::{PageHeader, PageType, expect_page_type};
use super::pager::Pager;
use super::{PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::zerocopy_accessors;

pub const SECTION_HEADER_SIZE: usize = 16;
pub const SECTION_DATA_START: usize = PAGE_HEADER_SIZE + SECTION_HEADER_SIZE;
pub const SECTION_CAPACITY: usize = PAGE_SIZE - SECTION_DATA_START;
pub const ENTRY_HEADER_SIZE: usize = 4;

const FREED: u16 = u16::MAX;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct SectionHeader {
    next_alloc: U16,
    live_count: U16,
    live_bytes: U32,
    reserved: [u8; 8],
}

const _: () = assert!(size_of::<SectionHeader>() == SECTION_HEADER_SIZE);

impl SectionHeader {
    zerocopy_accessors! {
        next_alloc: u16,
        live_count: u16,
        live_bytes: u32,
    }

    fn from_page(page: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(&page[PAGE_HEADER_SIZE..SECTION_DATA_START])
            .map_err(|e| eyre::eyre!("failed to read SectionHeader: {:?}", e))
    }

    fn from_page_mut(page: &mut [u8]) -> Result<&mut Self> {
        Self::mut_from_bytes(&mut page[PAGE_HEADER_SIZE..SECTION_DATA_START])
            .map_err(|e| eyre::eyre!("failed to read SectionHeader: {:?}", e))
    }
}

/// A record relocation performed by an in-place section defrag. Consumers
/// must repoint every index entry from `old_id` to `new_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMoved {
    pub old_id: u64,
    pub new_id: u64,
}

/// Outcome of a successful section allocation.
#[derive(Debug)]
pub struct Allocation {
    pub id: u64,
    pub moved: SmallVec<[DataMoved; 4]>,
}

/// Handle to one raw-data section page.
#[derive(Debug, Clone, Copy)]
pub struct RawSection {
    page_no: u32,
}

impl RawSection {
    /// Largest record a section accepts. Anything bigger gets an overflow
    /// run.
    pub const MAX_ITEM_SIZE: usize = SECTION_CAPACITY / 8;

    pub fn create(pager: &mut Pager) -> Result<Self> {
        let page_no = pager.allocate_page()?;

        let page = pager.page_mut(page_no)?;
        PageHeader::new(PageType::RawSection).write_to(page)?;

        let section_header = SectionHeader {
            next_alloc: U16::new(SECTION_DATA_START as u16),
            live_count: U16::new(0),
            live_bytes: U32::new(0),
            reserved: [0u8; 8],
        };
        page[PAGE_HEADER_SIZE..SECTION_DATA_START].copy_from_slice(section_header.as_bytes());

        Ok(Self { page_no })
    }

    pub fn open(pager: &Pager, page_no: u32) -> Result<Self> {
        expect_page_type(pager.page(page_no)?, PageType::RawSection)?;
        Ok(Self { page_no })
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    /// Page number of the section that owns `id`, for any section id.
    pub fn section_page_of(id: u64) -> u32 {
        (id / PAGE_SIZE as u64) as u32
    }

    pub fn contains(&self, id: u64) -> bool {
        Self::section_page_of(id) == self.page_no
    }

    /// Tries to carve out `size` bytes. Falls back to an in-place defrag
    /// when the bump tail is exhausted but the live bytes still fit; every
    /// record the defrag moved is reported in the returned [`Allocation`].
    pub fn try_allocate(&self, pager: &mut Pager, size: usize) -> Result<Option<Allocation>> {
        ensure!(
            size <= Self::MAX_ITEM_SIZE,
            "allocation of {} bytes exceeds the section item limit of {}",
            size,
            Self::MAX_ITEM_SIZE
        );

        let needed = ENTRY_HEADER_SIZE + size;

        let (next_alloc, live_bytes, live_count) = {
            let page = pager.page(self.page_no)?;
            expect_page_type(page, PageType::RawSection)?;
            let header = SectionHeader::from_page(page)?;
            (
                header.next_alloc() as usize,
                header.live_bytes() as usize,
                header.live_count() as usize,
            )
        };

        let mut moved = SmallVec::new();
        let mut alloc_at = next_alloc;

        if next_alloc + needed > PAGE_SIZE {
            // compact layout: header per live entry plus its used bytes
            let compact = SECTION_DATA_START + live_count * ENTRY_HEADER_SIZE + live_bytes;
            if compact + needed > PAGE_SIZE {
                return Ok(None);
            }
            moved = self.defrag(pager)?;
            alloc_at = compact;
        }

        let page = pager.page_mut(self.page_no)?;
        page[alloc_at..alloc_at + 2].copy_from_slice(&(size as u16).to_le_bytes());
        page[alloc_at + 2..alloc_at + 4].copy_from_slice(&(size as u16).to_le_bytes());

        let header = SectionHeader::from_page_mut(page)?;
        header.set_next_alloc((alloc_at + needed) as u16);
        header.set_live_count(header.live_count() + 1);
        header.set_live_bytes(header.live_bytes() + size as u32);

        let id = self.page_no as u64 * PAGE_SIZE as u64 + alloc_at as u64;
        Ok(Some(Allocation { id, moved }))
    }

    /// Rewrites the section with live entries packed tight, shrinking every
    /// entry's reservation to its used size. Returns the relocations.
    fn defrag(&self, pager: &mut Pager) -> Result<SmallVec<[DataMoved; 4]>> {
        let mut live: Vec<(usize, Vec<u8>)> = Vec::new();
        {
            let page = pager.page(self.page_no)?;
            let header = SectionHeader::from_page(page)?;
            let next_alloc = header.next_alloc() as usize;

            let mut off = SECTION_DATA_START;
            while off < next_alloc {
                let (used, alloc) = entry_header(page, off)?;
                if used != FREED {
                    let used = used as usize;
                    live.push((off, page[off + ENTRY_HEADER_SIZE..off + ENTRY_HEADER_SIZE + used].to_vec()));
                }
                off += ENTRY_HEADER_SIZE + alloc as usize;
            }
        }

        let mut moved = SmallVec::new();
        let base = self.page_no as u64 * PAGE_SIZE as u64;

        let page = pager.page_mut(self.page_no)?;
        let mut off = SECTION_DATA_START;
        let mut live_bytes = 0usize;

        for (old_off, bytes) in &live {
            let used = bytes.len();
            page[off..off + 2].copy_from_slice(&(used as u16).to_le_bytes());
            page[off + 2..off + 4].copy_from_slice(&(used as u16).to_le_bytes());
            page[off + ENTRY_HEADER_SIZE..off + ENTRY_HEADER_SIZE + used].copy_from_slice(bytes);

            if *old_off != off {
                moved.push(DataMoved {
                    old_id: base + *old_off as u64,
                    new_id: base + off as u64,
                });
            }

            off += ENTRY_HEADER_SIZE + used;
            live_bytes += used;
        }

        let header = SectionHeader::from_page_mut(page)?;
        header.set_next_alloc(off as u16);
        header.set_live_count(live.len() as u16);
        header.set_live_bytes(live_bytes as u32);

        Ok(moved)
    }

    /// In-place rewrite of a live entry. Refuses ids outside this section
    /// and sizes above the entry's reservation, in which case the caller
    /// falls back to delete-then-insert.
    pub fn try_write_direct<'p>(
        &self,
        pager: &'p mut Pager,
        id: u64,
        size: usize,
    ) -> Result<Option<&'p mut [u8]>> {
        if !self.contains(id) {
            return Ok(None);
        }

        let off = (id % PAGE_SIZE as u64) as usize;

        let (used, alloc) = {
            let page = pager.page(self.page_no)?;
            expect_page_type(page, PageType::RawSection)?;
            validate_entry_offset(page, off)?;
            entry_header(page, off)?
        };

        if used == FREED || size > alloc as usize {
            return Ok(None);
        }

        let page = pager.page_mut(self.page_no)?;

        let header = SectionHeader::from_page_mut(page)?;
        let live_bytes = header.live_bytes() - used as u32 + size as u32;
        header.set_live_bytes(live_bytes);

        page[off..off + 2].copy_from_slice(&(size as u16).to_le_bytes());
        Ok(Some(
            &mut page[off + ENTRY_HEADER_SIZE..off + ENTRY_HEADER_SIZE + size],
        ))
    }

    /// Zero-copy read of a live entry by id, valid for ids of any section.
    pub fn direct_read(pager: &Pager, id: u64) -> Result<&[u8]> {
        let page_no = Self::section_page_of(id);
        let off = (id % PAGE_SIZE as u64) as usize;

        let page = pager.page(page_no)?;
        expect_page_type(page, PageType::RawSection)?;
        validate_entry_offset(page, off)?;

        let (used, _alloc) = entry_header(page, off)?;
        ensure!(used != FREED, "record id {} points at a freed entry", id);

        let used = used as usize;
        Ok(&page[off + ENTRY_HEADER_SIZE..off + ENTRY_HEADER_SIZE + used])
    }

    /// Frees a live entry (in whichever section owns `id`) and returns the
    /// owning section's density afterwards.
    pub fn free(pager: &mut Pager, id: u64) -> Result<f32> {
        let page_no = Self::section_page_of(id);
        let off = (id % PAGE_SIZE as u64) as usize;

        let page = pager.page_mut(page_no)?;
        expect_page_type(page, PageType::RawSection)?;
        validate_entry_offset(page, off)?;

        let (used, _alloc) = entry_header(page, off)?;
        ensure!(used != FREED, "record id {} was already freed", id);

        page[off..off + 2].copy_from_slice(&FREED.to_le_bytes());

        let header = SectionHeader::from_page_mut(page)?;
        header.set_live_count(header.live_count() - 1);
        header.set_live_bytes(header.live_bytes() - used as u32);

        Ok(header.live_bytes() as f32 / SECTION_CAPACITY as f32)
    }

    /// Live record ids of the section that owns `id`, in layout order.
    pub fn all_ids_in_section(pager: &Pager, id: u64) -> Result<Vec<u64>> {
        let page_no = Self::section_page_of(id);
        let base = page_no as u64 * PAGE_SIZE as u64;

        let page = pager.page(page_no)?;
        expect_page_type(page, PageType::RawSection)?;
        let next_alloc = SectionHeader::from_page(page)?.next_alloc() as usize;

        let mut ids = Vec::new();
        let mut off = SECTION_DATA_START;
        while off < next_alloc {
            let (used, alloc) = entry_header(page, off)?;
            if used != FREED {
                ids.push(base + off as u64);
            }
            off += ENTRY_HEADER_SIZE + alloc as usize;
        }

        Ok(ids)
    }

    /// Returns the page of a fully-drained section to the pager.
    pub fn delete_section(self, pager: &mut Pager) -> Result<()> {
        pager.free_page(self.page_no)
    }
}

fn validate_entry_offset(page: &[u8], off: usize) -> Result<()> {
    let next_alloc = SectionHeader::from_page(page)?.next_alloc() as usize;
    ensure!(
        off >= SECTION_DATA_START && off + ENTRY_HEADER_SIZE <= next_alloc,
        "entry offset {} outside the allocated section range",
        off
    );
    Ok(())
}

fn entry_header(page: &[u8], off: usize) -> Result<(u16, u16)> {
    if off + ENTRY_HEADER_SIZE > PAGE_SIZE {
        bail!("entry header at offset {} exceeds the page", off);
    }
    let used = u16::from_le_bytes([page[off], page[off + 1]]);
    let alloc = u16::from_le_bytes([page[off + 2], page[off + 3]]);
    Ok((used, alloc))
}
