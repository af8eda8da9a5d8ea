//! Variable-length key/value tree over a forward-linked leaf chain.

use eyre::{Result, ensure};

use crate::storage::{PAGE_HEADER_SIZE, PAGE_SIZE, Pager};
use crate::storage::{PageHeader, PageType, expect_page_type};
use crate::zerocopy_accessors;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

const ROOT_HEADER_SIZE: usize = 16;
const LEAF_DATA_START: usize = PAGE_HEADER_SIZE;
const LEAF_CAPACITY: usize = PAGE_SIZE - LEAF_DATA_START;
const CELL_HEADER_SIZE: usize = 4;

/// Largest `[klen][vlen][key][value]` cell a single leaf can hold.
pub const MAX_ENTRY_SIZE: usize = LEAF_CAPACITY;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct TreeRootHeader {
    first_leaf: U32,
    entry_count: U64,
    reserved: [u8; 4],
}

const _: () = assert!(size_of::<TreeRootHeader>() == ROOT_HEADER_SIZE);

impl TreeRootHeader {
    zerocopy_accessors! {
        first_leaf: u32,
        entry_count: u64,
    }

    fn from_page(page: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(&page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + ROOT_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read TreeRootHeader: {:?}", e))
    }

    fn from_page_mut(page: &mut [u8]) -> Result<&mut Self> {
        Self::mut_from_bytes(&mut page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + ROOT_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read TreeRootHeader: {:?}", e))
    }
}

/// Handle to a byte-keyed ordered tree. Copyable; all operations take the
/// pager explicitly.
#[derive(Debug, Clone, Copy)]
pub struct Tree {
    root: u32,
}

/// Borrowed view of one cell inside a leaf page.
#[derive(Debug, Clone, Copy)]
struct Cell {
    off: usize,
    klen: usize,
    vlen: usize,
}

impl Cell {
    fn key<'a>(&self, page: &'a [u8]) -> &'a [u8] {
        &page[self.off + CELL_HEADER_SIZE..self.off + CELL_HEADER_SIZE + self.klen]
    }

    fn value<'a>(&self, page: &'a [u8]) -> &'a [u8] {
        let start = self.off + CELL_HEADER_SIZE + self.klen;
        &page[start..start + self.vlen]
    }

    fn end(&self) -> usize {
        self.off + CELL_HEADER_SIZE + self.klen + self.vlen
    }
}

fn cell_at(page: &[u8], off: usize) -> Result<Cell> {
    ensure!(
        off + CELL_HEADER_SIZE <= PAGE_SIZE,
        "tree cell header at offset {} exceeds the page",
        off
    );
    let klen = u16::from_le_bytes([page[off], page[off + 1]]) as usize;
    let vlen = u16::from_le_bytes([page[off + 2], page[off + 3]]) as usize;
    ensure!(
        off + CELL_HEADER_SIZE + klen + vlen <= PAGE_SIZE,
        "tree cell at offset {} exceeds the page",
        off
    );
    Ok(Cell { off, klen, vlen })
}

fn leaf_cells(page: &[u8]) -> Result<Vec<Cell>> {
    let header = expect_page_type(page, PageType::TreeLeaf)?;
    let count = header.cell_count() as usize;

    let mut cells = Vec::with_capacity(count);
    let mut off = LEAF_DATA_START;
    for _ in 0..count {
        let cell = cell_at(page, off)?;
        off = cell.end();
        cells.push(cell);
    }
    Ok(cells)
}

fn write_leaf(page: &mut [u8], entries: &[(Vec<u8>, Vec<u8>)], next_page: u32) -> Result<()> {
    let mut header = PageHeader::new(PageType::TreeLeaf);
    header.set_cell_count(entries.len() as u16);
    header.set_next_page(next_page);

    let mut off = LEAF_DATA_START;
    for (key, value) in entries {
        let end = off + CELL_HEADER_SIZE + key.len() + value.len();
        ensure!(end <= PAGE_SIZE, "tree leaf overflow while writing cells");
        page[off..off + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
        page[off + 2..off + 4].copy_from_slice(&(value.len() as u16).to_le_bytes());
        page[off + 4..off + 4 + key.len()].copy_from_slice(key);
        page[off + 4 + key.len()..end].copy_from_slice(value);
        off = end;
    }

    header.set_free_start(off as u16);
    header.write_to(page)
}

impl Tree {
    pub fn create(pager: &mut Pager) -> Result<Self> {
        let leaf = pager.allocate_page()?;
        write_leaf(pager.page_mut(leaf)?, &[], 0)?;

        let root = pager.allocate_page()?;
        let page = pager.page_mut(root)?;
        PageHeader::new(PageType::TreeRoot).write_to(page)?;
        let root_header = TreeRootHeader {
            first_leaf: U32::new(leaf),
            entry_count: U64::new(0),
            reserved: [0u8; 4],
        };
        page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + ROOT_HEADER_SIZE]
            .copy_from_slice(root_header.as_bytes());

        Ok(Self { root })
    }

    pub fn open(pager: &Pager, root: u32) -> Result<Self> {
        expect_page_type(pager.page(root)?, PageType::TreeRoot)?;
        Ok(Self { root })
    }

    pub fn root_page(&self) -> u32 {
        self.root
    }

    pub fn entry_count(&self, pager: &Pager) -> Result<u64> {
        Ok(TreeRootHeader::from_page(pager.page(self.root)?)?.entry_count())
    }

    fn first_leaf(&self, pager: &Pager) -> Result<u32> {
        Ok(TreeRootHeader::from_page(pager.page(self.root)?)?.first_leaf())
    }

    fn bump_entry_count(&self, pager: &mut Pager, delta: i64) -> Result<()> {
        let header = TreeRootHeader::from_page_mut(pager.page_mut(self.root)?)?;
        let count = header
            .entry_count()
            .checked_add_signed(delta)
            .ok_or_else(|| eyre::eyre!("tree entry count underflow"))?;
        header.set_entry_count(count);
        Ok(())
    }

    /// Walks the leaf chain to the leaf that owns `key` for insertion or
    /// lookup. Returns the leaf and its predecessor in the chain.
    fn find_leaf(&self, pager: &Pager, key: &[u8]) -> Result<(u32, Option<u32>)> {
        let mut prev = None;
        let mut leaf = self.first_leaf(pager)?;

        loop {
            let page = pager.page(leaf)?;
            let header = expect_page_type(page, PageType::TreeLeaf)?;
            let next = header.next_page();
            if next == 0 {
                return Ok((leaf, prev));
            }

            let cells = leaf_cells(page)?;
            match cells.last() {
                Some(last) if key <= last.key(page) => return Ok((leaf, prev)),
                _ => {
                    prev = Some(leaf);
                    leaf = next;
                }
            }
        }
    }

    /// Inserts or replaces the value under `key`.
    pub fn add(&self, pager: &mut Pager, key: &[u8], value: &[u8]) -> Result<()> {
        let entry_size = CELL_HEADER_SIZE + key.len() + value.len();
        ensure!(
            entry_size <= MAX_ENTRY_SIZE,
            "tree entry of {} bytes exceeds the leaf capacity of {}",
            entry_size,
            MAX_ENTRY_SIZE
        );

        let (leaf, _prev) = self.find_leaf(pager, key)?;

        let (mut entries, next) = {
            let page = pager.page(leaf)?;
            let header = expect_page_type(page, PageType::TreeLeaf)?;
            let next = header.next_page();
            let entries: Vec<(Vec<u8>, Vec<u8>)> = leaf_cells(page)?
                .iter()
                .map(|c| (c.key(page).to_vec(), c.value(page).to_vec()))
                .collect();
            (entries, next)
        };

        let inserted = match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
            Ok(i) => {
                entries[i].1 = value.to_vec();
                false
            }
            Err(i) => {
                entries.insert(i, (key.to_vec(), value.to_vec()));
                true
            }
        };

        let total: usize = entries
            .iter()
            .map(|(k, v)| CELL_HEADER_SIZE + k.len() + v.len())
            .sum();

        if total <= LEAF_CAPACITY {
            write_leaf(pager.page_mut(leaf)?, &entries, next)?;
        } else {
            self.split_leaf(pager, leaf, entries, next)?;
        }

        if inserted {
            self.bump_entry_count(pager, 1)?;
        }
        Ok(())
    }

    /// Repacks an overflowing leaf into the original page plus freshly
    /// allocated continuation leaves, relinked in place of the original.
    fn split_leaf(
        &self,
        pager: &mut Pager,
        leaf: u32,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        old_next: u32,
    ) -> Result<()> {
        let mut groups: Vec<Vec<(Vec<u8>, Vec<u8>)>> = vec![Vec::new()];
        let mut used = 0usize;
        for entry in entries {
            let size = CELL_HEADER_SIZE + entry.0.len() + entry.1.len();
            if used + size > LEAF_CAPACITY {
                groups.push(Vec::new());
                used = 0;
            }
            used += size;
            groups.last_mut().ok_or_else(|| eyre::eyre!("empty split"))?.push(entry);
        }

        let mut pages = vec![leaf];
        for _ in 1..groups.len() {
            pages.push(pager.allocate_page()?);
        }

        for (i, group) in groups.iter().enumerate() {
            let next = pages.get(i + 1).copied().unwrap_or(old_next);
            write_leaf(pager.page_mut(pages[i])?, group, next)?;
        }
        Ok(())
    }

    /// Zero-copy lookup.
    pub fn read<'p>(&self, pager: &'p Pager, key: &[u8]) -> Result<Option<&'p [u8]>> {
        let (leaf, _prev) = self.find_leaf(pager, key)?;
        let page = pager.page(leaf)?;
        let cells = leaf_cells(page)?;

        match cells.binary_search_by(|c| c.key(page).cmp(key)) {
            Ok(i) => Ok(Some(cells[i].value(page))),
            Err(_) => Ok(None),
        }
    }

    pub fn contains(&self, pager: &Pager, key: &[u8]) -> Result<bool> {
        Ok(self.read(pager, key)?.is_some())
    }

    /// Removes `key`. Empty continuation leaves are unlinked and returned
    /// to the pager; the first leaf stays even when empty.
    pub fn delete(&self, pager: &mut Pager, key: &[u8]) -> Result<bool> {
        let (leaf, prev) = self.find_leaf(pager, key)?;

        let (mut entries, next) = {
            let page = pager.page(leaf)?;
            let header = expect_page_type(page, PageType::TreeLeaf)?;
            let next = header.next_page();
            let entries: Vec<(Vec<u8>, Vec<u8>)> = leaf_cells(page)?
                .iter()
                .map(|c| (c.key(page).to_vec(), c.value(page).to_vec()))
                .collect();
            (entries, next)
        };

        let Ok(i) = entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) else {
            return Ok(false);
        };
        entries.remove(i);

        if entries.is_empty() {
            if let Some(prev) = prev {
                let prev_header = PageHeader::from_bytes_mut(pager.page_mut(prev)?)?;
                prev_header.set_next_page(next);
                pager.free_page(leaf)?;
            } else {
                write_leaf(pager.page_mut(leaf)?, &entries, next)?;
            }
        } else {
            write_leaf(pager.page_mut(leaf)?, &entries, next)?;
        }

        self.bump_entry_count(pager, -1)?;
        Ok(true)
    }

    /// Positions a cursor on the first entry with key >= `from`.
    pub fn cursor_seek<'p>(&self, pager: &'p Pager, from: &[u8]) -> Result<Cursor<'p>> {
        let (leaf, _prev) = self.find_leaf(pager, from)?;
        let page = pager.page(leaf)?;
        let cells = leaf_cells(page)?;

        let index = match cells.binary_search_by(|c| c.key(page).cmp(from)) {
            Ok(i) | Err(i) => i,
        };

        let mut cursor = Cursor {
            pager,
            page: leaf,
            cell: index as u16,
            off: cells
                .get(index)
                .map(|c| c.off)
                .unwrap_or(LEAF_DATA_START),
        };
        if index >= cells.len() {
            cursor.skip_to_next_leaf()?;
        }
        Ok(cursor)
    }

    pub fn cursor_first<'p>(&self, pager: &'p Pager) -> Result<Cursor<'p>> {
        let leaf = self.first_leaf(pager)?;
        let mut cursor = Cursor {
            pager,
            page: leaf,
            cell: 0,
            off: LEAF_DATA_START,
        };
        let header = expect_page_type(pager.page(leaf)?, PageType::TreeLeaf)?;
        if header.cell_count() == 0 {
            cursor.skip_to_next_leaf()?;
        }
        Ok(cursor)
    }

    /// Returns every page of the tree to the pager.
    pub fn free(self, pager: &mut Pager) -> Result<()> {
        let mut leaf = self.first_leaf(pager)?;
        while leaf != 0 {
            let header = expect_page_type(pager.page(leaf)?, PageType::TreeLeaf)?;
            let next = header.next_page();
            pager.free_page(leaf)?;
            leaf = next;
        }
        pager.free_page(self.root)
    }
}

/// Forward-only cursor over a tree. Invalid once the chain is exhausted.
pub struct Cursor<'p> {
    pager: &'p Pager,
    page: u32,
    cell: u16,
    off: usize,
}

impl<'p> Cursor<'p> {
    pub fn valid(&self) -> bool {
        self.page != 0
    }

    pub fn key(&self) -> Result<&'p [u8]> {
        let page = self.current_page()?;
        let cell = cell_at(page, self.off)?;
        Ok(cell.key(page))
    }

    pub fn value(&self) -> Result<&'p [u8]> {
        let page = self.current_page()?;
        let cell = cell_at(page, self.off)?;
        Ok(cell.value(page))
    }

    pub fn advance(&mut self) -> Result<()> {
        let page = self.current_page()?;
        let header = expect_page_type(page, PageType::TreeLeaf)?;
        let cell = cell_at(page, self.off)?;

        self.cell += 1;
        self.off = cell.end();
        if self.cell >= header.cell_count() {
            self.skip_to_next_leaf()?;
        }
        Ok(())
    }

    fn current_page(&self) -> Result<&'p [u8]> {
        ensure!(self.page != 0, "cursor is exhausted");
        self.pager.page(self.page)
    }

    /// Moves to the first cell of the next non-empty leaf, invalidating the
    /// cursor when the chain ends.
    fn skip_to_next_leaf(&mut self) -> Result<()> {
        loop {
            let header = expect_page_type(self.pager.page(self.page)?, PageType::TreeLeaf)?;
            let next = header.next_page();
            if next == 0 {
                self.page = 0;
                return Ok(());
            }
            self.page = next;
            self.cell = 0;
            self.off = LEAF_DATA_START;

            let header = expect_page_type(self.pager.page(self.page)?, PageType::TreeLeaf)?;
            if header.cell_count() > 0 {
                return Ok(());
            }
        }
    }
}
