//! # Record Store
//!
//! [`Table`] is the record-storage and index-maintenance core: it decides
//! where record bytes live, keeps the primary-key tree and every secondary
//! index consistent with those bytes, and reclaims space from
//! partially-emptied raw-data sections.
//!
//! ## Placement
//!
//! Records at or below [`RawSection::MAX_ITEM_SIZE`] are packed into the
//! table's active raw-data section; larger records get a dedicated overflow
//! run. The record id encodes the choice: overflow ids are multiples of the
//! page size, section ids never are (see the section module).
//!
//! ## Section Lifecycle
//!
//! ```text
//!            full                    density <= 0.5
//! active ──────────> inactive ──────────────────────> candidate
//!    ^                                                    │
//!    └────────────────────────────────────────────────────┘
//!                  reactivated by rotation
//! ```
//!
//! Deletes watch the freed section's density: at or below
//! [`CANDIDATE_DENSITY`] the section becomes a reuse candidate; at or below
//! [`COMPACT_DENSITY`] every surviving record is relocated into the active
//! section and the drained page is freed. The active section itself is
//! exempt from both transitions. Allocation rotation (a full active
//! section) prefers reactivating the lowest-numbered candidate over
//! creating a new section, bounding long-term fragmentation.
//!
//! ## Index Consistency
//!
//! Every path that frees or relocates record bytes first re-derives the
//! index keys from the current bytes and removes the matching entries, so
//! no index ever references a freed or stale id. Relocations (in-place
//! section defrag, compaction) repoint the primary-key tree and every
//! per-key id set from the old id to the new one.
//!
//! ## Transaction Scoping
//!
//! A `Table` borrows its transaction's pager mutably for its whole
//! lifetime; the opened-index caches it builds are dropped with it and
//! never shared across transactions.

use hashbrown::HashMap;
use smallvec::SmallVec;

use eyre::{Result, ensure};

use crate::records::{RecordBuilder, RecordView};
use crate::storage::{Allocation, PAGE_SIZE, Pager, RawSection};
use crate::tree::{Cursor, FixedCursor, FixedTree, Tree};

use super::schema::{IndexKind, SchemaIndexDef, TableSchema};

/// Sections at or below this density become reuse candidates.
pub const CANDIDATE_DENSITY: f32 = 0.5;
/// Sections at or below this density are compacted and freed.
pub const COMPACT_DENSITY: f32 = 0.15;

const STATS_KEY: &[u8] = b"stats";
const ACTIVE_SECTION_KEY: &[u8] = b"active-section";
const INACTIVE_SECTIONS_KEY: &[u8] = b"inactive-sections";
const CANDIDATE_SECTIONS_KEY: &[u8] = b"candidate-sections";

/// Bookkeeping keys in the table metadata tree; index names must not
/// collide with them.
pub(crate) const RESERVED_META_KEYS: [&[u8]; 4] = [
    STATS_KEY,
    ACTIVE_SECTION_KEY,
    INACTIVE_SECTIONS_KEY,
    CANDIDATE_SECTIONS_KEY,
];

/// Record bytes by id, dispatching on the placement encoded in the id.
pub(crate) fn record_bytes(pager: &Pager, id: u64) -> Result<&[u8]> {
    if id % PAGE_SIZE as u64 == 0 {
        ensure!(id != 0, "record id 0 is not addressable");
        pager.overflow_read((id / PAGE_SIZE as u64) as u32)
    } else {
        RawSection::direct_read(pager, id)
    }
}

fn decode_page(value: &[u8]) -> Result<u32> {
    ensure!(
        value.len() == 4,
        "page-number value has {} bytes (expected 4)",
        value.len()
    );
    Ok(u32::from_le_bytes([value[0], value[1], value[2], value[3]]))
}

fn decode_id(value: &[u8]) -> Result<u64> {
    ensure!(
        value.len() == 8,
        "record-id value has {} bytes (expected 8)",
        value.len()
    );
    let mut buf = [0u8; 8];
    buf.copy_from_slice(value);
    Ok(u64::from_le_bytes(buf))
}

/// One secondary-index key derived from a record, with owned bytes so
/// index maintenance can mutate pages after the source view is gone.
struct IndexEntryKey<'t> {
    def: &'t SchemaIndexDef,
    bytes: SmallVec<[u8; 16]>,
}

/// Every index key of one record, captured before any page is mutated.
struct RecordKeys<'t> {
    id: u64,
    primary: SmallVec<[u8; 16]>,
    secondary: SmallVec<[IndexEntryKey<'t>; 4]>,
}

pub struct Table<'t> {
    pager: &'t mut Pager,
    catalog: Tree,
    schema: &'t TableSchema,
    name: &'t str,
    table_tree: Tree,
    pk_tree: Tree,
    entry_count: u64,
    active_section: RawSection,
    inactive_sections: FixedTree,
    candidate_sections: FixedTree,
    fixed_cache: HashMap<String, FixedTree>,
    general_cache: HashMap<String, Tree>,
}

impl<'t> Table<'t> {
    /// Registers a new table: its metadata tree, primary-key tree, index
    /// trees, bookkeeping sets, and first raw-data section.
    pub(crate) fn create(
        pager: &mut Pager,
        catalog: Tree,
        schema: &TableSchema,
        name: &str,
    ) -> Result<()> {
        ensure!(
            catalog.read(pager, name.as_bytes())?.is_none(),
            "table '{}' already exists",
            name
        );

        let table_tree = Tree::create(pager)?;
        let pk_tree = Tree::create(pager)?;
        let inactive = FixedTree::create(pager)?;
        let candidate = FixedTree::create(pager)?;
        let section = RawSection::create(pager)?;

        table_tree.add(pager, STATS_KEY, &0u64.to_le_bytes())?;
        table_tree.add(pager, ACTIVE_SECTION_KEY, &section.page_no().to_le_bytes())?;
        table_tree.add(
            pager,
            INACTIVE_SECTIONS_KEY,
            &inactive.root_page().to_le_bytes(),
        )?;
        table_tree.add(
            pager,
            CANDIDATE_SECTIONS_KEY,
            &candidate.root_page().to_le_bytes(),
        )?;
        table_tree.add(
            pager,
            schema.key().name().as_bytes(),
            &pk_tree.root_page().to_le_bytes(),
        )?;

        for def in schema.indexes() {
            match def.kind() {
                IndexKind::FixedKey => {
                    let tree = FixedTree::create(pager)?;
                    table_tree.add(pager, def.name().as_bytes(), &tree.root_page().to_le_bytes())?;
                }
                IndexKind::General { global: false } => {
                    let tree = Tree::create(pager)?;
                    table_tree.add(pager, def.name().as_bytes(), &tree.root_page().to_le_bytes())?;
                }
                IndexKind::General { global: true } => {
                    // shared tree, created by whichever table registers first
                    if catalog.read(pager, def.name().as_bytes())?.is_none() {
                        let tree = Tree::create(pager)?;
                        catalog.add(pager, def.name().as_bytes(), &tree.root_page().to_le_bytes())?;
                    }
                }
            }
        }

        catalog.add(pager, name.as_bytes(), &table_tree.root_page().to_le_bytes())
    }

    pub(crate) fn open(
        pager: &'t mut Pager,
        catalog: Tree,
        schema: &'t TableSchema,
        name: &'t str,
    ) -> Result<Self> {
        let table_root = {
            let value = catalog
                .read(pager, name.as_bytes())?
                .ok_or_else(|| eyre::eyre!("table '{}' not found in the catalog", name))?;
            decode_page(value)?
        };
        let table_tree = Tree::open(pager, table_root)?;

        let read_meta = |pager: &Pager, key: &[u8], what: &str| -> Result<Vec<u8>> {
            Ok(table_tree
                .read(pager, key)?
                .ok_or_else(|| eyre::eyre!("table '{}' is missing its {}", name, what))?
                .to_vec())
        };

        let entry_count = decode_id(&read_meta(pager, STATS_KEY, "entry-count stats")?)?;
        let active_page = decode_page(&read_meta(
            pager,
            ACTIVE_SECTION_KEY,
            "active-section pointer",
        )?)?;
        let inactive_root = decode_page(&read_meta(
            pager,
            INACTIVE_SECTIONS_KEY,
            "inactive-section set",
        )?)?;
        let candidate_root = decode_page(&read_meta(
            pager,
            CANDIDATE_SECTIONS_KEY,
            "candidate-section set",
        )?)?;
        let pk_root = decode_page(&read_meta(
            pager,
            schema.key().name().as_bytes(),
            "primary-key tree",
        )?)?;

        let active_section = RawSection::open(pager, active_page)?;
        let inactive_sections = FixedTree::open(pager, inactive_root)?;
        let candidate_sections = FixedTree::open(pager, candidate_root)?;
        let pk_tree = Tree::open(pager, pk_root)?;

        Ok(Self {
            pager,
            catalog,
            schema,
            name,
            table_tree,
            pk_tree,
            entry_count,
            active_section,
            inactive_sections,
            candidate_sections,
            fixed_cache: HashMap::new(),
            general_cache: HashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn number_of_entries(&self) -> u64 {
        self.entry_count
    }

    /// Inserts a staged record and returns its id. The physical bytes are
    /// persisted before any index entry appears, so a key found in the
    /// primary index always dereferences; the entry counter moves last, so
    /// a rejected record never inflates it.
    pub fn insert(&mut self, builder: &RecordBuilder) -> Result<u64> {
        let id = self.place(builder)?;
        let keys = self.collect_keys(id)?;
        self.insert_index_entries(&keys)?;

        self.entry_count += 1;
        self.persist_entry_count()?;
        Ok(id)
    }

    /// Rewrites the record under `id`, in place when the new size permits.
    /// Returns the record's id afterwards, which changes when an in-place
    /// rewrite is not possible.
    pub fn update(&mut self, id: u64, builder: &RecordBuilder) -> Result<u64> {
        let size = builder.size();

        if id % PAGE_SIZE as u64 != 0 {
            if size <= RawSection::MAX_ITEM_SIZE {
                let old_keys = self.collect_keys(id)?;
                // the active section refuses foreign ids and oversized writes
                if let Some(slot) = self.active_section.try_write_direct(self.pager, id, size)? {
                    builder.copy_to(slot)?;
                    self.delete_index_entries(&old_keys)?;
                    let new_keys = self.collect_keys(id)?;
                    self.insert_index_entries(&new_keys)?;
                    return Ok(id);
                }
            }
        } else {
            let page = (id / PAGE_SIZE as u64) as u32;
            let old_size = self.pager.overflow_size(page)?;
            if Pager::overflow_page_count(old_size) == Pager::overflow_page_count(size) {
                let old_keys = self.collect_keys(id)?;
                self.delete_index_entries(&old_keys)?;
                self.pager.set_overflow_size(page, size)?;
                builder.copy_to(self.pager.overflow_slot_mut(page, size)?)?;
                let new_keys = self.collect_keys(id)?;
                self.insert_index_entries(&new_keys)?;
                return Ok(id);
            }
        }

        self.delete(id)?;
        self.insert(builder)
    }

    /// Upsert keyed by the record's own primary key.
    pub fn set(&mut self, builder: &RecordBuilder) -> Result<u64> {
        let schema = self.schema;
        let key = schema.key().extract_from_builder(builder)?;

        let existing = match self.pk_tree.read(&*self.pager, &key)? {
            Some(value) => Some(decode_id(value)?),
            None => None,
        };

        match existing {
            Some(id) => self.update(id, builder),
            None => self.insert(builder),
        }
    }

    /// Removes the record under `id`, its index entries, and its storage,
    /// then applies the density policy to the owning section.
    pub fn delete(&mut self, id: u64) -> Result<()> {
        let keys = self.collect_keys(id)?;
        self.delete_index_entries(&keys)?;

        self.entry_count = self
            .entry_count
            .checked_sub(1)
            .ok_or_else(|| eyre::eyre!("entry count underflow on table '{}'", self.name))?;
        self.persist_entry_count()?;

        if id % PAGE_SIZE as u64 == 0 {
            self.pager.free_overflow((id / PAGE_SIZE as u64) as u32)?;
            return Ok(());
        }

        let density = RawSection::free(self.pager, id)?;
        let section_page = RawSection::section_page_of(id);
        if section_page == self.active_section.page_no() {
            return Ok(());
        }

        if density <= COMPACT_DENSITY {
            self.compact_section(section_page)?;
        } else if density <= CANDIDATE_DENSITY {
            self.candidate_sections
                .add(self.pager, section_page as u64)?;
        }
        Ok(())
    }

    pub fn delete_by_key(&mut self, key: &[u8]) -> Result<bool> {
        let id = match self.pk_tree.read(&*self.pager, key)? {
            Some(value) => decode_id(value)?,
            None => return Ok(false),
        };
        self.delete(id)?;
        Ok(true)
    }

    pub fn read_by_key(&self, key: &[u8]) -> Result<Option<RecordView<'_>>> {
        let pager: &Pager = &*self.pager;
        let Some(value) = self.pk_tree.read(pager, key)? else {
            return Ok(None);
        };
        let id = decode_id(value)?;
        let bytes = record_bytes(pager, id)?;
        Ok(Some(RecordView::new(bytes, id)?))
    }

    pub fn read_by_id(&self, id: u64) -> Result<RecordView<'_>> {
        let bytes = record_bytes(&*self.pager, id)?;
        RecordView::new(bytes, id)
    }

    /// Range scan over a secondary index, starting at the first key at or
    /// after `from` (for fixed-key indexes `from` must be the 8-byte
    /// little-endian key). Yields each distinct index key with a lazy
    /// sequence over the records stored under it.
    pub fn seek<'a>(&'a mut self, index: &str, from: &[u8]) -> Result<SeekIter<'a>> {
        let schema = self.schema;
        let def = schema.index(index)?;

        let inner = match def.kind() {
            IndexKind::FixedKey => {
                let outer = self.fixed_index(def)?;
                let start = def.decode_fixed(self.name, from)?;
                SeekInner::Fixed(outer.cursor_seek(&*self.pager, start)?)
            }
            IndexKind::General { .. } => {
                let outer = self.general_index(def)?;
                SeekInner::General(outer.cursor_seek(&*self.pager, from)?)
            }
        };

        Ok(SeekIter {
            pager: &*self.pager,
            inner,
        })
    }

    // ---- placement ----

    fn place(&mut self, builder: &RecordBuilder) -> Result<u64> {
        let size = builder.size();

        if size <= RawSection::MAX_ITEM_SIZE {
            let id = self.allocate_small(size)?;
            let slot = self
                .active_section
                .try_write_direct(self.pager, id, size)?
                .ok_or_else(|| {
                    eyre::eyre!("freshly allocated slot {} rejected a direct write", id)
                })?;
            builder.copy_to(slot)?;
            return Ok(id);
        }

        let page = self.pager.allocate_overflow(size)?;
        builder.copy_to(self.pager.overflow_slot_mut(page, size)?)?;
        Ok(page as u64 * PAGE_SIZE as u64)
    }

    /// Allocates from the active section, rotating to a candidate or a
    /// fresh section when full.
    fn allocate_small(&mut self, size: usize) -> Result<u64> {
        if let Some(alloc) = self.active_section.try_allocate(self.pager, size)? {
            return self.finish_allocation(alloc);
        }

        let full = self.active_section.page_no() as u64;
        self.inactive_sections.add(self.pager, full)?;

        let mut candidates: Vec<u64> = Vec::new();
        {
            let mut cursor = self.candidate_sections.cursor_seek(&*self.pager, 0)?;
            while cursor.valid() {
                candidates.push(cursor.key()?);
                cursor.advance()?;
            }
        }

        for page in candidates {
            let section = RawSection::open(&*self.pager, page as u32)?;
            if let Some(alloc) = section.try_allocate(self.pager, size)? {
                self.candidate_sections.delete(self.pager, page)?;
                self.inactive_sections.delete(self.pager, page)?;
                self.set_active_section(section)?;
                return self.finish_allocation(alloc);
            }
        }

        let section = RawSection::create(self.pager)?;
        self.set_active_section(section)?;
        let alloc = self
            .active_section
            .try_allocate(self.pager, size)?
            .ok_or_else(|| {
                eyre::eyre!(
                    "allocation of {} bytes failed in a fresh raw-data section",
                    size
                )
            })?;
        self.finish_allocation(alloc)
    }

    fn finish_allocation(&mut self, alloc: Allocation) -> Result<u64> {
        for moved in &alloc.moved {
            self.on_data_moved(moved.old_id, moved.new_id)?;
        }
        Ok(alloc.id)
    }

    fn set_active_section(&mut self, section: RawSection) -> Result<()> {
        self.active_section = section;
        let table_tree = self.table_tree;
        table_tree.add(
            self.pager,
            ACTIVE_SECTION_KEY,
            &section.page_no().to_le_bytes(),
        )
    }

    /// Relocates every live record out of `section_page` and frees it. The
    /// section leaves the candidate set first so rotation cannot hand it
    /// out while it drains.
    fn compact_section(&mut self, section_page: u32) -> Result<()> {
        self.candidate_sections
            .delete(self.pager, section_page as u64)?;

        let base = section_page as u64 * PAGE_SIZE as u64;
        let ids = RawSection::all_ids_in_section(&*self.pager, base)?;

        for old_id in ids {
            let bytes = RawSection::direct_read(&*self.pager, old_id)?.to_vec();
            let new_id = self.allocate_small(bytes.len())?;
            let slot = self
                .active_section
                .try_write_direct(self.pager, new_id, bytes.len())?
                .ok_or_else(|| {
                    eyre::eyre!("freshly allocated slot {} rejected a direct write", new_id)
                })?;
            slot.copy_from_slice(&bytes);
            self.on_data_moved(old_id, new_id)?;
        }

        self.inactive_sections
            .delete(self.pager, section_page as u64)?;
        RawSection::open(&*self.pager, section_page)?.delete_section(self.pager)
    }

    // ---- index maintenance ----

    /// Captures every index key of the record at `id` from its current
    /// bytes, before any page mutation invalidates the view.
    fn collect_keys(&self, id: u64) -> Result<RecordKeys<'t>> {
        let schema = self.schema;
        let pager: &Pager = &*self.pager;

        let view = RecordView::new(record_bytes(pager, id)?, id)?;
        let primary = SmallVec::from_slice(schema.key().extract(&view)?);

        let mut secondary = SmallVec::new();
        for def in schema.indexes() {
            let key = def.extract(&view)?;
            if def.kind() == IndexKind::FixedKey {
                def.decode_fixed(self.name, key)?;
            }
            secondary.push(IndexEntryKey {
                def,
                bytes: SmallVec::from_slice(key),
            });
        }

        Ok(RecordKeys {
            id,
            primary,
            secondary,
        })
    }

    fn insert_index_entries(&mut self, keys: &RecordKeys<'t>) -> Result<()> {
        let pk_tree = self.pk_tree;
        pk_tree.add(self.pager, &keys.primary, &keys.id.to_le_bytes())?;

        for entry in &keys.secondary {
            let set = self.id_set(entry, true)?.ok_or_else(|| {
                eyre::eyre!(
                    "index '{}' on table '{}' failed to materialize an id set",
                    entry.def.name(),
                    self.name
                )
            })?;
            set.add(self.pager, keys.id)?;
        }
        Ok(())
    }

    fn delete_index_entries(&mut self, keys: &RecordKeys<'t>) -> Result<()> {
        let pk_tree = self.pk_tree;
        pk_tree.delete(self.pager, &keys.primary)?;

        for entry in &keys.secondary {
            let set = self.id_set(entry, false)?.ok_or_else(|| {
                eyre::eyre!(
                    "index '{}' on table '{}' has no entry for a live record key",
                    entry.def.name(),
                    self.name
                )
            })?;
            ensure!(
                set.delete(self.pager, keys.id)?,
                "index '{}' on table '{}' does not reference record id {}",
                entry.def.name(),
                self.name,
                keys.id
            );
            if set.is_empty(&*self.pager)? {
                set.free(self.pager)?;
                self.remove_outer_key(entry)?;
            }
        }
        Ok(())
    }

    /// Repoints every index entry of the record now at `new_id` from
    /// `old_id`, re-deriving keys from the bytes at their new location.
    fn on_data_moved(&mut self, old_id: u64, new_id: u64) -> Result<()> {
        let keys = self.collect_keys(new_id)?;

        let pk_tree = self.pk_tree;
        pk_tree.add(self.pager, &keys.primary, &new_id.to_le_bytes())?;

        for entry in &keys.secondary {
            let set = self.id_set(entry, false)?.ok_or_else(|| {
                eyre::eyre!(
                    "index '{}' on table '{}' has no entry for a relocated record",
                    entry.def.name(),
                    self.name
                )
            })?;
            ensure!(
                set.delete(self.pager, old_id)?,
                "index '{}' on table '{}' does not reference relocated id {}",
                entry.def.name(),
                self.name,
                old_id
            );
            set.add(self.pager, new_id)?;
        }
        Ok(())
    }

    /// The per-key id set under a secondary index, optionally creating it.
    /// Duplicate index keys are supported by storing record ids in these
    /// nested sets rather than directly in the index tree.
    fn id_set(&mut self, entry: &IndexEntryKey<'t>, create_missing: bool) -> Result<Option<FixedTree>> {
        match entry.def.kind() {
            IndexKind::FixedKey => {
                let outer = self.fixed_index(entry.def)?;
                let key = entry.def.decode_fixed(self.name, &entry.bytes)?;
                match outer.read(&*self.pager, key)? {
                    Some(root) => Ok(Some(FixedTree::open(&*self.pager, root as u32)?)),
                    None if create_missing => {
                        let set = FixedTree::create(self.pager)?;
                        outer.add_with(self.pager, key, set.root_page() as u64)?;
                        Ok(Some(set))
                    }
                    None => Ok(None),
                }
            }
            IndexKind::General { .. } => {
                let outer = self.general_index(entry.def)?;
                let existing = match outer.read(&*self.pager, &entry.bytes)? {
                    Some(value) => Some(decode_id(value)?),
                    None => None,
                };
                match existing {
                    Some(root) => Ok(Some(FixedTree::open(&*self.pager, root as u32)?)),
                    None if create_missing => {
                        let set = FixedTree::create(self.pager)?;
                        outer.add(
                            self.pager,
                            &entry.bytes,
                            &(set.root_page() as u64).to_le_bytes(),
                        )?;
                        Ok(Some(set))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    fn remove_outer_key(&mut self, entry: &IndexEntryKey<'t>) -> Result<()> {
        match entry.def.kind() {
            IndexKind::FixedKey => {
                let outer = self.fixed_index(entry.def)?;
                let key = entry.def.decode_fixed(self.name, &entry.bytes)?;
                outer.delete(self.pager, key)?;
            }
            IndexKind::General { .. } => {
                let outer = self.general_index(entry.def)?;
                outer.delete(self.pager, &entry.bytes)?;
            }
        }
        Ok(())
    }

    // ---- opened-tree caches, transaction-scoped ----

    fn fixed_index(&mut self, def: &SchemaIndexDef) -> Result<FixedTree> {
        if let Some(tree) = self.fixed_cache.get(def.name()) {
            return Ok(*tree);
        }
        let root = self.meta_root(def.name())?;
        let tree = FixedTree::open(&*self.pager, root)?;
        self.fixed_cache.insert(def.name().to_string(), tree);
        Ok(tree)
    }

    fn general_index(&mut self, def: &SchemaIndexDef) -> Result<Tree> {
        if let Some(tree) = self.general_cache.get(def.name()) {
            return Ok(*tree);
        }
        let root = if def.is_global() {
            let catalog = self.catalog;
            let value = catalog
                .read(&*self.pager, def.name().as_bytes())?
                .ok_or_else(|| {
                    eyre::eyre!("global index tree '{}' missing from the catalog", def.name())
                })?;
            decode_page(value)?
        } else {
            self.meta_root(def.name())?
        };
        let tree = Tree::open(&*self.pager, root)?;
        self.general_cache.insert(def.name().to_string(), tree);
        Ok(tree)
    }

    fn meta_root(&self, name: &str) -> Result<u32> {
        let value = self
            .table_tree
            .read(&*self.pager, name.as_bytes())?
            .ok_or_else(|| {
                eyre::eyre!("metadata entry '{}' missing on table '{}'", name, self.name)
            })?;
        decode_page(value)
    }

    fn persist_entry_count(&mut self) -> Result<()> {
        let table_tree = self.table_tree;
        table_tree.add(self.pager, STATS_KEY, &self.entry_count.to_le_bytes())
    }
}

/// Index key yielded by a range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekKey<'p> {
    Bytes(&'p [u8]),
    Fixed(u64),
}

/// One distinct index key with the records stored under it.
pub struct SeekResult<'p> {
    pub key: SeekKey<'p>,
    pub records: RecordIter<'p>,
}

enum SeekInner<'p> {
    General(Cursor<'p>),
    Fixed(FixedCursor<'p>),
}

/// Forward-only scan over a secondary index. Valid only while the owning
/// transaction is open; mutating the table during iteration has undefined
/// positioning.
pub struct SeekIter<'p> {
    pager: &'p Pager,
    inner: SeekInner<'p>,
}

impl<'p> Iterator for SeekIter<'p> {
    type Item = Result<SeekResult<'p>>;

    fn next(&mut self) -> Option<Self::Item> {
        let pager = self.pager;
        match &mut self.inner {
            SeekInner::General(cursor) => {
                if !cursor.valid() {
                    return None;
                }
                let step = (|| {
                    let key = cursor.key()?;
                    let root = decode_id(cursor.value()?)? as u32;
                    let set = FixedTree::open(pager, root)?;
                    let records = RecordIter {
                        pager,
                        cursor: set.cursor_seek(pager, 0)?,
                    };
                    cursor.advance()?;
                    Ok(SeekResult {
                        key: SeekKey::Bytes(key),
                        records,
                    })
                })();
                Some(step)
            }
            SeekInner::Fixed(cursor) => {
                if !cursor.valid() {
                    return None;
                }
                let step = (|| {
                    let key = cursor.key()?;
                    let root = cursor
                        .value()?
                        .ok_or_else(|| eyre::eyre!("index key {} has no id-set root", key))?
                        as u32;
                    let set = FixedTree::open(pager, root)?;
                    let records = RecordIter {
                        pager,
                        cursor: set.cursor_seek(pager, 0)?,
                    };
                    cursor.advance()?;
                    Ok(SeekResult {
                        key: SeekKey::Fixed(key),
                        records,
                    })
                })();
                Some(step)
            }
        }
    }
}

/// Lazy sequence over the records stored under one index key, each
/// dereferenced by id on demand.
pub struct RecordIter<'p> {
    pager: &'p Pager,
    cursor: FixedCursor<'p>,
}

impl<'p> Iterator for RecordIter<'p> {
    type Item = Result<RecordView<'p>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.cursor.valid() {
            return None;
        }
        let pager = self.pager;
        let cursor = &mut self.cursor;
        let step = (|| {
            let id = cursor.key()?;
            let view = RecordView::new(record_bytes(pager, id)?, id)?;
            cursor.advance()?;
            Ok(view)
        })();
        Some(step)
    }
}
