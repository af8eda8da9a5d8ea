//! # Store and Transactions
//!
//! [`Store`] owns the pager and the catalog tree (table name -> metadata
//! tree root, plus the shared trees of global indexes). Write access goes
//! through [`Transaction`], handed out by `begin()`.
//!
//! Single-writer by construction: `begin()` takes `&mut self`, so the
//! borrow checker admits one live transaction per store. Tables opened
//! within a transaction borrow it for their whole lifetime; their caches
//! die with the transaction and are rebuilt by the next one.
//!
//! `commit()` flushes the mmap and refreshes the file-header checksum. A
//! dropped transaction leaves dirty pages in the mapping; nothing reverts
//! them, so callers that want durability boundaries must commit.

use std::path::Path;

use eyre::{Result, ensure};

use crate::storage::Pager;
use crate::table::{Table, TableSchema};
use crate::tree::Tree;

pub struct Store {
    pager: Pager,
    catalog: Tree,
}

impl Store {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut pager = Pager::create(path)?;
        let catalog = Tree::create(&mut pager)?;
        pager.set_catalog_root(catalog.root_page())?;
        pager.sync()?;
        Ok(Self { pager, catalog })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pager = Pager::open(path)?;
        let root = pager.catalog_root()?;
        ensure!(root != 0, "store has no catalog tree");
        let catalog = Tree::open(&pager, root)?;
        Ok(Self { pager, catalog })
    }

    pub fn begin(&mut self) -> Transaction<'_> {
        Transaction {
            pager: &mut self.pager,
            catalog: self.catalog,
        }
    }

    /// Pages returned to the freelist, for observing reclamation.
    pub fn free_page_count(&self) -> Result<u32> {
        self.pager.free_page_count()
    }
}

pub struct Transaction<'s> {
    pager: &'s mut Pager,
    catalog: Tree,
}

impl<'s> Transaction<'s> {
    pub fn create_table(&mut self, schema: &TableSchema, name: &str) -> Result<()> {
        Table::create(self.pager, self.catalog, schema, name)
    }

    pub fn open_table<'t>(&'t mut self, schema: &'t TableSchema, name: &'t str) -> Result<Table<'t>> {
        Table::open(self.pager, self.catalog, schema, name)
    }

    pub fn commit(self) -> Result<()> {
        self.pager.sync()
    }
}
