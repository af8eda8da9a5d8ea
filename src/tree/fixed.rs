//! `u64`-keyed tree built on [`Tree`].
//!
//! Keys are serialized big-endian so the tree's byte order matches numeric
//! order. Values are either absent (set membership) or a single `u64`
//! stored little-endian, matching record-id encoding everywhere else.

use eyre::{Result, ensure};

use crate::storage::Pager;

use super::Tree;

#[derive(Debug, Clone, Copy)]
pub struct FixedTree {
    tree: Tree,
}

impl FixedTree {
    pub fn create(pager: &mut Pager) -> Result<Self> {
        Ok(Self {
            tree: Tree::create(pager)?,
        })
    }

    pub fn open(pager: &Pager, root: u32) -> Result<Self> {
        Ok(Self {
            tree: Tree::open(pager, root)?,
        })
    }

    pub fn root_page(&self) -> u32 {
        self.tree.root_page()
    }

    pub fn entry_count(&self, pager: &Pager) -> Result<u64> {
        self.tree.entry_count(pager)
    }

    pub fn is_empty(&self, pager: &Pager) -> Result<bool> {
        Ok(self.entry_count(pager)? == 0)
    }

    /// Adds `key` with no value (set membership).
    pub fn add(&self, pager: &mut Pager, key: u64) -> Result<()> {
        self.tree.add(pager, &key.to_be_bytes(), &[])
    }

    /// Adds `key` mapped to `value`.
    pub fn add_with(&self, pager: &mut Pager, key: u64, value: u64) -> Result<()> {
        self.tree.add(pager, &key.to_be_bytes(), &value.to_le_bytes())
    }

    pub fn contains(&self, pager: &Pager, key: u64) -> Result<bool> {
        self.tree.contains(pager, &key.to_be_bytes())
    }

    /// Reads the `u64` value under `key`, if any. Fails on entries that were
    /// added without a value.
    pub fn read(&self, pager: &Pager, key: u64) -> Result<Option<u64>> {
        match self.tree.read(pager, &key.to_be_bytes())? {
            Some(value) => {
                ensure!(
                    value.len() == 8,
                    "fixed tree value under key {} has {} bytes (expected 8)",
                    key,
                    value.len()
                );
                let mut buf = [0u8; 8];
                buf.copy_from_slice(value);
                Ok(Some(u64::from_le_bytes(buf)))
            }
            None => Ok(None),
        }
    }

    pub fn delete(&self, pager: &mut Pager, key: u64) -> Result<bool> {
        self.tree.delete(pager, &key.to_be_bytes())
    }

    /// Positions a cursor on the first key >= `from`.
    pub fn cursor_seek<'p>(&self, pager: &'p Pager, from: u64) -> Result<FixedCursor<'p>> {
        Ok(FixedCursor {
            inner: self.tree.cursor_seek(pager, &from.to_be_bytes())?,
        })
    }

    pub fn free(self, pager: &mut Pager) -> Result<()> {
        self.tree.free(pager)
    }
}

pub struct FixedCursor<'p> {
    inner: super::Cursor<'p>,
}

impl<'p> FixedCursor<'p> {
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    pub fn key(&self) -> Result<u64> {
        let key = self.inner.key()?;
        ensure!(
            key.len() == 8,
            "fixed tree key has {} bytes (expected 8)",
            key.len()
        );
        let mut buf = [0u8; 8];
        buf.copy_from_slice(key);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn value(&self) -> Result<Option<u64>> {
        let value = self.inner.value()?;
        if value.is_empty() {
            return Ok(None);
        }
        ensure!(
            value.len() == 8,
            "fixed tree value has {} bytes (expected 8)",
            value.len()
        );
        let mut buf = [0u8; 8];
        buf.copy_from_slice(value);
        Ok(Some(u64::from_le_bytes(buf)))
    }

    pub fn advance(&mut self) -> Result<()> {
        self.inner.advance()
    }
}
