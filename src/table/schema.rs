//! Table schemas: primary-key and secondary-index definitions.

use eyre::{Result, ensure};
use hashbrown::HashMap;

use crate::records::{RecordBuilder, RecordView};

use super::table::RESERVED_META_KEYS;

fn ensure_not_reserved(name: &str) -> Result<()> {
    ensure!(
        !RESERVED_META_KEYS.contains(&name.as_bytes()),
        "index name '{}' is reserved for table metadata",
        name
    );
    Ok(())
}

/// How a secondary index stores its keys.
///
/// Fixed-key indexes require an 8-byte field and use the cheaper integer
/// tree representation; general indexes accept arbitrary byte-slice keys
/// and may be shared across tables (`global`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    General { global: bool },
    FixedKey,
}

/// Extraction rule mapping a record to an index key: a run of adjacent
/// fields, sliced out of the record without copying.
#[derive(Debug, Clone)]
pub struct SchemaIndexDef {
    name: String,
    start_field: usize,
    field_count: usize,
    kind: IndexKind,
}

impl SchemaIndexDef {
    pub fn new_general(
        name: impl Into<String>,
        start_field: usize,
        field_count: usize,
        global: bool,
    ) -> Result<Self> {
        ensure!(field_count > 0, "index must cover at least one field");
        Ok(Self {
            name: name.into(),
            start_field,
            field_count,
            kind: IndexKind::General { global },
        })
    }

    /// Fixed-key index over a single 8-byte field.
    pub fn new_fixed(name: impl Into<String>, field: usize) -> Self {
        Self {
            name: name.into(),
            start_field: field,
            field_count: 1,
            kind: IndexKind::FixedKey,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn is_global(&self) -> bool {
        matches!(self.kind, IndexKind::General { global: true })
    }

    /// Key bytes for this index, sliced out of a stored record.
    pub fn extract<'p>(&self, view: &RecordView<'p>) -> Result<&'p [u8]> {
        view.field_range(self.start_field, self.field_count)
    }

    /// Key bytes from a staged record that has no physical address yet.
    pub fn extract_from_builder(&self, builder: &RecordBuilder) -> Result<Vec<u8>> {
        builder.field_range_bytes(self.start_field, self.field_count)
    }

    /// Decodes 8 key bytes as the `u64` a fixed-key index stores. Key fields
    /// hold little-endian integers, like every other integer in a record.
    pub fn decode_fixed(&self, table: &str, key: &[u8]) -> Result<u64> {
        ensure!(
            key.len() == 8,
            "fixed-key index '{}' on table '{}' extracted {} bytes (expected 8)",
            self.name,
            table,
            key.len()
        );
        let mut buf = [0u8; 8];
        buf.copy_from_slice(key);
        Ok(u64::from_le_bytes(buf))
    }
}

/// A table's primary key plus its secondary indexes.
#[derive(Debug, Clone)]
pub struct TableSchema {
    key: SchemaIndexDef,
    indexes: HashMap<String, SchemaIndexDef>,
}

impl TableSchema {
    /// The primary key must be a local general definition: key bytes are
    /// arbitrary slices and the key tree always lives under its own table.
    pub fn new(key: SchemaIndexDef) -> Result<Self> {
        ensure_not_reserved(key.name())?;
        ensure!(
            key.kind() == IndexKind::General { global: false },
            "primary key '{}' must be a local general index definition",
            key.name()
        );
        Ok(Self {
            key,
            indexes: HashMap::new(),
        })
    }

    pub fn with_index(mut self, def: SchemaIndexDef) -> Result<Self> {
        ensure_not_reserved(def.name())?;
        ensure!(
            def.name() != self.key.name(),
            "index '{}' collides with the primary key name",
            def.name()
        );
        ensure!(
            !self.indexes.contains_key(def.name()),
            "duplicate index name '{}'",
            def.name()
        );
        self.indexes.insert(def.name().to_string(), def);
        Ok(self)
    }

    pub fn key(&self) -> &SchemaIndexDef {
        &self.key
    }

    pub fn indexes(&self) -> impl Iterator<Item = &SchemaIndexDef> {
        self.indexes.values()
    }

    pub fn index(&self, name: &str) -> Result<&SchemaIndexDef> {
        self.indexes
            .get(name)
            .ok_or_else(|| eyre::eyre!("unknown index '{}'", name))
    }
}
