//! In-memory record assembly.

use eyre::{Result, ensure};
use smallvec::SmallVec;

use super::{FIELD_OFFSET_SIZE, RECORD_HEADER_BASE};

/// Accumulates fields and serializes them into the flat record layout.
///
/// The builder owns its field bytes, so a record can be staged before any
/// page is touched and copied straight into storage once space is carved
/// out.
#[derive(Debug, Default, Clone)]
pub struct RecordBuilder {
    fields: SmallVec<[Vec<u8>; 8]>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, bytes: &[u8]) -> &mut Self {
        self.fields.push(bytes.to_vec());
        self
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, index: usize) -> Result<&[u8]> {
        self.fields
            .get(index)
            .map(|f| f.as_slice())
            .ok_or_else(|| {
                eyre::eyre!(
                    "field index {} out of range (record has {} fields)",
                    index,
                    self.fields.len()
                )
            })
    }

    /// Serialized size of the record.
    pub fn size(&self) -> usize {
        let payload: usize = self.fields.iter().map(|f| f.len()).sum();
        RECORD_HEADER_BASE + FIELD_OFFSET_SIZE * self.fields.len() + payload
    }

    /// Writes the record into `buf`, which must be exactly [`size`] bytes.
    ///
    /// [`size`]: RecordBuilder::size
    pub fn copy_to(&self, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.size(),
            "record buffer is {} bytes, expected {}",
            buf.len(),
            self.size()
        );
        ensure!(
            self.fields.len() <= u16::MAX as usize,
            "record has too many fields: {}",
            self.fields.len()
        );

        buf[0..2].copy_from_slice(&(self.fields.len() as u16).to_le_bytes());

        let mut offset_pos = RECORD_HEADER_BASE;
        let mut payload_pos = RECORD_HEADER_BASE + FIELD_OFFSET_SIZE * self.fields.len();
        let mut end = 0u32;

        for field in &self.fields {
            end = end
                .checked_add(field.len() as u32)
                .ok_or_else(|| eyre::eyre!("record payload exceeds 4GiB"))?;
            buf[offset_pos..offset_pos + FIELD_OFFSET_SIZE].copy_from_slice(&end.to_le_bytes());
            offset_pos += FIELD_OFFSET_SIZE;

            buf[payload_pos..payload_pos + field.len()].copy_from_slice(field);
            payload_pos += field.len();
        }

        Ok(())
    }

    /// Concatenated bytes of fields `start..start + count`, for key
    /// extraction before the record reaches storage.
    pub fn field_range_bytes(&self, start: usize, count: usize) -> Result<Vec<u8>> {
        ensure!(
            start + count <= self.fields.len(),
            "field range {}..{} out of range (record has {} fields)",
            start,
            start + count,
            self.fields.len()
        );

        let total: usize = self.fields[start..start + count].iter().map(|f| f.len()).sum();
        let mut bytes = Vec::with_capacity(total);
        for field in &self.fields[start..start + count] {
            bytes.extend_from_slice(field);
        }
        Ok(bytes)
    }
}
