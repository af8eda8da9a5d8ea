//! Zero-copy record access.

use eyre::{Result, ensure};

use super::{FIELD_OFFSET_SIZE, RECORD_HEADER_BASE};

/// A validated view over a serialized record, borrowing the underlying
/// storage. Carries the record id it was read under so index extraction can
/// pair key bytes with their id.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'p> {
    data: &'p [u8],
    id: u64,
}

impl<'p> RecordView<'p> {
    /// Validates the record header against the byte length. The offsets
    /// must be monotonic and the last one must land exactly on the end of
    /// the payload.
    pub fn new(data: &'p [u8], id: u64) -> Result<Self> {
        ensure!(
            data.len() >= RECORD_HEADER_BASE,
            "record of {} bytes is too short for a header",
            data.len()
        );

        let count = u16::from_le_bytes([data[0], data[1]]) as usize;
        let payload_start = RECORD_HEADER_BASE + FIELD_OFFSET_SIZE * count;
        ensure!(
            payload_start <= data.len(),
            "record offset table for {} fields exceeds record of {} bytes",
            count,
            data.len()
        );

        let payload_len = data.len() - payload_start;
        let mut previous = 0u32;
        for i in 0..count {
            let end = field_end(data, i);
            ensure!(
                end >= previous,
                "record field {} ends at {} before field {} at {}",
                i,
                end,
                i.wrapping_sub(1),
                previous
            );
            previous = end;
        }
        ensure!(
            previous as usize == payload_len,
            "record payload is {} bytes but the last field ends at {}",
            payload_len,
            previous
        );

        Ok(Self { data, id })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn data(&self) -> &'p [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn field_count(&self) -> usize {
        u16::from_le_bytes([self.data[0], self.data[1]]) as usize
    }

    pub fn field(&self, index: usize) -> Result<&'p [u8]> {
        self.field_range(index, 1)
    }

    /// Contiguous slice spanning fields `start..start + count`.
    pub fn field_range(&self, start: usize, count: usize) -> Result<&'p [u8]> {
        let field_count = self.field_count();
        ensure!(
            count > 0 && start + count <= field_count,
            "field range {}..{} out of range (record has {} fields)",
            start,
            start + count,
            field_count
        );

        let payload_start = RECORD_HEADER_BASE + FIELD_OFFSET_SIZE * field_count;
        let from = if start == 0 {
            0
        } else {
            field_end(self.data, start - 1) as usize
        };
        let to = field_end(self.data, start + count - 1) as usize;

        Ok(&self.data[payload_start + from..payload_start + to])
    }
}

fn field_end(data: &[u8], index: usize) -> u32 {
    let pos = RECORD_HEADER_BASE + FIELD_OFFSET_SIZE * index;
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordBuilder;

    fn record(fields: &[&[u8]]) -> Vec<u8> {
        let mut builder = RecordBuilder::new();
        for f in fields {
            builder.add_field(f);
        }
        let mut buf = vec![0u8; builder.size()];
        builder.copy_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(RecordView::new(&[], 0).is_err());
        assert!(RecordView::new(&[1], 0).is_err());
    }

    #[test]
    fn rejects_offset_table_past_end() {
        // claims 100 fields but has no offset table
        let data = 100u16.to_le_bytes();
        assert!(RecordView::new(&data, 0).is_err());
    }

    #[test]
    fn rejects_non_monotonic_offsets() {
        let mut data = record(&[b"aa", b"bb"]);
        // swap the two end offsets (2 and 4)
        data[2..6].copy_from_slice(&4u32.to_le_bytes());
        data[6..10].copy_from_slice(&2u32.to_le_bytes());
        assert!(RecordView::new(&data, 0).is_err());
    }

    #[test]
    fn rejects_payload_length_mismatch() {
        let mut data = record(&[b"abc"]);
        data.push(0xFF);
        assert!(RecordView::new(&data, 0).is_err());
    }

    #[test]
    fn field_range_is_contiguous() {
        let data = record(&[b"one", b"two", b"three"]);
        let view = RecordView::new(&data, 7).unwrap();

        assert_eq!(view.field_range(0, 3).unwrap(), b"onetwothree");
        assert_eq!(view.field_range(1, 2).unwrap(), b"twothree");
        assert!(view.field_range(1, 3).is_err());
        assert!(view.field_range(0, 0).is_err());
    }
}
