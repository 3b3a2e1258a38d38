use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{RecordError, RecordResult};
use super::schema::TableSchema;
use super::value::Value;
use crate::file::{FileId, LocalPageId, PageId, global_page_id};

/// Physical address of a row: `(file, page, slot)`.
///
/// Stable until a grow-update moves the row to another slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowPointer {
    pub file_id: FileId,
    pub page_number: LocalPageId,
    pub slot_index: u16,
}

impl RowPointer {
    /// Encoded size inside index values
    pub const SIZE: usize = 10;

    pub fn new(file_id: FileId, page_number: LocalPageId, slot_index: u16) -> Self {
        Self {
            file_id,
            page_number,
            slot_index,
        }
    }

    pub fn page_id(&self) -> PageId {
        global_page_id(self.file_id, self.page_number)
    }

    /// Little-endian `file u32 | page u32 | slot u16`
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.file_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.page_number.to_le_bytes());
        out[8..10].copy_from_slice(&self.slot_index.to_le_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> RecordResult<Self> {
        if data.len() != Self::SIZE {
            return Err(RecordError::Deserialization(format!(
                "Row pointer must be {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        Ok(Self {
            file_id: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            page_number: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            slot_index: u16::from_le_bytes([data[8], data[9]]),
        })
    }
}

impl fmt::Display for RowPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.file_id, self.page_number, self.slot_index
        )
    }
}

/// A single row with typed values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Serialize according to schema.
    /// Format: [NULL bitmap] [non-null column data...]
    pub fn encode(&self, schema: &TableSchema) -> RecordResult<Vec<u8>> {
        schema.validate_row(&self.values)?;

        let bitmap_size = schema.null_bitmap_size();
        let mut out = Vec::with_capacity(bitmap_size + self.values.len() * 4);
        out.resize(bitmap_size, 0);

        for (i, value) in self.values.iter().enumerate() {
            if value.is_null() {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        for value in self.values.iter().filter(|v| !v.is_null()) {
            value.encode_into(&mut out)?;
        }
        Ok(out)
    }

    pub fn decode(data: &[u8], schema: &TableSchema) -> RecordResult<Self> {
        let bitmap_size = schema.null_bitmap_size();
        if data.len() < bitmap_size {
            return Err(RecordError::Deserialization(format!(
                "Row of {} bytes is shorter than its {} byte null bitmap",
                data.len(),
                bitmap_size
            )));
        }

        let mut pos = bitmap_size;
        let mut values = Vec::with_capacity(schema.column_count());
        for (i, col) in schema.columns().iter().enumerate() {
            if data[i / 8] & (1 << (i % 8)) != 0 {
                values.push(Value::Null);
            } else {
                values.push(Value::decode(data, &mut pos, &col.data_type)?);
            }
        }

        if pos != data.len() {
            return Err(RecordError::Deserialization(format!(
                "{} trailing bytes after row for table '{}'",
                data.len() - pos,
                schema.name()
            )));
        }
        Ok(Self { values })
    }
}
