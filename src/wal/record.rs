//! Log record framing
//!
//! ```text
//! +-----------+-----------+-------------+-----------------+
//! | lsn (8)   | len (4)   | crc32 (4)   | payload (len)   |
//! +-----------+-----------+-------------+-----------------+
//! ```
//!
//! Header fields are big-endian. The payload is the JSON form of a
//! [`WalOperation`]; the checksum covers the LSN bytes followed by the payload.

use serde::{Deserialize, Serialize};

use super::error::WalResult;
use crate::file::Lsn;
use crate::record::{RowPointer, TableSchema};

pub const RECORD_HEADER_SIZE: usize = 16;

/// One logged action. Transaction id 0 marks work outside any transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum WalOperation {
    CreateTable {
        schema: TableSchema,
    },
    Insert {
        txn_id: u64,
        table: String,
        row_data: Vec<u8>,
        row_ptr: RowPointer,
    },
    Update {
        txn_id: u64,
        table: String,
        old_row_ptr: RowPointer,
        new_row_ptr: RowPointer,
        row_data: Vec<u8>,
        #[serde(default)]
        before_image: Option<Vec<u8>>,
    },
    Delete {
        txn_id: u64,
        table: String,
        row_ptr: RowPointer,
        #[serde(default)]
        before_image: Option<Vec<u8>>,
    },
    TxnBegin {
        txn_id: u64,
    },
    TxnCommit {
        txn_id: u64,
    },
    TxnAbort {
        txn_id: u64,
    },
    /// Cancels the record at `target_lsn` (a failed CREATE TABLE)
    Compensation {
        target_lsn: Lsn,
    },
}

impl WalOperation {
    pub fn txn_id(&self) -> Option<u64> {
        match self {
            WalOperation::Insert { txn_id, .. }
            | WalOperation::Update { txn_id, .. }
            | WalOperation::Delete { txn_id, .. }
            | WalOperation::TxnBegin { txn_id }
            | WalOperation::TxnCommit { txn_id }
            | WalOperation::TxnAbort { txn_id } => Some(*txn_id),
            WalOperation::CreateTable { .. } | WalOperation::Compensation { .. } => None,
        }
    }

    /// Row-level change
    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            WalOperation::Insert { .. } | WalOperation::Update { .. } | WalOperation::Delete { .. }
        )
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            WalOperation::Insert { table, .. }
            | WalOperation::Update { table, .. }
            | WalOperation::Delete { table, .. } => Some(table),
            WalOperation::CreateTable { schema } => Some(schema.name()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WalOperation::CreateTable { .. } => "CreateTable",
            WalOperation::Insert { .. } => "Insert",
            WalOperation::Update { .. } => "Update",
            WalOperation::Delete { .. } => "Delete",
            WalOperation::TxnBegin { .. } => "TxnBegin",
            WalOperation::TxnCommit { .. } => "TxnCommit",
            WalOperation::TxnAbort { .. } => "TxnAbort",
            WalOperation::Compensation { .. } => "Compensation",
        }
    }
}

/// CRC32 over `lsn || payload`
pub fn checksum(lsn: Lsn, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Frame an operation as a complete log record
pub fn encode_record(lsn: Lsn, op: &WalOperation) -> WalResult<Vec<u8>> {
    let payload = serde_json::to_vec(op)?;
    let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    out.extend_from_slice(&lsn.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&checksum(lsn, &payload).to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parsed record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub lsn: Lsn,
    pub len: u32,
    pub crc: u32,
}

impl RecordHeader {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let header = buf.get(..RECORD_HEADER_SIZE)?;
        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&header[0..8]);
        Some(Self {
            lsn: u64::from_be_bytes(lsn),
            len: u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
            crc: u32::from_be_bytes([header[12], header[13], header[14], header[15]]),
        })
    }

    pub fn record_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.len as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let op = WalOperation::TxnCommit { txn_id: 7 };
        let bytes = encode_record(0x0102, &op).unwrap();
        let header = RecordHeader::parse(&bytes).unwrap();

        assert_eq!(&bytes[0..8], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(header.lsn, 0x0102);
        assert_eq!(header.record_len(), bytes.len());

        let payload = &bytes[RECORD_HEADER_SIZE..];
        assert_eq!(header.crc, checksum(0x0102, payload));
        // Same payload under a different LSN does not verify
        assert_ne!(header.crc, checksum(0x0103, payload));

        let decoded: WalOperation = serde_json::from_slice(payload).unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn test_payload_is_tagged_json() {
        let op = WalOperation::Delete {
            txn_id: 3,
            table: "users".to_string(),
            row_ptr: RowPointer::new(1, 2, 3),
            before_image: Some(vec![1, 2]),
        };
        let json: serde_json::Value = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "Delete");
        assert_eq!(json["table"], "users");
        assert_eq!(json["row_ptr"]["slot_index"], 3);

        assert_eq!(op.txn_id(), Some(3));
        assert!(op.is_dml());
        assert_eq!(op.table(), Some("users"));
    }

    #[test]
    fn test_before_image_defaults_to_none() {
        let json = r#"{"op":"Update","txn_id":1,"table":"t",
            "old_row_ptr":{"file_id":1,"page_number":0,"slot_index":0},
            "new_row_ptr":{"file_id":1,"page_number":0,"slot_index":0},
            "row_data":[1]}"#;
        let op: WalOperation = serde_json::from_str(json).unwrap();
        assert!(matches!(op, WalOperation::Update { before_image: None, .. }));
    }

    #[test]
    fn test_short_header() {
        assert!(RecordHeader::parse(&[0u8; 15]).is_none());
    }
}
