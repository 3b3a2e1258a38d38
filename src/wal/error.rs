use std::io;
use thiserror::Error;

use crate::file::Lsn;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode log payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch for LSN {lsn} in segment {segment:016x}")]
    ChecksumMismatch { segment: u64, lsn: Lsn },

    #[error("Corrupted log segment {segment:016x} at offset {offset}: {reason}")]
    Corrupted {
        segment: u64,
        offset: u64,
        reason: String,
    },
}

impl WalError {
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            WalError::ChecksumMismatch { .. } | WalError::Corrupted { .. }
        )
    }
}

pub type WalResult<T> = Result<T, WalError>;
