use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::file::BUFFER_POOL_SIZE;
use crate::wal::DEFAULT_SEGMENT_SIZE;

/// Engine tuning knobs. Missing fields in a config file take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frames in the buffer pool
    pub buffer_pool_pages: usize,
    /// Size cap of one log segment in bytes
    pub wal_segment_size: u64,
    /// Write a checkpoint when a database is closed cleanly
    pub checkpoint_on_close: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_pool_pages: BUFFER_POOL_SIZE,
            wal_segment_size: DEFAULT_SEGMENT_SIZE,
            checkpoint_on_close: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn with_buffer_pool_pages(mut self, pages: usize) -> Self {
        self.buffer_pool_pages = pages;
        self
    }

    pub fn with_wal_segment_size(mut self, bytes: u64) -> Self {
        self.wal_segment_size = bytes;
        self
    }

    pub fn with_checkpoint_on_close(mut self, enabled: bool) -> Self {
        self.checkpoint_on_close = enabled;
        self
    }
}
