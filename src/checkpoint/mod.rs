//! Checkpoint file
//!
//! `checkpoint.json` records the LSN recovery starts replaying from. It is
//! replaced atomically: write a temp file, fsync it, rename it over the old
//! file, fsync the directory.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::file::Lsn;
use crate::sync::lock;

pub const CHECKPOINT_FILE: &str = "checkpoint.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub lsn: Lsn,
    /// Seconds since the Unix epoch
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub database: String,
}

pub struct CheckpointManager {
    dir: PathBuf,
    /// Serializes writers of the checkpoint file
    write_lock: Mutex<()>,
}

impl CheckpointManager {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    pub fn save(&self, lsn: Lsn, database: &str) -> std::io::Result<Checkpoint> {
        let checkpoint = Checkpoint {
            lsn,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            database: database.to_string(),
        };
        let json = serde_json::to_vec_pretty(&checkpoint)?;

        let _guard = lock(&self.write_lock);
        write_atomic(&self.path(), &json)?;

        info!("checkpoint of '{}' saved at LSN {}", database, lsn);
        Ok(checkpoint)
    }

    /// The saved checkpoint, or LSN 0 when there is none or it is unreadable
    pub fn load(&self) -> Checkpoint {
        let path = self.path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(_) => return Checkpoint::default(),
        };
        match serde_json::from_slice(&data) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!("ignoring invalid checkpoint file {}: {}", path.display(), e);
                Checkpoint::default()
            }
        }
    }
}

/// Replace `path` with `data` so a crash leaves either the old or the new
/// contents: write `<path>.tmp`, fsync it, rename it over `path`, fsync the
/// directory.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => sync_dir(dir),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_checkpoint_is_zero() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp_dir.path());
        assert_eq!(manager.load().lsn, 0);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp_dir.path());
        manager.save(42, "shop").unwrap();
        manager.save(57, "shop").unwrap();

        let checkpoint = manager.load();
        assert_eq!(checkpoint.lsn, 57);
        assert_eq!(checkpoint.database, "shop");
        assert!(checkpoint.timestamp > 0);
        assert!(!temp_dir.path().join("checkpoint.json.tmp").exists());
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!temp_dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_invalid_checkpoint_is_zero() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(CHECKPOINT_FILE), b"{not json").unwrap();
        let manager = CheckpointManager::new(temp_dir.path());
        assert_eq!(manager.load(), Checkpoint::default());
    }
}
