//! Write-ahead log
//!
//! The log is a sequence of segment files `wal_<id as 16 hex digits>.log` in
//! one directory. Records are appended to the newest segment; a segment that
//! would grow past the size cap is sealed (fsynced) and a new one started.
//!
//! - `allocate_lsn` hands out strictly increasing LSNs
//! - `append_to_buffer` writes a record through to the OS without fsync
//! - `sync` fsyncs the active segment and advances the flushed LSN, which is
//!   the bound the buffer pool checks before writing a dirty page
//!
//! On open, a torn or corrupt tail of the newest segment is cut off. Corruption
//! anywhere else fails replay.

mod error;
mod record;

pub use error::{WalError, WalResult};
pub use record::{RECORD_HEADER_SIZE, RecordHeader, WalOperation, checksum, encode_record};

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};

use crate::file::{FileError, FileResult, LogFlusher, Lsn};
use crate::sync::lock;

/// Default segment size cap: 16 MiB
pub const DEFAULT_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

fn segment_file_name(id: u64) -> String {
    format!("wal_{:016x}.log", id)
}

fn parse_segment_id(name: &str) -> Option<u64> {
    let hex = name.strip_prefix("wal_")?.strip_suffix(".log")?;
    if hex.len() != 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

/// Segment ids present in `dir`, ascending
fn list_segments(dir: &Path) -> WalResult<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(id) = entry.file_name().to_str().and_then(parse_segment_id) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Result of walking the records of one segment image
struct SegmentScan {
    records: Vec<(RecordHeader, usize)>,
    /// Bytes up to the end of the last good record
    valid_len: usize,
    /// Why the walk stopped early, if it did
    error: Option<WalError>,
}

fn scan_segment(segment: u64, data: &[u8]) -> SegmentScan {
    let mut records = Vec::new();
    let mut offset = 0usize;

    let error = loop {
        if offset == data.len() {
            break None;
        }
        let corrupt = |reason: &str| WalError::Corrupted {
            segment,
            offset: offset as u64,
            reason: reason.to_string(),
        };

        let Some(header) = RecordHeader::parse(&data[offset..]) else {
            break Some(corrupt("truncated record header"));
        };
        let end = offset + header.record_len();
        let Some(payload) = data.get(offset + RECORD_HEADER_SIZE..end) else {
            break Some(corrupt("truncated record payload"));
        };
        if checksum(header.lsn, payload) != header.crc {
            break Some(WalError::ChecksumMismatch {
                segment,
                lsn: header.lsn,
            });
        }

        records.push((header, offset + RECORD_HEADER_SIZE));
        offset = end;
    };

    SegmentScan {
        records,
        valid_len: offset,
        error,
    }
}

struct Segment {
    id: u64,
    path: PathBuf,
    file: File,
    size: u64,
    first_lsn: Option<Lsn>,
}

impl Segment {
    fn create(dir: &Path, id: u64) -> WalResult<Self> {
        let path = dir.join(segment_file_name(id));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            id,
            path,
            file,
            size,
            first_lsn: None,
        })
    }
}

struct SealedSegment {
    id: u64,
    path: PathBuf,
    first_lsn: Option<Lsn>,
}

struct WalState {
    sealed: Vec<SealedSegment>,
    active: Segment,
    /// Highest LSN written to the active or any sealed segment
    appended_lsn: Lsn,
}

pub struct WalManager {
    dir: PathBuf,
    segment_size: u64,
    current_lsn: AtomicU64,
    flushed_lsn: AtomicU64,
    state: Mutex<WalState>,
}

impl WalManager {
    /// Open the log in `dir` with the default segment cap
    pub fn open<P: AsRef<Path>>(dir: P) -> WalResult<Self> {
        Self::with_segment_size(dir, DEFAULT_SEGMENT_SIZE)
    }

    pub fn with_segment_size<P: AsRef<Path>>(dir: P, segment_size: u64) -> WalResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let ids = list_segments(&dir)?;
        let Some((&last_id, older)) = ids.split_last() else {
            let active = Segment::create(&dir, 0)?;
            info!("created log in {}", dir.display());
            return Ok(Self::assemble(dir, segment_size, Vec::new(), active, 0));
        };

        let mut sealed = Vec::with_capacity(older.len());
        for &id in older {
            let path = dir.join(segment_file_name(id));
            let first_lsn = read_first_lsn(&path)?;
            sealed.push(SealedSegment { id, path, first_lsn });
        }

        let mut active = Segment::create(&dir, last_id)?;
        let data = fs::read(&active.path)?;
        let scan = scan_segment(last_id, &data);
        if let Some(err) = &scan.error {
            warn!(
                "truncating log segment {:016x} from {} to {} bytes: {}",
                last_id,
                data.len(),
                scan.valid_len,
                err
            );
            active.file.set_len(scan.valid_len as u64)?;
            active.file.sync_all()?;
            active.size = scan.valid_len as u64;
        }
        active.first_lsn = scan.records.first().map(|(h, _)| h.lsn);

        let mut last_lsn = scan.records.last().map(|(h, _)| h.lsn);
        for segment in sealed.iter().rev() {
            if last_lsn.is_some() {
                break;
            }
            let data = fs::read(&segment.path)?;
            last_lsn = scan_segment(segment.id, &data)
                .records
                .last()
                .map(|(h, _)| h.lsn);
        }
        let last_lsn = last_lsn.unwrap_or(0);

        info!(
            "opened log in {} ({} segments, last LSN {})",
            dir.display(),
            ids.len(),
            last_lsn
        );
        Ok(Self::assemble(dir, segment_size, sealed, active, last_lsn))
    }

    fn assemble(
        dir: PathBuf,
        segment_size: u64,
        sealed: Vec<SealedSegment>,
        active: Segment,
        last_lsn: Lsn,
    ) -> Self {
        Self {
            dir,
            segment_size,
            current_lsn: AtomicU64::new(last_lsn),
            flushed_lsn: AtomicU64::new(last_lsn),
            state: Mutex::new(WalState {
                sealed,
                active,
                appended_lsn: last_lsn,
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve the next LSN
    pub fn allocate_lsn(&self) -> Lsn {
        self.current_lsn.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest LSN handed out so far
    pub fn current_lsn(&self) -> Lsn {
        self.current_lsn.load(Ordering::SeqCst)
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.flushed_lsn.load(Ordering::SeqCst)
    }

    /// Never hand out an LSN at or below `lsn`. Segments below a checkpoint
    /// may have been removed, so the checkpoint LSN bounds what pages carry.
    pub fn seed_lsn(&self, lsn: Lsn) {
        let mut state = lock(&self.state);
        state.appended_lsn = state.appended_lsn.max(lsn);
        self.current_lsn.fetch_max(lsn, Ordering::SeqCst);
        self.flushed_lsn.fetch_max(lsn, Ordering::SeqCst);
    }

    /// Write a record for `op` under a previously allocated LSN. The record
    /// reaches the OS but is not durable until [`WalManager::sync`].
    pub fn append_to_buffer(&self, op: &WalOperation, lsn: Lsn) -> WalResult<()> {
        let bytes = encode_record(lsn, op)?;
        let mut state = lock(&self.state);

        if state.active.size > 0 && state.active.size + bytes.len() as u64 > self.segment_size {
            self.roll_over(&mut state)?;
        }

        state.active.file.write_all(&bytes)?;
        state.active.size += bytes.len() as u64;
        state.active.first_lsn.get_or_insert(lsn);
        state.appended_lsn = state.appended_lsn.max(lsn);
        debug!("logged {} at LSN {} ({} bytes)", op.name(), lsn, bytes.len());
        Ok(())
    }

    /// Allocate an LSN and append `op` under it
    pub fn append_operation(&self, op: &WalOperation) -> WalResult<Lsn> {
        let lsn = self.allocate_lsn();
        self.append_to_buffer(op, lsn)?;
        Ok(lsn)
    }

    /// Seal the active segment and start the next one
    fn roll_over(&self, state: &mut WalState) -> WalResult<()> {
        state.active.file.sync_data()?;
        let next = Segment::create(&self.dir, state.active.id + 1)?;
        let old = std::mem::replace(&mut state.active, next);
        info!(
            "log segment {:016x} sealed at {} bytes, continuing in {:016x}",
            old.id, old.size, state.active.id
        );
        state.sealed.push(SealedSegment {
            id: old.id,
            path: old.path,
            first_lsn: old.first_lsn,
        });
        Ok(())
    }

    /// fsync the active segment. Everything appended so far is durable after
    /// this returns.
    pub fn sync(&self) -> WalResult<Lsn> {
        let state = lock(&self.state);
        state.active.file.sync_data()?;
        let flushed = state.appended_lsn;
        self.flushed_lsn.fetch_max(flushed, Ordering::SeqCst);
        debug!("log synced through LSN {}", flushed);
        Ok(flushed)
    }

    /// Feed every record with `lsn >= start_lsn` to `apply`, oldest segment
    /// first. Returns the number of records applied.
    pub fn replay_from_lsn<F, E>(&self, start_lsn: Lsn, mut apply: F) -> Result<usize, E>
    where
        F: FnMut(Lsn, WalOperation) -> Result<(), E>,
        E: From<WalError>,
    {
        let segments: Vec<(u64, PathBuf)> = {
            let state = lock(&self.state);
            state
                .sealed
                .iter()
                .map(|s| (s.id, s.path.clone()))
                .chain(std::iter::once((state.active.id, state.active.path.clone())))
                .collect()
        };

        let mut applied = 0;
        for (id, path) in segments {
            let data = fs::read(&path).map_err(WalError::from)?;
            let scan = scan_segment(id, &data);
            if let Some(err) = scan.error {
                return Err(err.into());
            }

            for (header, start) in scan.records {
                if header.lsn < start_lsn {
                    continue;
                }
                let payload = &data[start..start + header.len as usize];
                let op: WalOperation = serde_json::from_slice(payload).map_err(WalError::from)?;
                apply(header.lsn, op)?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Delete sealed segments whose records all precede `lsn`. Returns how
    /// many were removed.
    pub fn remove_segments_before(&self, lsn: Lsn) -> WalResult<usize> {
        let mut state = lock(&self.state);
        let mut removable = 0;
        for i in 0..state.sealed.len() {
            let next_first = match state.sealed.get(i + 1) {
                Some(next) => next.first_lsn,
                None => state.active.first_lsn,
            };
            if next_first.is_some_and(|first| first <= lsn) {
                removable = i + 1;
            } else {
                break;
            }
        }

        for segment in state.sealed.drain(..removable) {
            fs::remove_file(&segment.path)?;
            debug!("removed log segment {:016x}", segment.id);
        }
        if removable > 0 {
            info!("removed {} log segments below LSN {}", removable, lsn);
        }
        Ok(removable)
    }

    /// Ids of all live segments, ascending
    pub fn segment_ids(&self) -> Vec<u64> {
        let state = lock(&self.state);
        state
            .sealed
            .iter()
            .map(|s| s.id)
            .chain(std::iter::once(state.active.id))
            .collect()
    }
}

fn read_first_lsn(path: &Path) -> WalResult<Option<Lsn>> {
    use std::io::Read;

    let mut header = [0u8; RECORD_HEADER_SIZE];
    let mut file = File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(RecordHeader::parse(&header).map(|h| h.lsn)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl LogFlusher for WalManager {
    fn flushed_lsn(&self) -> Lsn {
        WalManager::flushed_lsn(self)
    }

    fn flush_log(&self) -> FileResult<Lsn> {
        self.sync().map_err(|e| FileError::LogFlush(e.to_string()))
    }
}

#[cfg(test)]
mod tests;
