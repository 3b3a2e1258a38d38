use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use ahash::AHashMap;
use log::debug;

use super::error::{FileError, FileResult};
use super::page::{Page, PageType};
use super::{
    FileId, LocalPageId, METADATA_PAYLOAD_OFFSET, PAGE_SIZE, PAGE_TYPE_OFFSET, PageId,
    global_page_id, split_page_id,
};
use crate::sync::{lock, read, write};

/// First id handed out by `open_file`; catalog ids stay well below this
const AUTO_FILE_ID_BASE: FileId = 0x8000_0000;

/// Owns OS file handles and hands out stable page ids.
///
/// Page ids are `(file_id << 32) | local` so that references written to disk
/// (local numbers) stay valid no matter in which order files are reopened.
pub struct DiskManager {
    table: RwLock<FileTable>,
    next_auto_id: AtomicU32,
}

#[derive(Default)]
struct FileTable {
    files: AHashMap<FileId, Arc<FileEntry>>,
    by_path: AHashMap<PathBuf, FileId>,
}

struct FileEntry {
    path: PathBuf,
    file: Mutex<File>,
    /// Next local page number to hand out; derived from the file size on open
    next_local: AtomicU32,
}

impl DiskManager {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(FileTable::default()),
            next_auto_id: AtomicU32::new(AUTO_FILE_ID_BASE),
        }
    }

    /// Open (creating if needed) a file under an engine-assigned id.
    /// Reopening an already open path returns its existing id.
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> FileResult<FileId> {
        let path = Self::resolve(path.as_ref())?;
        if let Some(&id) = read(&self.table).by_path.get(&path) {
            return Ok(id);
        }

        let mut table = write(&self.table);
        if let Some(&id) = table.by_path.get(&path) {
            return Ok(id);
        }
        let mut id = self.next_auto_id.fetch_add(1, Ordering::SeqCst);
        while table.files.contains_key(&id) {
            id = self.next_auto_id.fetch_add(1, Ordering::SeqCst);
        }
        Self::install(&mut table, path, id)?;
        Ok(id)
    }

    /// Open (creating if needed) a file under a caller-chosen id that must stay
    /// stable across restarts.
    pub fn open_file_with_id<P: AsRef<Path>>(&self, path: P, file_id: FileId) -> FileResult<FileId> {
        let path = Self::resolve(path.as_ref())?;
        let mut table = write(&self.table);

        if let Some(&id) = table.by_path.get(&path) {
            return Ok(id);
        }
        if let Some(entry) = table.files.get(&file_id) {
            return Err(FileError::FileIdInUse {
                id: file_id,
                path: entry.path.clone(),
            });
        }
        Self::install(&mut table, path, file_id)?;
        Ok(file_id)
    }

    fn resolve(path: &Path) -> FileResult<PathBuf> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(path.canonicalize()?)
    }

    fn install(table: &mut FileTable, path: PathBuf, file_id: FileId) -> FileResult<()> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();
        let pages = size.div_ceil(PAGE_SIZE as u64) as LocalPageId;

        debug!(
            "opened file {} as id {} with {} pages",
            path.display(),
            file_id,
            pages
        );
        table.files.insert(
            file_id,
            Arc::new(FileEntry {
                path: path.clone(),
                file: Mutex::new(file),
                next_local: AtomicU32::new(pages),
            }),
        );
        table.by_path.insert(path, file_id);
        Ok(())
    }

    fn entry(&self, file_id: FileId) -> FileResult<Arc<FileEntry>> {
        read(&self.table)
            .files
            .get(&file_id)
            .cloned()
            .ok_or(FileError::FileNotOpen(file_id))
    }

    /// Reserve the next local page number. Nothing is written until the page
    /// is flushed; reads past EOF come back zero-filled.
    pub fn allocate_page(&self, file_id: FileId, page_type: PageType) -> FileResult<PageId> {
        let entry = self.entry(file_id)?;
        let local = entry.next_local.fetch_add(1, Ordering::SeqCst);
        debug!(
            "allocated {:?} page {} in file {}",
            page_type, local, file_id
        );
        Ok(global_page_id(file_id, local))
    }

    /// Make an existing on-disk page addressable, growing the allocator past it
    pub fn register_page(&self, file_id: FileId, local: LocalPageId) -> FileResult<PageId> {
        let entry = self.entry(file_id)?;
        entry.next_local.fetch_max(local + 1, Ordering::SeqCst);
        Ok(global_page_id(file_id, local))
    }

    pub fn next_local_page(&self, file_id: FileId) -> FileResult<LocalPageId> {
        Ok(self.entry(file_id)?.next_local.load(Ordering::SeqCst))
    }

    pub fn file_path(&self, file_id: FileId) -> FileResult<PathBuf> {
        Ok(self.entry(file_id)?.path.clone())
    }

    pub fn is_open(&self, file_id: FileId) -> bool {
        read(&self.table).files.contains_key(&file_id)
    }

    /// Read a page image. Short reads (including reads past EOF) are padded
    /// with zeros.
    pub fn read_page(&self, page_id: PageId) -> FileResult<Page> {
        let (file_id, local) = split_page_id(page_id);
        let entry = self.entry(file_id)?;
        let mut buffer = vec![0u8; PAGE_SIZE];
        Self::read_at(&entry, local, &mut buffer)?;
        Page::from_bytes(page_id, buffer)
    }

    fn read_at(entry: &FileEntry, local: LocalPageId, buffer: &mut [u8]) -> FileResult<()> {
        let mut file = lock(&entry.file);
        file.seek(SeekFrom::Start(local as u64 * PAGE_SIZE as u64))?;

        let mut filled = 0;
        while filled < buffer.len() {
            let n = file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer[filled..].fill(0);
        Ok(())
    }

    /// Write a page image at its local offset, stamping the type tag first
    pub fn write_page(&self, page: &mut Page) -> FileResult<()> {
        page.stamp_type();
        let (file_id, local) = split_page_id(page.id());
        let entry = self.entry(file_id)?;
        Self::write_at(&entry, local, page.data())
    }

    fn write_at(entry: &FileEntry, local: LocalPageId, buffer: &[u8]) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        {
            let mut file = lock(&entry.file);
            file.seek(SeekFrom::Start(local as u64 * PAGE_SIZE as u64))?;
            file.write_all(buffer)?;
        }
        entry.next_local.fetch_max(local + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Largest payload `write_metadata` accepts
    pub const fn max_metadata_len() -> usize {
        PAGE_SIZE - METADATA_PAYLOAD_OFFSET
    }

    /// Overwrite page 0 of a file with a metadata payload, bypassing the
    /// buffer pool.
    pub fn write_metadata(&self, file_id: FileId, payload: &[u8]) -> FileResult<()> {
        if payload.len() > Self::max_metadata_len() {
            return Err(FileError::MetadataTooLarge {
                size: payload.len(),
                max: Self::max_metadata_len(),
            });
        }

        let entry = self.entry(file_id)?;
        let mut buffer = vec![0u8; PAGE_SIZE];
        buffer[PAGE_TYPE_OFFSET] = PageType::Metadata.as_byte();
        buffer[METADATA_PAYLOAD_OFFSET..METADATA_PAYLOAD_OFFSET + payload.len()]
            .copy_from_slice(payload);
        Self::write_at(&entry, 0, &buffer)
    }

    /// Read the metadata payload stored in page 0 (zeros if never written)
    pub fn read_metadata(&self, file_id: FileId) -> FileResult<Vec<u8>> {
        let entry = self.entry(file_id)?;
        let mut buffer = vec![0u8; PAGE_SIZE];
        Self::read_at(&entry, 0, &mut buffer)?;
        Ok(buffer.split_off(METADATA_PAYLOAD_OFFSET))
    }

    pub fn write_root_id(&self, file_id: FileId, local_root: i64) -> FileResult<()> {
        self.write_metadata(file_id, &local_root.to_le_bytes())
    }

    /// Local root id persisted in the metadata page; 0 means "no root"
    pub fn read_root_id(&self, file_id: FileId) -> FileResult<i64> {
        let payload = self.read_metadata(file_id)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&payload[0..8]);
        Ok(i64::from_le_bytes(raw))
    }

    /// Drop every page of a file and reset its allocator
    pub fn truncate_file(&self, file_id: FileId) -> FileResult<()> {
        let entry = self.entry(file_id)?;
        let file = lock(&entry.file);
        file.set_len(0)?;
        file.sync_all()?;
        entry.next_local.store(0, Ordering::SeqCst);
        Ok(())
    }

    pub fn sync_file(&self, file_id: FileId) -> FileResult<()> {
        let entry = self.entry(file_id)?;
        lock(&entry.file).sync_data()?;
        Ok(())
    }

    /// fsync every open file
    pub fn sync(&self) -> FileResult<()> {
        let entries: Vec<_> = read(&self.table).files.values().cloned().collect();
        for entry in entries {
            lock(&entry.file).sync_data()?;
        }
        Ok(())
    }

    pub fn close_file(&self, file_id: FileId) -> FileResult<()> {
        let entry = {
            let mut table = write(&self.table);
            let entry = table
                .files
                .remove(&file_id)
                .ok_or(FileError::FileNotOpen(file_id))?;
            table.by_path.remove(&entry.path);
            entry
        };
        lock(&entry.file).sync_all()?;
        debug!("closed file {}", entry.path.display());
        Ok(())
    }

    pub fn close_all(&self) -> FileResult<()> {
        let ids: Vec<FileId> = read(&self.table).files.keys().copied().collect();
        for id in ids {
            self.close_file(id)?;
        }
        Ok(())
    }

    pub fn open_file_count(&self) -> usize {
        read(&self.table).files.len()
    }
}

impl Default for DiskManager {
    fn default() -> Self {
        Self::new()
    }
}
