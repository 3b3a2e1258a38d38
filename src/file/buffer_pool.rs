use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::RandomState;
use log::{debug, warn};
use lru::LruCache;

use super::disk_manager::DiskManager;
use super::error::{FileError, FileResult};
use super::page::{Page, PageType};
use super::{BUFFER_POOL_SIZE, FileId, Lsn, PageId, split_page_id};
use crate::sync::{lock, read, write};

/// Durability boundary consulted before a dirty page may reach disk.
pub trait LogFlusher: Send + Sync {
    /// Largest LSN known to be durable
    fn flushed_lsn(&self) -> Lsn;

    /// Force the log to disk, returning the new durable LSN
    fn flush_log(&self) -> FileResult<Lsn>;
}

/// A cached page. The `RwLock` around the page is its latch.
struct Frame {
    page: RwLock<Page>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

impl Frame {
    fn new(page: Page, dirty: bool) -> Self {
        Self {
            page: RwLock::new(page),
            pin_count: AtomicU32::new(1),
            dirty: AtomicBool::new(dirty),
        }
    }

    fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::SeqCst);
    }

    fn unpin(&self) {
        let _ = self
            .pin_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::SeqCst) > 0
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn lsn(&self) -> Lsn {
        read(&self.page).lsn()
    }
}

/// LRU cache of pages keyed by global page id.
///
/// Pages are handed out pinned through a [`PageGuard`]; a pinned page is never
/// evicted. A dirty page whose LSN is beyond the log's durable LSN is never
/// written back.
pub struct BufferPool {
    disk: Arc<DiskManager>,
    /// Frames in access order; capacity is enforced here rather than by the
    /// cache so that pinned pages can be skipped during eviction
    frames: Mutex<LruCache<PageId, Arc<Frame>, RandomState>>,
    capacity: usize,
    log: Option<Arc<dyn LogFlusher>>,
}

impl BufferPool {
    /// Create a buffer pool with the default capacity and no log guard
    pub fn new(disk: Arc<DiskManager>) -> Self {
        Self::with_capacity(disk, BUFFER_POOL_SIZE)
    }

    pub fn with_capacity(disk: Arc<DiskManager>, capacity: usize) -> Self {
        Self {
            disk,
            frames: Mutex::new(LruCache::unbounded_with_hasher(RandomState::new())),
            capacity: capacity.max(1),
            log: None,
        }
    }

    /// Create a buffer pool whose write-backs are held back until the log is
    /// durable past the page LSN
    pub fn with_log(disk: Arc<DiskManager>, capacity: usize, log: Arc<dyn LogFlusher>) -> Self {
        Self {
            log: Some(log),
            ..Self::with_capacity(disk, capacity)
        }
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn flushed_lsn(&self) -> Lsn {
        self.log.as_ref().map_or(Lsn::MAX, |log| log.flushed_lsn())
    }

    /// Pin a page, reading it from disk on a miss
    pub fn fetch_page(&self, page_id: PageId) -> FileResult<PageGuard<'_>> {
        let mut frames = lock(&self.frames);

        if let Some(frame) = frames.get(&page_id) {
            frame.pin();
            return Ok(PageGuard::new(self, page_id, Arc::clone(frame)));
        }

        self.make_room(&mut frames)?;
        let page = self.disk.read_page(page_id)?;
        let frame = Arc::new(Frame::new(page, false));
        frames.put(page_id, Arc::clone(&frame));
        Ok(PageGuard::new(self, page_id, frame))
    }

    /// Allocate a fresh zero-filled page, pinned and dirty
    pub fn new_page(&self, file_id: FileId, page_type: PageType) -> FileResult<PageGuard<'_>> {
        let mut frames = lock(&self.frames);

        self.make_room(&mut frames)?;
        let page_id = self.disk.allocate_page(file_id, page_type)?;
        let frame = Arc::new(Frame::new(Page::new(page_id, page_type), true));
        frames.put(page_id, Arc::clone(&frame));
        Ok(PageGuard::new(self, page_id, frame))
    }

    /// Install a fresh image for a page id that is already allocated on disk
    /// (a page past EOF being rebuilt by recovery, for example)
    pub fn reset_page(&self, page_id: PageId, page_type: PageType) -> FileResult<PageGuard<'_>> {
        let guard = self.fetch_page(page_id)?;
        {
            let mut page = guard.write();
            *page = Page::new(page_id, page_type);
        }
        Ok(guard)
    }

    /// Release one pin. Unpinning an unpinned page is a no-op.
    pub fn unpin_page(&self, page_id: PageId, mark_dirty: bool) -> FileResult<()> {
        let frames = lock(&self.frames);
        let frame = frames
            .peek(&page_id)
            .ok_or(FileError::PageNotFound(page_id))?;
        frame.unpin();
        if mark_dirty {
            frame.dirty.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn mark_dirty(&self, page_id: PageId) -> FileResult<()> {
        let frames = lock(&self.frames);
        let frame = frames
            .peek(&page_id)
            .ok_or(FileError::PageNotFound(page_id))?;
        frame.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Write one page back if dirty. Fails if the log is not yet durable past
    /// the page's LSN.
    pub fn flush_page(&self, page_id: PageId) -> FileResult<()> {
        let frame = {
            let frames = lock(&self.frames);
            frames
                .peek(&page_id)
                .cloned()
                .ok_or(FileError::PageNotFound(page_id))?
        };

        let flushed_lsn = self.flushed_lsn();
        let mut page = write(&frame.page);
        if !frame.is_dirty() {
            return Ok(());
        }
        if page.lsn() > flushed_lsn {
            return Err(FileError::WalNotFlushed {
                page: page_id,
                page_lsn: page.lsn(),
                flushed_lsn,
            });
        }
        self.disk.write_page(&mut page)?;
        frame.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Write back every dirty page the log guard allows, then fsync. Returns
    /// how many pages were held back by the guard.
    pub fn flush_all_pages(&self) -> FileResult<usize> {
        let snapshot: Vec<(PageId, Arc<Frame>)> = {
            let frames = lock(&self.frames);
            frames
                .iter()
                .filter(|(_, frame)| frame.is_dirty())
                .map(|(id, frame)| (*id, Arc::clone(frame)))
                .collect()
        };

        let flushed_lsn = self.flushed_lsn();
        let mut held_back = 0;
        for (page_id, frame) in snapshot {
            let mut page = write(&frame.page);
            if !frame.is_dirty() {
                continue;
            }
            if page.lsn() > flushed_lsn {
                held_back += 1;
                continue;
            }
            self.disk.write_page(&mut page)?;
            frame.dirty.store(false, Ordering::SeqCst);
            debug!("flushed page {:#x} (lsn {})", page_id, page.lsn());
        }

        if held_back > 0 {
            debug!(
                "{} dirty pages ahead of flushed LSN {} were not written",
                held_back, flushed_lsn
            );
        }
        self.disk.sync()?;
        Ok(held_back)
    }

    /// Drop a page from the cache without writing it back
    pub fn delete_page(&self, page_id: PageId) -> FileResult<bool> {
        let mut frames = lock(&self.frames);
        match frames.peek(&page_id) {
            Some(frame) if frame.is_pinned() => Err(FileError::PagePinned(page_id)),
            Some(_) => {
                frames.pop(&page_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop every cached page of one file without writing it back
    pub fn discard_file_pages(&self, file_id: FileId) -> FileResult<usize> {
        let mut frames = lock(&self.frames);
        let victims: Vec<PageId> = frames
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| split_page_id(*id).0 == file_id)
            .collect();

        for id in &victims {
            if frames.peek(id).is_some_and(|frame| frame.is_pinned()) {
                return Err(FileError::PagePinned(*id));
            }
        }
        for id in &victims {
            frames.pop(id);
        }
        Ok(victims.len())
    }

    fn make_room(&self, frames: &mut LruCache<PageId, Arc<Frame>, RandomState>) -> FileResult<()> {
        while frames.len() >= self.capacity {
            self.evict_one(frames)?;
        }
        Ok(())
    }

    /// Evict the least recently used page that is unpinned and writable.
    /// When only log-blocked dirty pages remain, force the log once and retry.
    fn evict_one(&self, frames: &mut LruCache<PageId, Arc<Frame>, RandomState>) -> FileResult<()> {
        let mut forced = false;
        loop {
            let flushed_lsn = self.flushed_lsn();
            let mut blocked = false;
            let victim = frames.iter().rev().find_map(|(id, frame)| {
                if frame.is_pinned() {
                    return None;
                }
                if frame.is_dirty() && frame.lsn() > flushed_lsn {
                    blocked = true;
                    return None;
                }
                Some((*id, Arc::clone(frame)))
            });

            if let Some((page_id, frame)) = victim {
                if frame.is_dirty() {
                    let mut page = write(&frame.page);
                    self.disk.write_page(&mut page)?;
                    frame.dirty.store(false, Ordering::SeqCst);
                }
                frames.pop(&page_id);
                debug!("evicted page {:#x}", page_id);
                return Ok(());
            }

            match (&self.log, blocked && !forced) {
                (Some(log), true) => {
                    warn!("every evictable page is ahead of the log; forcing a log flush");
                    log.flush_log()?;
                    forced = true;
                }
                _ => {
                    return Err(FileError::AllPagesPinned {
                        capacity: self.capacity,
                    });
                }
            }
        }
    }

    pub fn resident_pages(&self) -> usize {
        lock(&self.frames).len()
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        lock(&self.frames).contains(&page_id)
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        lock(&self.frames)
            .peek(&page_id)
            .map(|frame| frame.pin_count.load(Ordering::SeqCst))
    }

    pub fn is_dirty(&self, page_id: PageId) -> bool {
        lock(&self.frames)
            .peek(&page_id)
            .is_some_and(|frame| frame.is_dirty())
    }

    pub fn dirty_page_count(&self) -> usize {
        lock(&self.frames)
            .iter()
            .filter(|(_, frame)| frame.is_dirty())
            .count()
    }
}

/// A pinned page. Dropping the guard releases the pin.
///
/// `read`/`write` take the page latch; taking the write side marks the page
/// dirty.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: Arc<Frame>,
}

impl<'a> PageGuard<'a> {
    fn new(pool: &'a BufferPool, page_id: PageId, frame: Arc<Frame>) -> Self {
        Self {
            pool,
            page_id,
            frame,
        }
    }

    pub fn id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        read(&self.frame.page)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.frame.dirty.store(true, Ordering::SeqCst);
        write(&self.frame.page)
    }

    pub fn mark_dirty(&self) {
        self.frame.dirty.store(true, Ordering::SeqCst);
    }

    pub fn pool(&self) -> &'a BufferPool {
        self.pool
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}
