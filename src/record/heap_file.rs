use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use super::error::{RecordError, RecordResult};
use super::heap_page::{HeapPage, MAX_RECORD_SIZE};
use super::row::RowPointer;
use crate::file::{BufferPool, FileId, LocalPageId, Lsn, Page, PageType, global_page_id};
use crate::sync::lock;

/// A table's heap: a file of slotted pages addressed through the buffer pool.
///
/// Page 0 is initialised as an empty heap page when the file is created.
pub struct HeapFile {
    table: String,
    file_id: FileId,
    pool: Arc<BufferPool>,
    /// Last page that accepted an insert; searched first
    insert_hint: AtomicU32,
    /// Serializes file growth
    grow: Mutex<()>,
}

impl HeapFile {
    /// Open the heap file at `path` under its catalog file id, creating and
    /// initialising it if empty
    pub fn open<P: AsRef<Path>>(
        pool: Arc<BufferPool>,
        table: &str,
        file_id: FileId,
        path: P,
    ) -> RecordResult<Self> {
        let disk = pool.disk();
        disk.open_file_with_id(path, file_id)?;
        let pages = disk.next_local_page(file_id)?;

        let heap = Self {
            table: table.to_string(),
            file_id,
            pool,
            insert_hint: AtomicU32::new(pages.saturating_sub(1)),
            grow: Mutex::new(()),
        };
        if pages == 0 {
            heap.allocate_page()?;
        }
        debug!("opened heap for '{}' (file {}, {} pages)", table, file_id, pages);
        Ok(heap)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn page_count(&self) -> RecordResult<LocalPageId> {
        Ok(self.pool.disk().next_local_page(self.file_id)?)
    }

    fn allocate_page(&self) -> RecordResult<LocalPageId> {
        let _grow = lock(&self.grow);
        let guard = self.pool.new_page(self.file_id, PageType::HeapData)?;
        let mut page = guard.write();
        let local = page.local_id();
        HeapPage::new(page.data_mut()).init(self.file_id, local);
        debug!("heap '{}' grew to page {}", self.table, local);
        Ok(local)
    }

    fn page_fits(&self, local: LocalPageId, len: usize) -> RecordResult<bool> {
        let guard = self.pool.fetch_page(global_page_id(self.file_id, local))?;
        let page = guard.read();
        let heap = HeapPage::new(page.data());
        Ok(!heap.is_initialized() || heap.can_fit(len))
    }

    /// Hint page first, then the pages after it, then the pages before it
    fn find_page(&self, len: usize) -> RecordResult<LocalPageId> {
        let pages = self.page_count()?;
        let hint = self.insert_hint.load(Ordering::Relaxed).min(pages.saturating_sub(1));
        for local in (hint..pages).chain(0..hint) {
            if self.page_fits(local, len)? {
                return Ok(local);
            }
        }
        self.allocate_page()
    }

    /// Store a record, stamping `lsn` on the page that receives it
    pub fn insert(&self, data: &[u8], lsn: Lsn) -> RecordResult<RowPointer> {
        if data.len() > MAX_RECORD_SIZE {
            return Err(RecordError::RecordTooLarge {
                size: data.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        loop {
            let local = self.find_page(data.len())?;
            let guard = self.pool.fetch_page(global_page_id(self.file_id, local))?;
            let mut page = guard.write();

            let slot = {
                let mut heap = HeapPage::new(page.data_mut());
                if !heap.is_initialized() {
                    heap.init(self.file_id, local);
                }
                // Another writer may have taken the space since find_page
                if !heap.can_fit(data.len()) {
                    continue;
                }
                heap.insert(data)?
            };
            stamp(&mut page, lsn);
            self.insert_hint.store(local, Ordering::Relaxed);
            return Ok(RowPointer::new(self.file_id, local, slot));
        }
    }

    fn check_pointer(&self, rp: &RowPointer) -> RecordResult<()> {
        if rp.file_id != self.file_id || rp.page_number >= self.page_count()? {
            return Err(RecordError::InvalidSlot {
                page: rp.page_id(),
                slot: rp.slot_index,
            });
        }
        Ok(())
    }

    pub fn get(&self, rp: &RowPointer) -> RecordResult<Vec<u8>> {
        self.check_pointer(rp)?;
        let guard = self.pool.fetch_page(rp.page_id())?;
        let page = guard.read();
        HeapPage::new(page.data()).get(rp.slot_index)
    }

    /// Update a record. If it no longer fits in its slot it is moved and `rp`
    /// is overwritten with the new location. Returns whether it stayed put.
    pub fn update(&self, rp: &mut RowPointer, data: &[u8], lsn: Lsn) -> RecordResult<bool> {
        self.check_pointer(rp)?;
        let in_place = {
            let guard = self.pool.fetch_page(rp.page_id())?;
            let mut page = guard.write();
            let in_place = HeapPage::new(page.data_mut()).update(rp.slot_index, data)?;
            stamp(&mut page, lsn);
            in_place
        };

        if !in_place {
            let moved = self.insert(data, lsn)?;
            debug!("row {} of '{}' moved to {}", rp, self.table, moved);
            *rp = moved;
        }
        Ok(in_place)
    }

    pub fn delete(&self, rp: &RowPointer, lsn: Lsn) -> RecordResult<()> {
        self.check_pointer(rp)?;
        let guard = self.pool.fetch_page(rp.page_id())?;
        let mut page = guard.write();
        HeapPage::new(page.data_mut()).delete(rp.slot_index)?;
        stamp(&mut page, lsn);
        Ok(())
    }

    /// Put a before-image back at `rp`, whether the slot is live or a tombstone
    pub fn restore(&self, rp: &RowPointer, data: &[u8], lsn: Lsn) -> RecordResult<()> {
        self.check_pointer(rp)?;
        let guard = self.pool.fetch_page(rp.page_id())?;
        let mut page = guard.write();
        HeapPage::new(page.data_mut()).restore_slot(rp.slot_index, data)?;
        stamp(&mut page, lsn);
        Ok(())
    }

    /// Pointers to every live row, in page/slot order
    pub fn scan_all(&self) -> RecordResult<Vec<RowPointer>> {
        Ok(self
            .scan_rows()?
            .into_iter()
            .map(|(rp, _)| rp)
            .collect())
    }

    /// Every live row with its bytes, in page/slot order
    pub fn scan_rows(&self) -> RecordResult<Vec<(RowPointer, Vec<u8>)>> {
        let mut rows = Vec::new();
        for local in 0..self.page_count()? {
            let guard = self.pool.fetch_page(global_page_id(self.file_id, local))?;
            let page = guard.read();
            if page.page_type() != PageType::HeapData {
                continue;
            }
            let heap = HeapPage::new(page.data());
            for slot in heap.live_slots() {
                rows.push((RowPointer::new(self.file_id, local, slot), heap.get(slot)?));
            }
        }
        Ok(rows)
    }

    /// Whether the page already reflects the change logged at `lsn`
    pub fn check_page_lsn(&self, page_number: LocalPageId, lsn: Lsn) -> RecordResult<bool> {
        if page_number >= self.page_count()? {
            return Ok(false);
        }
        let guard = self.pool.fetch_page(global_page_id(self.file_id, page_number))?;
        let page = guard.read();
        Ok(page.page_type() == PageType::HeapData && page.lsn() >= lsn)
    }

    /// Apply a logged change to a page unless the page is already at or past
    /// `lsn`. Pages beyond the end of the file are materialised empty.
    fn apply_logged<F>(&self, local: LocalPageId, lsn: Lsn, apply: F) -> RecordResult<bool>
    where
        F: FnOnce(&mut HeapPage<&mut [u8]>) -> RecordResult<()>,
    {
        let page_id = self.pool.disk().register_page(self.file_id, local)?;
        let guard = self.pool.fetch_page(page_id)?;
        let applied = {
            let page = guard.read();
            page.page_type() == PageType::HeapData && page.lsn() >= lsn
        };
        if applied {
            return Ok(false);
        }

        let mut page = guard.write();
        {
            let mut heap = HeapPage::new(page.data_mut());
            if !heap.is_initialized() {
                heap.init(self.file_id, local);
            }
            apply(&mut heap)?;
        }
        page.set_page_type(PageType::HeapData);
        stamp(&mut page, lsn);
        Ok(true)
    }

    /// Redo an insert at its logged slot. An occupied slot is overwritten:
    /// the page LSN says the logged row is not there yet.
    pub fn redo_insert(&self, rp: &RowPointer, data: &[u8], lsn: Lsn) -> RecordResult<bool> {
        self.apply_logged(rp.page_number, lsn, |heap| place(heap, rp.slot_index, data))
    }

    /// Redo an update. Moved rows tombstone the old slot and place the new
    /// image at the logged destination.
    pub fn redo_update(
        &self,
        old_rp: &RowPointer,
        new_rp: &RowPointer,
        data: &[u8],
        lsn: Lsn,
    ) -> RecordResult<bool> {
        if old_rp == new_rp {
            return self.apply_logged(old_rp.page_number, lsn, |heap| {
                heap.restore_slot(old_rp.slot_index, data)
            });
        }
        // Both halves share one page LSN, so they must land together
        if old_rp.page_number == new_rp.page_number {
            return self.apply_logged(old_rp.page_number, lsn, |heap| {
                if heap.get(old_rp.slot_index).is_ok() {
                    heap.delete(old_rp.slot_index)?;
                }
                place(heap, new_rp.slot_index, data)
            });
        }

        let removed = self.redo_delete(old_rp, lsn)?;
        let placed = self.redo_insert(new_rp, data, lsn)?;
        Ok(removed || placed)
    }

    pub fn redo_delete(&self, rp: &RowPointer, lsn: Lsn) -> RecordResult<bool> {
        self.apply_logged(rp.page_number, lsn, |heap| {
            if heap.get(rp.slot_index).is_ok() {
                heap.delete(rp.slot_index)?;
            }
            Ok(())
        })
    }
}

/// Write `data` at `slot`, overwriting whatever the slot holds
fn place(heap: &mut HeapPage<&mut [u8]>, slot: u16, data: &[u8]) -> RecordResult<()> {
    if heap.slot(slot).is_some_and(|(off, len)| off != 0 || len != 0) {
        heap.restore_slot(slot, data)
    } else {
        heap.insert_at_slot(slot, data).map(|_| ())
    }
}

/// Page LSNs never move backwards
fn stamp(page: &mut Page, lsn: Lsn) {
    if lsn > page.lsn() {
        page.set_lsn(lsn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::DiskManager;
    use tempfile::TempDir;

    fn setup_test_heap(capacity: usize) -> (TempDir, Arc<BufferPool>, HeapFile) {
        let temp_dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskManager::new());
        let pool = Arc::new(BufferPool::with_capacity(disk, capacity));
        let heap = HeapFile::open(pool.clone(), "t", 1, temp_dir.path().join("1.heap")).unwrap();
        (temp_dir, pool, heap)
    }

    #[test]
    fn test_open_initializes_first_page() {
        let (_temp_dir, pool, heap) = setup_test_heap(8);
        assert_eq!(heap.page_count().unwrap(), 1);
        let guard = pool.fetch_page(global_page_id(1, 0)).unwrap();
        let page = guard.read();
        assert_eq!(page.page_type(), PageType::HeapData);
        assert!(HeapPage::new(page.data()).is_initialized());
    }

    #[test]
    fn test_insert_get_delete() {
        let (_temp_dir, _pool, heap) = setup_test_heap(8);
        let rp = heap.insert(b"row one", 3).unwrap();
        assert_eq!(rp, RowPointer::new(1, 0, 0));
        assert_eq!(heap.get(&rp).unwrap(), b"row one");
        assert!(heap.check_page_lsn(0, 3).unwrap());
        assert!(!heap.check_page_lsn(0, 4).unwrap());

        heap.delete(&rp, 4).unwrap();
        assert!(matches!(heap.get(&rp), Err(RecordError::InvalidSlot { .. })));
        assert!(heap.scan_all().unwrap().is_empty());
    }

    #[test]
    fn test_insert_spills_to_new_pages() {
        let (_temp_dir, _pool, heap) = setup_test_heap(4);
        let record = vec![5u8; 1500];
        let rps: Vec<_> = (0..7).map(|i| heap.insert(&record, i + 1).unwrap()).collect();

        assert_eq!(heap.page_count().unwrap(), 4);
        assert_eq!(rps[0].page_number, 0);
        assert_eq!(rps[2].page_number, 1);
        assert_eq!(heap.scan_all().unwrap(), rps);
    }

    #[test]
    fn test_update_moves_when_growing() {
        let (_temp_dir, _pool, heap) = setup_test_heap(8);
        let mut rp = heap.insert(b"short", 1).unwrap();
        let original = rp;

        assert!(heap.update(&mut rp, b"tiny", 2).unwrap());
        assert_eq!(rp, original);
        assert_eq!(heap.get(&rp).unwrap(), b"tiny");

        assert!(!heap.update(&mut rp, b"considerably longer", 3).unwrap());
        assert_ne!(rp, original);
        assert_eq!(heap.get(&rp).unwrap(), b"considerably longer");
        assert!(heap.get(&original).is_err());
    }

    #[test]
    fn test_restore_reverses_delete() {
        let (_temp_dir, _pool, heap) = setup_test_heap(8);
        let rp = heap.insert(b"keep me", 1).unwrap();
        heap.delete(&rp, 2).unwrap();
        heap.restore(&rp, b"keep me", 3).unwrap();
        assert_eq!(heap.get(&rp).unwrap(), b"keep me");
    }

    #[test]
    fn test_redo_is_guarded_by_page_lsn() {
        let (_temp_dir, _pool, heap) = setup_test_heap(8);
        let rp = RowPointer::new(1, 0, 1);

        assert!(heap.redo_insert(&rp, b"second", 5).unwrap());
        assert_eq!(heap.get(&rp).unwrap(), b"second");
        assert!(!heap.redo_insert(&rp, b"second", 5).unwrap());
        assert!(!heap.redo_delete(&rp, 4).unwrap());
        assert_eq!(heap.get(&rp).unwrap(), b"second");

        assert!(heap.redo_delete(&rp, 6).unwrap());
        assert!(heap.get(&rp).is_err());
    }

    #[test]
    fn test_redo_past_end_of_file() {
        let (_temp_dir, _pool, heap) = setup_test_heap(8);
        let rp = RowPointer::new(1, 3, 0);
        assert!(heap.redo_insert(&rp, b"far away", 9).unwrap());
        assert_eq!(heap.page_count().unwrap(), 4);
        assert_eq!(heap.get(&rp).unwrap(), b"far away");
        assert_eq!(heap.scan_all().unwrap(), vec![rp]);
    }

    #[test]
    fn test_lsn_never_decreases() {
        let (_temp_dir, _pool, heap) = setup_test_heap(8);
        heap.insert(b"a", 10).unwrap();
        heap.insert(b"b", 7).unwrap();
        assert!(heap.check_page_lsn(0, 10).unwrap());
    }
}
