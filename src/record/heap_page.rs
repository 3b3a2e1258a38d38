use super::error::{RecordError, RecordResult};
use crate::file::{FileId, LocalPageId, PAGE_SIZE, PAGE_TYPE_OFFSET, PageId, PageType, global_page_id};

/// Slotted heap page header, 29 bytes:
/// LSN(8) type(1) fileID(4) pageNo(4) recordEndPtr(2) slotRegionStart(2)
/// numRows(2) numRowsFree(2) isPageFull(2) slotCount(2)
pub const HEAP_HEADER_SIZE: usize = 29;

/// One directory entry: offset u16, length u16
pub const SLOT_SIZE: usize = 4;

const FILE_ID_OFFSET: usize = 9;
const PAGE_NO_OFFSET: usize = 13;
const RECORD_END_OFFSET: usize = 17;
const SLOT_REGION_OFFSET: usize = 19;
const NUM_ROWS_OFFSET: usize = 21;
const NUM_ROWS_FREE_OFFSET: usize = 23;
const IS_FULL_OFFSET: usize = 25;
const SLOT_COUNT_OFFSET: usize = 27;

/// Largest record a fresh page can hold
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - HEAP_HEADER_SIZE - SLOT_SIZE;

/// Zero-copy view of a heap page image.
///
/// Records grow forward from the header; the slot directory grows backward
/// from the end of the page. A slot with length 0 is a tombstone and keeps its
/// index so existing row pointers stay meaningful.
pub struct HeapPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> HeapPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    fn bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    fn u16_at(&self, offset: usize) -> u16 {
        let b = self.bytes();
        u16::from_le_bytes([b[offset], b[offset + 1]])
    }

    fn u32_at(&self, offset: usize) -> u32 {
        let b = self.bytes();
        u32::from_le_bytes([b[offset], b[offset + 1], b[offset + 2], b[offset + 3]])
    }

    /// Whether the image carries an initialised heap header
    pub fn is_initialized(&self) -> bool {
        self.bytes()[PAGE_TYPE_OFFSET] == PageType::HeapData.as_byte()
            && self.slot_region_start() as usize >= HEAP_HEADER_SIZE
    }

    pub fn lsn(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes()[0..8]);
        u64::from_le_bytes(raw)
    }

    pub fn file_id(&self) -> FileId {
        self.u32_at(FILE_ID_OFFSET)
    }

    pub fn page_number(&self) -> LocalPageId {
        self.u32_at(PAGE_NO_OFFSET)
    }

    fn page_id(&self) -> PageId {
        global_page_id(self.file_id(), self.page_number())
    }

    pub fn record_end(&self) -> u16 {
        self.u16_at(RECORD_END_OFFSET)
    }

    pub fn slot_region_start(&self) -> u16 {
        self.u16_at(SLOT_REGION_OFFSET)
    }

    pub fn num_rows(&self) -> u16 {
        self.u16_at(NUM_ROWS_OFFSET)
    }

    pub fn num_rows_free(&self) -> u16 {
        self.u16_at(NUM_ROWS_FREE_OFFSET)
    }

    pub fn is_full(&self) -> bool {
        self.u16_at(IS_FULL_OFFSET) != 0
    }

    pub fn slot_count(&self) -> u16 {
        self.u16_at(SLOT_COUNT_OFFSET)
    }

    fn slot_offset(slot: u16) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot as usize + 1)
    }

    /// `(offset, length)` of a slot
    pub fn slot(&self, slot: u16) -> Option<(u16, u16)> {
        if slot >= self.slot_count() || (slot as usize + 1) * SLOT_SIZE > PAGE_SIZE - HEAP_HEADER_SIZE {
            return None;
        }
        let at = Self::slot_offset(slot);
        Some((self.u16_at(at), self.u16_at(at + 2)))
    }

    /// Bytes available for a record that needs a new slot; never negative
    pub fn free_space(&self) -> usize {
        (self.slot_region_start() as usize).saturating_sub(self.record_end() as usize + SLOT_SIZE)
    }

    /// Gap between the record area and the slot directory
    fn gap(&self) -> usize {
        (self.slot_region_start() as usize).saturating_sub(self.record_end() as usize)
    }

    fn first_tombstone(&self) -> Option<u16> {
        (0..self.slot_count()).find(|&s| matches!(self.slot(s), Some((_, 0))))
    }

    /// Whether `len` bytes can be inserted, counting a reusable tombstone
    pub fn can_fit(&self, len: usize) -> bool {
        if self.first_tombstone().is_some() {
            len <= self.gap()
        } else {
            len <= self.free_space()
        }
    }

    /// Copy of the record in `slot`
    pub fn get(&self, slot: u16) -> RecordResult<Vec<u8>> {
        match self.slot(slot) {
            Some((offset, len)) if len > 0 => {
                let start = self.record_start(slot, offset, len)?;
                Ok(self.bytes()[start..start + len as usize].to_vec())
            }
            _ => Err(RecordError::InvalidSlot {
                page: self.page_id(),
                slot,
            }),
        }
    }

    /// Start of a slot's record, checked to lie between the header and the
    /// end of the page
    fn record_start(&self, slot: u16, offset: u16, len: u16) -> RecordResult<usize> {
        let start = offset as usize;
        if start < HEAP_HEADER_SIZE || start + len as usize > PAGE_SIZE {
            return Err(RecordError::InvalidRecord(format!(
                "slot {} of page {:#x} points outside the page (offset {}, length {})",
                slot,
                self.page_id(),
                offset,
                len
            )));
        }
        Ok(start)
    }

    /// Indices of all non-tombstone slots
    pub fn live_slots(&self) -> Vec<u16> {
        (0..self.slot_count())
            .filter(|&s| matches!(self.slot(s), Some((_, len)) if len > 0))
            .collect()
    }

    /// Check the header invariants, reporting the first one broken
    pub fn check_invariants(&self) -> Result<(), String> {
        let record_end = self.record_end() as usize;
        let region = self.slot_region_start() as usize;
        if record_end > region {
            return Err(format!("recordEndPtr {} > slotRegionStart {}", record_end, region));
        }
        if region != PAGE_SIZE - SLOT_SIZE * self.slot_count() as usize {
            return Err(format!(
                "slotRegionStart {} disagrees with slotCount {}",
                region,
                self.slot_count()
            ));
        }
        let live: usize = self
            .live_slots()
            .into_iter()
            .filter_map(|s| self.slot(s))
            .map(|(_, len)| len as usize)
            .sum();
        if live > record_end.saturating_sub(HEAP_HEADER_SIZE) {
            return Err(format!("live bytes {} exceed record area", live));
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeapPage<B> {
    fn put_u16(&mut self, offset: usize, value: u16) {
        self.buf.as_mut()[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, offset: usize, value: u32) {
        self.buf.as_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn set_slot(&mut self, slot: u16, offset: u16, len: u16) {
        let at = Self::slot_offset(slot);
        self.put_u16(at, offset);
        self.put_u16(at + 2, len);
    }

    fn refresh_full_flag(&mut self) {
        let full = self.free_space() == 0;
        self.put_u16(IS_FULL_OFFSET, full as u16);
    }

    /// Write an empty header; the LSN field is left at zero
    pub fn init(&mut self, file_id: FileId, page_number: LocalPageId) {
        let buf = self.buf.as_mut();
        buf.fill(0);
        buf[PAGE_TYPE_OFFSET] = PageType::HeapData.as_byte();
        self.put_u32(FILE_ID_OFFSET, file_id);
        self.put_u32(PAGE_NO_OFFSET, page_number);
        self.put_u16(RECORD_END_OFFSET, HEAP_HEADER_SIZE as u16);
        self.put_u16(SLOT_REGION_OFFSET, PAGE_SIZE as u16);
    }

    /// Append `data` at the record end and point `slot` at it
    fn append_record(&mut self, slot: u16, data: &[u8]) {
        let offset = self.record_end();
        let start = offset as usize;
        self.buf.as_mut()[start..start + data.len()].copy_from_slice(data);
        self.put_u16(RECORD_END_OFFSET, offset + data.len() as u16);
        self.set_slot(slot, offset, data.len() as u16);
    }

    fn check_record(&self, data: &[u8]) -> RecordResult<()> {
        if data.is_empty() {
            return Err(RecordError::InvalidRecord("empty record".to_string()));
        }
        if data.len() > MAX_RECORD_SIZE {
            return Err(RecordError::RecordTooLarge {
                size: data.len(),
                max: MAX_RECORD_SIZE,
            });
        }
        Ok(())
    }

    /// Insert a record, reusing the first tombstone slot if there is one
    pub fn insert(&mut self, data: &[u8]) -> RecordResult<u16> {
        self.check_record(data)?;

        let tombstone = self.first_tombstone();
        let available = if tombstone.is_some() {
            self.gap()
        } else {
            self.free_space()
        };
        if data.len() > available {
            return Err(RecordError::PageFull {
                page: self.page_id(),
                needed: data.len(),
                available,
            });
        }

        let slot = match tombstone {
            Some(slot) => {
                self.put_u16(NUM_ROWS_FREE_OFFSET, self.num_rows_free().saturating_sub(1));
                slot
            }
            None => self.push_slot(),
        };
        self.append_record(slot, data);
        self.put_u16(NUM_ROWS_OFFSET, self.num_rows() + 1);
        self.refresh_full_flag();
        Ok(slot)
    }

    /// Grow the directory by one empty slot
    fn push_slot(&mut self) -> u16 {
        let slot = self.slot_count();
        self.put_u16(SLOT_COUNT_OFFSET, slot + 1);
        self.put_u16(SLOT_REGION_OFFSET, self.slot_region_start() - SLOT_SIZE as u16);
        self.set_slot(slot, 0, 0);
        slot
    }

    /// Tombstone a slot. The record bytes are not reclaimed.
    pub fn delete(&mut self, slot: u16) -> RecordResult<()> {
        match self.slot(slot) {
            Some((_, len)) if len > 0 => {}
            _ => {
                return Err(RecordError::InvalidSlot {
                    page: self.page_id(),
                    slot,
                });
            }
        }
        self.set_slot(slot, 0, 0);
        self.put_u16(NUM_ROWS_OFFSET, self.num_rows().saturating_sub(1));
        self.put_u16(NUM_ROWS_FREE_OFFSET, self.num_rows_free() + 1);
        self.put_u16(IS_FULL_OFFSET, 0);
        Ok(())
    }

    /// Overwrite in place when the new record is no larger; otherwise
    /// tombstone the slot and return `false` so the caller can re-insert.
    pub fn update(&mut self, slot: u16, data: &[u8]) -> RecordResult<bool> {
        self.check_record(data)?;
        let (offset, len) = match self.slot(slot) {
            Some((offset, len)) if len > 0 => (offset, len),
            _ => {
                return Err(RecordError::InvalidSlot {
                    page: self.page_id(),
                    slot,
                });
            }
        };

        if data.len() <= len as usize {
            let start = self.record_start(slot, offset, len)?;
            self.buf.as_mut()[start..start + data.len()].copy_from_slice(data);
            self.set_slot(slot, offset, data.len() as u16);
            return Ok(true);
        }

        self.delete(slot)?;
        Ok(false)
    }

    /// Place a record at a specific slot index. Returns `false` without
    /// writing when the slot is already occupied.
    pub fn insert_at_slot(&mut self, slot: u16, data: &[u8]) -> RecordResult<bool> {
        self.check_record(data)?;
        if let Some((offset, len)) = self.slot(slot)
            && (offset != 0 || len != 0)
        {
            return Ok(false);
        }

        let new_slots = (slot as usize + 1).saturating_sub(self.slot_count() as usize);
        let needed = data.len() + new_slots * SLOT_SIZE;
        if needed > self.gap() {
            return Err(RecordError::PageFull {
                page: self.page_id(),
                needed,
                available: self.gap(),
            });
        }

        if new_slots == 0 {
            self.put_u16(NUM_ROWS_FREE_OFFSET, self.num_rows_free().saturating_sub(1));
        } else {
            while self.slot_count() <= slot {
                self.push_slot();
            }
            // Directory entries added below the target stay as tombstones
            self.put_u16(
                NUM_ROWS_FREE_OFFSET,
                self.num_rows_free() + (new_slots - 1) as u16,
            );
        }
        self.append_record(slot, data);
        self.put_u16(NUM_ROWS_OFFSET, self.num_rows() + 1);
        self.refresh_full_flag();
        Ok(true)
    }

    /// Put `data` back into an existing slot, live or tombstoned, keeping the
    /// slot index. Used to reverse updates and deletes.
    pub fn restore_slot(&mut self, slot: u16, data: &[u8]) -> RecordResult<()> {
        self.check_record(data)?;
        let (offset, len) = self.slot(slot).ok_or(RecordError::InvalidSlot {
            page: self.page_id(),
            slot,
        })?;

        if len > 0 && data.len() <= len as usize {
            let start = self.record_start(slot, offset, len)?;
            self.buf.as_mut()[start..start + data.len()].copy_from_slice(data);
            self.set_slot(slot, offset, data.len() as u16);
            return Ok(());
        }

        if data.len() > self.gap() {
            return Err(RecordError::PageFull {
                page: self.page_id(),
                needed: data.len(),
                available: self.gap(),
            });
        }
        if len == 0 {
            self.put_u16(NUM_ROWS_OFFSET, self.num_rows() + 1);
            self.put_u16(NUM_ROWS_FREE_OFFSET, self.num_rows_free().saturating_sub(1));
        }
        self.append_record(slot, data);
        self.refresh_full_flag();
        Ok(())
    }
}
