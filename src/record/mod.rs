mod error;
mod heap_file;
mod heap_page;
mod row;
mod schema;
mod value;

pub use error::{RecordError, RecordResult};
pub use heap_file::HeapFile;
pub use heap_page::{HEAP_HEADER_SIZE, HeapPage, MAX_RECORD_SIZE, SLOT_SIZE};
pub use row::{Row, RowPointer};
pub use schema::{ColumnDef, ForeignKey, TableSchema};
pub use value::{DataType, Value};

use std::path::Path;
use std::sync::{Arc, RwLock};

use ahash::AHashMap;

use crate::file::{BufferPool, FileId};
use crate::sync::{read, write};

/// Open heap files of the current database, keyed by table name
pub struct HeapFileManager {
    pool: Arc<BufferPool>,
    open_tables: RwLock<AHashMap<String, Arc<HeapFile>>>,
}

impl HeapFileManager {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            open_tables: RwLock::new(AHashMap::new()),
        }
    }

    /// Open (or create) a table's heap file. Opening an open table is a no-op.
    pub fn open_table<P: AsRef<Path>>(
        &self,
        table: &str,
        file_id: FileId,
        path: P,
    ) -> RecordResult<Arc<HeapFile>> {
        if let Some(heap) = read(&self.open_tables).get(table) {
            return Ok(Arc::clone(heap));
        }

        let mut tables = write(&self.open_tables);
        if let Some(heap) = tables.get(table) {
            return Ok(Arc::clone(heap));
        }
        let heap = Arc::new(HeapFile::open(Arc::clone(&self.pool), table, file_id, path)?);
        tables.insert(table.to_string(), Arc::clone(&heap));
        Ok(heap)
    }

    pub fn get(&self, table: &str) -> RecordResult<Arc<HeapFile>> {
        read(&self.open_tables)
            .get(table)
            .cloned()
            .ok_or_else(|| RecordError::TableNotOpen(table.to_string()))
    }

    pub fn get_by_file_id(&self, file_id: FileId) -> Option<Arc<HeapFile>> {
        read(&self.open_tables)
            .values()
            .find(|heap| heap.file_id() == file_id)
            .cloned()
    }

    /// Forget a table and close its file. Cached pages are dropped without
    /// write-back, so flush first.
    pub fn close_table(&self, table: &str) -> RecordResult<()> {
        let heap = write(&self.open_tables)
            .remove(table)
            .ok_or_else(|| RecordError::TableNotOpen(table.to_string()))?;
        self.pool.discard_file_pages(heap.file_id())?;
        self.pool.disk().close_file(heap.file_id())?;
        Ok(())
    }

    pub fn is_open(&self, table: &str) -> bool {
        read(&self.open_tables).contains_key(table)
    }

    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.open_tables).keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::DiskManager;

    #[test]
    fn test_manager_open_get_close() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(BufferPool::with_capacity(Arc::new(DiskManager::new()), 16));
        let manager = HeapFileManager::new(pool);

        let path = temp_dir.path().join("1.heap");
        let heap = manager.open_table("users", 1, &path).unwrap();
        let again = manager.open_table("users", 1, &path).unwrap();
        assert!(Arc::ptr_eq(&heap, &again));
        assert_eq!(manager.tables(), vec!["users".to_string()]);
        assert!(manager.get_by_file_id(1).is_some());

        assert!(matches!(
            manager.get("orders"),
            Err(RecordError::TableNotOpen(_))
        ));

        manager.close_table("users").unwrap();
        assert!(!manager.is_open("users"));
    }
}
