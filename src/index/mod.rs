//! Index management module
//!
//! Each table has one primary index, `indexes/<table>_primary.idx`, mapping
//! encoded primary keys to encoded row pointers.

mod error;

pub use error::{IndexError, IndexResult};

use std::path::Path;
use std::sync::{Arc, RwLock};

use ahash::AHashMap;
use log::info;

use crate::btree::BPlusTree;
use crate::file::{BufferPool, FileId};
use crate::sync::{read, write};

/// Open primary indexes of the current database, keyed by table name
pub struct IndexFileManager {
    pool: Arc<BufferPool>,
    open_indexes: RwLock<AHashMap<String, Arc<BPlusTree>>>,
}

impl IndexFileManager {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            open_indexes: RwLock::new(AHashMap::new()),
        }
    }

    /// Open (or create) a table's primary index under its catalog file id
    pub fn open_index<P: AsRef<Path>>(
        &self,
        table: &str,
        file_id: FileId,
        path: P,
    ) -> IndexResult<Arc<BPlusTree>> {
        let mut indexes = write(&self.open_indexes);
        if let Some(tree) = indexes.get(table) {
            return Ok(Arc::clone(tree));
        }

        self.pool.disk().open_file_with_id(path, file_id)?;
        let tree = Arc::new(BPlusTree::open(Arc::clone(&self.pool), file_id)?);
        indexes.insert(table.to_string(), Arc::clone(&tree));
        Ok(tree)
    }

    pub fn get(&self, table: &str) -> IndexResult<Arc<BPlusTree>> {
        read(&self.open_indexes)
            .get(table)
            .cloned()
            .ok_or_else(|| IndexError::IndexNotOpen(table.to_string()))
    }

    /// Throw away a table's index and build it again from `entries`
    pub fn rebuild<I>(&self, table: &str, entries: I) -> IndexResult<Arc<BPlusTree>>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let mut indexes = write(&self.open_indexes);
        let old = indexes
            .remove(table)
            .ok_or_else(|| IndexError::IndexNotOpen(table.to_string()))?;
        let file_id = old.file_id();
        drop(old);

        self.pool.discard_file_pages(file_id)?;
        self.pool.disk().truncate_file(file_id)?;
        let tree = Arc::new(BPlusTree::open(Arc::clone(&self.pool), file_id)?);

        let mut count = 0usize;
        for (key, value) in entries {
            tree.insert(&key, &value)?;
            count += 1;
        }
        info!("rebuilt index for '{}' with {} entries", table, count);

        indexes.insert(table.to_string(), Arc::clone(&tree));
        Ok(tree)
    }

    /// Forget an index and close its file. Cached pages are dropped without
    /// write-back.
    pub fn close_index(&self, table: &str) -> IndexResult<()> {
        let tree = write(&self.open_indexes)
            .remove(table)
            .ok_or_else(|| IndexError::IndexNotOpen(table.to_string()))?;
        self.pool.discard_file_pages(tree.file_id())?;
        self.pool.disk().close_file(tree.file_id())?;
        Ok(())
    }

    pub fn is_open(&self, table: &str) -> bool {
        read(&self.open_indexes).contains_key(table)
    }

    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.open_indexes).keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::DiskManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<BufferPool>, IndexFileManager) {
        let temp_dir = TempDir::new().unwrap();
        let pool = Arc::new(BufferPool::with_capacity(Arc::new(DiskManager::new()), 32));
        let manager = IndexFileManager::new(Arc::clone(&pool));
        (temp_dir, pool, manager)
    }

    #[test]
    fn test_open_get_close() {
        let (temp_dir, _pool, manager) = setup();
        let path = temp_dir.path().join("students_primary.idx");

        let tree = manager.open_index("students", 2, &path).unwrap();
        tree.insert(b"k1", b"v1").unwrap();
        let again = manager.open_index("students", 2, &path).unwrap();
        assert!(Arc::ptr_eq(&tree, &again));
        assert_eq!(manager.get("students").unwrap().search(b"k1").unwrap(), Some(b"v1".to_vec()));

        assert!(matches!(
            manager.get("courses"),
            Err(IndexError::IndexNotOpen(_))
        ));

        manager.close_index("students").unwrap();
        assert!(!manager.is_open("students"));
        assert!(path.exists());
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let (temp_dir, pool, manager) = setup();
        let path = temp_dir.path().join("t_primary.idx");
        let tree = manager.open_index("t", 4, &path).unwrap();
        for i in 0..100u32 {
            tree.insert(&i.to_be_bytes(), b"stale").unwrap();
        }
        drop(tree);

        let entries = (0..10u32).map(|i| (i.to_be_bytes().to_vec(), b"fresh".to_vec()));
        let tree = manager.rebuild("t", entries).unwrap();
        assert_eq!(tree.len().unwrap(), 10);
        assert_eq!(tree.search(&3u32.to_be_bytes()).unwrap(), Some(b"fresh".to_vec()));
        assert_eq!(tree.search(&50u32.to_be_bytes()).unwrap(), None);
        tree.check_invariants().unwrap();
        assert_eq!(manager.tables(), vec!["t".to_string()]);
        assert!(pool.resident_pages() > 0);
    }
}
