use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use ahash::AHashMap;
use log::debug;

use crate::checkpoint::write_atomic;
use crate::file::FileId;
use crate::record::{RecordError, TableSchema};
use crate::sync::lock;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Table {0} already exists")]
    TableExists(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(#[from] RecordError),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

pub const TABLES_DIR: &str = "tables";
pub const INDEXES_DIR: &str = "indexes";
pub const METADATA_DIR: &str = "metadata";
const FILE_MAPPING: &str = "table_file_mapping.json";
const NEXT_FILE_ID: &str = "next_file_id.json";

/// File ids backing one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFiles {
    pub heap_file_id: FileId,
    pub index_file_id: FileId,
}

#[derive(Debug, Serialize, Deserialize)]
struct NextFileId {
    next_file_id: FileId,
}

struct CatalogState {
    files: BTreeMap<String, TableFiles>,
    schemas: AHashMap<String, TableSchema>,
    next_file_id: FileId,
}

/// Table schemas and file-id assignments of one database, mirrored to JSON
/// files under the database directory
pub struct CatalogManager {
    db_path: PathBuf,
    state: Mutex<CatalogState>,
}

impl CatalogManager {
    /// Load the catalog of the database at `db_path`, creating the directory
    /// layout if missing
    pub fn load(db_path: &Path) -> CatalogResult<Self> {
        for dir in [TABLES_DIR, INDEXES_DIR, METADATA_DIR] {
            fs::create_dir_all(db_path.join(dir))?;
        }

        let mapping_path = db_path.join(METADATA_DIR).join(FILE_MAPPING);
        let files: BTreeMap<String, TableFiles> = if mapping_path.exists() {
            serde_json::from_str(&fs::read_to_string(&mapping_path)?)?
        } else {
            BTreeMap::new()
        };

        let next_path = db_path.join(METADATA_DIR).join(NEXT_FILE_ID);
        let stored_next = if next_path.exists() {
            serde_json::from_str::<NextFileId>(&fs::read_to_string(&next_path)?)?.next_file_id
        } else {
            1
        };
        let used_max = files
            .values()
            .map(|f| f.heap_file_id.max(f.index_file_id))
            .max()
            .unwrap_or(0);

        let mut schemas = AHashMap::new();
        for name in files.keys() {
            let path = Self::schema_path_in(db_path, name);
            let schema: TableSchema = serde_json::from_str(&fs::read_to_string(&path)?)?;
            schemas.insert(name.clone(), schema);
        }

        debug!("loaded catalog of {} with {} tables", db_path.display(), files.len());
        Ok(Self {
            db_path: db_path.to_path_buf(),
            state: Mutex::new(CatalogState {
                files,
                schemas,
                next_file_id: stored_next.max(used_max + 1),
            }),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn schema_path_in(db_path: &Path, table: &str) -> PathBuf {
        db_path.join(TABLES_DIR).join(format!("{}_schema.json", table))
    }

    pub fn heap_path(&self, files: &TableFiles) -> PathBuf {
        self.db_path
            .join(TABLES_DIR)
            .join(format!("{}.heap", files.heap_file_id))
    }

    pub fn index_path(&self, table: &str) -> PathBuf {
        self.db_path
            .join(INDEXES_DIR)
            .join(format!("{}_primary.idx", table))
    }

    fn save(&self, state: &CatalogState) -> CatalogResult<()> {
        let metadata = self.db_path.join(METADATA_DIR);
        write_atomic(
            &metadata.join(FILE_MAPPING),
            &serde_json::to_vec_pretty(&state.files)?,
        )?;
        write_atomic(
            &metadata.join(NEXT_FILE_ID),
            &serde_json::to_vec_pretty(&NextFileId {
                next_file_id: state.next_file_id,
            })?,
        )?;
        Ok(())
    }

    /// Record a new table and hand out its heap and index file ids
    pub fn register_table(&self, schema: &TableSchema) -> CatalogResult<TableFiles> {
        schema.validate()?;
        let mut state = lock(&self.state);
        if state.files.contains_key(schema.name()) {
            return Err(CatalogError::TableExists(schema.name().to_string()));
        }

        let files = TableFiles {
            heap_file_id: state.next_file_id,
            index_file_id: state.next_file_id + 1,
        };
        state.next_file_id += 2;

        write_atomic(
            &Self::schema_path_in(&self.db_path, schema.name()),
            &serde_json::to_vec_pretty(schema)?,
        )?;
        state.files.insert(schema.name().to_string(), files);
        state.schemas.insert(schema.name().to_string(), schema.clone());
        self.save(&state)?;

        debug!(
            "registered table '{}' (heap file {}, index file {})",
            schema.name(),
            files.heap_file_id,
            files.index_file_id
        );
        Ok(files)
    }

    /// Forget a table. File ids are not reused.
    pub fn unregister_table(&self, table: &str) -> CatalogResult<TableFiles> {
        let mut state = lock(&self.state);
        let files = state
            .files
            .remove(table)
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))?;
        state.schemas.remove(table);

        let schema_path = Self::schema_path_in(&self.db_path, table);
        if schema_path.exists() {
            fs::remove_file(schema_path)?;
        }
        self.save(&state)?;
        Ok(files)
    }

    pub fn schema(&self, table: &str) -> CatalogResult<TableSchema> {
        lock(&self.state)
            .schemas
            .get(table)
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))
    }

    pub fn files(&self, table: &str) -> CatalogResult<TableFiles> {
        lock(&self.state)
            .files
            .get(table)
            .copied()
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))
    }

    pub fn contains(&self, table: &str) -> bool {
        lock(&self.state).files.contains_key(table)
    }

    /// Table names in sorted order
    pub fn table_names(&self) -> Vec<String> {
        lock(&self.state).files.keys().cloned().collect()
    }
}
