use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use super::error::{RecordError, RecordResult};
use super::value::{DataType, Value};

/// Column definition with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    /// Create a nullable, non-key column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
        }
    }

    /// Mark the column as the primary key (implies NOT NULL)
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// `FOREIGN KEY (column) REFERENCES ref_table(ref_column)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

/// Table schema with all column definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    columns: Vec<ColumnDef>,
    #[serde(default)]
    foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_foreign_key(
        mut self,
        column: impl Into<String>,
        ref_table: impl Into<String>,
        ref_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            ref_table: ref_table.into(),
            ref_column: ref_column.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> Option<&ColumnDef> {
        self.columns.get(idx)
    }

    /// Find column index by name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Index of the explicit primary-key column, if any
    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }

    /// NULL bitmap size in bytes
    pub fn null_bitmap_size(&self) -> usize {
        self.columns.len().div_ceil(8)
    }

    /// Largest possible encoded row
    pub fn max_row_size(&self) -> usize {
        self.null_bitmap_size()
            + self
                .columns
                .iter()
                .map(|c| c.data_type.max_size())
                .sum::<usize>()
    }

    /// Structural checks on the schema itself
    pub fn validate(&self) -> RecordResult<()> {
        if self.columns.is_empty() {
            return Err(RecordError::SchemaMismatch(format!(
                "Table '{}' has no columns",
                self.name
            )));
        }

        let mut seen = AHashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(RecordError::SchemaMismatch(format!(
                    "Duplicate column '{}' in table '{}'",
                    col.name, self.name
                )));
            }
        }

        if self.columns.iter().filter(|c| c.primary_key).count() > 1 {
            return Err(RecordError::SchemaMismatch(format!(
                "Table '{}' declares more than one primary key column",
                self.name
            )));
        }

        for fk in &self.foreign_keys {
            if self.find_column(&fk.column).is_none() {
                return Err(RecordError::SchemaMismatch(format!(
                    "Foreign key column '{}' does not exist in table '{}'",
                    fk.column, self.name
                )));
            }
        }
        Ok(())
    }

    /// Validate a row of values against this schema
    pub fn validate_row(&self, values: &[Value]) -> RecordResult<()> {
        if values.len() != self.columns.len() {
            return Err(RecordError::SchemaMismatch(format!(
                "Table '{}' expects {} columns, got {}",
                self.name,
                self.columns.len(),
                values.len()
            )));
        }

        for (value, col) in values.iter().zip(&self.columns) {
            if value.is_null() {
                if !col.nullable {
                    return Err(RecordError::NullConstraintViolation(format!(
                        "Column '{}' cannot be NULL",
                        col.name
                    )));
                }
                continue;
            }

            if !value.fits(&col.data_type) {
                return Err(RecordError::TypeMismatch {
                    column: col.name.clone(),
                    expected: col.data_type.to_string(),
                    actual: value.type_name().to_string(),
                });
            }

            let len = match (value, &col.data_type) {
                (Value::Str(s), DataType::Varchar(max)) => Some((s.len(), *max)),
                (Value::Bytes(b), DataType::Bytes(max)) => Some((b.len(), *max)),
                _ => None,
            };
            if let Some((len, max)) = len
                && len > max as usize
            {
                return Err(RecordError::ValueTooLong {
                    column: col.name.clone(),
                    len,
                    max: max as usize,
                });
            }
        }

        Ok(())
    }
}
