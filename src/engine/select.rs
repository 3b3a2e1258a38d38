//! SELECT execution
//!
//! Three paths: equality on the primary key goes through the index, any
//! other equality filter scans the heap, and a join loads both tables,
//! sorts them on the join columns and merges.

use std::cmp::Ordering;

use super::error::{EngineError, EngineResult};
use super::{StorageEngine, TableHandle};
use crate::record::{Row, RowPointer, Value};

/// `column = value`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Plain column name, or `table.column` when filtering a join
    pub column: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    fn keeps_left(self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Full)
    }

    fn keeps_right(self) -> bool {
        matches!(self, JoinKind::Right | JoinKind::Full)
    }
}

/// `<kind> JOIN right_table ON left.left_column = right_table.right_column`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub right_table: String,
    pub left_column: String,
    pub right_column: String,
    pub kind: JoinKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectPayload {
    pub table: String,
    pub predicate: Option<Predicate>,
    pub join: Option<JoinSpec>,
}

impl SelectPayload {
    /// `SELECT * FROM table`
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            predicate: None,
            join: None,
        }
    }

    pub fn filter(mut self, column: impl Into<String>, value: Value) -> Self {
        self.predicate = Some(Predicate {
            column: column.into(),
            value,
        });
        self
    }

    pub fn join(
        mut self,
        kind: JoinKind,
        right_table: impl Into<String>,
        left_column: impl Into<String>,
        right_column: impl Into<String>,
    ) -> Self {
        self.join = Some(JoinSpec {
            right_table: right_table.into(),
            left_column: left_column.into(),
            right_column: right_column.into(),
            kind,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectResult {
    /// Column names; qualified as `table.column` for joins
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl SelectResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Sort rank for values that do not compare with each other
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Int(_) | Value::Float(_) => 1,
        Value::Str(_) => 2,
        Value::Bytes(_) => 3,
    }
}

fn join_order(a: &Value, b: &Value) -> Ordering {
    a.compare(b)
        .unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

fn column_index(columns: &[String], name: &str, table: &str) -> EngineResult<usize> {
    if let Some(i) = columns.iter().position(|c| c == name) {
        return Ok(i);
    }
    let suffix = format!(".{}", name);
    let mut matches = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.ends_with(&suffix));
    match (matches.next(), matches.next()) {
        (Some((i, _)), None) => Ok(i),
        _ => Err(EngineError::ColumnNotFound(name.to_string(), table.to_string())),
    }
}

impl StorageEngine {
    pub fn execute_select(&self, payload: &SelectPayload) -> EngineResult<SelectResult> {
        let result = match &payload.join {
            Some(join) => self.select_join(payload, join),
            None => self.select_single(payload),
        };
        result.map_err(|e| e.during("select", &payload.table))
    }

    fn select_single(&self, payload: &SelectPayload) -> EngineResult<SelectResult> {
        let handle = self.db()?.table(&payload.table)?;
        let columns: Vec<String> = handle
            .schema
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();

        let Some(predicate) = &payload.predicate else {
            let rows = load_rows(&handle)?
                .into_iter()
                .map(|(_, row)| row.into_values())
                .collect();
            return Ok(SelectResult { columns, rows });
        };

        let col = column_index(&columns, &predicate.column, &payload.table)?;
        let on_key = handle.schema.primary_key_index() == Some(col)
            && handle
                .schema
                .column(col)
                .is_some_and(|c| predicate.value.fits(&c.data_type));

        let rows = if on_key {
            lookup(&handle, &predicate.value)?.into_iter().collect()
        } else {
            load_rows(&handle)?
                .into_iter()
                .map(|(_, row)| row.into_values())
                .filter(|values| values[col].sql_eq(&predicate.value))
                .collect()
        };
        Ok(SelectResult { columns, rows })
    }

    fn select_join(&self, payload: &SelectPayload, join: &JoinSpec) -> EngineResult<SelectResult> {
        let db = self.db()?;
        let left = db.table(&payload.table)?;
        let right = db.table(&join.right_table)?;

        let left_col = left.schema.find_column(&join.left_column).ok_or_else(|| {
            EngineError::ColumnNotFound(join.left_column.clone(), payload.table.clone())
        })?;
        let right_col = right.schema.find_column(&join.right_column).ok_or_else(|| {
            EngineError::ColumnNotFound(join.right_column.clone(), join.right_table.clone())
        })?;

        let qualify = |handle: &TableHandle| -> Vec<String> {
            handle
                .schema
                .columns()
                .iter()
                .map(|c| format!("{}.{}", handle.schema.name(), c.name))
                .collect()
        };
        let mut columns = qualify(&left);
        columns.extend(qualify(&right));

        let mut left_rows: Vec<Vec<Value>> = load_rows(&left)?
            .into_iter()
            .map(|(_, row)| row.into_values())
            .collect();
        let mut right_rows: Vec<Vec<Value>> = load_rows(&right)?
            .into_iter()
            .map(|(_, row)| row.into_values())
            .collect();
        left_rows.sort_by(|a, b| join_order(&a[left_col], &b[left_col]));
        right_rows.sort_by(|a, b| join_order(&a[right_col], &b[right_col]));

        let mut rows = merge_join(
            &left_rows,
            left_col,
            left.schema.column_count(),
            &right_rows,
            right_col,
            right.schema.column_count(),
            join.kind,
        );

        if let Some(predicate) = &payload.predicate {
            let col = column_index(&columns, &predicate.column, &payload.table)?;
            rows.retain(|values| values[col].sql_eq(&predicate.value));
        }
        Ok(SelectResult { columns, rows })
    }
}

fn load_rows(handle: &TableHandle) -> EngineResult<Vec<(RowPointer, Row)>> {
    handle
        .heap
        .scan_rows()?
        .into_iter()
        .map(|(rp, data)| Ok((rp, Row::decode(&data, &handle.schema)?)))
        .collect()
}

/// Point lookup through the primary index
fn lookup(handle: &TableHandle, key: &Value) -> EngineResult<Option<Vec<Value>>> {
    let Some(pointer) = handle.index.search(&key.key_bytes())? else {
        return Ok(None);
    };
    let rp = RowPointer::from_bytes(&pointer)?;
    let row = Row::decode(&handle.heap.get(&rp)?, &handle.schema)?;
    Ok(Some(row.into_values()))
}

/// Merge two inputs sorted by [`join_order`] on their join columns. NULL
/// keys never match; outer sides are padded with NULLs.
fn merge_join(
    left: &[Vec<Value>],
    left_col: usize,
    left_width: usize,
    right: &[Vec<Value>],
    right_col: usize,
    right_width: usize,
    kind: JoinKind,
) -> Vec<Vec<Value>> {
    let joined = |l: Option<&Vec<Value>>, r: Option<&Vec<Value>>| -> Vec<Value> {
        let mut out = Vec::with_capacity(left_width + right_width);
        match l {
            Some(values) => out.extend(values.iter().cloned()),
            None => out.resize(left_width, Value::Null),
        }
        match r {
            Some(values) => out.extend(values.iter().cloned()),
            None => out.resize(left_width + right_width, Value::Null),
        }
        out
    };

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        let lk = &left[i][left_col];
        let rk = &right[j][right_col];
        if lk.is_null() {
            if kind.keeps_left() {
                out.push(joined(Some(&left[i]), None));
            }
            i += 1;
            continue;
        }
        if rk.is_null() {
            if kind.keeps_right() {
                out.push(joined(None, Some(&right[j])));
            }
            j += 1;
            continue;
        }

        match join_order(lk, rk) {
            Ordering::Less => {
                if kind.keeps_left() {
                    out.push(joined(Some(&left[i]), None));
                }
                i += 1;
            }
            Ordering::Greater => {
                if kind.keeps_right() {
                    out.push(joined(None, Some(&right[j])));
                }
                j += 1;
            }
            Ordering::Equal => {
                let left_end = (i..left.len())
                    .find(|&k| join_order(&left[k][left_col], lk) != Ordering::Equal)
                    .unwrap_or(left.len());
                let right_end = (j..right.len())
                    .find(|&k| join_order(&right[k][right_col], rk) != Ordering::Equal)
                    .unwrap_or(right.len());
                for l in &left[i..left_end] {
                    for r in &right[j..right_end] {
                        out.push(joined(Some(l), Some(r)));
                    }
                }
                i = left_end;
                j = right_end;
            }
        }
    }

    if kind.keeps_left() {
        out.extend(left[i..].iter().map(|l| joined(Some(l), None)));
    }
    if kind.keeps_right() {
        out.extend(right[j..].iter().map(|r| joined(None, Some(r))));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(keys: &[Option<i32>]) -> Vec<Vec<Value>> {
        keys.iter()
            .map(|k| vec![k.map_or(Value::Null, Value::Int)])
            .collect()
    }

    #[test]
    fn test_merge_join_kinds() {
        let left = rows(&[None, Some(1), Some(2), Some(2), Some(4)]);
        let right = rows(&[None, Some(2), Some(3), Some(4), Some(4)]);

        let inner = merge_join(&left, 0, 1, &right, 0, 1, JoinKind::Inner);
        assert_eq!(inner.len(), 4);
        assert!(inner.iter().all(|r| r[0].sql_eq(&r[1])));

        // 4 matches + NULL + 1 on the left
        assert_eq!(merge_join(&left, 0, 1, &right, 0, 1, JoinKind::Left).len(), 6);
        // 4 matches + NULL + 3 on the right
        assert_eq!(merge_join(&left, 0, 1, &right, 0, 1, JoinKind::Right).len(), 6);
        assert_eq!(merge_join(&left, 0, 1, &right, 0, 1, JoinKind::Full).len(), 8);

        let left_outer = merge_join(&left, 0, 1, &right, 0, 1, JoinKind::Left);
        assert!(left_outer.contains(&vec![Value::Int(1), Value::Null]));
        assert!(left_outer.contains(&vec![Value::Null, Value::Null]));
    }

    #[test]
    fn test_join_order_mixes_numbers() {
        assert_eq!(join_order(&Value::Int(2), &Value::Float(2.0)), Ordering::Equal);
        // 2^24 + 1 has no exact f32 form; the comparison must still see it
        assert_eq!(
            join_order(&Value::Int(16_777_217), &Value::Float(16_777_216.0)),
            Ordering::Greater
        );
        assert_eq!(
            join_order(&Value::Float(16_777_216.0), &Value::Int(16_777_217)),
            Ordering::Less
        );
        assert_eq!(join_order(&Value::Null, &Value::Int(0)), Ordering::Less);
        assert_eq!(
            join_order(&Value::Int(9), &Value::Str("a".into())),
            Ordering::Less
        );
    }

    #[test]
    fn test_column_index_resolution() {
        let columns = vec!["a.id".to_string(), "a.name".to_string(), "b.id".to_string()];
        assert_eq!(column_index(&columns, "b.id", "a").unwrap(), 2);
        assert_eq!(column_index(&columns, "name", "a").unwrap(), 1);
        // Ambiguous without a qualifier
        assert!(column_index(&columns, "id", "a").is_err());
    }
}
