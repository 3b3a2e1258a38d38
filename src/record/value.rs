use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{RecordError, RecordResult};

/// Column data type, fixed when the table is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Int,           // 4 bytes
    Float,         // 4 bytes
    Varchar(u16),  // up to n bytes of UTF-8
    Bytes(u16),    // up to n raw bytes
}

impl DataType {
    /// Largest encoded size of a value of this type (length prefix included)
    pub fn max_size(&self) -> usize {
        match self {
            DataType::Int | DataType::Float => 4,
            DataType::Varchar(n) | DataType::Bytes(n) => 2 + *n as usize,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int => write!(f, "INT"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Varchar(n) => write!(f, "VARCHAR({})", n),
            DataType::Bytes(n) => write!(f, "BYTES({})", n),
        }
    }
}

/// Represents a single column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
    Bytes(Vec<u8>),
    Null,
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "INT",
            Value::Float(_) => "FLOAT",
            Value::Str(_) => "VARCHAR",
            Value::Bytes(_) => "BYTES",
            Value::Null => "NULL",
        }
    }

    /// Whether a non-null value can be stored in a column of `data_type`.
    /// No coercion: an INT column only takes `Value::Int`.
    pub fn fits(&self, data_type: &DataType) -> bool {
        matches!(
            (self, data_type),
            (Value::Int(_), DataType::Int)
                | (Value::Float(_), DataType::Float)
                | (Value::Str(_), DataType::Varchar(_))
                | (Value::Bytes(_), DataType::Bytes(_))
        )
    }

    /// Append the row encoding of a non-null value: 4 LE bytes for numbers,
    /// `u16 len || bytes` for strings and blobs
    pub fn encode_into(&self, out: &mut Vec<u8>) -> RecordResult<()> {
        match self {
            Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Str(s) => Self::encode_var(s.as_bytes(), out)?,
            Value::Bytes(b) => Self::encode_var(b, out)?,
            Value::Null => {
                return Err(RecordError::Serialization(
                    "NULL is carried by the null bitmap".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn encode_var(bytes: &[u8], out: &mut Vec<u8>) -> RecordResult<()> {
        let len = u16::try_from(bytes.len()).map_err(|_| {
            RecordError::Serialization(format!("{} byte value exceeds u16 length", bytes.len()))
        })?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(bytes);
        Ok(())
    }

    /// Decode one value of `data_type` starting at `*pos`, advancing it
    pub fn decode(data: &[u8], pos: &mut usize, data_type: &DataType) -> RecordResult<Self> {
        match data_type {
            DataType::Int => {
                let raw = take(data, pos, 4)?;
                Ok(Value::Int(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])))
            }
            DataType::Float => {
                let raw = take(data, pos, 4)?;
                Ok(Value::Float(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])))
            }
            DataType::Varchar(_) => {
                let len = take(data, pos, 2)?;
                let len = u16::from_le_bytes([len[0], len[1]]) as usize;
                let raw = take(data, pos, len)?;
                let s = String::from_utf8(raw.to_vec())
                    .map_err(|e| RecordError::Deserialization(format!("Invalid UTF-8: {}", e)))?;
                Ok(Value::Str(s))
            }
            DataType::Bytes(_) => {
                let len = take(data, pos, 2)?;
                let len = u16::from_le_bytes([len[0], len[1]]) as usize;
                Ok(Value::Bytes(take(data, pos, len)?.to_vec()))
            }
        }
    }

    /// Order-preserving key encoding: comparing the bytes lexicographically
    /// orders values like comparing the values themselves.
    pub fn key_bytes(&self) -> Vec<u8> {
        match self {
            Value::Int(v) => ((*v as u32) ^ 0x8000_0000).to_be_bytes().to_vec(),
            Value::Float(v) => {
                let bits = v.to_bits();
                let ordered = if bits & 0x8000_0000 != 0 {
                    !bits
                } else {
                    bits ^ 0x8000_0000
                };
                ordered.to_be_bytes().to_vec()
            }
            Value::Str(s) => s.as_bytes().to_vec(),
            Value::Bytes(b) => b.clone(),
            Value::Null => Vec::new(),
        }
    }

    /// Total order used when sorting join inputs. NULL sorts first and never
    /// equals anything, including another NULL.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Some(a.total_cmp(b)),
            (Value::Int(a), Value::Float(b)) => Some(f64::from(*a).total_cmp(&f64::from(*b))),
            (Value::Float(a), Value::Int(b)) => Some(f64::from(*a).total_cmp(&f64::from(*b))),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// SQL-style equality; NULL equals nothing
    pub fn sql_eq(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> RecordResult<&'a [u8]> {
    let end = *pos + len;
    if end > data.len() {
        return Err(RecordError::Deserialization(format!(
            "Need {} bytes at offset {}, only {} available",
            len,
            *pos,
            data.len()
        )));
    }
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "'{}'", s),
            Value::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Null => write!(f, "NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_is_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int(42).is_null());
        assert!(!Value::Str("hello".to_string()).is_null());
    }

    #[test]
    fn test_fits_is_strict() {
        assert!(Value::Int(1).fits(&DataType::Int));
        assert!(!Value::Int(1).fits(&DataType::Float));
        assert!(!Value::Float(1.0).fits(&DataType::Int));
        assert!(Value::Str("a".into()).fits(&DataType::Varchar(8)));
        assert!(!Value::Bytes(vec![1]).fits(&DataType::Varchar(8)));
    }

    #[test]
    fn test_varchar_encoding_layout() {
        let mut out = Vec::new();
        Value::Str("hey".to_string()).encode_into(&mut out).unwrap();
        assert_eq!(out, vec![3, 0, b'h', b'e', b'y']);

        let mut pos = 0;
        let decoded = Value::decode(&out, &mut pos, &DataType::Varchar(10)).unwrap();
        assert_eq!(decoded, Value::Str("hey".to_string()));
        assert_eq!(pos, out.len());
    }

    #[test]
    fn test_decode_truncated() {
        let mut pos = 0;
        let result = Value::decode(&[1, 2], &mut pos, &DataType::Int);
        assert!(matches!(result, Err(RecordError::Deserialization(_))));
    }

    #[test]
    fn test_int_key_order() {
        let values = [i32::MIN, -100, -1, 0, 1, 17, 100, i32::MAX];
        let keys: Vec<Vec<u8>> = values.iter().map(|v| Value::Int(*v).key_bytes()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_float_key_order() {
        let values = [f32::NEG_INFINITY, -2.5, -0.5, 0.0, 0.25, 3.0, f32::INFINITY];
        let keys: Vec<Vec<u8>> = values.iter().map(|v| Value::Float(*v).key_bytes()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_null_never_equal() {
        assert!(!Value::Null.sql_eq(&Value::Null));
        assert!(Value::Int(3).sql_eq(&Value::Int(3)));
        assert!(Value::Int(3).sql_eq(&Value::Float(3.0)));
        assert!(!Value::Int(16_777_217).sql_eq(&Value::Float(16_777_216.0)));
        assert!(!Value::Str("a".into()).sql_eq(&Value::Int(1)));
    }

    #[test]
    fn test_data_type_json() {
        let json = serde_json::to_string(&DataType::Varchar(32)).unwrap();
        assert_eq!(json, r#"{"VARCHAR":32}"#);
        let back: DataType = serde_json::from_str(r#""INT""#).unwrap();
        assert_eq!(back, DataType::Int);
    }
}
