//! Column-major on-disk format for tabular values.
//!
//! A value is tabular when its JSON form is either
//!
//! - **records**: a non-empty array of flat objects sharing one key set, or
//! - **columns**: a non-empty object of equal-length arrays of scalars.
//!
//! # Binary Format
//!
//! ```text
//! [magic: 4 bytes "MCOL"][version: 1 byte][bincode(ColumnarTable)]
//! ```
//!
//! Columns whose cells are uniformly typed are stored as typed vectors; mixed
//! columns fall back to per-cell JSON text, so decoding is always lossless at
//! the JSON level.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{DeserializationError, SerializationError};

/// Magic bytes identifying the columnar format.
pub const COLUMNAR_MAGIC: [u8; 4] = *b"MCOL";

/// Current columnar format version.
pub const COLUMNAR_VERSION: u8 = 1;

const CODEC: &str = "columnar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Orientation {
    Records,
    Columns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ColumnarTable {
    orientation: Orientation,
    row_count: u64,
    columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Column {
    name: String,
    data: ColumnData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ColumnData {
    Bool(Vec<Option<bool>>),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Json(Vec<String>),
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Whether the columnar codec can carry this value.
pub fn is_tabular(value: &Value) -> bool {
    match value {
        Value::Array(rows) => {
            let Some(Value::Object(first)) = rows.first() else {
                return false;
            };
            if first.is_empty() {
                return false;
            }
            rows.iter().all(|row| match row {
                Value::Object(obj) => {
                    obj.len() == first.len()
                        && obj.keys().all(|k| first.contains_key(k))
                        && obj.values().all(is_scalar)
                }
                _ => false,
            })
        }
        Value::Object(cols) => {
            let mut lengths = cols.values().map(|col| match col {
                Value::Array(cells) if cells.iter().all(is_scalar) => Some(cells.len()),
                _ => None,
            });
            match lengths.next() {
                Some(Some(len)) => lengths.all(|l| l == Some(len)),
                _ => false,
            }
        }
        _ => false,
    }
}

/// Encode a tabular JSON value.
pub fn encode_value(value: &Value) -> Result<Vec<u8>, SerializationError> {
    let table = match value {
        Value::Array(rows) if is_tabular(value) => {
            let names: Vec<String> = match &rows[0] {
                Value::Object(first) => first.keys().cloned().collect(),
                _ => Vec::new(),
            };
            let columns = names
                .into_iter()
                .map(|name| {
                    let cells: Vec<&Value> = rows
                        .iter()
                        .map(|row| row.get(&name).unwrap_or(&Value::Null))
                        .collect();
                    Column {
                        data: build_column(&cells),
                        name,
                    }
                })
                .collect();
            ColumnarTable {
                orientation: Orientation::Records,
                row_count: rows.len() as u64,
                columns,
            }
        }
        Value::Object(cols) if is_tabular(value) => {
            let mut row_count = 0;
            let columns = cols
                .iter()
                .map(|(name, col)| {
                    let cells: Vec<&Value> = match col {
                        Value::Array(cells) => cells.iter().collect(),
                        _ => Vec::new(),
                    };
                    row_count = cells.len() as u64;
                    Column {
                        name: name.clone(),
                        data: build_column(&cells),
                    }
                })
                .collect();
            ColumnarTable {
                orientation: Orientation::Columns,
                row_count,
                columns,
            }
        }
        _ => {
            return Err(SerializationError::NotTabular {
                reason: "expected an array of flat records or an object of equal-length columns"
                    .to_string(),
            })
        }
    };

    let body = bincode::serialize(&table).map_err(|e| SerializationError::Encode {
        codec: CODEC.to_string(),
        reason: e.to_string(),
    })?;

    let mut bytes = Vec::with_capacity(COLUMNAR_MAGIC.len() + 1 + body.len());
    bytes.extend_from_slice(&COLUMNAR_MAGIC);
    bytes.push(COLUMNAR_VERSION);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Decode bytes written by [`encode_value`].
pub fn decode_value(bytes: &[u8]) -> Result<Value, DeserializationError> {
    let decode_err = |reason: String| DeserializationError::Decode {
        codec: CODEC.to_string(),
        reason,
    };

    if bytes.len() < COLUMNAR_MAGIC.len() + 1 || bytes[0..4] != COLUMNAR_MAGIC {
        return Err(decode_err("missing columnar magic".to_string()));
    }
    if bytes[4] != COLUMNAR_VERSION {
        return Err(decode_err(format!("unsupported version {}", bytes[4])));
    }

    let table: ColumnarTable =
        bincode::deserialize(&bytes[5..]).map_err(|e| decode_err(e.to_string()))?;
    let rows = table.row_count as usize;

    let mut cells_by_column = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        let cells = column_cells(&column.data).map_err(decode_err)?;
        if cells.len() != rows {
            return Err(decode_err(format!(
                "column {} has {} cells, expected {}",
                column.name,
                cells.len(),
                rows
            )));
        }
        cells_by_column.push(cells);
    }

    Ok(match table.orientation {
        Orientation::Columns => Value::Object(
            table
                .columns
                .into_iter()
                .zip(cells_by_column)
                .map(|(column, cells)| (column.name, Value::Array(cells)))
                .collect(),
        ),
        Orientation::Records => {
            let mut records: Vec<Map<String, Value>> = vec![Map::new(); rows];
            for (column, cells) in table.columns.iter().zip(cells_by_column) {
                for (record, cell) in records.iter_mut().zip(cells) {
                    record.insert(column.name.clone(), cell);
                }
            }
            Value::Array(records.into_iter().map(Value::Object).collect())
        }
    })
}

fn build_column(cells: &[&Value]) -> ColumnData {
    let present = || cells.iter().filter(|c| !c.is_null());

    if present().all(|c| c.is_boolean()) {
        return ColumnData::Bool(cells.iter().map(|c| c.as_bool()).collect());
    }
    if present().all(|c| c.is_i64()) {
        return ColumnData::Int(cells.iter().map(|c| c.as_i64()).collect());
    }
    if present().all(|c| c.is_f64()) {
        return ColumnData::Float(cells.iter().map(|c| c.as_f64()).collect());
    }
    if present().all(|c| c.is_string()) {
        return ColumnData::Text(
            cells
                .iter()
                .map(|c| c.as_str().map(str::to_string))
                .collect(),
        );
    }
    ColumnData::Json(cells.iter().map(|c| c.to_string()).collect())
}

fn column_cells(data: &ColumnData) -> Result<Vec<Value>, String> {
    Ok(match data {
        ColumnData::Bool(v) => v.iter().map(|c| c.map_or(Value::Null, Value::Bool)).collect(),
        ColumnData::Int(v) => v
            .iter()
            .map(|c| c.map_or(Value::Null, |i| Value::Number(i.into())))
            .collect(),
        ColumnData::Float(v) => v
            .iter()
            .map(|c| match c {
                Some(f) => Number::from_f64(*f)
                    .map(Value::Number)
                    .ok_or_else(|| format!("non-finite float {f}")),
                None => Ok(Value::Null),
            })
            .collect::<Result<_, _>>()?,
        ColumnData::Text(v) => v
            .iter()
            .map(|c| c.clone().map_or(Value::Null, Value::String))
            .collect(),
        ColumnData::Json(v) => v
            .iter()
            .map(|c| serde_json::from_str(c).map_err(|e| e.to_string()))
            .collect::<Result<_, _>>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detects_records() {
        assert!(is_tabular(&json!([{"a": 1, "b": "x"}, {"b": "y", "a": 2}])));
        assert!(!is_tabular(&json!([{"a": 1}, {"b": 2}])));
        assert!(!is_tabular(&json!([{"a": [1]}])));
        assert!(!is_tabular(&json!([])));
        assert!(!is_tabular(&json!([1, 2])));
    }

    #[test]
    fn test_detects_columns() {
        assert!(is_tabular(&json!({"a": [1, 2], "b": ["x", "y"]})));
        assert!(is_tabular(&json!({"a": []})));
        assert!(!is_tabular(&json!({"a": [1, 2], "b": ["x"]})));
        assert!(!is_tabular(&json!({"a": 1})));
        assert!(!is_tabular(&json!({})));
    }

    #[test]
    fn test_records_round_trip_with_nulls() {
        let value = json!([
            {"day": "mon", "close": 1.5, "volume": 10, "halted": false},
            {"day": "tue", "close": null, "volume": 12, "halted": true},
            {"day": null, "close": 2.25, "volume": null, "halted": null},
        ]);
        let bytes = encode_value(&value).unwrap();
        assert_eq!(&bytes[0..4], b"MCOL");
        assert_eq!(decode_value(&bytes).unwrap(), value);
    }

    #[test]
    fn test_columns_round_trip_mixed_column() {
        let value = json!({
            "id": [1, 2, 3],
            "mixed": [1, "two", 3.5],
            "big": [u64::MAX, 1, 2],
        });
        let bytes = encode_value(&value).unwrap();
        assert_eq!(decode_value(&bytes).unwrap(), value);
    }

    #[test]
    fn test_int_and_float_mix_stays_exact() {
        let value = json!({"x": [1, 2.5]});
        let decoded = decode_value(&encode_value(&value).unwrap()).unwrap();
        assert_eq!(decoded, value);
        assert!(decoded["x"][0].is_i64());
    }

    #[test]
    fn test_rejects_non_tabular() {
        let err = encode_value(&json!("scalar")).unwrap_err();
        assert!(matches!(err, SerializationError::NotTabular { .. }));
    }

    #[test]
    fn test_decode_rejects_bad_magic_and_version() {
        assert!(decode_value(b"JSON{}").is_err());
        let mut bytes = encode_value(&json!({"a": [1]})).unwrap();
        bytes[4] = 99;
        let err = decode_value(&bytes).unwrap_err();
        assert!(format!("{err}").contains("unsupported version"));
    }
}
