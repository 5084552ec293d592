use std::collections::BTreeMap;

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Closed set of column types the engine understands. Declared type names
/// outside the fixed table below map to `Unknown`, which is terminal for
/// that column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Unknown,
    Text,
    Integer,
    BigInt,
    UnsignedBigInt,
    Double,
    Blob,
}

impl ColumnType {
    pub fn from_declared(declared: &str) -> Self {
        match declared {
            "TEXT" => ColumnType::Text,
            "INTEGER" => ColumnType::Integer,
            "BIGINT" => ColumnType::BigInt,
            "UNSIGNED BIGINT" => ColumnType::UnsignedBigInt,
            "DOUBLE" => ColumnType::Double,
            "BLOB" => ColumnType::Blob,
            _ => ColumnType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Unknown => "UNKNOWN",
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::UnsignedBigInt => "UNSIGNED BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// A single typed cell. The tagged union is exhaustive at every bind and
/// extract site, so adding a kind forces all call sites to be revisited.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    BigInt(i64),
    UnsignedBigInt(u64),
    Double(f64),
    Text(String),
}

/// One logical record: column name to typed cell, keys unique.
pub type Row = BTreeMap<String, Value>;

impl Value {
    /// Bind a JSON-shaped input into a typed value following the column's
    /// declared type. Absent or wrongly-typed JSON fields fall back to the
    /// type's zero value.
    pub fn from_json(kind: ColumnType, field: Option<&JsonValue>) -> Result<Value> {
        let field = field.unwrap_or(&JsonValue::Null);
        match kind {
            ColumnType::Integer => Ok(Value::Integer(
                field.as_i64().map(|v| v as i32).unwrap_or(0),
            )),
            ColumnType::BigInt => Ok(Value::BigInt(field.as_i64().unwrap_or(0))),
            ColumnType::UnsignedBigInt => Ok(Value::UnsignedBigInt(field.as_u64().unwrap_or(0))),
            ColumnType::Double => Ok(Value::Double(if field.is_f64() {
                field.as_f64().unwrap_or(0.0)
            } else {
                0.0
            })),
            ColumnType::Text => Ok(Value::Text(
                field.as_str().map(str::to_owned).unwrap_or_default(),
            )),
            ColumnType::Blob => Err(Error::NotImplemented("binding BLOB columns")),
            ColumnType::Unknown => Err(Error::BindFailure {
                column: String::new(),
                reason: "column has an unrecognized declared type".into(),
            }),
        }
    }

    /// Read a cell of the declared type out of a result row. NULL cells come
    /// back as `None`; callers decide between skipping and zero-filling.
    pub fn from_cell(kind: ColumnType, cell: ValueRef<'_>) -> Result<Option<Value>> {
        if matches!(cell, ValueRef::Null) {
            return Ok(None);
        }
        let value = match kind {
            ColumnType::Integer => Value::Integer(read_i64(cell)? as i32),
            ColumnType::BigInt => Value::BigInt(read_i64(cell)?),
            ColumnType::UnsignedBigInt => Value::UnsignedBigInt(read_i64(cell)? as u64),
            ColumnType::Double => Value::Double(match cell {
                ValueRef::Real(f) => f,
                ValueRef::Integer(i) => i as f64,
                _ => return Err(extract_mismatch(kind)),
            }),
            ColumnType::Text => match cell {
                ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
                _ => return Err(extract_mismatch(kind)),
            },
            ColumnType::Blob => return Err(Error::NotImplemented("extracting BLOB columns")),
            ColumnType::Unknown => return Err(extract_mismatch(kind)),
        };
        Ok(Some(value))
    }

    /// The zero value a full-row extraction uses for NULL cells.
    pub fn default_for(kind: ColumnType) -> Result<Value> {
        match kind {
            ColumnType::Integer => Ok(Value::Integer(0)),
            ColumnType::BigInt => Ok(Value::BigInt(0)),
            ColumnType::UnsignedBigInt => Ok(Value::UnsignedBigInt(0)),
            ColumnType::Double => Ok(Value::Double(0.0)),
            ColumnType::Text => Ok(Value::Text(String::new())),
            ColumnType::Blob => Err(Error::NotImplemented("defaulting BLOB columns")),
            ColumnType::Unknown => Err(extract_mismatch(kind)),
        }
    }

    pub fn to_sql_value(&self) -> SqlValue {
        match self {
            Value::Integer(v) => SqlValue::Integer(i64::from(*v)),
            Value::BigInt(v) => SqlValue::Integer(*v),
            Value::UnsignedBigInt(v) => SqlValue::Integer(*v as i64),
            Value::Double(v) => SqlValue::Real(*v),
            Value::Text(v) => SqlValue::Text(v.clone()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Integer(v) => JsonValue::from(*v),
            Value::BigInt(v) => JsonValue::from(*v),
            Value::UnsignedBigInt(v) => JsonValue::from(*v),
            Value::Double(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(v) => JsonValue::String(v.clone()),
        }
    }

    /// Render the value as a SQL literal for the legacy update path. Text is
    /// single-quote delimited with no further escaping.
    // TODO: escape embedded single quotes before this mode is used on
    // attacker-influenced text columns.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Integer(v) => v.to_string(),
            Value::BigInt(v) => v.to_string(),
            Value::UnsignedBigInt(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::Text(v) => format!("'{}'", v),
        }
    }
}

fn read_i64(cell: ValueRef<'_>) -> Result<i64> {
    match cell {
        ValueRef::Integer(i) => Ok(i),
        _ => Err(extract_mismatch(ColumnType::BigInt)),
    }
}

fn extract_mismatch(kind: ColumnType) -> Error {
    Error::BindFailure {
        column: String::new(),
        reason: format!("stored value does not match declared type {}", kind.as_str()),
    }
}

/// Convert a typed row into the document shape used for delta notification
/// and sync payloads.
pub fn row_to_document(row: &Row) -> JsonValue {
    let mut object = serde_json::Map::new();
    for (name, value) in row {
        object.insert(name.clone(), value.to_json());
    }
    JsonValue::Object(object)
}
