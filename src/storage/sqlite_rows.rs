// src/storage/sqlite_rows.rs
// sqlx glue shared by the IPC host and the native plugin: binding JSON
// parameters, decoding dynamically typed rows, classifying engine errors.

use serde_json::{Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};

use super::{Record, StorageError};

pub(crate) type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Bind JSON values positionally. Arrays and objects are stored as JSON text.
pub(crate) fn bind_values<'q>(mut query: SqliteQuery<'q>, params: &'q [Value]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

/// Decode a row using each value's runtime storage class.
pub(crate) fn row_to_record(row: &SqliteRow) -> Result<Record, sqlx::Error> {
    let mut record = Record::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage_class = raw.type_info().name().to_ascii_uppercase();
            match storage_class.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(idx)?),
                "REAL" | "NUMERIC" => Number::from_f64(row.try_get::<f64, _>(idx)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => Value::from(row.try_get::<Vec<u8>, _>(idx)?),
                _ => Value::String(row.try_get::<String, _>(idx)?),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

/// Unique, foreign-key, not-null and check failures reported by the engine.
pub(crate) fn is_constraint_error(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            db.is_unique_violation()
                || db.is_foreign_key_violation()
                || db.is_check_violation()
                || db.message().contains("constraint failed")
        }
        _ => false,
    }
}

pub(crate) fn map_sqlx_error(backend: &str, error: sqlx::Error) -> StorageError {
    if is_constraint_error(&error) {
        StorageError::ConstraintViolation {
            backend: backend.to_string(),
            error: error.to_string(),
        }
    } else {
        StorageError::BackendError {
            backend: backend.to_string(),
            error: error.to_string(),
        }
    }
}
