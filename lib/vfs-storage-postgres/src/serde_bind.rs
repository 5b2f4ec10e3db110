//! Serde-based binding for PostgreSQL queries.
//!
//! Parameters are bound from [`Value`]s using the column type to pick the
//! PostgreSQL type, and rows are turned back into entities through serde by
//! re-keying column values onto the entity's JSON keys.

use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Row, TypeInfo};
use vfs_storage::{
    Entity, Relation, StoreError, Value, entity_from_columns, row_to_json_keys,
};

use crate::sql::{Param, RELATION_PREFIX};

/// Build arguments for a rendered statement.
pub fn bind_params(params: &[Param]) -> Result<PgArguments, StoreError> {
    let mut args = PgArguments::default();
    for param in params {
        bind_value(&mut args, &param.value, param.column_type)?;
    }
    Ok(args)
}

/// Bind a Value to PgArguments, typed by its column type.
pub fn bind_value(
    args: &mut PgArguments,
    value: &Value,
    column_type: &str,
) -> Result<(), StoreError> {
    match value {
        Value::Null => {
            // Use column type to bind the correct null type
            match column_type {
                "datetime" => args.add(None::<chrono::DateTime<chrono::Utc>>),
                "bigint" => args.add(None::<i64>),
                "integer" => args.add(None::<i32>),
                "boolean" => args.add(None::<bool>),
                "double" => args.add(None::<f64>),
                "json" => args.add(None::<JsonValue>),
                _ => args.add(None::<String>), // text and default
            }
        }
        Value::Int(n) => match column_type {
            "integer" => {
                let n = i32::try_from(*n).map_err(|e| {
                    StoreError::StorageError(format!("{} out of range for integer: {}", n, e))
                })?;
                args.add(n)
            }
            "double" => args.add(*n as f64),
            _ => args.add(*n),
        },
        Value::String(s) => args.add(s.as_str()),
        Value::Float(n) => args.add(*n),
        Value::Bool(b) => args.add(*b),
        Value::Ints(v) => args.add(v.as_slice()),
        Value::Strings(v) => args.add(v.as_slice()),
        Value::Datetime(dt) => args.add(*dt.inner()),
        Value::Json(v) => args.add(v.clone()),
    }
    .map_err(StoreError::Database)
}

/// Deserialize a PostgreSQL row to an entity.
///
/// Own columns missing from the row (narrowed projections) fall back to serde
/// defaults. Each relation is read from its JSONB column.
pub fn deserialize_row<T: Entity>(
    row: &PgRow,
    relations: &[&'static Relation],
) -> Result<T, StoreError> {
    let mut columns = Map::new();
    for col_name in T::columns() {
        if let Some(value) = extract_column_value(row, col_name)? {
            columns.insert((*col_name).to_string(), value);
        }
    }

    let mut related = Vec::with_capacity(relations.len());
    for relation in relations {
        let column = format!("{}{}", RELATION_PREFIX, relation.name);
        let value = match extract_column_value(row, &column)? {
            Some(JsonValue::Object(obj)) => row_to_json_keys(&(relation.target)(), &obj),
            _ => JsonValue::Null,
        };
        related.push((relation.json_key, value));
    }

    entity_from_columns(&columns, related)
}

/// Extract a column value from a row as JSON; `None` when the row lacks the column.
fn extract_column_value(row: &PgRow, col_name: &str) -> Result<Option<JsonValue>, StoreError> {
    let Some(col) = row.columns().iter().find(|c| c.name() == col_name) else {
        return Ok(None);
    };
    let col_idx = col.ordinal();

    // Handle based on PostgreSQL type
    let value = match col.type_info().name() {
        "BOOL" => row
            .try_get::<Option<bool>, _>(col_idx)
            .map_err(StoreError::database)?
            .map(JsonValue::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(col_idx)
            .map_err(StoreError::database)?
            .map(JsonValue::from),
        "INT4" => row
            .try_get::<Option<i32>, _>(col_idx)
            .map_err(StoreError::database)?
            .map(JsonValue::from),
        "INT8" => row
            .try_get::<Option<i64>, _>(col_idx)
            .map_err(StoreError::database)?
            .map(JsonValue::from),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(col_idx)
            .map_err(StoreError::database)?
            .and_then(|n| serde_json::Number::from_f64(f64::from(n)).map(JsonValue::Number)),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(col_idx)
            .map_err(StoreError::database)?
            .and_then(|n| serde_json::Number::from_f64(n).map(JsonValue::Number)),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(col_idx)
            .map_err(StoreError::database)?
            // Use microsecond precision with Z to match StorageDatetime's serde format
            .map(|dt| JsonValue::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(col_idx)
            .map_err(StoreError::database)?
            .map(|dt| {
                JsonValue::String(
                    dt.and_utc()
                        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                )
            }),
        "JSONB" | "JSON" => row
            .try_get::<Option<JsonValue>, _>(col_idx)
            .map_err(StoreError::database)?,
        _ => {
            // Default: treat as string (VARCHAR, TEXT, CHAR, etc.)
            row.try_get::<Option<String>, _>(col_idx)
                .map_err(StoreError::database)?
                .map(JsonValue::String)
        }
    };

    Ok(value.filter(|v| !v.is_null()))
}
