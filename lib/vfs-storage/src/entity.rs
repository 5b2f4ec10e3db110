//! Entity trait for database-agnostic storage operations.
//!
//! Add `#[derive(Entity)]` with `#[entity(table = "table_name")]` to generate
//! the implementation.

use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value as JsonValue};

use crate::{Assignment, StatusId, StorageDatetime, StoreError, Value};

/// Static description of an entity's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMeta {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub json_keys: &'static [&'static str],
    pub id_column: &'static str,
}

impl TableMeta {
    /// JSON key for a column, if the table has that column.
    pub fn json_key(&self, column: &str) -> Option<&'static str> {
        self.columns
            .iter()
            .position(|c| *c == column)
            .and_then(|idx| self.json_keys.get(idx).copied())
    }
}

/// A belongs-to relation: `local` on this table references `foreign` on the target.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    /// Field name, used in [`crate::Column::Relation`].
    pub name: &'static str,
    /// JSON key the related row is placed under.
    pub json_key: &'static str,
    pub local: &'static str,
    pub foreign: &'static str,
    pub target: fn() -> TableMeta,
}

/// Trait for types that can be stored in a database.
///
/// # Example
///
/// ```text
/// #[derive(Debug, Clone, Default, Serialize, Deserialize, Entity)]
/// #[entity(table = "vfs_folders")]
/// #[serde(rename_all = "camelCase", default)]
/// pub struct VfsFolder {
///     #[id]
///     pub id: i64,
///     pub parent_folder_id: Option<i64>,
///     pub title: String,
///     #[created_at]
///     pub created_at: Option<StorageDatetime>,
///     #[status]
///     pub status_id: StatusId,
///     #[relation(local = "parent_folder_id")]
///     pub parent_folder: Option<Box<VfsFolder>>,
/// }
/// ```
///
/// # Column Naming
///
/// Database columns use snake_case (Rust field names). JSON serialization
/// uses camelCase, so entities carry `#[serde(rename_all = "camelCase")]`.
///
/// Use `#[column(skip)]` to exclude a field from database storage.
/// Use `#[column(name = "custom_name")]` to override the column name.
pub trait Entity:
    Serialize + DeserializeOwned + Default + Clone + Debug + Send + Sync + 'static
{
    /// The database table name for this type.
    fn table_name() -> &'static str;

    /// Column names in order (snake_case for DB).
    fn columns() -> &'static [&'static str];

    /// Column types in order (database-agnostic).
    /// Values: "text", "datetime", "bigint", "integer", "boolean", "double", "json"
    fn column_types() -> &'static [&'static str];

    /// JSON key names in order (camelCase for serde).
    /// Corresponds 1:1 with columns().
    fn json_keys() -> &'static [&'static str];

    /// Belongs-to relations available for eager loading.
    fn relations() -> &'static [Relation];

    fn id_column() -> &'static str;

    fn status_column() -> &'static str;

    /// Store-assigned creation timestamp column; never written by the repository.
    fn created_at_column() -> &'static str;

    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    fn status(&self) -> StatusId;

    fn set_status(&mut self, status: StatusId);

    fn meta() -> TableMeta {
        TableMeta {
            table: Self::table_name(),
            columns: Self::columns(),
            json_keys: Self::json_keys(),
            id_column: Self::id_column(),
        }
    }

    fn relation(name: &str) -> Option<&'static Relation> {
        Self::relations().iter().find(|r| r.name == name)
    }

    fn column_type(column: &str) -> &'static str {
        Self::columns()
            .iter()
            .position(|c| *c == column)
            .and_then(|idx| Self::column_types().get(idx).copied())
            .unwrap_or("text")
    }
}

/// Serialize an entity into per-column assignments, in column order.
///
/// Only the columns accepted by `include` are returned.
pub fn entity_values<T: Entity>(
    item: &T,
    include: impl Fn(&str) -> bool,
) -> Result<Vec<Assignment>, StoreError> {
    let json = serde_json::to_value(item)?;
    let obj = json.as_object().ok_or_else(|| {
        StoreError::StorageError("Expected JSON object for Entity type".to_string())
    })?;

    let mut values = Vec::new();
    for ((&column, &json_key), &column_type) in T::columns()
        .iter()
        .zip(T::json_keys())
        .zip(T::column_types())
    {
        if !include(column) {
            continue;
        }
        let json = obj.get(json_key).cloned().unwrap_or(JsonValue::Null);
        values.push(Assignment {
            column,
            column_type,
            value: json_to_value(json, column_type)?,
        });
    }
    Ok(values)
}

/// Convert a JSON value into a bindable [`Value`] using the column type.
pub fn json_to_value(json: JsonValue, column_type: &str) -> Result<Value, StoreError> {
    let value = match (json, column_type) {
        (JsonValue::Null, _) => Value::Null,
        (json, "json") => Value::Json(json),
        (JsonValue::String(s), "datetime") => Value::Datetime(
            StorageDatetime::parse(&s)
                .map_err(|e| StoreError::StorageError(format!("Invalid datetime: {}", e)))?,
        ),
        (JsonValue::Bool(b), _) => Value::Bool(b),
        (JsonValue::Number(n), _) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::String(n.to_string())
            }
        }
        (JsonValue::String(s), _) => Value::String(s),
        (json, _) => Value::Json(json),
    };
    Ok(value)
}

/// Rebuild an entity from a row keyed by column name.
///
/// Null and missing columns are left out so serde defaults apply; `related`
/// entries are placed under their JSON keys as-is.
pub fn entity_from_columns<T: Entity>(
    row: &Map<String, JsonValue>,
    related: Vec<(&'static str, JsonValue)>,
) -> Result<T, StoreError> {
    let mut obj = Map::new();
    for (column, json_key) in T::columns().iter().zip(T::json_keys()) {
        match row.get(*column) {
            Some(value) if !value.is_null() => {
                obj.insert((*json_key).to_string(), value.clone());
            }
            _ => {}
        }
    }
    for (json_key, value) in related {
        if !value.is_null() {
            obj.insert(json_key.to_string(), value);
        }
    }

    serde_json::from_value(JsonValue::Object(obj))
        .map_err(|e| StoreError::StorageError(format!("Deserialization error: {}", e)))
}

/// Re-key a row of `meta`'s table from column names to JSON keys.
pub fn row_to_json_keys(meta: &TableMeta, row: &Map<String, JsonValue>) -> JsonValue {
    let mut obj = Map::new();
    for (column, json_key) in meta.columns.iter().zip(meta.json_keys) {
        match row.get(*column) {
            Some(value) if !value.is_null() => {
                obj.insert((*json_key).to_string(), value.clone());
            }
            _ => {}
        }
    }
    JsonValue::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VfsFolder;

    #[test]
    fn values_follow_column_order_and_types() {
        let folder = VfsFolder {
            id: 7,
            parent_folder_id: None,
            title: "docs".to_string(),
            status_id: StatusId::Disabled,
            ..Default::default()
        };

        let values = entity_values(&folder, |c| c != "created_at").unwrap();
        let columns: Vec<_> = values.iter().map(|a| a.column).collect();
        assert_eq!(
            columns,
            vec!["id", "parent_folder_id", "title", "is_favorite", "status_id"]
        );
        assert_eq!(values[0].value, Value::Int(7));
        assert_eq!(values[1].value, Value::Null);
        assert_eq!(values[1].column_type, "bigint");
        assert_eq!(values[4].value, Value::Int(2));
        assert_eq!(values[4].column_type, "integer");
    }

    #[test]
    fn datetime_columns_parse() {
        let value = json_to_value(
            JsonValue::String("2024-01-02T03:04:05.000006Z".to_string()),
            "datetime",
        )
        .unwrap();
        assert!(matches!(value, Value::Datetime(_)));
    }

    #[test]
    fn rebuilds_entity_from_column_row() {
        let mut row = Map::new();
        row.insert("id".to_string(), JsonValue::from(3));
        row.insert("parent_folder_id".to_string(), JsonValue::from(1));
        row.insert("title".to_string(), JsonValue::from("music"));
        row.insert("status_id".to_string(), JsonValue::from(2));
        row.insert("created_at".to_string(), JsonValue::Null);

        let folder: VfsFolder = entity_from_columns(&row, Vec::new()).unwrap();
        assert_eq!(folder.id, 3);
        assert_eq!(folder.parent_folder_id, Some(1));
        assert_eq!(folder.status_id, StatusId::Disabled);
        assert!(folder.created_at.is_none());
        assert!(!folder.is_favorite);
    }
}
