//! Database-agnostic query types and executor traits.
//!
//! Queries are plain values; executors translate them for a concrete backend
//! (PostgreSQL, the in-memory store used by tests, ...).

use crate::{Entity, StorageDatetime, StoreError};
use async_trait::async_trait;
use std::marker::PhantomData;

/// A value that can be bound to a query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Ints(Vec<i64>),
    Strings(Vec<String>),
    Datetime(StorageDatetime),
    Json(serde_json::Value),
    Null,
}

impl Value {
    /// JSON form of the value, as stored in a row.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Ints(v) => serde_json::Value::from(v.clone()),
            Value::Strings(v) => serde_json::Value::from(v.clone()),
            Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
            Value::Json(v) => v.clone(),
            Value::Null => serde_json::Value::Null,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Ints(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Strings(v)
    }
}

impl From<&[String]> for Value {
    fn from(v: &[String]) -> Self {
        Value::Strings(v.to_vec())
    }
}

impl From<StorageDatetime> for Value {
    fn from(dt: StorageDatetime) -> Self {
        Value::Datetime(dt)
    }
}

impl From<&StorageDatetime> for Value {
    fn from(dt: &StorageDatetime) -> Self {
        Value::Datetime(dt.clone())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Predicates over an entity's columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// field = value
    Eq(String, Value),
    /// field != value
    Ne(String, Value),
    /// field > value
    Gt(String, Value),
    /// field >= value
    Gte(String, Value),
    /// field < value
    Lt(String, Value),
    /// field <= value
    Lte(String, Value),
    /// field IN (values) - for arrays
    In(String, Value),
    /// field NOT IN (values)
    NotIn(String, Value),
    /// field IS NULL
    IsNull(String),
    /// field IS NOT NULL
    IsNotNull(String),
    /// field ILIKE pattern: `%` and `_` are wildcards, `\` escapes the next character.
    ILike(String, String),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// Backend SQL fragment; `?` marks each bound argument in order.
    ///
    /// The fragment is emitted as written. Qualify its columns with the table
    /// name (`vfs_folders.title`): a full fetch of a self-referencing entity
    /// joins the same table again and leaves bare names ambiguous.
    Raw(String, Vec<Value>),
}

impl Condition {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Eq(field.into(), value.into())
    }

    pub fn r#in(field: impl Into<String>, values: impl Into<Value>) -> Self {
        Condition::In(field.into(), values.into())
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Condition::IsNull(field.into())
    }

    /// Case-insensitive substring match. `needle` is matched literally.
    pub fn contains(field: impl Into<String>, needle: &str) -> Self {
        Condition::ILike(field.into(), format!("%{}%", escape_like(needle)))
    }

    pub fn raw(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Condition::Raw(sql.into(), args)
    }
}

/// Escape LIKE wildcards so `text` matches only itself.
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A column plus direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub column: String,
    pub order: Order,
}

impl SortField {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: Order::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: Order::Desc,
        }
    }
}

/// One entry of a projection or write column set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    /// Every column the entity owns.
    All,
    /// A single column of the entity.
    Named(String),
    /// A belongs-to relation, fetched eagerly.
    Relation(&'static str),
}

/// A SELECT query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query<T> {
    /// The table to query.
    pub table: String,
    /// Projection: own columns and eager relations.
    pub columns: Vec<Column>,
    /// Filter conditions, joined with AND.
    pub filters: Vec<Condition>,
    /// Order by clauses.
    pub order_by: Vec<SortField>,
    /// Maximum number of results.
    pub limit: Option<u64>,
    /// Offset for pagination.
    pub offset: Option<u64>,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Query<T> {
    /// Create a new query over the type's own columns.
    pub fn new() -> Self {
        Self {
            table: T::table_name().to_string(),
            columns: vec![Column::All],
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            _marker: PhantomData,
        }
    }

    /// Add a filter condition.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.filters.push(condition);
        self
    }

    /// Add an equality filter (shorthand for Condition::Eq).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Condition::Eq(field.into(), value.into()))
    }

    /// Add an IN filter (shorthand for Condition::In).
    pub fn r#in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(Condition::In(field.into(), values.into()))
    }

    /// Add an order-by clause.
    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by.push(SortField {
            column: field.into(),
            order,
        });
        self
    }

    /// Set the maximum number of results.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset for pagination.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Own columns selected by the projection, in table order.
    ///
    /// A projection naming only relations still selects every own column.
    pub fn selected_columns(&self) -> Vec<&'static str> {
        let named: Vec<&str> = self
            .columns
            .iter()
            .filter_map(|c| match c {
                Column::Named(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        let all = self.columns.contains(&Column::All) || named.is_empty();

        T::columns()
            .iter()
            .copied()
            .filter(|col| all || named.contains(col))
            .collect()
    }

    /// Relations requested by the projection, deduplicated, in request order.
    pub fn relations(&self) -> Vec<&'static str> {
        let mut relations = Vec::new();
        for column in &self.columns {
            match column {
                Column::Relation(name) if !relations.contains(name) => relations.push(*name),
                _ => {}
            }
        }
        relations
    }
}

impl<T: Entity> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One column value written by an INSERT or UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: &'static str,
    /// Generic column type (see [`Entity::column_types`]); used to type NULLs.
    pub column_type: &'static str,
    pub value: Value,
}

/// An INSERT of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert<T> {
    pub table: String,
    pub values: Vec<Assignment>,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Insert<T> {
    pub fn new(values: Vec<Assignment>) -> Self {
        Self {
            table: T::table_name().to_string(),
            values,
            _marker: PhantomData,
        }
    }
}

/// An UPDATE addressed by primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct Update<T> {
    pub table: String,
    /// Columns to SET. May be empty, in which case the statement only matches.
    pub assignments: Vec<Assignment>,
    /// Primary key condition first, then any extra conditions.
    pub filters: Vec<Condition>,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Update<T> {
    pub fn new(assignments: Vec<Assignment>, filters: Vec<Condition>) -> Self {
        Self {
            table: T::table_name().to_string(),
            assignments,
            filters,
            _marker: PhantomData,
        }
    }
}

/// Trait for executing queries against a database backend.
///
/// Implemented by pool types and by transaction handles alike, so a
/// repository does not care which one it holds.
#[async_trait]
pub trait QueryExecutor: Clone + Send + Sync + 'static {
    /// Execute a SELECT query and return results in store order.
    async fn fetch<T: Entity>(&self, query: Query<T>) -> Result<Vec<T>, StoreError>;

    /// Count rows matching the query's filters, ignoring sort and window.
    async fn count<T: Entity>(&self, query: Query<T>) -> Result<u64, StoreError>;

    /// Insert a row and return it as stored (generated id, timestamps).
    async fn insert<T: Entity>(&self, insert: Insert<T>) -> Result<T, StoreError>;

    /// Execute an UPDATE and return the number of rows matched.
    async fn update<T: Entity>(&self, update: Update<T>) -> Result<u64, StoreError>;
}

/// Executors that can open a transaction.
#[async_trait]
pub trait Transactional: QueryExecutor {
    /// The transaction type for this executor.
    type Transaction: TransactionExecutor;

    /// Begin a transaction. The returned executor can be used for queries within the transaction.
    async fn begin_transaction(&self) -> Result<Self::Transaction, StoreError>;
}

/// Trait for executing queries within a transaction.
///
/// Clones share the same transaction; after commit or rollback every clone
/// fails with [`StoreError::TransactionClosed`].
#[async_trait]
pub trait TransactionExecutor: QueryExecutor {
    /// Commit the transaction.
    async fn commit(self) -> Result<(), StoreError>;

    /// Rollback the transaction.
    async fn rollback(self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_matches_wildcards_literally() {
        assert_eq!(
            Condition::contains("title", "50%_off\\"),
            Condition::ILike("title".to_string(), "%50\\%\\_off\\\\%".to_string())
        );
        assert_eq!(escape_like("plain"), "plain");
    }
}
