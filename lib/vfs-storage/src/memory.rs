//! In-memory executor.
//!
//! Rows are JSON objects keyed by column name. The store emulates the column
//! defaults a relational schema would supply: a per-table id sequence, a
//! status defaulting to enabled and a strictly increasing creation timestamp.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::{
    Assignment, Condition, Entity, Insert, Order, Query, QueryExecutor, SortField, StatusId,
    StorageDatetime, StoreError, TransactionExecutor, Transactional, Update, Value,
    entity_from_columns, row_to_json_keys,
};

type Row = Map<String, JsonValue>;

/// Failures raised by the in-memory store itself.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("duplicate key value violates unique constraint \"{table}_pkey\": id={id}")]
    DuplicateKey { table: String, id: i64 },

    #[error("injected failure: {0}")]
    Injected(String),
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    tables: HashMap<String, Table>,
    last_created_at: Option<StorageDatetime>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    failure: Mutex<Option<String>>,
}

/// Executor keeping every table in memory.
///
/// Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy that waits `latency` before every statement.
    pub fn with_latency(&self, latency: Duration) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            latency: Some(latency),
        }
    }

    /// Make the next statement, on this store or any of its transactions, fail.
    pub async fn fail_next(&self, message: impl Into<String>) {
        *self.shared.failure.lock().await = Some(message.into());
    }

    /// Every stored row of `table`, keyed by column name, in insertion order.
    pub async fn rows(&self, table: &str) -> Vec<Map<String, JsonValue>> {
        self.shared
            .tables
            .read()
            .await
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    async fn prepare(&self) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.shared.failure.lock().await.take() {
            Some(message) => Err(StoreError::database(MemoryError::Injected(message))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl QueryExecutor for MemoryStore {
    async fn fetch<T: Entity>(&self, query: Query<T>) -> Result<Vec<T>, StoreError> {
        self.prepare().await?;
        self.shared.tables.read().await.fetch(&query)
    }

    async fn count<T: Entity>(&self, query: Query<T>) -> Result<u64, StoreError> {
        self.prepare().await?;
        self.shared.tables.read().await.count(&query)
    }

    async fn insert<T: Entity>(&self, insert: Insert<T>) -> Result<T, StoreError> {
        self.prepare().await?;
        let mut live = self.shared.tables.write().await;
        let row = new_row(&insert, &mut live, None)?;
        let stored = entity_from_columns(&row, Vec::new())?;
        live.push(&insert.table, row);
        Ok(stored)
    }

    async fn update<T: Entity>(&self, update: Update<T>) -> Result<u64, StoreError> {
        self.prepare().await?;
        self.shared
            .tables
            .write()
            .await
            .update(&update.table, &update.filters, &update.assignments)
    }
}

#[async_trait]
impl Transactional for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin_transaction(&self) -> Result<Self::Transaction, StoreError> {
        let snapshot = self.shared.tables.read().await.clone();
        Ok(MemoryTransaction {
            store: self.clone(),
            working: Arc::new(Mutex::new(Some(Pending {
                snapshot,
                changes: Vec::new(),
            }))),
        })
    }
}

/// A write made inside a transaction, replayed onto the live tables at commit.
#[derive(Debug, Clone)]
enum Change {
    Insert {
        table: String,
        id_column: &'static str,
        row: Row,
    },
    Update {
        table: String,
        filters: Vec<Condition>,
        assignments: Vec<Assignment>,
    },
}

#[derive(Debug)]
struct Pending {
    snapshot: Tables,
    changes: Vec<Change>,
}

/// A transaction over a [`MemoryStore`].
///
/// Statements run against a private snapshot taken at begin and are recorded.
/// Commit replays the recorded writes onto the live tables in one step, so
/// rows written outside the transaction meanwhile are kept; rollback discards
/// them. Ids and creation timestamps come from the live sequences, as
/// database sequences do, so they never collide with outside writes and a
/// rollback leaves gaps.
#[derive(Debug, Clone)]
pub struct MemoryTransaction {
    store: MemoryStore,
    working: Arc<Mutex<Option<Pending>>>,
}

#[async_trait]
impl QueryExecutor for MemoryTransaction {
    async fn fetch<T: Entity>(&self, query: Query<T>) -> Result<Vec<T>, StoreError> {
        self.store.prepare().await?;
        let guard = self.working.lock().await;
        guard
            .as_ref()
            .ok_or(StoreError::TransactionClosed)?
            .snapshot
            .fetch(&query)
    }

    async fn count<T: Entity>(&self, query: Query<T>) -> Result<u64, StoreError> {
        self.store.prepare().await?;
        let guard = self.working.lock().await;
        guard
            .as_ref()
            .ok_or(StoreError::TransactionClosed)?
            .snapshot
            .count(&query)
    }

    async fn insert<T: Entity>(&self, insert: Insert<T>) -> Result<T, StoreError> {
        self.store.prepare().await?;
        let mut guard = self.working.lock().await;
        let pending = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        let row = {
            let mut live = self.store.shared.tables.write().await;
            new_row(&insert, &mut live, Some(&pending.snapshot))?
        };
        let stored = entity_from_columns(&row, Vec::new())?;
        pending.snapshot.push(&insert.table, row.clone());
        pending.changes.push(Change::Insert {
            table: insert.table,
            id_column: T::id_column(),
            row,
        });
        Ok(stored)
    }

    async fn update<T: Entity>(&self, update: Update<T>) -> Result<u64, StoreError> {
        self.store.prepare().await?;
        let mut guard = self.working.lock().await;
        let pending = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        let affected = pending
            .snapshot
            .update(&update.table, &update.filters, &update.assignments)?;
        pending.changes.push(Change::Update {
            table: update.table,
            filters: update.filters,
            assignments: update.assignments,
        });
        Ok(affected)
    }
}

#[async_trait]
impl TransactionExecutor for MemoryTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        let pending = self
            .working
            .lock()
            .await
            .take()
            .ok_or(StoreError::TransactionClosed)?;

        let mut live = self.store.shared.tables.write().await;
        let mut published = live.clone();
        for change in pending.changes {
            match change {
                Change::Insert {
                    table,
                    id_column,
                    row,
                } => {
                    let id = row.get(id_column).and_then(JsonValue::as_i64).unwrap_or(0);
                    if published.has_id(&table, id_column, id) {
                        return Err(StoreError::database(MemoryError::DuplicateKey { table, id }));
                    }
                    published.push(&table, row);
                }
                Change::Update {
                    table,
                    filters,
                    assignments,
                } => {
                    published.update(&table, &filters, &assignments)?;
                }
            }
        }
        *live = published;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.working
            .lock()
            .await
            .take()
            .ok_or(StoreError::TransactionClosed)?;
        Ok(())
    }
}

impl Tables {
    fn rows(&self, table: &str) -> &[Row] {
        self.tables
            .get(table)
            .map(|t| t.rows.as_slice())
            .unwrap_or_default()
    }

    fn matching<'a, T>(&'a self, query: &Query<T>) -> Result<Vec<&'a Row>, StoreError> {
        let mut matched = Vec::new();
        for row in self.rows(&query.table) {
            if all(row, &query.filters)? {
                matched.push(row);
            }
        }
        Ok(matched)
    }

    fn fetch<T: Entity>(&self, query: &Query<T>) -> Result<Vec<T>, StoreError> {
        let mut rows = self.matching(query)?;
        rows.sort_by(|a, b| compare_rows(a, b, &query.order_by));

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        let selected = query.selected_columns();

        let mut relations = Vec::new();
        for name in query.relations() {
            let relation = T::relation(name).ok_or_else(|| {
                StoreError::Unsupported(format!("{} has no relation {}", query.table, name))
            })?;
            relations.push(relation);
        }

        rows.into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| {
                let projected: Row = selected
                    .iter()
                    .filter_map(|col| row.get(*col).map(|v| (col.to_string(), v.clone())))
                    .collect();

                let related = relations
                    .iter()
                    .map(|relation| {
                        let target = (relation.target)();
                        let value = row
                            .get(relation.local)
                            .filter(|v| !v.is_null())
                            .and_then(|key| {
                                self.rows(target.table)
                                    .iter()
                                    .find(|r| r.get(relation.foreign) == Some(key))
                            })
                            .map(|r| row_to_json_keys(&target, r))
                            .unwrap_or(JsonValue::Null);
                        (relation.json_key, value)
                    })
                    .collect();

                entity_from_columns(&projected, related)
            })
            .collect()
    }

    fn count<T>(&self, query: &Query<T>) -> Result<u64, StoreError> {
        Ok(self.matching(query)?.len() as u64)
    }

    fn has_id(&self, table: &str, id_column: &str, id: i64) -> bool {
        self.rows(table)
            .iter()
            .any(|r| r.get(id_column).and_then(JsonValue::as_i64) == Some(id))
    }

    /// Next id and creation timestamp for a row of `table`. An explicit id
    /// only moves the sequence past it.
    fn allocate(&mut self, table: &str, explicit: Option<i64>) -> (i64, StorageDatetime) {
        let created_at = StorageDatetime::now_after(self.last_created_at.as_ref());
        self.last_created_at = Some(created_at.clone());

        let sequence = self.tables.entry(table.to_string()).or_default();
        let id = explicit.unwrap_or_else(|| sequence.next_id.max(1));
        sequence.next_id = sequence.next_id.max(id + 1);
        (id, created_at)
    }

    fn push(&mut self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().rows.push(row);
    }

    fn update(
        &mut self,
        table: &str,
        filters: &[Condition],
        assignments: &[Assignment],
    ) -> Result<u64, StoreError> {
        let Some(table) = self.tables.get_mut(table) else {
            return Ok(0);
        };

        let mut affected = 0;
        for row in table.rows.iter_mut() {
            if !all(row, filters)? {
                continue;
            }
            for assignment in assignments {
                row.insert(assignment.column.to_string(), assignment.value.to_json());
            }
            affected += 1;
        }
        Ok(affected)
    }
}

/// Build the stored row for `insert`, filling the store-side defaults.
///
/// Ids and timestamps come from `live`; an explicit id must be free both
/// there and in `visible`, the caller's transaction snapshot.
fn new_row<T: Entity>(
    insert: &Insert<T>,
    live: &mut Tables,
    visible: Option<&Tables>,
) -> Result<Row, StoreError> {
    let mut row: Row = T::columns()
        .iter()
        .map(|col| (col.to_string(), JsonValue::Null))
        .collect();
    for assignment in &insert.values {
        row.insert(assignment.column.to_string(), assignment.value.to_json());
    }

    let id_column = T::id_column();
    let explicit = row.get(id_column).and_then(JsonValue::as_i64);
    if let Some(id) = explicit {
        let taken = live.has_id(&insert.table, id_column, id)
            || visible.is_some_and(|tables| tables.has_id(&insert.table, id_column, id));
        if taken {
            return Err(StoreError::database(MemoryError::DuplicateKey {
                table: insert.table.clone(),
                id,
            }));
        }
    }

    let (id, created_at) = live.allocate(&insert.table, explicit);
    row.insert(id_column.to_string(), JsonValue::from(id));

    let status_column = T::status_column();
    if row.get(status_column).is_none_or(JsonValue::is_null) {
        row.insert(
            status_column.to_string(),
            JsonValue::from(StatusId::Enabled.as_i32()),
        );
    }
    row.insert(
        T::created_at_column().to_string(),
        JsonValue::String(created_at.to_string()),
    );
    Ok(row)
}

fn all(row: &Row, conditions: &[Condition]) -> Result<bool, StoreError> {
    for condition in conditions {
        if !eval(row, condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval(row: &Row, condition: &Condition) -> Result<bool, StoreError> {
    let field = |name: &str| row.get(name).filter(|v| !v.is_null());

    let result = match condition {
        Condition::Eq(col, Value::Null) => field(col).is_none(),
        Condition::Ne(col, Value::Null) => field(col).is_some(),
        Condition::Eq(col, value) => cmp(field(col), &value.to_json()) == Some(Ordering::Equal),
        Condition::Ne(col, value) => {
            matches!(cmp(field(col), &value.to_json()), Some(o) if o != Ordering::Equal)
        }
        Condition::Gt(col, value) => cmp(field(col), &value.to_json()) == Some(Ordering::Greater),
        Condition::Gte(col, value) => matches!(
            cmp(field(col), &value.to_json()),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Condition::Lt(col, value) => cmp(field(col), &value.to_json()) == Some(Ordering::Less),
        Condition::Lte(col, value) => matches!(
            cmp(field(col), &value.to_json()),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Condition::In(col, values) => field(col).is_some() && contains(field(col), &values.to_json()),
        Condition::NotIn(col, values) => {
            field(col).is_some() && !contains(field(col), &values.to_json())
        }
        Condition::IsNull(col) => field(col).is_none(),
        Condition::IsNotNull(col) => field(col).is_some(),
        Condition::ILike(col, pattern) => match field(col) {
            Some(JsonValue::String(s)) => like(&pattern.to_lowercase(), &s.to_lowercase()),
            _ => false,
        },
        Condition::And(conditions) => all(row, conditions)?,
        Condition::Or(conditions) => {
            let mut any = false;
            for condition in conditions {
                if eval(row, condition)? {
                    any = true;
                    break;
                }
            }
            any
        }
        Condition::Not(condition) => !eval(row, condition)?,
        Condition::Raw(sql, _) => {
            return Err(StoreError::Unsupported(format!(
                "raw SQL conditions are not supported in memory: {}",
                sql
            )));
        }
    };
    Ok(result)
}

/// SQL-style comparison: anything involving NULL is unknown.
fn cmp(left: Option<&JsonValue>, right: &JsonValue) -> Option<Ordering> {
    let left = left?;
    match (left, right) {
        (JsonValue::Null, _) | (_, JsonValue::Null) => None,
        (JsonValue::Number(a), JsonValue::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => Some(a.cmp(b)),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn contains(value: Option<&JsonValue>, list: &JsonValue) -> bool {
    match list {
        JsonValue::Array(items) => items
            .iter()
            .any(|item| cmp(value, item) == Some(Ordering::Equal)),
        single => cmp(value, single) == Some(Ordering::Equal),
    }
}

enum LikeToken {
    Any,
    One,
    Literal(char),
}

/// `%` matches any run of characters, `_` exactly one; `\` makes the next
/// character literal.
fn like(pattern: &str, text: &str) -> bool {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            c => LikeToken::Literal(c),
        });
    }
    let text: Vec<char> = text.chars().collect();

    // matched[j]: tokens so far match text[..j]
    let mut matched = vec![false; text.len() + 1];
    matched[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            LikeToken::Any => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= matched[j];
                    next[j] = seen;
                }
            }
            LikeToken::One => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1];
                }
            }
            LikeToken::Literal(c) => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1] && text[j - 1] == *c;
                }
            }
        }
        matched = next;
    }
    matched[text.len()]
}

/// NULLs sort as larger than any value, as PostgreSQL does.
fn compare_rows(a: &Row, b: &Row, order_by: &[SortField]) -> Ordering {
    for sort in order_by {
        let left = a.get(&sort.column).filter(|v| !v.is_null());
        let right = b.get(&sort.column).filter(|v| !v.is_null());
        let ordering = match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(l), Some(r)) => cmp(Some(l), r).unwrap_or(Ordering::Equal),
        };
        let ordering = match sort.order {
            Order::Asc => ordering,
            Order::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Column, Pager, Search, VfsFolder, VfsFolderSearch, build, build_insert};

    fn folder(title: &str, parent: Option<i64>) -> VfsFolder {
        VfsFolder {
            title: title.to_string(),
            parent_folder_id: parent,
            ..Default::default()
        }
    }

    async fn seed(store: &MemoryStore, folders: &[VfsFolder]) -> Vec<VfsFolder> {
        let mut stored = Vec::new();
        for f in folders {
            stored.push(store.insert(build_insert(f, &[]).unwrap()).await.unwrap());
        }
        stored
    }

    fn query<S: Search>(search: &S, sort: &[SortField], pager: Pager) -> Query<VfsFolder> {
        build(search, &[], sort, pager, &[])
    }

    #[test]
    fn like_patterns() {
        assert!(like("%doc%", "my documents"));
        assert!(like("a_c", "abc"));
        assert!(!like("a_c", "abbc"));
        assert!(like("%", ""));
        assert!(!like("abc", "ab"));
    }

    #[test]
    fn escaped_wildcards_are_literal() {
        assert!(like("%50\\%%", "50% off"));
        assert!(!like("%50\\%%", "500 items"));
        assert!(like("a\\_c", "a_c"));
        assert!(!like("a\\_c", "abc"));
        assert!(like("c:\\\\%", "c:\\temp"));
    }

    #[tokio::test]
    async fn title_search_treats_wildcards_as_text() {
        let store = MemoryStore::new();
        seed(&store, &[folder("50% off", None), folder("500 items", None)]).await;

        let search = VfsFolderSearch {
            title: Some("50%".to_string()),
            ..Default::default()
        };
        let rows = store
            .fetch(query(&search, &[], Pager::unbounded()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "50% off");
    }

    #[tokio::test]
    async fn assigns_ids_status_and_increasing_timestamps() {
        let store = MemoryStore::new();
        let stored = seed(&store, &[folder("a", None), folder("b", None)]).await;

        assert_eq!(stored[0].id, 1);
        assert_eq!(stored[1].id, 2);
        assert_eq!(stored[0].status_id, StatusId::Enabled);
        assert!(stored[1].created_at > stored[0].created_at);
    }

    #[tokio::test]
    async fn explicit_ids_bump_the_sequence_and_must_be_unique() {
        let store = MemoryStore::new();
        let mut first = folder("a", None);
        first.id = 5;
        seed(&store, &[first.clone()]).await;

        let next = seed(&store, &[folder("b", None)]).await;
        assert_eq!(next[0].id, 6);

        let err = store
            .insert(build_insert(&first, &[]).unwrap())
            .await
            .unwrap_err();
        let StoreError::Database(inner) = err else {
            panic!("expected database error");
        };
        assert!(matches!(
            inner.downcast_ref::<MemoryError>(),
            Some(MemoryError::DuplicateKey { id: 5, .. })
        ));
    }

    #[tokio::test]
    async fn nulls_sort_last_ascending() {
        let store = MemoryStore::new();
        seed(
            &store,
            &[folder("root", None), folder("x", Some(1)), folder("y", None)],
        )
        .await;

        let rows = store
            .fetch(query(
                &VfsFolderSearch::default(),
                &[SortField::asc("parent_folder_id"), SortField::asc("id")],
                Pager::unbounded(),
            ))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn title_search_is_case_insensitive() {
        let store = MemoryStore::new();
        seed(&store, &[folder("Holiday Photos", None), folder("music", None)]).await;

        let search = VfsFolderSearch {
            title: Some("PHOTO".to_string()),
            ..Default::default()
        };
        let rows = store
            .fetch(query(&search, &[], Pager::unbounded()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Holiday Photos");
    }

    #[tokio::test]
    async fn loads_relations() {
        let store = MemoryStore::new();
        seed(&store, &[folder("root", None), folder("child", Some(1))]).await;

        let mut query = query(&VfsFolderSearch::default(), &[SortField::asc("id")], Pager::unbounded());
        query.columns.push(Column::Relation("parent_folder"));
        let rows = store.fetch(query).await.unwrap();

        assert!(rows[0].parent_folder.is_none());
        let parent = rows[1].parent_folder.as_ref().unwrap();
        assert_eq!(parent.id, 1);
        assert_eq!(parent.title, "root");
    }

    #[tokio::test]
    async fn raw_conditions_are_rejected() {
        let store = MemoryStore::new();
        let query = query(&VfsFolderSearch::default(), &[], Pager::unbounded())
            .filter(Condition::raw("length(title) > ?", vec![Value::Int(3)]));
        let err = store.fetch(query).await.unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }

    #[tokio::test]
    async fn rollback_discards_and_commit_publishes() {
        let store = MemoryStore::new();

        let tx = store.begin_transaction().await.unwrap();
        tx.insert(build_insert(&folder("discarded", None), &[]).unwrap())
            .await
            .unwrap();
        tx.clone().rollback().await.unwrap();
        assert!(store.rows("vfs_folders").await.is_empty());
        assert!(matches!(
            tx.count(query(&VfsFolderSearch::default(), &[], Pager::unbounded()))
                .await,
            Err(StoreError::TransactionClosed)
        ));

        let tx = store.begin_transaction().await.unwrap();
        tx.insert(build_insert(&folder("kept", None), &[]).unwrap())
            .await
            .unwrap();
        assert!(store.rows("vfs_folders").await.is_empty());
        tx.commit().await.unwrap();
        assert_eq!(store.rows("vfs_folders").await.len(), 1);
    }

    #[tokio::test]
    async fn transaction_ids_come_from_the_live_sequence() {
        let store = MemoryStore::new();
        let tx = store.begin_transaction().await.unwrap();

        let inside = tx
            .insert(build_insert(&folder("inside", None), &[]).unwrap())
            .await
            .unwrap();
        let outside = seed(&store, &[folder("outside", None)]).await;
        assert_eq!(inside.id, 1);
        assert_eq!(outside[0].id, 2);
        assert!(outside[0].created_at > inside.created_at);

        tx.clone().rollback().await.unwrap();
        let after = seed(&store, &[folder("after", None)]).await;
        assert_eq!(after[0].id, 3);
    }

    #[tokio::test]
    async fn commit_rejects_a_key_taken_outside() {
        let store = MemoryStore::new();
        let mut claimed = folder("claimed", None);
        claimed.id = 7;

        let tx = store.begin_transaction().await.unwrap();
        tx.insert(build_insert(&claimed, &[]).unwrap())
            .await
            .unwrap();
        seed(&store, &[claimed.clone()]).await;

        let err = tx.commit().await.unwrap_err();
        let StoreError::Database(inner) = err else {
            panic!("expected database error");
        };
        assert!(matches!(
            inner.downcast_ref::<MemoryError>(),
            Some(MemoryError::DuplicateKey { id: 7, .. })
        ));
        assert_eq!(store.rows("vfs_folders").await.len(), 1);
    }

    #[tokio::test]
    async fn injected_failure_hits_one_statement() {
        let store = MemoryStore::new();
        store.fail_next("connection reset").await;

        let q = || query(&VfsFolderSearch::default(), &[], Pager::unbounded());
        assert!(matches!(
            store.count(q()).await,
            Err(StoreError::Database(_))
        ));
        assert_eq!(store.count(q()).await.unwrap(), 0);
    }
}
