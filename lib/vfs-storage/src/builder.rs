//! Query composition: base filters, search criteria, sort, pager and ops.
//!
//! [`build`] applies its inputs in a fixed order so that callers can reason
//! about overrides:
//!
//! 1. the entity's own columns
//! 2. base filters (AND)
//! 3. one predicate per present search field
//! 4. default sort
//! 5. pager
//! 6. ops, in call order; later ops win for columns, sort and pager

use std::borrow::Cow;

use crate::{
    Column, Condition, Entity, Insert, Query, SortField, StatusId, StoreError, Update,
    entity_values,
};

/// A named predicate bound to one entity's columns.
///
/// Filters are values; sets of them are only ever extended by copying.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub name: Cow<'static, str>,
    pub condition: Condition,
}

impl Filter {
    pub fn new(name: impl Into<Cow<'static, str>>, condition: Condition) -> Self {
        Self {
            name: name.into(),
            condition,
        }
    }

    /// `status = enabled`.
    pub fn status_enabled(status_column: &str) -> Self {
        Self::new(
            "status_enabled",
            Condition::eq(status_column, StatusId::Enabled),
        )
    }

    /// `status != deleted`.
    pub fn not_deleted(status_column: &str) -> Self {
        Self::new(
            "not_deleted",
            Condition::Ne(status_column.to_string(), StatusId::Deleted.into()),
        )
    }
}

/// An offset/limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    pub offset: u64,
    /// `None` means unbounded.
    pub limit: Option<u64>,
}

impl Pager {
    /// Enough rows to tell zero, one and many apart.
    pub const AT_MOST_TWO: Pager = Pager {
        offset: 0,
        limit: Some(2),
    };

    /// Used for counts, where no rows are materialized and the window is ignored.
    pub const COUNT_ONLY: Pager = Pager {
        offset: 0,
        limit: Some(1),
    };

    pub const fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    pub const fn unbounded() -> Self {
        Self {
            offset: 0,
            limit: None,
        }
    }

    /// 1-based page of `page_size` rows. Page 0 is treated as page 1; an
    /// offset past `u64::MAX` saturates, which yields an empty page.
    pub const fn page(page: u64, page_size: u64) -> Self {
        let page = if page == 0 { 1 } else { page };
        Self {
            offset: (page - 1).saturating_mul(page_size),
            limit: Some(page_size),
        }
    }

    fn apply<T>(&self, query: &mut Query<T>) {
        query.offset = if self.offset > 0 {
            Some(self.offset)
        } else {
            None
        };
        query.limit = self.limit;
    }
}

impl Default for Pager {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// A deferred query mutation, applied after the defaults in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Replace the projection. On writes, named columns restrict the written set.
    Columns(Vec<Column>),
    /// Add one eager relation to the projection.
    Relation(&'static str),
    /// Replace the sort order.
    Sort(Vec<SortField>),
    /// Replace the window.
    Pager(Pager),
    /// Add a predicate (AND). On updates it narrows the matched rows.
    Where(Condition),
}

impl Op {
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Op::Columns(
            columns
                .into_iter()
                .map(|c| Column::Named(c.into()))
                .collect(),
        )
    }

    fn apply<T>(&self, query: &mut Query<T>) {
        match self {
            Op::Columns(columns) => query.columns = columns.clone(),
            Op::Relation(name) => query.columns.push(Column::Relation(*name)),
            Op::Sort(sort) => query.order_by = sort.clone(),
            Op::Pager(pager) => pager.apply(query),
            Op::Where(condition) => query.filters.push(condition.clone()),
        }
    }
}

/// Per-entity search criteria. Every present field contributes one filter.
pub trait Search: Clone + Default + Send + Sync {
    fn filters(&self) -> Vec<Filter>;
}

/// Build a SELECT for `T`.
pub fn build<T: Entity, S: Search>(
    search: &S,
    base_filters: &[Filter],
    sort: &[SortField],
    pager: Pager,
    ops: &[Op],
) -> Query<T> {
    let mut query = Query::<T>::new();

    for filter in base_filters {
        query.filters.push(filter.condition.clone());
    }
    for filter in search.filters() {
        query.filters.push(filter.condition);
    }

    query.order_by = sort.to_vec();
    pager.apply(&mut query);

    for op in ops {
        op.apply(&mut query);
    }

    query
}

/// Named columns restricted by the last `Op::Columns`, if any.
fn restricted_columns(ops: &[Op]) -> Option<Vec<String>> {
    let columns = ops.iter().rev().find_map(|op| match op {
        Op::Columns(columns) => Some(columns),
        _ => None,
    })?;
    if columns.contains(&Column::All) {
        return None;
    }
    let named: Vec<String> = columns
        .iter()
        .filter_map(|c| match c {
            Column::Named(name) => Some(name.clone()),
            _ => None,
        })
        .collect();
    if named.is_empty() { None } else { Some(named) }
}

/// Build an INSERT for `item`. The creation timestamp is never written; the
/// id is left to the store when it is 0.
pub fn build_insert<T: Entity>(item: &T, ops: &[Op]) -> Result<Insert<T>, StoreError> {
    let restricted = restricted_columns(ops);
    let created_at = T::created_at_column();
    let id_column = T::id_column();
    let generate_id = item.id() == 0;

    let values = entity_values(item, |column| {
        if column == created_at || (generate_id && column == id_column) {
            return false;
        }
        match &restricted {
            Some(columns) => column == id_column || columns.iter().any(|c| c == column),
            None => true,
        }
    })?;

    Ok(Insert::new(values))
}

/// Build an UPDATE of `item` by primary key. Neither the id nor the creation
/// timestamp is ever written.
pub fn build_update<T: Entity>(item: &T, ops: &[Op]) -> Result<Update<T>, StoreError> {
    let restricted = restricted_columns(ops);
    let created_at = T::created_at_column();
    let id_column = T::id_column();

    let assignments = entity_values(item, |column| {
        if column == created_at || column == id_column {
            return false;
        }
        match &restricted {
            Some(columns) => columns.iter().any(|c| c == column),
            None => true,
        }
    })?;

    let mut filters = vec![Condition::eq(id_column, item.id())];
    for op in ops {
        if let Op::Where(condition) = op {
            filters.push(condition.clone());
        }
    }

    Ok(Update::new(assignments, filters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Order, StorageDatetime, Value, VfsFolder, VfsFolderSearch};

    fn base() -> Vec<Filter> {
        vec![Filter::not_deleted("status_id")]
    }

    fn sort() -> Vec<SortField> {
        vec![SortField::desc("created_at")]
    }

    #[test]
    fn applies_steps_in_order() {
        let search = VfsFolderSearch {
            parent_folder_id: Some(1),
            ..Default::default()
        };
        let query: Query<VfsFolder> = build(&search, &base(), &sort(), Pager::new(10, 5), &[]);

        assert_eq!(query.table, "vfs_folders");
        assert_eq!(query.columns, vec![Column::All]);
        assert_eq!(
            query.filters,
            vec![
                Condition::Ne("status_id".to_string(), Value::Int(3)),
                Condition::Eq("parent_folder_id".to_string(), Value::Int(1)),
            ]
        );
        assert_eq!(query.order_by, sort());
        assert_eq!(query.offset, Some(10));
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn empty_search_adds_nothing() {
        let query: Query<VfsFolder> = build(
            &VfsFolderSearch::default(),
            &[],
            &[],
            Pager::unbounded(),
            &[],
        );
        assert!(query.filters.is_empty());
        assert!(query.order_by.is_empty());
        assert_eq!(query.limit, None);
        assert_eq!(query.offset, None);
    }

    #[test]
    fn later_ops_win() {
        let ops = [
            Op::Sort(vec![SortField::asc("title")]),
            Op::Pager(Pager::new(0, 50)),
            Op::Sort(vec![SortField::asc("id")]),
            Op::Where(Condition::eq("is_favorite", true)),
            Op::Pager(Pager::page(3, 20)),
        ];
        let query: Query<VfsFolder> = build(
            &VfsFolderSearch::default(),
            &base(),
            &sort(),
            Pager::AT_MOST_TWO,
            &ops,
        );

        assert_eq!(
            query.order_by,
            vec![SortField {
                column: "id".to_string(),
                order: Order::Asc
            }]
        );
        assert_eq!(query.offset, Some(40));
        assert_eq!(query.limit, Some(20));
        assert_eq!(query.filters.len(), 2);
        assert_eq!(
            query.filters[1],
            Condition::Eq("is_favorite".to_string(), Value::Bool(true))
        );
    }

    #[test]
    fn huge_page_numbers_saturate() {
        let pager = Pager::page(u64::MAX / 2, 10);
        assert_eq!(pager.offset, u64::MAX);
        assert_eq!(pager.limit, Some(10));

        assert_eq!(Pager::page(0, 25), Pager::page(1, 25));
        assert_eq!(Pager::page(u64::MAX, 0).offset, 0);
    }

    #[test]
    fn build_is_deterministic() {
        let search = VfsFolderSearch {
            title: Some("a".to_string()),
            status_ids: Some(vec![StatusId::Enabled, StatusId::Disabled]),
            ..Default::default()
        };
        let ops = [Op::Relation("parent_folder")];
        let first: Query<VfsFolder> = build(&search, &base(), &sort(), Pager::new(1, 2), &ops);
        let second: Query<VfsFolder> = build(&search, &base(), &sort(), Pager::new(1, 2), &ops);
        assert_eq!(first, second);
        assert_eq!(first.relations(), vec!["parent_folder"]);
    }

    #[test]
    fn insert_never_writes_created_at() {
        let folder = VfsFolder {
            title: "new".to_string(),
            created_at: Some(StorageDatetime::now()),
            ..Default::default()
        };
        let ops = [Op::columns(["title", "created_at"])];

        let insert = build_insert(&folder, &[]).unwrap();
        let columns: Vec<_> = insert.values.iter().map(|a| a.column).collect();
        assert_eq!(
            columns,
            vec!["parent_folder_id", "title", "is_favorite", "status_id"]
        );

        let insert = build_insert(&folder, &ops).unwrap();
        let columns: Vec<_> = insert.values.iter().map(|a| a.column).collect();
        assert_eq!(columns, vec!["title"]);
    }

    #[test]
    fn insert_keeps_explicit_id() {
        let folder = VfsFolder {
            id: 9,
            ..Default::default()
        };
        let insert = build_insert(&folder, &[]).unwrap();
        assert_eq!(insert.values[0].column, "id");
        assert_eq!(insert.values[0].value, Value::Int(9));
    }

    #[test]
    fn update_restricts_columns_and_keys_by_id() {
        let folder = VfsFolder {
            id: 4,
            status_id: StatusId::Deleted,
            created_at: Some(StorageDatetime::now()),
            ..Default::default()
        };

        let update = build_update(&folder, &[Op::columns(["status_id", "created_at"])]).unwrap();
        assert_eq!(update.assignments.len(), 1);
        assert_eq!(update.assignments[0].column, "status_id");
        assert_eq!(update.assignments[0].value, Value::Int(3));
        assert_eq!(update.filters, vec![Condition::eq("id", 4_i64)]);

        let update = build_update(&folder, &[]).unwrap();
        let columns: Vec<_> = update.assignments.iter().map(|a| a.column).collect();
        assert_eq!(
            columns,
            vec!["parent_folder_id", "title", "is_favorite", "status_id"]
        );
    }
}
