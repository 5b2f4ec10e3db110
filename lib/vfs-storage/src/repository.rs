//! Generic per-entity repository over any [`QueryExecutor`].
//!
//! - `Repository<E, X>`: ByID/One/List/Count/Add/Update/Delete for one entity
//! - `Model`: the per-entity configuration a repository is built from
//! - `RepositoryConnection`: Database connection and initialization

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    Column, Context, DatabaseConfig, Entity, Filter, Op, Operation, Pager, Query, QueryExecutor,
    Search, SortField, StatusId, StorageError, StoreError, build, build_insert, build_update,
};

/// Connection configuration for database backends.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    /// Connect using a database URL string with default pool settings.
    Url(String),
    /// Connect using full pool settings.
    Config(DatabaseConfig),
}

impl ConnectionConfig {
    pub fn database_config(&self) -> DatabaseConfig {
        match self {
            ConnectionConfig::Url(url) => DatabaseConfig::from_url(url.clone()),
            ConnectionConfig::Config(config) => config.clone(),
        }
    }
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

impl From<DatabaseConfig> for ConnectionConfig {
    fn from(config: DatabaseConfig) -> Self {
        ConnectionConfig::Config(config)
    }
}

/// Trait for database connection and initialization.
///
/// Backends implement their own connection and migration logic.
#[async_trait]
pub trait RepositoryConnection: Sized + Send + Sync {
    /// Connect to the database using the provided configuration.
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StorageError>;

    /// Initialize the database schema (run migrations).
    async fn initialize(&self) -> Result<(), StorageError>;
}

/// Per-entity repository configuration.
pub trait Model: Entity {
    type Search: Search;

    /// Search criteria matching exactly the given primary key.
    fn id_search(id: i64) -> Self::Search;

    fn default_sort() -> Vec<SortField>;

    /// Projection used by a full fetch: own columns plus every relation.
    fn join() -> Vec<Column> {
        let mut columns = vec![Column::All];
        columns.extend(Self::relations().iter().map(|r| Column::Relation(r.name)));
        columns
    }

    /// Filters every query of this entity starts from.
    fn base_filters() -> Vec<Filter> {
        Vec::new()
    }
}

/// Filters, sort and join of one entity. Shared read-only between
/// repository values and only ever replaced by a modified copy.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityConfig {
    pub filters: Vec<Filter>,
    pub sort: Vec<SortField>,
    pub join: Vec<Column>,
}

impl EntityConfig {
    pub fn of<E: Model>() -> Self {
        Self {
            filters: E::base_filters(),
            sort: E::default_sort(),
            join: E::join(),
        }
    }
}

/// Repository for one entity type over executor `X`.
///
/// Values are cheap to clone. Deriving a transaction-bound or enabled-only
/// repository never affects the value it was derived from.
pub struct Repository<E, X> {
    executor: X,
    config: Arc<EntityConfig>,
    _marker: PhantomData<fn() -> E>,
}

impl<E, X: Clone> Clone for Repository<E, X> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            config: Arc::clone(&self.config),
            _marker: PhantomData,
        }
    }
}

impl<E, X> std::fmt::Debug for Repository<E, X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &std::any::type_name::<E>())
            .field("config", &self.config)
            .finish()
    }
}

impl<E: Model, X: QueryExecutor> Repository<E, X> {
    pub fn new(executor: X) -> Self {
        Self::with_config(executor, EntityConfig::of::<E>())
    }

    pub fn with_config(executor: X, config: EntityConfig) -> Self {
        Self {
            executor,
            config: Arc::new(config),
            _marker: PhantomData,
        }
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub fn config(&self) -> &EntityConfig {
        &self.config
    }

    /// Same configuration, bound to `tx`. The caller commits or rolls back.
    pub fn with_transaction<T: QueryExecutor>(&self, tx: T) -> Repository<E, T> {
        Repository {
            executor: tx,
            config: Arc::clone(&self.config),
            _marker: PhantomData,
        }
    }

    /// Copy whose base filters also require `status = enabled`.
    pub fn with_enabled_only(&self) -> Self {
        let mut config = EntityConfig::clone(&self.config);
        config
            .filters
            .push(Filter::status_enabled(E::status_column()));
        Self {
            executor: self.executor.clone(),
            config: Arc::new(config),
            _marker: PhantomData,
        }
    }

    /// Op selecting the entity's join configuration.
    pub fn full(&self) -> Op {
        Op::Columns(self.config.join.clone())
    }

    /// Op restoring the entity's default sort.
    pub fn default_sort(&self) -> Op {
        Op::Sort(self.config.sort.clone())
    }

    /// The SELECT this repository would run for `search`.
    pub fn query(&self, search: &E::Search, pager: Pager, ops: &[Op]) -> Query<E> {
        build(search, &self.config.filters, &self.config.sort, pager, ops)
    }

    pub async fn by_id(&self, ctx: &Context, id: i64, ops: &[Op]) -> Result<Option<E>, StorageError> {
        self.single(ctx, &E::id_search(id), ops, Operation::ById)
            .await
    }

    /// Exactly one match or none; more than one is an error.
    pub async fn one(
        &self,
        ctx: &Context,
        search: &E::Search,
        ops: &[Op],
    ) -> Result<Option<E>, StorageError> {
        self.single(ctx, search, ops, Operation::One).await
    }

    pub async fn list(
        &self,
        ctx: &Context,
        search: &E::Search,
        pager: Pager,
        ops: &[Op],
    ) -> Result<Vec<E>, StorageError> {
        let query = self.query(search, pager, ops);
        self.round_trip(ctx, Operation::List, self.executor.fetch(query))
            .await
    }

    /// Matching rows, ignoring any window.
    pub async fn count(
        &self,
        ctx: &Context,
        search: &E::Search,
        ops: &[Op],
    ) -> Result<u64, StorageError> {
        let query = self.query(search, Pager::COUNT_ONLY, ops);
        self.round_trip(ctx, Operation::Count, self.executor.count(query))
            .await
    }

    /// Insert `item` and return it as stored.
    pub async fn add(&self, ctx: &Context, item: &E, ops: &[Op]) -> Result<E, StorageError> {
        let insert = build_insert(item, ops)
            .map_err(|e| StorageError::store(E::table_name(), Operation::Add, e))?;
        self.round_trip(ctx, Operation::Add, self.executor.insert(insert))
            .await
    }

    /// Update `item` by primary key. `false` when no row has that key.
    pub async fn update(&self, ctx: &Context, item: &E, ops: &[Op]) -> Result<bool, StorageError> {
        self.write(ctx, item, ops, Operation::Update).await
    }

    /// Mark the row deleted. Rows are never removed.
    pub async fn delete(&self, ctx: &Context, id: i64) -> Result<bool, StorageError> {
        let mut item = E::default();
        item.set_id(id);
        item.set_status(StatusId::Deleted);
        self.write(ctx, &item, &[Op::columns([E::status_column()])], Operation::Delete)
            .await
    }

    pub(crate) async fn single(
        &self,
        ctx: &Context,
        search: &E::Search,
        ops: &[Op],
        operation: Operation,
    ) -> Result<Option<E>, StorageError> {
        let query = self.query(search, Pager::AT_MOST_TWO, ops);
        let mut rows = self
            .round_trip(ctx, operation, self.executor.fetch(query))
            .await?;

        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            found => {
                tracing::debug!(
                    entity = E::table_name(),
                    %operation,
                    found,
                    "single-row lookup matched more than one row"
                );
                Err(StorageError::AmbiguousResult {
                    entity: E::table_name(),
                    operation,
                })
            }
        }
    }

    async fn write(
        &self,
        ctx: &Context,
        item: &E,
        ops: &[Op],
        operation: Operation,
    ) -> Result<bool, StorageError> {
        let update = build_update(item, ops)
            .map_err(|e| StorageError::store(E::table_name(), operation, e))?;
        let affected = self
            .round_trip(ctx, operation, self.executor.update(update))
            .await?;
        Ok(affected > 0)
    }

    async fn round_trip<T, F>(
        &self,
        ctx: &Context,
        operation: Operation,
        fut: F,
    ) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match ctx.run(fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(StorageError::store(E::table_name(), operation, source)),
            Err(reason) => {
                tracing::debug!(entity = E::table_name(), %operation, %reason, "store round trip abandoned");
                Err(StorageError::Cancelled {
                    entity: E::table_name(),
                    operation,
                    reason,
                })
            }
        }
    }
}
