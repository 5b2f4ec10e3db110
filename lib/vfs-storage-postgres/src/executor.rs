//! PostgreSQL implementation of QueryExecutor.

use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Postgres, Row, Transaction};
use tokio::sync::Mutex;
use vfs_storage::{
    ConnectionConfig, Entity, Insert, Operation, Query, QueryExecutor, RepositoryConnection,
    StorageError, StoreError, TransactionExecutor, Transactional, Update,
};

use crate::serde_bind::{bind_params, deserialize_row};
use crate::sql::{Statement, relations, render_count, render_insert, render_select, render_update};

/// Entity name reported for connection-level failures.
const DATABASE: &str = "database";

/// Schema migrations, compiled into the binary.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Wrapper around sqlx::PgPool that implements QueryExecutor.
#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    /// Create a new PgPool from an sqlx PgPool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self(pool)
    }

    /// Get the inner sqlx::PgPool.
    pub fn inner(&self) -> &sqlx::PgPool {
        &self.0
    }
}

impl Deref for PgPool {
    type Target = sqlx::PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl RepositoryConnection for PgPool {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StorageError> {
        let config = config.into().database_config();

        let idle_timeout = match config.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(idle_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::store(DATABASE, Operation::Connect, StoreError::database(e)))?;

        tracing::debug!(
            max_connections = config.max_connections,
            "connected to PostgreSQL"
        );
        Ok(Self(pool))
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        MIGRATOR.run(&self.0).await.map_err(|e| {
            StorageError::store(DATABASE, Operation::Initialize, StoreError::database(e))
        })?;
        tracing::debug!(migrations = MIGRATOR.iter().count(), "schema up to date");
        Ok(())
    }
}

fn log_result<T>(table: &str, stmt: &Statement, started: Instant, result: &Result<T, sqlx::Error>) {
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(_) => tracing::debug!(
            table,
            sql = %stmt.sql,
            params = stmt.params.len(),
            elapsed_ms,
            "executed statement"
        ),
        Err(e) => tracing::error!(
            table,
            sql = %stmt.sql,
            params = stmt.params.len(),
            elapsed_ms,
            error = %e,
            "statement failed"
        ),
    }
}

async fn fetch_with<'c, T, E>(executor: E, query: &Query<T>) -> Result<Vec<T>, StoreError>
where
    T: Entity,
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let relations = relations(query)?;
    let stmt = render_select(query)?;
    let args = bind_params(&stmt.params)?;

    let started = Instant::now();
    let result = sqlx::query_with(&stmt.sql, args).fetch_all(executor).await;
    log_result(&query.table, &stmt, started, &result);

    result
        .map_err(StoreError::database)?
        .iter()
        .map(|row| deserialize_row::<T>(row, &relations))
        .collect()
}

async fn count_with<'c, T, E>(executor: E, query: &Query<T>) -> Result<u64, StoreError>
where
    T: Entity,
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let stmt = render_count(query);
    let args = bind_params(&stmt.params)?;

    let started = Instant::now();
    let result = sqlx::query_with(&stmt.sql, args).fetch_one(executor).await;
    log_result(&query.table, &stmt, started, &result);

    let count: i64 = result
        .map_err(StoreError::database)?
        .try_get(0)
        .map_err(StoreError::database)?;
    Ok(count.max(0) as u64)
}

async fn insert_with<'c, T, E>(executor: E, insert: &Insert<T>) -> Result<T, StoreError>
where
    T: Entity,
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let stmt = render_insert(insert);
    let args = bind_params(&stmt.params)?;

    let started = Instant::now();
    let result = sqlx::query_with(&stmt.sql, args).fetch_one(executor).await;
    log_result(&insert.table, &stmt, started, &result);

    deserialize_row::<T>(&result.map_err(StoreError::database)?, &[])
}

async fn update_with<'c, T, E>(executor: E, update: &Update<T>) -> Result<u64, StoreError>
where
    T: Entity,
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let stmt = render_update(update);
    let args = bind_params(&stmt.params)?;

    let started = Instant::now();
    let result = sqlx::query_with(&stmt.sql, args).execute(executor).await;
    log_result(&update.table, &stmt, started, &result);

    Ok(result.map_err(StoreError::database)?.rows_affected())
}

#[async_trait]
impl QueryExecutor for PgPool {
    async fn fetch<T: Entity>(&self, query: Query<T>) -> Result<Vec<T>, StoreError> {
        fetch_with(&self.0, &query).await
    }

    async fn count<T: Entity>(&self, query: Query<T>) -> Result<u64, StoreError> {
        count_with(&self.0, &query).await
    }

    async fn insert<T: Entity>(&self, insert: Insert<T>) -> Result<T, StoreError> {
        insert_with(&self.0, &insert).await
    }

    async fn update<T: Entity>(&self, update: Update<T>) -> Result<u64, StoreError> {
        update_with(&self.0, &update).await
    }
}

#[async_trait]
impl Transactional for PgPool {
    type Transaction = PgTransaction;

    async fn begin_transaction(&self) -> Result<Self::Transaction, StoreError> {
        let tx = self.0.begin().await.map_err(StoreError::database)?;
        Ok(PgTransaction(Arc::new(Mutex::new(Some(tx)))))
    }
}

/// PostgreSQL transaction wrapper implementing TransactionExecutor.
///
/// Clones share the transaction; statements on it run one at a time.
#[derive(Clone)]
pub struct PgTransaction(Arc<Mutex<Option<Transaction<'static, Postgres>>>>);

impl std::fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransaction").finish_non_exhaustive()
    }
}

#[async_trait]
impl QueryExecutor for PgTransaction {
    async fn fetch<T: Entity>(&self, query: Query<T>) -> Result<Vec<T>, StoreError> {
        let mut guard = self.0.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        fetch_with(&mut **tx, &query).await
    }

    async fn count<T: Entity>(&self, query: Query<T>) -> Result<u64, StoreError> {
        let mut guard = self.0.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        count_with(&mut **tx, &query).await
    }

    async fn insert<T: Entity>(&self, insert: Insert<T>) -> Result<T, StoreError> {
        let mut guard = self.0.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        insert_with(&mut **tx, &insert).await
    }

    async fn update<T: Entity>(&self, update: Update<T>) -> Result<u64, StoreError> {
        let mut guard = self.0.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        update_with(&mut **tx, &update).await
    }
}

#[async_trait]
impl TransactionExecutor for PgTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        let tx = self
            .0
            .lock()
            .await
            .take()
            .ok_or(StoreError::TransactionClosed)?;
        tx.commit().await.map_err(StoreError::database)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        let tx = self
            .0
            .lock()
            .await
            .take()
            .ok_or(StoreError::TransactionClosed)?;
        tx.rollback().await.map_err(StoreError::database)
    }
}
