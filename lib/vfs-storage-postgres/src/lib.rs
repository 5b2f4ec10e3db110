//! PostgreSQL implementation for vfs-storage.
//!
//! [`PgPool`] and [`PgTransaction`] implement `QueryExecutor`, so any
//! `Repository` can run against a pool or inside an open transaction.
//! Values are bound and rows decoded through serde using the entity's column
//! metadata, so entities only need `#[derive(Entity)]`.
//!
//! # Usage
//!
//! ```text
//! use vfs_storage::{Context, Pager, RepositoryConnection, VfsFolderSearch, VfsRepo};
//! use vfs_storage_postgres::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/vfs").await?;
//! pool.initialize().await?;
//!
//! let repo = VfsRepo::new(pool).with_enabled_only();
//! let folders = repo
//!     .folders()
//!     .list(&Context::background(), &VfsFolderSearch::default(), Pager::page(1, 50), &[])
//!     .await?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod executor;
mod serde_bind;
mod sql;

pub use executor::{MIGRATOR, PgPool, PgTransaction};
pub use serde_bind::{bind_params, bind_value, deserialize_row};
pub use sql::{
    Param, RELATION_PREFIX, Statement, render_count, render_insert, render_select, render_update,
};

// Re-export sqlx migration types
pub use sqlx::migrate;
pub use sqlx::migrate::Migrator;

// Re-export core types for convenience
pub use vfs_storage::{
    ConnectionConfig, Context, DatabaseConfig, Entity, Op, Pager, QueryExecutor, Repository,
    RepositoryConnection, StorageError, StoreError, TransactionExecutor, Transactional, VfsRepo,
};
