//! VFS Storage - query composition and per-entity repositories.
//!
//! Queries are composed from an entity's base filters, optional search
//! criteria, a default sort, a pager and caller-supplied ops, in a fixed
//! order (see [`build`]). Repositories run them through any
//! [`QueryExecutor`]: a connection pool, an open transaction, or the
//! in-memory [`MemoryStore`].
//!
//! # Core Concepts
//!
//! - **Soft delete**: rows are never removed; delete sets the status to
//!   [`StatusId::Deleted`].
//! - **Cardinality**: single-row lookups return `Ok(None)` for no match and
//!   [`StorageError::AmbiguousResult`] for more than one.
//! - **Copy-on-write**: [`Repository::with_transaction`] and
//!   [`Repository::with_enabled_only`] return new values and leave the
//!   original untouched.
//!
//! # Traits
//!
//! - [`Entity`]: table metadata, usually derived
//! - [`Model`]: search type, default sort and join of an entity
//! - [`QueryExecutor`]: runs queries against a backend
//! - [`RepositoryConnection`]: connects to and migrates a backend

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unwrap_in_result
    )
)]

extern crate self as vfs_storage;

mod builder;
mod config;
mod context;
mod entity;
mod error;
mod memory;
mod query;
mod repository;
mod status;
mod time;
mod vfs;

pub use builder::{Filter, Op, Pager, Search, build, build_insert, build_update};
pub use config::{DatabaseConfig, ENV_PREFIX};
pub use context::Context;
pub use entity::{
    Entity, Relation, TableMeta, entity_from_columns, entity_values, json_to_value,
    row_to_json_keys,
};
pub use error::{BackendError, CancelReason, Operation, StorageError, StoreError};
pub use memory::{MemoryError, MemoryStore, MemoryTransaction};
pub use query::{
    Assignment, Column, Condition, Insert, Order, Query, QueryExecutor, SortField,
    TransactionExecutor, Transactional, Update, Value, escape_like,
};
pub use repository::{ConnectionConfig, EntityConfig, Model, Repository, RepositoryConnection};
pub use status::StatusId;
pub use time::StorageDatetime;
pub use vfs::{VfsFile, VfsFileSearch, VfsFolder, VfsFolderSearch, VfsRepo};

// Re-export derive macro
pub use vfs_storage_derive::Entity;

pub use tokio_util::sync::CancellationToken;
