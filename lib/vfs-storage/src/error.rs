use std::fmt;

use thiserror::Error;

/// Boxed backend error, kept as produced by the driver.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Repository operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ById,
    One,
    List,
    Count,
    Add,
    Update,
    Delete,
    Ancestors,
    Connect,
    Initialize,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ById => "by_id",
            Self::One => "one",
            Self::List => "list",
            Self::Count => "count",
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Ancestors => "ancestors",
            Self::Connect => "connect",
            Self::Initialize => "initialize",
        };
        f.write_str(name)
    }
}

/// Why a round trip was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Errors raised by a store executor.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[source] BackendError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unsupported query: {0}")]
    Unsupported(String),

    #[error("Transaction already finished")]
    TransactionClosed,

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl StoreError {
    pub fn database(error: impl Into<BackendError>) -> Self {
        StoreError::Database(error.into())
    }
}

/// Errors crossing the repository boundary.
///
/// Not-found and no-effect outcomes are not errors: they surface as
/// `Ok(None)` and `Ok(false)`.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{entity}: {operation} matched more than one row")]
    AmbiguousResult {
        entity: &'static str,
        operation: Operation,
    },

    #[error("{entity}: {operation} {reason}")]
    Cancelled {
        entity: &'static str,
        operation: Operation,
        reason: CancelReason,
    },

    #[error("{entity}: {operation} failed: {source}")]
    Store {
        entity: &'static str,
        operation: Operation,
        #[source]
        source: StoreError,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn store(entity: &'static str, operation: Operation, source: StoreError) -> Self {
        StorageError::Store {
            entity,
            operation,
            source,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, StorageError::AmbiguousResult { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Cancelled { .. })
    }

    /// The underlying store failure, if this is one.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            StorageError::Store { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<figment::Error> for StorageError {
    fn from(e: figment::Error) -> Self {
        StorageError::Config(e.to_string())
    }
}
