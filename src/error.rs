//! Error types for the access layer.
//!
//! This module defines all error types using `thiserror`. Driver errors pass
//! through unchanged; transaction lifecycle failures get their own variants so
//! callers can tell a begin failure from a commit failure from a work-unit
//! error, and scan failures are distinct from transport failures.

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum DbError {
    /// Transaction creation failed. Fatal to the manager invocation.
    #[error("can't start transaction: {source}")]
    Begin {
        #[source]
        source: Box<DbError>,
    },

    /// The work unit itself reported a failure; the transaction was rolled back.
    #[error("failed executing code inside transaction: {source}")]
    Handler {
        #[source]
        source: Box<DbError>,
    },

    /// The work unit panicked; the panic was intercepted and the transaction
    /// rolled back.
    #[error("panic recovered inside transaction: {message}")]
    HandlerPanic { message: String },

    /// Commit failed after the work unit succeeded.
    #[error("transaction commit failed: {source}")]
    Commit {
        #[source]
        source: Box<DbError>,
    },

    /// Rollback failed after another error. Both are preserved.
    #[error("{cause}; rollback failed: {rollback}")]
    RollbackFailed {
        cause: Box<DbError>,
        rollback: Box<DbError>,
    },

    /// A transaction handle was used after its terminal action.
    #[error("transaction {id} is no longer active")]
    TransactionSpent { id: String },

    /// The destination shape does not match the result row shape.
    #[error("scan failed for query '{name}': {message}")]
    Scan { name: String, message: String },

    #[error("query '{name}' returned no rows")]
    NoRows { name: String },

    #[error("query '{name}' returned {count} rows, expected exactly one")]
    ManyRows { name: String, count: usize },

    /// The context deadline expired before the operation completed.
    #[error("'{operation}' timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// Invalid pool configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Underlying database error, propagated unchanged.
    #[error(transparent)]
    Driver(#[from] sqlx::Error),
}

impl DbError {
    /// Wrap a transaction-creation failure.
    pub fn begin(source: DbError) -> Self {
        Self::Begin {
            source: Box::new(source),
        }
    }

    /// Wrap a work-unit failure.
    pub fn handler(source: DbError) -> Self {
        Self::Handler {
            source: Box::new(source),
        }
    }

    /// Create an error from an intercepted panic payload description.
    pub fn handler_panic(message: impl Into<String>) -> Self {
        Self::HandlerPanic {
            message: message.into(),
        }
    }

    /// Wrap a commit failure.
    pub fn commit(source: DbError) -> Self {
        Self::Commit {
            source: Box::new(source),
        }
    }

    /// Combine an error with the rollback failure that followed it.
    pub fn rollback_failed(cause: DbError, rollback: DbError) -> Self {
        Self::RollbackFailed {
            cause: Box::new(cause),
            rollback: Box::new(rollback),
        }
    }

    /// Create a spent-handle error.
    pub fn spent(id: impl Into<String>) -> Self {
        Self::TransactionSpent { id: id.into() }
    }

    /// Create a scan error for a query.
    pub fn scan(name: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Scan {
            name: name.into(),
            message: source.to_string(),
        }
    }

    /// Create a no-rows cardinality error.
    pub fn no_rows(name: impl Into<String>) -> Self {
        Self::NoRows { name: name.into() }
    }

    /// Create a more-than-one-row cardinality error.
    pub fn many_rows(name: impl Into<String>, count: usize) -> Self {
        Self::ManyRows {
            name: name.into(),
            count,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// The failure that drove a wrap or rollback, when this error carries one.
    ///
    /// For `Handler` and `RollbackFailed` this is the original cause; useful
    /// for callers that need to distinguish their own failure from the
    /// manager's bookkeeping around it.
    pub fn cause(&self) -> Option<&DbError> {
        match self {
            Self::Begin { source } => Some(source),
            Self::Handler { source } => Some(source),
            Self::Commit { source } => Some(source),
            Self::RollbackFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Check if this error is a scan or cardinality failure (as opposed to a
    /// transport failure).
    pub fn is_scan(&self) -> bool {
        matches!(
            self,
            Self::Scan { .. } | Self::NoRows { .. } | Self::ManyRows { .. }
        )
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
