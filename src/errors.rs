//! Centralized error handling.
//!
//! Provides a unified error type for the entire pipeline, plus the
//! transient/non-transient classification the retry tiers rely on.

use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Resource errors
    #[error("Resource not found")]
    NotFound,

    #[error("{0} already exists")]
    Conflict(String),

    // Validation
    #[error("{0}")]
    Validation(String),

    // External store errors
    #[error("Database error")]
    Database(#[from] sea_orm::DbErr),

    #[error("Read store error")]
    ReadStore(#[from] mongodb::error::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),

    // Pipeline errors
    #[error("Projection failed: {0}")]
    Projection(String),

    #[error("Post-commit propagation failed for transaction {transaction_id}: {message}")]
    PostCommit {
        transaction_id: Uuid,
        message: String,
    },

    // Internal
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type AppResult<T> = Result<T, AppError>;

/// Classification consumed by the retry tiers: transient faults are retried
/// (bounded), everything else propagates immediately.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for AppError {
    fn is_transient(&self) -> bool {
        match self {
            AppError::Database(e) => is_transient_db(e),
            AppError::ReadStore(e) => is_transient_mongo(e),
            _ => false,
        }
    }
}

/// Transient entity-store faults: connection acquisition, serialization
/// conflicts (SQLSTATE 40001) and deadlocks (40P01).
fn is_transient_db(err: &sea_orm::DbErr) -> bool {
    if matches!(err, sea_orm::DbErr::ConnectionAcquire(_) | sea_orm::DbErr::Conn(_)) {
        return true;
    }
    let msg = err.to_string();
    msg.contains("40001")
        || msg.contains("40P01")
        || msg.contains("serialization failure")
        || msg.contains("deadlock detected")
}

/// Transient read-store faults: network I/O, server selection timeouts and
/// pool resets, plus anything the server labels as transient.
fn is_transient_mongo(err: &mongodb::error::Error) -> bool {
    use mongodb::error::ErrorKind;

    if err.contains_label("TransientTransactionError") {
        return true;
    }
    matches!(
        *err.kind,
        ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
    )
}

/// Map a write-path database error, turning unique-constraint violations
/// into a `Conflict` so they are never treated as retryable.
pub(crate) fn map_write_err(err: sea_orm::DbErr) -> AppError {
    let msg = err.to_string();
    if msg.contains("duplicate key")
        || msg.contains("UNIQUE constraint failed")
        || msg.contains("unique constraint")
    {
        AppError::Conflict("user".to_string())
    } else {
        AppError::Database(err)
    }
}

/// Extension trait for Option -> AppError conversion
pub trait OptionExt<T> {
    fn ok_or_not_found(self) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self) -> AppResult<T> {
        self.ok_or(AppError::NotFound)
    }
}

/// Convenience constructors
impl AppError {
    pub fn conflict(entity: impl Into<String>) -> Self {
        AppError::Conflict(entity.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}
