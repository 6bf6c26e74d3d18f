//! Error types for the saga coordinator.
//!
//! One `thiserror` enum per component boundary (cache/storage/hub), plus a
//! top-level `CoordinatorError` that wraps them and adds the
//! domain-specific variants from spec §7.

use thiserror::Error;

/// Errors raised by `Transaction::commit`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction {0} is already completed")]
    AlreadyCompleted(String),
}

/// Errors raised by a `Cache` implementation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("recipe not found: {0}")]
    RecipeNotFound(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors raised by a `Storage` implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[cfg(feature = "sqlite-storage")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),
}

/// Errors raised by a `Hub` implementation.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("publish failed on {topic}: {message}")]
    Publish { topic: String, message: String },

    #[error("subscribe failed on {topic}: {message}")]
    Subscribe { topic: String, message: String },

    #[error("group {0} not found")]
    UnknownGroup(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Top-level coordinator error (spec §7).
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// `REQUEST_INVALID` — malformed input on an external surface.
    #[error("validation error: {0}")]
    Validation(String),

    /// `WORKFLOW_MULTI_MODIFY` — two concurrent modifications of the same
    /// recipe name raced; the loser should retry.
    #[error("recipe '{0}' is being modified concurrently")]
    MultiModify(String),

    /// Transaction id absent from the cache. Logged by callers, not fatal.
    #[error("transaction not found: {0}")]
    NotFound(String),

    /// `Commit` called on a terminal transaction.
    #[error(transparent)]
    AlreadyCompleted(#[from] TransactionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Hub(#[from] HubError),

    /// Fatal: failure while loading recipes/transactions at startup.
    #[error("recovery failed: {0}")]
    Recovery(String),
}
