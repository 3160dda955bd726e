//! Unified error type for tierdb.
//!
//! Wraps tier failures and adds the precondition failures raised by the
//! coordinators themselves. The type is `Clone` so a single outcome can be
//! handed to every caller sharing an in-flight sync.

use tierdb_core::{PredicateError, StoreError};

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Unified error type for tierdb.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DatabaseError {
    // ============================================================
    // Precondition failures
    // ============================================================
    /// An update targeted a document that does not exist remotely and
    /// creation was not requested.
    #[error("Document not found: {key}")]
    DocumentNotFound { key: String },

    /// A query predicate could not be built.
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(#[from] PredicateError),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    // ============================================================
    // Wrapped infrastructure errors
    // ============================================================
    /// A storage tier failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A background sync task ended abnormally.
    #[error("Sync task failed: {0}")]
    Task(String),
}

impl DatabaseError {
    /// Whether this is a tier failure the caller might retry.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, DatabaseError::Store(_) | DatabaseError::Task(_))
    }
}

impl From<tokio::task::JoinError> for DatabaseError {
    fn from(e: tokio::task::JoinError) -> Self {
        DatabaseError::Task(e.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        DatabaseError::Config(e.to_string())
    }
}
