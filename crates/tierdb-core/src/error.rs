//! Error types for tierdb-core

use thiserror::Error;

/// Errors reported by a storage tier
///
/// Both tiers report failures through this type. `NotFound` is the only
/// variant the coordinators treat specially; everything else is a
/// transport or store failure and is propagated unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Requested document or query target does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The tier cannot be reached (offline, server down)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// I/O error inside the tier
    #[error("I/O error: {0}")]
    Io(String),

    /// Document data could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new Unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Whether this error only signals an absent target
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors produced while parsing a predicate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    #[error("Predicate must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Invalid operand for {operator} on field {field}: {reason}")]
    InvalidOperand {
        field: String,
        operator: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = StoreError::not_found("users/1");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("users/1"));
    }

    #[test]
    fn test_unavailable_is_not_not_found() {
        let err = StoreError::unavailable("offline");
        assert!(!err.is_not_found());
        assert!(format!("{}", err).contains("Store unavailable"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let store_err: StoreError = io_err.into();
        assert!(matches!(store_err, StoreError::Io(_)));
    }

    #[test]
    fn test_predicate_error_display() {
        let err = PredicateError::InvalidOperand {
            field: "age".to_string(),
            operator: "$in".to_string(),
            reason: "expected array".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("$in"));
        assert!(msg.contains("age"));
    }
}
