//! Error types for PostgreSQL operations.

use sluice_core::BulkError;
use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("query error: {0}")]
    Query(String),

    /// Row deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Type conversion error.
    #[error("type conversion error: {0}")]
    TypeConversion(String),

    /// Timeout error.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Postgres(e) => e.is_closed(),
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The SQLSTATE the server reported, if any.
    pub fn sql_state(&self) -> Option<&SqlState> {
        match self {
            Self::Postgres(e) => e.code(),
            _ => None,
        }
    }
}

impl From<PgError> for BulkError {
    fn from(err: PgError) -> Self {
        let converted = match &err {
            PgError::Postgres(e) => match e.code() {
                Some(state) if *state == SqlState::UNIQUE_VIOLATION => {
                    BulkError::unique_violation("", e.to_string())
                }
                Some(state)
                    if *state == SqlState::FOREIGN_KEY_VIOLATION
                        || *state == SqlState::NOT_NULL_VIOLATION =>
                {
                    BulkError::constraint_violation(e.to_string())
                }
                _ if e.is_closed() => BulkError::connection(e.to_string()),
                _ => BulkError::database(e.to_string()),
            },
            PgError::Config(msg) => BulkError::configuration(msg.clone()),
            PgError::Connection(msg) => BulkError::connection(msg.clone()),
            PgError::Query(msg) => BulkError::database(msg.clone()),
            PgError::Deserialization(msg) => BulkError::deserialization(msg.clone()),
            PgError::TypeConversion(msg) => BulkError::type_conversion(msg.clone()),
            PgError::Timeout(ms) => BulkError::timeout(*ms),
            PgError::Internal(msg) => BulkError::internal(msg.clone()),
        };
        converted.with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sluice_core::ErrorCode;

    #[test]
    fn test_error_creation() {
        let err = PgError::config("invalid URL");
        assert!(matches!(err, PgError::Config(_)));
        assert!(err.sql_state().is_none());

        let err = PgError::connection("connection refused");
        assert!(err.is_connection_error());

        let err = PgError::Timeout(5000);
        assert!(err.is_timeout());
    }

    #[test]
    fn test_into_bulk_error() {
        let err: BulkError = PgError::Timeout(1000).into();
        assert_eq!(err.code, ErrorCode::Timeout);

        let err: BulkError = PgError::connection("refused").into();
        assert!(err.is_connection_error());

        let err: BulkError = PgError::deserialization("bad cell").into();
        assert_eq!(err.code, ErrorCode::Deserialization);
    }
}
