//! Error types for Microsoft SQL Server operations.

use sluice_core::BulkError;
use thiserror::Error;

/// Result type for MSSQL operations.
pub type MssqlResult<T> = Result<T, MssqlError>;

/// Errors that can occur during MSSQL operations.
#[derive(Error, Debug)]
pub enum MssqlError {
    /// Tiberius/SQL Server error.
    #[error("sql server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),

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

/// Violation of a PRIMARY KEY or UNIQUE constraint.
const UNIQUE_KEY_VIOLATION: u32 = 2627;
/// Duplicate key row in a unique index.
const UNIQUE_INDEX_VIOLATION: u32 = 2601;
/// FOREIGN KEY or CHECK conflict.
const CONSTRAINT_CONFLICT: u32 = 547;
/// NULL into a NOT NULL column.
const NOT_NULL_VIOLATION: u32 = 515;

impl MssqlError {
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
        matches!(self, Self::Connection(_))
            || matches!(self, Self::SqlServer(tiberius::error::Error::Io { .. }))
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The server error number, when the server reported one.
    pub fn server_code(&self) -> Option<u32> {
        match self {
            Self::SqlServer(tiberius::error::Error::Server(token)) => Some(token.code()),
            _ => None,
        }
    }
}

impl From<MssqlError> for BulkError {
    fn from(err: MssqlError) -> Self {
        let code = err.server_code();
        let converted = match &err {
            MssqlError::SqlServer(e) => match code {
                Some(UNIQUE_KEY_VIOLATION | UNIQUE_INDEX_VIOLATION) => {
                    BulkError::unique_violation("", e.to_string())
                }
                Some(CONSTRAINT_CONFLICT | NOT_NULL_VIOLATION) => {
                    BulkError::constraint_violation(e.to_string())
                }
                _ if err.is_connection_error() => BulkError::connection(e.to_string()),
                _ => BulkError::database(e.to_string()),
            },
            MssqlError::Config(msg) => BulkError::configuration(msg.clone()),
            MssqlError::Connection(msg) => BulkError::connection(msg.clone()),
            MssqlError::Query(msg) => BulkError::database(msg.clone()),
            MssqlError::Deserialization(msg) => BulkError::deserialization(msg.clone()),
            MssqlError::TypeConversion(msg) => BulkError::type_conversion(msg.clone()),
            MssqlError::Timeout(ms) => BulkError::timeout(*ms),
            MssqlError::Internal(msg) => BulkError::internal(msg.clone()),
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
        let err = MssqlError::config("invalid connection string");
        assert!(matches!(err, MssqlError::Config(_)));

        let err = MssqlError::connection("connection refused");
        assert!(err.is_connection_error());
        assert_eq!(err.server_code(), None);

        let err = MssqlError::Timeout(5000);
        assert!(err.is_timeout());
    }

    #[test]
    fn test_into_bulk_error() {
        let err: BulkError = MssqlError::Timeout(1000).into();
        assert_eq!(err.code, ErrorCode::Timeout);

        let err: BulkError = MssqlError::config("bad").into();
        assert!(err.is_configuration());

        let err: BulkError = MssqlError::type_conversion("money").into();
        assert_eq!(err.code, ErrorCode::TypeConversion);
    }

    #[test]
    fn test_error_display() {
        let err = MssqlError::config("test error");
        assert_eq!(err.to_string(), "configuration error: test error");

        let err = MssqlError::Timeout(250);
        assert_eq!(err.to_string(), "operation timed out after 250ms");
    }
}
