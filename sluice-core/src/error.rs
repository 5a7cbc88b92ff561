//! Error types for bulk operations with actionable messages.
//!
//! Every failure surfaced by the engine is a [`BulkError`] carrying:
//! - An [`ErrorCode`] for programmatic handling
//! - Context about the operation, entity and property involved
//! - Optional suggestions and the generated SQL
//!
//! # Error Codes
//!
//! Error codes follow a pattern: SL{category}{number}
//! - 1xxx: Configuration errors (missing key, unsupported provider)
//! - 2xxx: Input errors (invalid keys, bad property lists)
//! - 3xxx: Unsupported paths (composite keys on simple-key helpers)
//! - 4xxx: Execution errors (connection, backend failures)
//! - 5xxx: Data errors (type conversion)
//! - 6xxx: Correlation errors (returned keys that cannot be assigned)
//! - 9xxx: Internal errors
//!
//! ```rust
//! use sluice_core::{BulkError, ErrorCode};
//!
//! let err = BulkError::missing_primary_key("Widget");
//! assert_eq!(err.code, ErrorCode::MissingPrimaryKey);
//! assert!(err.is_configuration());
//! assert!(err.to_string().contains("Widget"));
//! ```

use std::fmt;
use thiserror::Error;

/// Result type for bulk operations.
pub type BulkResult<T> = Result<T, BulkError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Configuration errors (1xxx)
    /// The entity declares no primary key (SL1001).
    MissingPrimaryKey = 1001,
    /// The connection's provider is not a supported backend (SL1002).
    UnsupportedProvider = 1002,
    /// Invalid engine configuration (SL1003).
    InvalidConfiguration = 1003,
    /// A property name does not exist on the entity (SL1004).
    UnknownProperty = 1004,
    /// The query translation contract version does not match (SL1005).
    BridgeVersionMismatch = 1005,

    // Input errors (2xxx)
    /// A supplied key tuple does not fit the primary key (SL2001).
    InvalidKey = 2001,
    /// Invalid argument to a bulk call (SL2002).
    InvalidInput = 2002,
    /// Unique or primary key constraint violation (SL2003).
    UniqueConstraint = 2003,

    // Unsupported paths (3xxx)
    /// The code path does not support this key shape (SL3001).
    NotImplemented = 3001,

    // Execution errors (4xxx)
    /// Database connection failed (SL4001).
    ConnectionFailed = 4001,
    /// Backend reported an error while executing a script (SL4002).
    DatabaseError = 4002,
    /// Transaction control failed (SL4003).
    TransactionFailed = 4003,
    /// Operation timed out (SL4004).
    Timeout = 4004,
    /// Foreign key, check or not-null constraint violation (SL4005).
    ConstraintViolation = 4005,

    // Data errors (5xxx)
    /// A value could not be converted (SL5001).
    TypeConversion = 5001,
    /// A result row could not be decoded (SL5002).
    Deserialization = 5002,

    // Correlation errors (6xxx)
    /// A returned key could not be assigned to an input record (SL6001).
    CorrelationMismatch = 6001,

    // Internal errors (9xxx)
    /// Internal error (SL9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "SL1001").
    pub fn code(&self) -> String {
        format!("SL{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::MissingPrimaryKey => "Entity has no primary key",
            Self::UnsupportedProvider => "Unsupported provider",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::UnknownProperty => "Unknown property",
            Self::BridgeVersionMismatch => "Query translation version mismatch",
            Self::InvalidKey => "Invalid key",
            Self::InvalidInput => "Invalid input",
            Self::UniqueConstraint => "Unique constraint violation",
            Self::NotImplemented => "Not implemented",
            Self::ConnectionFailed => "Database connection failed",
            Self::DatabaseError => "Database error",
            Self::TransactionFailed => "Transaction failed",
            Self::Timeout => "Operation timed out",
            Self::ConstraintViolation => "Constraint violation",
            Self::TypeConversion => "Type conversion error",
            Self::Deserialization => "Deserialization error",
            Self::CorrelationMismatch => "Result correlation mismatch",
            Self::Internal => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The bulk operation that was being performed.
    pub operation: Option<String>,
    /// The entity involved.
    pub model: Option<String>,
    /// The property involved.
    pub field: Option<String>,
    /// The generated SQL (if available).
    pub sql: Option<String>,
    /// Suggestions for fixing the error.
    pub suggestions: Vec<String>,
}

/// Errors that can occur during bulk operations.
#[derive(Error, Debug)]
pub struct BulkError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for BulkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl BulkError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Add a suggestion for fixing the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context.suggestions.push(suggestion.into());
        self
    }

    /// Set the entity involved.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.context.model = Some(model.into());
        self
    }

    /// Set the property involved.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.context.field = Some(field.into());
        self
    }

    /// Attach the SQL that was being executed.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.context.sql = Some(sql.into());
        self
    }

    /// Attach the underlying error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // ============== Constructors ==============

    /// The entity declares no primary key.
    pub fn missing_primary_key(model: impl Into<String>) -> Self {
        let model = model.into();
        Self::new(
            ErrorCode::MissingPrimaryKey,
            format!("entity '{}' has no primary key", model),
        )
        .with_model(model)
        .with_suggestion("Mark at least one property with `key` in its entity metadata")
    }

    /// The provider name does not resolve to a known dialect.
    pub fn unsupported_provider(provider: impl Into<String>) -> Self {
        let provider = provider.into();
        Self::new(
            ErrorCode::UnsupportedProvider,
            format!("unsupported provider '{}'", provider),
        )
        .with_suggestion("Use a SQL Server, PostgreSQL or in-memory connection")
    }

    /// Invalid configuration value.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// A property does not exist on the entity.
    pub fn unknown_property(model: impl Into<String>, property: impl Into<String>) -> Self {
        let model = model.into();
        let property = property.into();
        Self::new(
            ErrorCode::UnknownProperty,
            format!("entity '{}' has no property '{}'", model, property),
        )
        .with_model(model)
        .with_field(property)
    }

    /// A key tuple does not fit the primary key.
    pub fn invalid_key(index: usize, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidKey,
            format!("invalid key (index: {}): {}", index, message.into()),
        )
    }

    /// Invalid argument to a bulk call.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Duplicate key.
    pub fn unique_violation(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UniqueConstraint, message).with_model(model)
    }

    /// The code path does not support this key shape.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, message)
    }

    /// Connection failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message)
    }

    /// Backend execution failure.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Constraint violation reported by the backend.
    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConstraintViolation, message)
    }

    /// Transaction control failure.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransactionFailed, message)
    }

    /// Timeout.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("operation timed out after {}ms", duration_ms),
        )
    }

    /// Value conversion failure.
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TypeConversion, message)
    }

    /// Result row decoding failure.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Deserialization, message)
    }

    /// A returned key could not be assigned.
    pub fn correlation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CorrelationMismatch, message)
    }

    /// Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    // ============== Checks ==============

    /// Failed before any SQL was built because of configuration or metadata.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::MissingPrimaryKey
                | ErrorCode::UnsupportedProvider
                | ErrorCode::InvalidConfiguration
                | ErrorCode::UnknownProperty
                | ErrorCode::BridgeVersionMismatch
        )
    }

    /// Reported by the backend while executing.
    pub fn is_backend(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConnectionFailed
                | ErrorCode::DatabaseError
                | ErrorCode::TransactionFailed
                | ErrorCode::Timeout
                | ErrorCode::ConstraintViolation
                | ErrorCode::UniqueConstraint
        )
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self.code, ErrorCode::ConnectionFailed | ErrorCode::Timeout)
    }

    /// Display the full error with all context and suggestions.
    pub fn display_full(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("Error [{}]: {}\n", self.code.code(), self.message));

        if let Some(ref op) = self.context.operation {
            output.push_str(&format!("  → While: {}\n", op));
        }
        if let Some(ref model) = self.context.model {
            output.push_str(&format!("  → Entity: {}\n", model));
        }
        if let Some(ref field) = self.context.field {
            output.push_str(&format!("  → Property: {}\n", field));
        }

        // SQL (truncated if too long)
        if let Some(ref sql) = self.context.sql {
            let sql_display = if sql.chars().count() > 200 {
                format!("{}...", sql.chars().take(200).collect::<String>())
            } else {
                sql.clone()
            };
            output.push_str(&format!("  → SQL: {}\n", sql_display));
        }

        if !self.context.suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for (i, suggestion) in self.context.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
            }
        }

        output
    }
}

/// Helper for creating errors with context.
#[macro_export]
macro_rules! bulk_error {
    ($code:expr, $msg:expr) => {
        $crate::error::BulkError::new($code, $msg)
    };
    ($code:expr, $msg:expr, $($key:ident = $value:expr),+ $(,)?) => {{
        let mut err = $crate::error::BulkError::new($code, $msg);
        $(
            err = err.$key($value);
        )+
        err
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::MissingPrimaryKey.code(), "SL1001");
        assert_eq!(ErrorCode::InvalidKey.code(), "SL2001");
        assert_eq!(ErrorCode::CorrelationMismatch.code(), "SL6001");
    }

    #[test]
    fn test_missing_primary_key() {
        let err = BulkError::missing_primary_key("Widget");
        assert!(err.is_configuration());
        assert!(!err.is_backend());
        assert_eq!(err.context.model, Some("Widget".to_string()));
        assert!(!err.context.suggestions.is_empty());
    }

    #[test]
    fn test_invalid_key_names_index() {
        let err = BulkError::invalid_key(3, "expected 2 parts, got 1");
        assert_eq!(err.code, ErrorCode::InvalidKey);
        assert!(err.message.contains("index: 3"));
    }

    #[test]
    fn test_display_full() {
        let err = BulkError::unknown_property("Widget", "Colour")
            .with_context("bulk_update")
            .with_sql("UPDATE [a] SET ...");

        let output = err.display_full();
        assert!(output.contains("SL1004"));
        assert!(output.contains("bulk_update"));
        assert!(output.contains("Colour"));
        assert!(output.contains("UPDATE"));
    }

    #[test]
    fn test_display_full_truncates_sql() {
        let err = BulkError::database("boom").with_sql("x".repeat(500));
        let output = err.display_full();
        assert!(output.contains(&format!("{}...", "x".repeat(200))));
        assert!(!output.contains(&"x".repeat(201)));
    }

    #[test]
    fn test_backend_errors() {
        assert!(BulkError::connection("refused").is_backend());
        assert!(BulkError::connection("refused").is_connection_error());
        assert!(BulkError::timeout(5000).is_connection_error());
        assert!(!BulkError::invalid_input("empty").is_backend());
    }

    #[test]
    fn test_error_macro() {
        let err = bulk_error!(
            ErrorCode::InvalidInput,
            "no properties to update",
            with_model = "Widget",
            with_suggestion = "Pass at least one property name"
        );

        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert_eq!(err.context.model, Some("Widget".to_string()));
        assert_eq!(err.context.suggestions.len(), 1);
    }
}
