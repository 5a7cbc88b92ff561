//! Backend resolution and SQL fragment strategies.
//!
//! [`Dialect`] names the backend family of a connection. Each SQL family has a
//! [`SqlDialect`] strategy that renders the fragments the planners need:
//! quoted identifiers, placeholders, column types and payload literals.

use std::fmt;

use chrono::NaiveDateTime;

use crate::entity::SqlType;
use crate::error::{BulkError, BulkResult};
use crate::value::Value;

/// Timestamp literal format shared by both SQL dialects.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// The backend family of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Microsoft SQL Server.
    SqlServer,
    /// PostgreSQL.
    Postgres,
    /// In-process store used for testing.
    InMemory,
}

impl Dialect {
    /// Resolve a dialect from a provider name.
    ///
    /// ```rust
    /// use sluice_core::Dialect;
    ///
    /// assert_eq!(Dialect::from_provider("SqlServer").unwrap(), Dialect::SqlServer);
    /// assert_eq!(Dialect::from_provider("npgsql").unwrap(), Dialect::Postgres);
    /// assert!(Dialect::from_provider("oracle").is_err());
    /// ```
    pub fn from_provider(provider: &str) -> BulkResult<Self> {
        match provider.to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" | "tds" => Ok(Self::SqlServer),
            "postgres" | "postgresql" | "npgsql" => Ok(Self::Postgres),
            "memory" | "inmemory" | "in-memory" => Ok(Self::InMemory),
            _ => Err(BulkError::unsupported_provider(provider)),
        }
    }

    /// The SQL fragment strategy, or `None` for the in-memory dialect.
    pub fn sql(&self) -> Option<&'static dyn SqlDialect> {
        match self {
            Self::SqlServer => Some(&SqlServerDialect),
            Self::Postgres => Some(&PostgresDialect),
            Self::InMemory => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqlServer => write!(f, "sqlserver"),
            Self::Postgres => write!(f, "postgres"),
            Self::InMemory => write!(f, "memory"),
        }
    }
}

/// SQL fragment rendering for one dialect.
pub trait SqlDialect: Send + Sync {
    /// The dialect this strategy renders.
    fn dialect(&self) -> Dialect;

    /// Quote an identifier, escaping embedded quote characters.
    fn quote(&self, name: &str) -> String;

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Column type text for a property type.
    fn column_type(&self, sql_type: &SqlType) -> String;

    /// Render a payload value as an escaped literal.
    fn literal(&self, value: &Value) -> BulkResult<String>;

    /// Bind parameters allowed in one statement.
    fn max_parameters(&self) -> usize;

    /// Quote and qualify a table name.
    fn table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.quote(schema), self.quote(table)),
            None => self.quote(table),
        }
    }

    /// `alias.column`, both quoted.
    fn column(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", self.quote(alias), self.quote(column))
    }
}

fn reject_nul(s: &str) -> BulkResult<()> {
    if s.contains('\0') {
        return Err(BulkError::invalid_input(
            "string payload values must not contain NUL characters",
        ));
    }
    Ok(())
}

fn timestamp(dt: &NaiveDateTime) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// SQL Server (T-SQL) fragments.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    fn quote(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn column_type(&self, sql_type: &SqlType) -> String {
        match sql_type {
            SqlType::Bool => "bit".to_string(),
            SqlType::SmallInt => "smallint".to_string(),
            SqlType::Int => "int".to_string(),
            SqlType::BigInt => "bigint".to_string(),
            SqlType::Double => "float".to_string(),
            SqlType::Text(Some(len)) if *len <= 4000 => format!("nvarchar({})", len),
            SqlType::Text(_) => "nvarchar(max)".to_string(),
            SqlType::Uuid => "uniqueidentifier".to_string(),
            SqlType::Timestamp => "datetime2".to_string(),
            SqlType::Raw(raw) => raw.to_string(),
        }
    }

    fn literal(&self, value: &Value) -> BulkResult<String> {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_finite() => format!("{:?}", f),
            Value::Float(f) => {
                return Err(BulkError::invalid_input(format!(
                    "SQL Server cannot store the float value {}",
                    f
                )));
            }
            Value::String(s) => {
                reject_nul(s)?;
                format!("N'{}'", s.replace('\'', "''"))
            }
            Value::Uuid(u) => format!("'{}'", u),
            Value::DateTime(dt) => format!("'{}'", timestamp(dt)),
        })
    }

    fn max_parameters(&self) -> usize {
        2100
    }
}

/// PostgreSQL fragments.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn quote(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn column_type(&self, sql_type: &SqlType) -> String {
        match sql_type {
            SqlType::Bool => "boolean".to_string(),
            SqlType::SmallInt => "smallint".to_string(),
            SqlType::Int => "integer".to_string(),
            SqlType::BigInt => "bigint".to_string(),
            SqlType::Double => "double precision".to_string(),
            SqlType::Text(Some(len)) => format!("varchar({})", len),
            SqlType::Text(None) => "text".to_string(),
            SqlType::Uuid => "uuid".to_string(),
            SqlType::Timestamp => "timestamp".to_string(),
            SqlType::Raw(raw) => raw.to_string(),
        }
    }

    fn literal(&self, value: &Value) -> BulkResult<String> {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_nan() => "'NaN'::double precision".to_string(),
            Value::Float(f) if f.is_infinite() => {
                let sign = if *f > 0.0 { "" } else { "-" };
                format!("'{}Infinity'::double precision", sign)
            }
            Value::Float(f) => format!("{:?}", f),
            Value::String(s) => {
                reject_nul(s)?;
                format!("'{}'", s.replace('\'', "''"))
            }
            Value::Uuid(u) => format!("'{}'::uuid", u),
            Value::DateTime(dt) => format!("'{}'::timestamp", timestamp(dt)),
        })
    }

    fn max_parameters(&self) -> usize {
        65535
    }
}
