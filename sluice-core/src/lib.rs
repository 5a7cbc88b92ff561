//! # sluice-core
//!
//! Set-based bulk add, update, remove and merge for entity tables.
//!
//! This crate provides the engine shared by every Sluice backend:
//! - Entity metadata and primary key descriptors (simple and composite keys)
//! - A filtered [`Query`] that translates to SQL or evaluates in process
//! - Per-dialect script planners for SQL Server and PostgreSQL
//! - The result correlator that writes generated keys back onto records
//! - An in-memory dialect with the same observable semantics
//!
//! ## Entities
//!
//! ```rust
//! use sluice_core::entity::{Entity, SqlType};
//! use sluice_core::PrimaryKey;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Order {
//!     id: i64,
//!     customer: String,
//!     note: Option<String>,
//! }
//!
//! sluice_core::impl_entity!(Order, table = "Orders", schema = "sales";
//!     id: "OrderId" => SqlType::BigInt, key, generated;
//!     customer: "Customer" => SqlType::Text(Some(80));
//!     note: "Note" => SqlType::Text(None), nullable;
//! );
//!
//! let pk = PrimaryKey::of::<Order>().unwrap();
//! assert!(pk.is_generated());
//! assert!(!pk.is_composite());
//! ```
//!
//! ## Running bulk operations
//!
//! Wrap any [`BulkConnection`] in a [`BulkContext`]; the executor is chosen
//! from the connection's provider name. Driver crates (`sluice-mssql`,
//! `sluice-postgres`) provide SQL connections; [`memory::MemoryDatabase`]
//! provides an in-process one.
//!
//! ## Error codes
//!
//! Errors carry an [`ErrorCode`] rendered as `SL{n}`:
//!
//! | Range | Category |
//! |-------|----------|
//! | 1xxx | Configuration and metadata |
//! | 2xxx | Caller input |
//! | 3xxx | Unsupported key shapes |
//! | 4xxx | Backend execution |
//! | 5xxx | Value conversion |
//! | 6xxx | Key correlation |
//! | 9xxx | Internal |

pub mod config;
pub mod connection;
pub mod context;
pub mod correlate;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod executor;
pub mod filter;
pub mod key;
pub mod logging;
pub mod mapping;
pub mod memory;
pub mod plan;
pub mod query;
pub mod statement;
pub mod value;

pub use config::BulkConfig;
pub use connection::{BulkConnection, ensure_open};
pub use context::BulkContext;
pub use correlate::{BulkOutcome, Correlation, Correlator, ResultRow, RowAction};
pub use dialect::{Dialect, PostgresDialect, SqlDialect, SqlServerDialect};
pub use entity::{Entity, EntityType, PropertyMeta, SqlType};
pub use error::{BulkError, BulkResult, ErrorCode, ErrorContext};
pub use executor::{
    BulkExecutor, MergeOptions, NotMatchedBehavior, RelationalExecutor, ScriptOutput, run_script,
};
pub use filter::Filter;
pub use key::{Key, KeyPart, PrimaryKey};
pub use mapping::PropertyMapping;
pub use query::{BRIDGE_VERSION, Query, SqlSource, TranslatedQuery};
pub use statement::{PayloadBinding, Script, Statement, StatementKind};
pub use value::{FromValue, Value};

/// Common imports for bulk operations.
pub mod prelude {
    pub use crate::config::BulkConfig;
    pub use crate::connection::BulkConnection;
    pub use crate::context::BulkContext;
    pub use crate::correlate::BulkOutcome;
    pub use crate::entity::{Entity, SqlType};
    pub use crate::error::{BulkError, BulkResult, ErrorCode};
    pub use crate::executor::{MergeOptions, NotMatchedBehavior};
    pub use crate::filter::Filter;
    pub use crate::key::Key;
    pub use crate::query::Query;
    pub use crate::value::Value;
}
