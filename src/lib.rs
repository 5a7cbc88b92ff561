//! # Sluice
//!
//! Set-based bulk operations for entity tables.
//!
//! Sluice provides:
//! - `bulk_add` with generated keys written back onto the records
//! - `bulk_update` and `bulk_update_with` over a filtered query
//! - `bulk_remove` over a query, optionally restricted to a key list
//! - `bulk_merge` with delete, ignore or update for unmatched target rows
//! - Key joins, including composite keys and delimited key lists
//! - SQL Server and PostgreSQL backends plus an in-memory store with the same semantics
//!
//! ## Quick Start
//!
//! ```rust
//! use sluice::prelude::*;
//! use sluice::memory::MemoryDatabase;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Order {
//!     id: i64,
//!     customer: String,
//! }
//!
//! sluice::impl_entity!(Order, table = "Orders";
//!     id: "OrderId" => SqlType::BigInt, key, generated;
//!     customer: "Customer" => SqlType::Text(Some(80));
//! );
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let db = MemoryDatabase::new();
//! let mut conn = db.connect();
//! let mut ctx = BulkContext::new(&mut conn);
//!
//! let mut orders = vec![
//!     Order { id: 0, customer: "acme".into() },
//!     Order { id: 0, customer: "globex".into() },
//! ];
//! let outcome = ctx.bulk_add(&mut orders).await?;
//! assert_eq!(outcome.inserted_keys.len(), 2);
//! assert_eq!(orders[1].id, 2);
//! # Ok::<(), BulkError>(())
//! # }).unwrap();
//! ```
//!
//! ## Backends
//!
//! | Feature | Connection |
//! |---------|------------|
//! | `postgres` (default) | [`postgres::PgConnection`] |
//! | `mssql` | [`mssql::MssqlConnection`] |
//! | always | [`memory::MemoryConnection`] |

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use sluice_core::*;

/// PostgreSQL backend.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use sluice_postgres::*;
}

/// SQL Server backend.
#[cfg(feature = "mssql")]
#[cfg_attr(docsrs, doc(cfg(feature = "mssql")))]
pub mod mssql {
    pub use sluice_mssql::*;
}

/// Open a connection from a URL, picking the backend from its scheme.
///
/// `postgres://` and `postgresql://` need the `postgres` feature;
/// `mssql://` and `sqlserver://` need `mssql`. The connection is opened
/// lazily on first use.
pub fn connect(url: &str) -> BulkResult<Box<dyn BulkConnection>> {
    let scheme = url.split_once("://").map(|(s, _)| s).unwrap_or_default();
    match scheme {
        #[cfg(feature = "postgres")]
        "postgres" | "postgresql" => Ok(Box::new(postgres::PgConnection::from_url(url)?)),
        #[cfg(feature = "mssql")]
        "mssql" | "sqlserver" => Ok(Box::new(mssql::MssqlConnection::from_connection_string(
            url,
        )?)),
        "memory" => Ok(Box::new(memory::MemoryDatabase::new().connect())),
        other => Err(BulkError::unsupported_provider(other)
            .with_suggestion("Enable the `postgres` or `mssql` feature for that scheme")),
    }
}
