//! # sluice-mssql
//!
//! Microsoft SQL Server connection for the Sluice bulk engine.
//!
//! This crate provides:
//! - Connection configuration from URLs, ADO.NET strings or a builder
//! - A [`MssqlConnection`] implementing [`sluice_core::BulkConnection`] on `tiberius`
//! - Parameter binding and result decoding between `tiberius` cells and
//!   [`sluice_core::Value`]
//! - Mapping of server error numbers to Sluice error codes
//!
//! ## Example
//!
//! ```rust,ignore
//! use sluice_core::{BulkContext, Query};
//! use sluice_mssql::MssqlConnection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = MssqlConnection::from_connection_string(
//!         "Server=localhost;Database=sales;User Id=sa;Password=YourPassword123!;",
//!     )?;
//!     let mut ctx = BulkContext::new(&mut conn);
//!
//!     let removed = ctx.bulk_remove(&Query::<Order>::all()).await?;
//!     println!("removed {} orders", removed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod types;

pub use config::{EncryptionMode, MssqlConfig, MssqlConfigBuilder};
pub use connection::{MSSQL_PROVIDER, MssqlConnection};
pub use error::{MssqlError, MssqlResult};
pub use types::MssqlParam;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{MssqlConfig, MssqlConfigBuilder};
    pub use crate::connection::MssqlConnection;
    pub use crate::error::{MssqlError, MssqlResult};
}
