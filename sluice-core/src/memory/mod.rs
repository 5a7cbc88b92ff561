//! The in-memory dialect.
//!
//! A [`MemoryDatabase`] holds rows in process. Bulk operations run through
//! [`MemoryExecutor`], which materializes the rows a query selects and
//! applies its change through a [`ChangeSet`]; no SQL is generated. Useful in
//! tests and as the reference semantics of the SQL dialects.
//!
//! ```rust
//! use sluice_core::memory::MemoryDatabase;
//! use sluice_core::BulkConnection;
//!
//! let db = MemoryDatabase::new();
//! let conn = db.connect();
//! assert_eq!(conn.provider_name(), "memory");
//! ```

mod changes;
mod connection;
mod executor;
mod predicates;
mod store;

pub use changes::{ChangeSet, SavedChanges};
pub use connection::{MEMORY_PROVIDER, MemoryConnection};
pub use executor::MemoryExecutor;
pub use predicates::KeyPredicate;
pub use store::{MemoryDatabase, MemoryTable, StoredRow};
