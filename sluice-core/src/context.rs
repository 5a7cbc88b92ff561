//! The caller entry point.
//!
//! [`BulkContext`] wraps a borrowed connection and picks the executor for its
//! provider on every call:
//!
//! ```rust
//! use sluice_core::{BulkContext, Query};
//! use sluice_core::entity::SqlType;
//! use sluice_core::memory::MemoryDatabase;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Tag {
//!     id: i32,
//!     label: String,
//! }
//!
//! sluice_core::impl_entity!(Tag, table = "Tags";
//!     id: "Id" => SqlType::Int, key, generated;
//!     label: "Label" => SqlType::Text(Some(40));
//! );
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let db = MemoryDatabase::new();
//! let mut conn = db.connect();
//! let mut ctx = BulkContext::new(&mut conn);
//!
//! let mut tags = vec![Tag { id: 0, label: "new".into() }];
//! let outcome = ctx.bulk_add(&mut tags).await.unwrap();
//! assert_eq!(outcome.inserted_keys.len(), 1);
//! assert_eq!(tags[0].id, 1);
//!
//! let removed = ctx.bulk_remove(&Query::<Tag>::all()).await.unwrap();
//! assert_eq!(removed, 1);
//! # }
//! ```

use tracing::debug;

use crate::config::BulkConfig;
use crate::connection::BulkConnection;
use crate::correlate::BulkOutcome;
use crate::dialect::Dialect;
use crate::entity::Entity;
use crate::error::BulkResult;
use crate::executor::{BulkExecutor, MergeOptions, RelationalExecutor};
use crate::key::Key;
use crate::memory::MemoryExecutor;
use crate::query::Query;

/// Bulk operations over one borrowed connection.
pub struct BulkContext<'c> {
    conn: &'c mut dyn BulkConnection,
    config: BulkConfig,
}

impl<'c> BulkContext<'c> {
    /// Wrap a connection with the default configuration.
    pub fn new(conn: &'c mut dyn BulkConnection) -> Self {
        Self {
            conn,
            config: BulkConfig::default(),
        }
    }

    /// Wrap a connection with a validated configuration.
    pub fn with_config(conn: &'c mut dyn BulkConnection, config: BulkConfig) -> BulkResult<Self> {
        config.validate()?;
        Ok(Self { conn, config })
    }

    /// The configuration in use.
    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    /// The dialect of the wrapped connection.
    pub fn dialect(&self) -> BulkResult<Dialect> {
        Dialect::from_provider(self.conn.provider_name())
    }

    /// The wrapped connection.
    pub fn connection(&mut self) -> &mut dyn BulkConnection {
        &mut *self.conn
    }

    fn executor<E: Entity>(&self) -> BulkResult<Box<dyn BulkExecutor<E>>> {
        let dialect = self.dialect()?;
        debug!(%dialect, entity = std::any::type_name::<E>(), "resolved bulk executor");
        Ok(match dialect {
            Dialect::InMemory => Box::new(MemoryExecutor::new(self.config.clone())),
            sql => Box::new(RelationalExecutor::new(sql, self.config.clone())?),
        })
    }

    /// Narrow `root` to rows whose key is one of `keys`.
    pub fn join<E: Entity>(&self, root: Query<E>, keys: &[Key]) -> BulkResult<Query<E>> {
        self.executor::<E>()?.join(root, keys)
    }

    /// Narrow `root` to a delimited list of simple keys.
    pub fn join_delimited<E: Entity>(
        &self,
        root: Query<E>,
        keys: &str,
        delimiter: char,
    ) -> BulkResult<Query<E>> {
        self.executor::<E>()?.join_delimited(root, keys, delimiter)
    }

    /// Insert `records`, writing generated keys back onto them.
    pub async fn bulk_add<E: Entity>(&mut self, records: &mut [E]) -> BulkResult<BulkOutcome> {
        let executor = self.executor::<E>()?;
        executor.bulk_add(&mut *self.conn, records).await
    }

    /// Copy `properties` from `replacement` onto every row `query` selects.
    pub async fn bulk_update<E: Entity>(
        &mut self,
        query: &Query<E>,
        replacement: &E,
        properties: &[&str],
    ) -> BulkResult<u64> {
        let executor = self.executor::<E>()?;
        executor
            .bulk_update(&mut *self.conn, query, replacement, properties)
            .await
    }

    /// Write per-key values built by `factory` onto the selected rows in `keys`.
    pub async fn bulk_update_with<E, F>(
        &mut self,
        query: &Query<E>,
        keys: &[Key],
        properties: &[&str],
        factory: F,
    ) -> BulkResult<u64>
    where
        E: Entity,
        F: Fn(&Key) -> E + Send + Sync,
    {
        let executor = self.executor::<E>()?;
        executor
            .bulk_update_with(&mut *self.conn, query, keys, properties, &factory)
            .await
    }

    /// Delete every row `query` selects.
    pub async fn bulk_remove<E: Entity>(&mut self, query: &Query<E>) -> BulkResult<u64> {
        let executor = self.executor::<E>()?;
        executor.bulk_remove(&mut *self.conn, query, false, &[]).await
    }

    /// Delete the selected rows whose key is one of `keys`.
    pub async fn bulk_remove_keys<E: Entity>(
        &mut self,
        query: &Query<E>,
        keys: &[Key],
    ) -> BulkResult<u64> {
        let executor = self.executor::<E>()?;
        executor.bulk_remove(&mut *self.conn, query, true, keys).await
    }

    /// Merge `records` into the rows `query` selects.
    pub async fn bulk_merge<E: Entity>(
        &mut self,
        query: &Query<E>,
        records: &mut [E],
        options: MergeOptions<E>,
    ) -> BulkResult<BulkOutcome> {
        let executor = self.executor::<E>()?;
        executor
            .bulk_merge(&mut *self.conn, query, records, options)
            .await
    }

    /// Begin a caller-managed transaction on the connection.
    pub async fn begin(&mut self) -> BulkResult<()> {
        self.conn.begin().await
    }

    /// Commit the caller-managed transaction.
    pub async fn commit(&mut self) -> BulkResult<()> {
        self.conn.commit().await
    }

    /// Roll back the caller-managed transaction.
    pub async fn rollback(&mut self) -> BulkResult<()> {
        self.conn.rollback().await
    }
}
