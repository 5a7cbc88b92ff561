use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::connection::BulkConnection;
use crate::correlate::ResultRow;
use crate::error::{BulkError, BulkResult};
use crate::statement::Statement;

use super::store::{MemoryDatabase, MemoryTable};

/// Provider name of in-memory connections.
pub const MEMORY_PROVIDER: &str = "memory";

/// A connection to a [`MemoryDatabase`].
///
/// Transactions snapshot every table on `begin`; `rollback` restores the
/// snapshot.
#[derive(Debug)]
pub struct MemoryConnection {
    db: MemoryDatabase,
    open: bool,
    snapshot: Option<HashMap<String, MemoryTable>>,
}

impl MemoryConnection {
    /// Create a closed connection to `db`.
    pub fn new(db: MemoryDatabase) -> Self {
        Self {
            db,
            open: false,
            snapshot: None,
        }
    }

    /// The database behind this connection.
    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    /// Whether a transaction is active.
    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn sql_unsupported(statement: &Statement) -> BulkError {
        BulkError::not_implemented("the in-memory provider does not execute SQL")
            .with_sql(&statement.sql)
    }
}

#[async_trait]
impl BulkConnection for MemoryConnection {
    fn provider_name(&self) -> &str {
        MEMORY_PROVIDER
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> BulkResult<()> {
        self.open = true;
        Ok(())
    }

    async fn execute(&mut self, statement: &Statement) -> BulkResult<u64> {
        Err(Self::sql_unsupported(statement))
    }

    async fn query(&mut self, statement: &Statement) -> BulkResult<Vec<ResultRow>> {
        Err(Self::sql_unsupported(statement))
    }

    async fn begin(&mut self) -> BulkResult<()> {
        if self.snapshot.is_some() {
            return Err(BulkError::transaction("a transaction is already active"));
        }
        self.open = true;
        self.snapshot = Some(self.db.snapshot());
        debug!("memory transaction started");
        Ok(())
    }

    async fn commit(&mut self) -> BulkResult<()> {
        self.snapshot
            .take()
            .map(|_| debug!("memory transaction committed"))
            .ok_or_else(|| BulkError::transaction("no active transaction to commit"))
    }

    async fn rollback(&mut self) -> BulkResult<()> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| BulkError::transaction("no active transaction to roll back"))?;
        self.db.restore(snapshot);
        debug!("memory transaction rolled back");
        Ok(())
    }

    fn as_memory(&mut self) -> Option<&mut MemoryConnection> {
        Some(self)
    }
}
