//! The connection contract bulk executors run against.

use async_trait::async_trait;

use crate::correlate::ResultRow;
use crate::error::BulkResult;
use crate::memory::MemoryConnection;
use crate::statement::Statement;

/// A single open (or openable) database connection.
///
/// Executors open the connection when it is not already open and reuse it
/// otherwise, so a caller-managed transaction can span several bulk calls.
#[async_trait]
pub trait BulkConnection: Send {
    /// Provider name used to resolve the dialect, e.g. `"sqlserver"`.
    fn provider_name(&self) -> &str;

    /// Whether the connection is open.
    fn is_open(&self) -> bool;

    /// Open the connection.
    async fn open(&mut self) -> BulkResult<()>;

    /// Execute a statement, returning the rows affected.
    async fn execute(&mut self, statement: &Statement) -> BulkResult<u64>;

    /// Execute a statement and read its first result set.
    async fn query(&mut self, statement: &Statement) -> BulkResult<Vec<ResultRow>>;

    /// Begin a transaction.
    async fn begin(&mut self) -> BulkResult<()>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> BulkResult<()>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> BulkResult<()>;

    /// The in-process store behind this connection, if any.
    fn as_memory(&mut self) -> Option<&mut MemoryConnection> {
        None
    }
}

/// Open `conn` unless it is already open.
pub async fn ensure_open(conn: &mut dyn BulkConnection) -> BulkResult<()> {
    if !conn.is_open() {
        conn.open().await?;
    }
    Ok(())
}
