//! PostgreSQL connection.

use async_trait::async_trait;
use sluice_core::{BulkConnection, BulkError, BulkResult, ResultRow, Statement, sluice_debug};
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::config::PgConfig;
use crate::error::{PgError, PgResult};
use crate::types;

/// Provider name PostgreSQL connections report.
pub const PG_PROVIDER: &str = "postgres";

/// A single PostgreSQL connection, opened on first use.
///
/// The protocol driver runs on a spawned task for as long as the client lives.
pub struct PgConnection {
    config: PgConfig,
    client: Option<Client>,
    driver: Option<JoinHandle<()>>,
    in_transaction: bool,
}

impl PgConnection {
    /// Create an unopened connection.
    pub fn new(config: PgConfig) -> Self {
        Self {
            config,
            client: None,
            driver: None,
            in_transaction: false,
        }
    }

    /// Create an unopened connection from a database URL.
    pub fn from_url(url: impl Into<String>) -> PgResult<Self> {
        Ok(Self::new(PgConfig::from_url(url)?))
    }

    /// The configuration in use.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Whether a transaction begun through this connection is active.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Drop the client and stop the driver task.
    pub fn close(&mut self) {
        self.client = None;
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.in_transaction = false;
    }

    fn client(&self) -> PgResult<&Client> {
        match &self.client {
            Some(client) if !client.is_closed() => Ok(client),
            Some(_) => Err(PgError::connection("connection was closed by the server")),
            None => Err(PgError::connection("connection is not open")),
        }
    }

    async fn batch(&self, sql: &str) -> PgResult<()> {
        sluice_debug!(sql = %sql, "executing batch");
        self.client()?.batch_execute(sql).await?;
        Ok(())
    }

    async fn execute_sql(&self, statement: &Statement) -> PgResult<u64> {
        sluice_debug!(sql = %statement.sql, params = statement.params.len(), "executing statement");
        let bound = types::params(&statement.params);
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        Ok(self.client()?.execute(statement.sql.as_str(), &refs).await?)
    }

    async fn query_sql(&self, statement: &Statement) -> PgResult<Vec<ResultRow>> {
        sluice_debug!(sql = %statement.sql, params = statement.params.len(), "executing query");
        let bound = types::params(&statement.params);
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self.client()?.query(statement.sql.as_str(), &refs).await?;
        rows.iter().map(types::row_to_result).collect()
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl BulkConnection for PgConnection {
    fn provider_name(&self) -> &str {
        PG_PROVIDER
    }

    fn is_open(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.is_closed())
    }

    async fn open(&mut self) -> BulkResult<()> {
        if self.is_open() {
            return Ok(());
        }
        let pg_config = self.config.to_pg_config()?;
        let timeout = self.config.connect_timeout;
        let (client, connection) = tokio::time::timeout(timeout, pg_config.connect(NoTls))
            .await
            .map_err(|_| PgError::Timeout(timeout.as_millis() as u64))?
            .map_err(PgError::from)?;

        let host = self.config.host.clone();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(host = %host, error = %e, "postgres connection failed");
            }
        });

        info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            "connected to PostgreSQL"
        );
        self.close();
        self.client = Some(client);
        self.driver = Some(driver);
        Ok(())
    }

    async fn execute(&mut self, statement: &Statement) -> BulkResult<u64> {
        Ok(self.execute_sql(statement).await?)
    }

    async fn query(&mut self, statement: &Statement) -> BulkResult<Vec<ResultRow>> {
        Ok(self.query_sql(statement).await?)
    }

    async fn begin(&mut self) -> BulkResult<()> {
        if self.in_transaction {
            return Err(BulkError::transaction("a transaction is already active"));
        }
        sluice_core::ensure_open(self).await?;
        self.batch("BEGIN").await?;
        self.in_transaction = true;
        debug!("transaction started");
        Ok(())
    }

    async fn commit(&mut self) -> BulkResult<()> {
        if !self.in_transaction {
            return Err(BulkError::transaction("no active transaction to commit"));
        }
        self.in_transaction = false;
        self.batch("COMMIT").await?;
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> BulkResult<()> {
        if !self.in_transaction {
            return Err(BulkError::transaction("no active transaction to roll back"));
        }
        self.in_transaction = false;
        self.batch("ROLLBACK").await?;
        debug!("transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sluice_core::{ErrorCode, StatementKind};

    #[test]
    fn test_new_connection_is_closed() {
        let conn = PgConnection::from_url("postgresql://loader@localhost/sales").unwrap();
        assert_eq!(conn.provider_name(), "postgres");
        assert!(!conn.is_open());
        assert!(!conn.in_transaction());
        assert_eq!(conn.config().database, "sales");
    }

    #[tokio::test]
    async fn test_query_requires_open_connection() {
        let mut conn = PgConnection::from_url("postgresql://loader@localhost/sales").unwrap();
        let stmt = Statement::new(StatementKind::Rows, "SELECT 1");
        let err = conn.query(&stmt).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectionFailed);
    }

    #[tokio::test]
    async fn test_commit_without_transaction() {
        let mut conn = PgConnection::from_url("postgresql://loader@localhost/sales").unwrap();
        let err = conn.commit().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransactionFailed);
    }

    #[tokio::test]
    async fn test_open_rejects_required_tls() {
        let mut conn =
            PgConnection::from_url("postgresql://loader@localhost/sales?sslmode=require").unwrap();
        let err = conn.open().await.unwrap_err();
        assert!(err.is_configuration());
    }
}
