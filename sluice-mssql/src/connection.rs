//! Microsoft SQL Server connection.

use async_trait::async_trait;
use sluice_core::{BulkConnection, BulkError, BulkResult, ResultRow, Statement, sluice_debug};
use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::MssqlConfig;
use crate::error::{MssqlError, MssqlResult};
use crate::types;

/// Provider name SQL Server connections report.
pub const MSSQL_PROVIDER: &str = "sqlserver";

type TdsClient = Client<Compat<TcpStream>>;

/// A single SQL Server connection, opened on first use.
pub struct MssqlConnection {
    config: MssqlConfig,
    client: Option<TdsClient>,
    in_transaction: bool,
}

impl MssqlConnection {
    /// Create an unopened connection.
    pub fn new(config: MssqlConfig) -> Self {
        Self {
            config,
            client: None,
            in_transaction: false,
        }
    }

    /// Create an unopened connection from a connection string.
    pub fn from_connection_string(conn_str: impl AsRef<str>) -> MssqlResult<Self> {
        Ok(Self::new(MssqlConfig::from_connection_string(conn_str)?))
    }

    /// The configuration in use.
    pub fn config(&self) -> &MssqlConfig {
        &self.config
    }

    /// Whether a transaction begun through this connection is active.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Drop the underlying client.
    pub async fn close(&mut self) -> MssqlResult<()> {
        if let Some(client) = self.client.take() {
            client.close().await?;
            debug!(host = %self.config.host, "SQL Server connection closed");
        }
        self.in_transaction = false;
        Ok(())
    }

    fn client(&mut self) -> MssqlResult<&mut TdsClient> {
        self.client
            .as_mut()
            .ok_or_else(|| MssqlError::connection("connection is not open"))
    }

    async fn simple(&mut self, sql: &str) -> MssqlResult<()> {
        sluice_debug!(sql = %sql, "executing batch");
        self.client()?
            .simple_query(sql)
            .await?
            .into_results()
            .await?;
        Ok(())
    }

    async fn execute_sql(&mut self, statement: &Statement) -> MssqlResult<u64> {
        sluice_debug!(sql = %statement.sql, params = statement.params.len(), "executing statement");
        let query = types::bind(&statement.sql, &statement.params);
        let result = query.execute(self.client()?).await?;
        Ok(result.total())
    }

    async fn query_sql(&mut self, statement: &Statement) -> MssqlResult<Vec<ResultRow>> {
        sluice_debug!(sql = %statement.sql, params = statement.params.len(), "executing query");
        let query = types::bind(&statement.sql, &statement.params);
        let rows = query
            .query(self.client()?)
            .await?
            .into_first_result()
            .await?;
        rows.into_iter().map(types::row_to_result).collect()
    }
}

async fn tcp_connect(config: &Config) -> MssqlResult<TcpStream> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| MssqlError::connection(format!("{}: {}", config.get_addr(), e)))?;
    tcp.set_nodelay(true)
        .map_err(|e| MssqlError::connection(e.to_string()))?;
    Ok(tcp)
}

async fn connect(config: Config) -> MssqlResult<TdsClient> {
    let tcp = tcp_connect(&config).await?;
    match Client::connect(config.clone(), tcp.compat_write()).await {
        Ok(client) => Ok(client),
        Err(tiberius::error::Error::Routing { host, port }) => {
            warn!(host = %host, port, "SQL Server redirected the connection");
            let mut routed = config;
            routed.host(&host);
            routed.port(port);
            let tcp = tcp_connect(&routed).await?;
            Ok(Client::connect(routed, tcp.compat_write()).await?)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl BulkConnection for MssqlConnection {
    fn provider_name(&self) -> &str {
        MSSQL_PROVIDER
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    async fn open(&mut self) -> BulkResult<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let tiberius_config = self.config.to_tiberius_config()?;
        let timeout = self.config.connect_timeout;
        let client = tokio::time::timeout(timeout, connect(tiberius_config))
            .await
            .map_err(|_| MssqlError::Timeout(timeout.as_millis() as u64))??;

        info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            "connected to SQL Server"
        );
        self.client = Some(client);
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
        self.simple("BEGIN TRANSACTION").await?;
        self.in_transaction = true;
        debug!("transaction started");
        Ok(())
    }

    async fn commit(&mut self) -> BulkResult<()> {
        if !self.in_transaction {
            return Err(BulkError::transaction("no active transaction to commit"));
        }
        self.simple("COMMIT").await?;
        self.in_transaction = false;
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> BulkResult<()> {
        if !self.in_transaction {
            return Err(BulkError::transaction("no active transaction to roll back"));
        }
        self.in_transaction = false;
        self.simple("ROLLBACK").await?;
        debug!("transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sluice_core::{ErrorCode, StatementKind};

    fn connection() -> MssqlConnection {
        MssqlConnection::from_connection_string(
            "Server=localhost;Database=sales;User Id=sa;Password=pw;",
        )
        .unwrap()
    }

    #[test]
    fn test_new_connection_is_closed() {
        let conn = connection();
        assert_eq!(conn.provider_name(), "sqlserver");
        assert!(!conn.is_open());
        assert!(!conn.in_transaction());
        assert_eq!(conn.config().database, "sales");
    }

    #[tokio::test]
    async fn test_execute_requires_open_connection() {
        let mut conn = connection();
        let stmt = Statement::new(StatementKind::Counted, "DELETE FROM [Orders]");
        let err = conn.execute(&stmt).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectionFailed);
    }

    #[tokio::test]
    async fn test_commit_without_transaction() {
        let mut conn = connection();
        let err = conn.commit().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransactionFailed);
        let err = conn.rollback().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransactionFailed);
    }

    #[tokio::test]
    async fn test_open_rejects_unusable_config() {
        let mut conn = MssqlConnection::new(MssqlConfig {
            database: "sales".to_string(),
            ..MssqlConfig::default()
        });
        let err = conn.open().await.unwrap_err();
        assert!(err.is_configuration());
        assert!(!conn.is_open());
    }
}
