//! Connection trait shared by every backend

use crate::{ConnectionType, QueryResult, Result, RunSqlOptions, TableSchema};
use async_trait::async_trait;

/// A live connection to one backend data source.
///
/// One instance exists per declared connection name; it is shared by every
/// query of the owning package or project. Drivers that cannot run queries
/// concurrently serialize internally.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Declared connection name
    fn name(&self) -> &str;

    /// Backend type this connection was constructed for
    fn connection_type(&self) -> ConnectionType;

    /// SQL dialect spoken by the backend (e.g. "duckdb", "postgres")
    fn dialect_name(&self) -> &str {
        self.connection_type().as_str()
    }

    /// Run a SQL statement and collect its rows
    async fn run_sql(&self, sql: &str, options: &RunSqlOptions) -> Result<QueryResult>;

    /// Describe a table. `key` is the caller's name for the relation, `path` the
    /// backend path. Returns `None` when the relation does not exist.
    async fn fetch_table_schema(&self, key: &str, path: &str) -> Result<Option<TableSchema>>;

    /// Describe the columns produced by a select statement
    async fn fetch_select_schema(&self, sql: &str) -> Result<TableSchema> {
        let wrapped = format!("SELECT * FROM ({}) AS quay_select_schema LIMIT 0", sql);
        let result = self.run_sql(&wrapped, &RunSqlOptions::default()).await?;
        Ok(TableSchema {
            name: sql.to_string(),
            path: None,
            columns: result.columns,
            row_count: None,
        })
    }

    /// Lightweight round trip proving the backend is reachable
    async fn test(&self) -> Result<()> {
        self.run_sql("SELECT 1", &RunSqlOptions::with_row_limit(1))
            .await
            .map(|_| ())
    }

    /// Release the backend resources
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Whether the connection hands out pooled sessions
    fn is_pool(&self) -> Result<bool> {
        Ok(false)
    }

    /// Whether the backend can persist query results as tables
    fn can_persist(&self) -> Result<bool> {
        Ok(false)
    }

    /// Whether the backend can stream rows instead of buffering them
    fn can_stream(&self) -> Result<bool> {
        Ok(false)
    }
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name())
            .field("type", &self.connection_type())
            .field("closed", &self.is_closed())
            .finish()
    }
}
