//! DuckDB driver implementation

use crate::attach::{attach_statements, is_already_attached};
use async_trait::async_trait;
use quay_core::sql::{escape_sql_string, quote_identifier, table_reference};
use quay_core::{
    ColumnMeta, Connection, ConnectionConfig, ConnectionType, DatabaseDriver, DriverCapabilities,
    QuayError, QueryResult, Result, Row, RunSqlOptions, TableSchema, Value,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// DuckDB database driver
///
/// Serves both `duckdb` (embedded, in memory) and `motherduck` connections.
pub struct DuckDbDriver;

impl DuckDbDriver {
    /// Create a new DuckDB driver instance
    pub fn new() -> Self {
        tracing::debug!("DuckDB driver initialized");
        Self
    }
}

impl Default for DuckDbDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for DuckDbDriver {
    fn connection_types(&self) -> &'static [ConnectionType] {
        &[ConnectionType::Duckdb, ConnectionType::Motherduck]
    }

    fn display_name(&self) -> &'static str {
        "DuckDB"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            supports_pooling: false,
            supports_persistence: true,
            supports_streaming: true,
            supports_attachments: true,
        }
    }

    #[tracing::instrument(skip(self, config), fields(connection = %config.name, connection_type = %config.connection_type))]
    async fn connect(
        &self,
        config: &ConnectionConfig,
        working_directory: &Path,
    ) -> Result<Arc<dyn Connection>> {
        tracing::debug!("opening DuckDB session");

        let setup = session_setup(config, working_directory)?;
        let name = config.name.clone();
        let connection_type = config.connection_type;

        // Extension installs may hit the network; keep them off the async workers.
        let connection = tokio::task::spawn_blocking(move || {
            let connection = duckdb::Connection::open_in_memory().map_err(|e| {
                QuayError::Connection(format!("Failed to open DuckDB database: {}", e))
            })?;
            for step in setup {
                step.run(&connection)?;
            }
            Ok::<_, QuayError>(connection)
        })
        .await
        .map_err(|e| QuayError::Internal(format!("DuckDB setup task failed: {}", e)))??;

        tracing::info!(working_directory = %working_directory.display(), "DuckDB session ready");
        Ok(Arc::new(DuckDbConnection::new(
            connection,
            name,
            connection_type,
        )))
    }
}

/// One group of setup statements. Attachment steps tolerate "already attached".
struct SetupStep {
    attachment: Option<String>,
    statements: Vec<String>,
}

impl SetupStep {
    fn run(&self, connection: &duckdb::Connection) -> Result<()> {
        for statement in &self.statements {
            if let Err(e) = connection.execute_batch(statement) {
                let message = e.to_string();
                match &self.attachment {
                    Some(name) if is_already_attached(&message) => {
                        tracing::debug!(attachment = %name, "database already attached");
                    }
                    Some(name) => {
                        return Err(QuayError::Connection(format!(
                            "Failed to attach database \"{}\": {}",
                            name, message
                        )));
                    }
                    None => {
                        return Err(QuayError::Connection(format!(
                            "DuckDB session setup failed: {}",
                            message
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn session_setup(config: &ConnectionConfig, working_directory: &Path) -> Result<Vec<SetupStep>> {
    let mut steps = vec![SetupStep {
        attachment: None,
        statements: vec![format!(
            "SET file_search_path = '{}'",
            escape_sql_string(&working_directory.to_string_lossy())
        )],
    }];

    match config.connection_type {
        ConnectionType::Motherduck => {
            let md = config.motherduck_connection.as_ref().ok_or_else(|| {
                QuayError::Configuration(format!(
                    "motherduck connection \"{}\" is missing required field motherduckConnection",
                    config.name
                ))
            })?;
            let token = md.access_token.as_deref().unwrap_or_default();
            let mut statements = vec![
                "INSTALL motherduck".to_string(),
                "LOAD motherduck".to_string(),
                format!("SET motherduck_token = '{}'", escape_sql_string(token)),
                "ATTACH 'md:'".to_string(),
            ];
            if let Some(database) = md.database.as_deref().filter(|d| !d.is_empty()) {
                statements.push(format!("USE {}", quote_identifier(database)));
            }
            steps.push(SetupStep {
                attachment: None,
                statements,
            });
        }
        _ => {
            if let Some(duckdb) = &config.duckdb_connection {
                for attached in &duckdb.attached_databases {
                    steps.push(SetupStep {
                        attachment: Some(attached.name.clone()),
                        statements: attach_statements(attached)?,
                    });
                }
            }
        }
    }
    Ok(steps)
}

/// DuckDB connection wrapper implementing the Connection trait
pub struct DuckDbConnection {
    connection: std::sync::Mutex<duckdb::Connection>,
    name: String,
    connection_type: ConnectionType,
    closed: AtomicBool,
}

impl DuckDbConnection {
    /// Wrap an open DuckDB session
    pub fn new(connection: duckdb::Connection, name: String, connection_type: ConnectionType) -> Self {
        Self {
            connection: std::sync::Mutex::new(connection),
            name,
            connection_type,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QuayError::Connection("Connection is closed".to_string()));
        }
        Ok(())
    }

    fn query_blocking(&self, sql: &str, row_limit: Option<usize>) -> Result<QueryResult> {
        let conn = self
            .connection
            .lock()
            .map_err(|e| QuayError::Internal(format!("Lock poisoned: {}", e)))?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| QuayError::Query(format!("Prepare failed: {}", e)))?;

        // Execute query first, then get column info
        let mut duckdb_rows = stmt
            .query([])
            .map_err(|e| QuayError::Query(format!("Query failed: {}", e)))?;

        let column_names: Vec<String> = duckdb_rows
            .as_ref()
            .map(|r| r.column_names().iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();
        let column_count = column_names.len();

        let mut raw_rows: Vec<Vec<Value>> = Vec::new();
        while let Some(row) = duckdb_rows
            .next()
            .map_err(|e| QuayError::Query(format!("Row fetch failed: {}", e)))?
        {
            if row_limit.is_some_and(|limit| raw_rows.len() >= limit) {
                break;
            }
            raw_rows.push((0..column_count).map(|i| row_to_value(row, i)).collect());
        }

        let columns = column_names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let data_type = raw_rows
                    .iter()
                    .map(|values| &values[idx])
                    .find(|v| !v.is_null())
                    .map(value_type_name)
                    .unwrap_or("UNKNOWN");
                ColumnMeta::new(name.clone(), data_type, idx)
            })
            .collect();

        let rows = raw_rows
            .into_iter()
            .map(|values| Row::new(column_names.clone(), values))
            .collect();

        Ok(QueryResult::new(columns, rows))
    }

    /// Run a DESCRIBE statement and turn its rows into column metadata
    fn describe_blocking(&self, describe_sql: &str) -> Result<Vec<ColumnMeta>> {
        let result = self.query_blocking(describe_sql, None)?;
        Ok(result
            .rows
            .iter()
            .enumerate()
            .map(|(ordinal, row)| {
                let name = row
                    .get_by_name("column_name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let data_type = row
                    .get_by_name("column_type")
                    .and_then(Value::as_str)
                    .unwrap_or("UNKNOWN");
                let mut column = ColumnMeta::new(name, data_type, ordinal);
                column.nullable = row
                    .get_by_name("null")
                    .and_then(Value::as_str)
                    .map(|n| n.eq_ignore_ascii_case("YES"))
                    .unwrap_or(true);
                column
            })
            .collect())
    }
}

/// File paths are read through DuckDB's scanners, anything else is a relation
fn is_missing_relation(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("does not exist") || lower.contains("no files found")
}

#[async_trait]
impl Connection for DuckDbConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    fn dialect_name(&self) -> &str {
        "duckdb"
    }

    #[tracing::instrument(skip(self, sql, options), fields(connection = %self.name, sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn run_sql(&self, sql: &str, options: &RunSqlOptions) -> Result<QueryResult> {
        self.ensure_not_closed()?;
        let start = std::time::Instant::now();

        let mut result = self.query_blocking(sql, options.row_limit)?;
        result.execution_time_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            row_count = result.rows.len(),
            duration_ms = result.execution_time_ms,
            "query completed"
        );
        Ok(result)
    }

    async fn fetch_table_schema(&self, key: &str, path: &str) -> Result<Option<TableSchema>> {
        self.ensure_not_closed()?;
        let describe = format!("DESCRIBE SELECT * FROM {}", table_reference("duckdb", path));
        match self.describe_blocking(&describe) {
            Ok(columns) => Ok(Some(TableSchema {
                name: key.to_string(),
                path: Some(path.to_string()),
                columns,
                row_count: None,
            })),
            Err(e) if is_missing_relation(&e.to_string()) => {
                tracing::debug!(key, path, "table not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_select_schema(&self, sql: &str) -> Result<TableSchema> {
        self.ensure_not_closed()?;
        let columns = self.describe_blocking(&format!("DESCRIBE {}", sql))?;
        Ok(TableSchema {
            name: sql.to_string(),
            path: None,
            columns,
            row_count: None,
        })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!(connection = %self.name, "DuckDB connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn can_persist(&self) -> Result<bool> {
        Ok(true)
    }

    fn can_stream(&self) -> Result<bool> {
        Ok(true)
    }
}

fn row_to_value(row: &duckdb::Row, idx: usize) -> Value {
    if let Ok(v) = row.get::<_, Option<i64>>(idx) {
        return v.map(Value::Int64).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.get::<_, Option<f64>>(idx) {
        return v.map(Value::Float64).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.get::<_, Option<String>>(idx) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.get::<_, Option<bool>>(idx) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.get::<_, Option<Vec<u8>>>(idx) {
        return v.map(Value::Bytes).unwrap_or(Value::Null);
    }
    Value::Null
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "BOOLEAN",
        Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => "BIGINT",
        Value::Float32(_) | Value::Float64(_) => "DOUBLE",
        Value::Decimal(_) => "DECIMAL",
        Value::String(_) => "VARCHAR",
        Value::Bytes(_) => "BLOB",
        _ => "UNKNOWN",
    }
}

impl std::fmt::Debug for DuckDbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbConnection")
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
