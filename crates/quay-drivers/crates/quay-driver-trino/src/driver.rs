//! Trino driver implementation

use crate::protocol::{QueryPage, StatementResults};
use async_trait::async_trait;
use quay_core::sql::table_reference;
use quay_core::{
    ColumnMeta, Connection, ConnectionConfig, ConnectionType, DatabaseDriver, DriverCapabilities,
    QuayError, QueryResult, Result, RunSqlOptions, TableSchema, Value,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Per-request timeout for coordinator calls
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Trino driver
pub struct TrinoDriver;

impl TrinoDriver {
    /// Create a new Trino driver instance
    pub fn new() -> Self {
        tracing::debug!("Trino driver initialized");
        Self
    }
}

impl Default for TrinoDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinator base URL: scheme defaults to http, port is appended when set
pub fn base_url(server: &str, port: Option<u16>) -> String {
    let server = server.trim_end_matches('/');
    let with_scheme = if server.contains("://") {
        server.to_string()
    } else {
        format!("http://{}", server)
    };
    match port {
        Some(port) => format!("{}:{}", with_scheme, port),
        None => with_scheme,
    }
}

#[async_trait]
impl DatabaseDriver for TrinoDriver {
    fn connection_types(&self) -> &'static [ConnectionType] {
        &[ConnectionType::Trino]
    }

    fn display_name(&self) -> &'static str {
        "Trino"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            supports_pooling: false,
            supports_persistence: false,
            supports_streaming: true,
            supports_attachments: false,
        }
    }

    #[tracing::instrument(skip(self, config, _working_directory), fields(connection = %config.name))]
    async fn connect(
        &self,
        config: &ConnectionConfig,
        _working_directory: &Path,
    ) -> Result<Arc<dyn Connection>> {
        let trino = config.trino_connection.as_ref().ok_or_else(|| {
            QuayError::Configuration(format!(
                "trino connection \"{}\" is missing required field trinoConnection",
                config.name
            ))
        })?;
        let server = trino.server.as_deref().ok_or_else(|| {
            QuayError::Configuration(format!(
                "trino connection \"{}\" is missing required field trinoConnection.server",
                config.name
            ))
        })?;
        let user = trino.user.clone().ok_or_else(|| {
            QuayError::Configuration(format!(
                "trino connection \"{}\" is missing required field trinoConnection.user",
                config.name
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| QuayError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = base_url(server, trino.port);
        tracing::info!(base_url = %base_url, catalog = ?trino.catalog, "Trino connection configured");
        Ok(Arc::new(TrinoConnection {
            name: config.name.clone(),
            base_url,
            user,
            password: trino.password.clone(),
            catalog: trino.catalog.clone(),
            schema: trino.schema.clone(),
            client,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Stateless HTTP session against one coordinator
pub struct TrinoConnection {
    name: String,
    base_url: String,
    user: String,
    password: Option<String>,
    catalog: Option<String>,
    schema: Option<String>,
    client: reqwest::Client,
    closed: AtomicBool,
}

impl TrinoConnection {
    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder.header("X-Trino-User", &self.user);
        if let Some(catalog) = &self.catalog {
            builder = builder.header("X-Trino-Catalog", catalog);
        }
        if let Some(schema) = &self.schema {
            builder = builder.header("X-Trino-Schema", schema);
        }
        if let Some(password) = &self.password {
            builder = builder.basic_auth(&self.user, Some(password));
        }
        builder
    }

    async fn page(&self, builder: reqwest::RequestBuilder) -> Result<QueryPage> {
        let response = self
            .request(builder)
            .send()
            .await
            .map_err(|e| QuayError::Connection(format!("Trino request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuayError::Connection(format!(
                "Trino returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }
        response
            .json::<QueryPage>()
            .await
            .map_err(|e| QuayError::Query(format!("Invalid Trino response: {}", e)))
    }

    async fn cancel(&self, next_uri: &str) {
        if let Err(e) = self.request(self.client.delete(next_uri)).send().await {
            tracing::warn!(connection = %self.name, error = %e, "failed to cancel Trino query");
        }
    }
}

#[async_trait]
impl Connection for TrinoConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Trino
    }

    #[tracing::instrument(skip(self, sql, options), fields(connection = %self.name, sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn run_sql(&self, sql: &str, options: &RunSqlOptions) -> Result<QueryResult> {
        if self.is_closed() {
            return Err(QuayError::Connection("Connection is closed".into()));
        }
        let start = std::time::Instant::now();
        let mut results = StatementResults::new(options.row_limit);

        let url = format!("{}/v1/statement", self.base_url);
        let first = self
            .page(self.client.post(&url).body(sql.to_string()))
            .await?;
        let query_id = first.id.clone();
        let mut next = results.absorb(first)?;
        let mut last_uri = None;

        while let Some(uri) = next {
            let page = self.page(self.client.get(&uri)).await?;
            last_uri = page.next_uri.clone();
            next = results.absorb(page)?;
        }

        // Stop the coordinator from producing rows nobody will read
        if results.is_limited() {
            if let Some(uri) = last_uri {
                self.cancel(&uri).await;
            }
        }

        let mut result = results.into_query_result();
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            query_id = %query_id,
            row_count = result.rows.len(),
            duration_ms = result.execution_time_ms,
            "query completed"
        );
        Ok(result)
    }

    async fn fetch_table_schema(&self, key: &str, path: &str) -> Result<Option<TableSchema>> {
        let relation = table_reference("trino", path);
        let described = match self
            .run_sql(&format!("DESCRIBE {}", relation), &RunSqlOptions::default())
            .await
        {
            Ok(result) => result,
            Err(e) if e.to_string().contains("does not exist") => return Ok(None),
            Err(e) => return Err(e),
        };

        let columns = described
            .rows
            .iter()
            .enumerate()
            .map(|(ordinal, row)| {
                let name = row.get(0).and_then(Value::as_str).unwrap_or_default();
                let data_type = row.get(1).and_then(Value::as_str).unwrap_or("unknown");
                ColumnMeta::new(name, data_type, ordinal)
            })
            .collect();

        Ok(Some(TableSchema {
            name: key.to_string(),
            path: Some(path.to_string()),
            columns,
            row_count: None,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn can_stream(&self) -> Result<bool> {
        Ok(true)
    }
}
