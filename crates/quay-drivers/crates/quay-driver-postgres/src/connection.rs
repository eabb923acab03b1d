//! PostgreSQL connection implementation

use async_trait::async_trait;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use quay_core::sql::split_table_path;
use quay_core::{
    ColumnMeta, Connection, ConnectionType, QuayError, QueryResult, Result, Row, RunSqlOptions,
    TableSchema, Value,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Row as PgRow};

/// A single PostgreSQL session
pub struct PostgresConnection {
    name: String,
    client: RwLock<Option<Client>>,
    closed: AtomicBool,
}

impl PostgresConnection {
    /// Open a session. TLS is negotiated according to the config's ssl mode.
    pub async fn connect(name: String, config: tokio_postgres::Config) -> Result<Self> {
        tracing::info!(
            connection = %name,
            hosts = ?config.get_hosts(),
            database = ?config.get_dbname(),
            ssl_mode = ?config.get_ssl_mode(),
            "connecting to PostgreSQL database"
        );

        let tls_connector = TlsConnector::builder()
            .build()
            .map_err(|e| QuayError::Connection(format!("Failed to build TLS connector: {}", e)))?;
        let tls = MakeTlsConnector::new(tls_connector);

        let (client, connection) = config
            .connect(tls)
            .await
            .map_err(|e| QuayError::Connection(format!("Failed to connect to PostgreSQL: {}", e)))?;

        let task_name = name.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(connection = %task_name, error = %e, "PostgreSQL connection error");
            }
        });

        tracing::info!(connection = %name, "PostgreSQL connection established");
        Ok(Self {
            name,
            client: RwLock::new(Some(client)),
            closed: AtomicBool::new(false),
        })
    }
}

fn column_meta(columns: &[tokio_postgres::Column]) -> Vec<ColumnMeta> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, col)| ColumnMeta::new(col.name(), col.type_().name(), idx))
        .collect()
}

#[async_trait]
impl Connection for PostgresConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Postgres
    }

    #[tracing::instrument(skip(self, sql, options), fields(connection = %self.name, sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn run_sql(&self, sql: &str, options: &RunSqlOptions) -> Result<QueryResult> {
        let start = std::time::Instant::now();
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| QuayError::Connection("Connection is closed".into()))?;

        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| QuayError::Query(format!("Failed to prepare query: {}", e)))?;
        let pg_rows = client
            .query(&statement, &[])
            .await
            .map_err(|e| QuayError::Query(format!("Failed to execute query: {}", e)))?;

        let columns = column_meta(statement.columns());
        let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let limit = options.row_limit.unwrap_or(usize::MAX);

        let mut rows = Vec::with_capacity(pg_rows.len().min(limit));
        for pg_row in pg_rows.iter().take(limit) {
            let values = (0..columns.len())
                .map(|idx| postgres_to_value(pg_row, idx))
                .collect();
            rows.push(Row::new(column_names.clone(), values));
        }

        let mut result = QueryResult::new(columns, rows);
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            row_count = result.rows.len(),
            duration_ms = result.execution_time_ms,
            "query completed"
        );
        Ok(result)
    }

    async fn fetch_table_schema(&self, key: &str, path: &str) -> Result<Option<TableSchema>> {
        let parts = split_table_path(path);
        let (schema, table) = match parts.as_slice() {
            [table] => ("public".to_string(), table.clone()),
            [.., schema, table] => (schema.clone(), table.clone()),
            [] => return Ok(None),
        };

        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| QuayError::Connection("Connection is closed".into()))?;
        let pg_rows = client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable::text \
                 FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                &[&schema, &table],
            )
            .await
            .map_err(|e| QuayError::Query(format!("Failed to describe table: {}", e)))?;

        if pg_rows.is_empty() {
            return Ok(None);
        }

        let columns = pg_rows
            .iter()
            .enumerate()
            .map(|(ordinal, row)| {
                let name: String = row.get(0);
                let data_type: String = row.get(1);
                let nullable: String = row.get(2);
                let mut column = ColumnMeta::new(name, data_type, ordinal);
                column.nullable = nullable.eq_ignore_ascii_case("YES");
                column
            })
            .collect();

        Ok(Some(TableSchema {
            name: key.to_string(),
            path: Some(path.to_string()),
            columns,
            row_count: None,
        }))
    }

    /// Prepares the statement without running it; the server reports the
    /// result columns
    async fn fetch_select_schema(&self, sql: &str) -> Result<TableSchema> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| QuayError::Connection("Connection is closed".into()))?;
        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| QuayError::Query(format!("Failed to prepare query: {}", e)))?;

        Ok(TableSchema {
            name: sql.to_string(),
            path: None,
            columns: column_meta(statement.columns()),
            row_count: None,
        })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the client ends the background connection task
        self.client.write().await.take();
        tracing::debug!(connection = %self.name, "PostgreSQL connection closed");
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

/// NUMERIC values rendered as exact decimal text
#[derive(Debug)]
struct PgNumeric(String);

impl PgNumeric {
    fn decode(raw: &[u8]) -> std::result::Result<String, Box<dyn std::error::Error + Sync + Send>> {
        if raw.len() < 8 {
            return Err("invalid NUMERIC payload: too short".into());
        }
        let ndigits = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        let weight = i16::from_be_bytes([raw[2], raw[3]]) as i32;
        let sign = u16::from_be_bytes([raw[4], raw[5]]);
        let dscale = u16::from_be_bytes([raw[6], raw[7]]) as usize;
        if raw.len() < 8 + ndigits * 2 {
            return Err("invalid NUMERIC payload: truncated digits".into());
        }
        if sign == 0xC000 {
            return Ok("NaN".to_string());
        }

        let digit = |index: i32| -> u16 {
            if index < 0 || index as usize >= ndigits {
                return 0;
            }
            let offset = 8 + index as usize * 2;
            u16::from_be_bytes([raw[offset], raw[offset + 1]])
        };

        let mut text = String::new();
        if sign == 0x4000 {
            text.push('-');
        }
        if weight < 0 {
            text.push('0');
        } else {
            for index in 0..=weight {
                if index == 0 {
                    text.push_str(&digit(index).to_string());
                } else {
                    text.push_str(&format!("{:04}", digit(index)));
                }
            }
        }
        if dscale > 0 {
            let mut fraction = String::new();
            let groups = dscale.div_ceil(4) as i32;
            for k in 0..groups {
                fraction.push_str(&format!("{:04}", digit(weight + 1 + k)));
            }
            fraction.truncate(dscale);
            text.push('.');
            text.push_str(&fraction);
        }
        Ok(text)
    }
}

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(Self::decode(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Any value whose wire format is UTF-8 text (enums, citext, ...)
#[derive(Debug)]
struct PgText(String);

impl<'a> FromSql<'a> for PgText {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(String::from_utf8(raw.to_vec())?))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize, wrap: impl FnOnce(T) -> Value) -> Value {
    row.try_get::<_, Option<T>>(idx)
        .ok()
        .flatten()
        .map(wrap)
        .unwrap_or(Value::Null)
}

fn postgres_to_value(row: &PgRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_().name();

    match type_name {
        "bool" => get(row, idx, Value::Bool),
        "int2" => get(row, idx, Value::Int16),
        "int4" => get(row, idx, Value::Int32),
        "int8" => get(row, idx, Value::Int64),
        "float4" => get(row, idx, Value::Float32),
        "float8" => get(row, idx, Value::Float64),
        "numeric" => get(row, idx, |n: PgNumeric| Value::Decimal(n.0)),
        "text" | "varchar" | "char" | "bpchar" | "name" => get(row, idx, Value::String),
        "bytea" => get(row, idx, Value::Bytes),
        "uuid" => get(row, idx, Value::Uuid),
        "json" | "jsonb" => get(row, idx, Value::Json),
        "date" => get(row, idx, Value::Date),
        "time" => get(row, idx, Value::Time),
        "timestamp" => get(row, idx, Value::DateTime),
        "timestamptz" => get(row, idx, Value::DateTimeUtc),
        "_text" | "_varchar" => get(row, idx, |arr: Vec<String>| {
            Value::Array(arr.into_iter().map(Value::String).collect())
        }),
        "_int4" => get(row, idx, |arr: Vec<i32>| {
            Value::Array(arr.into_iter().map(Value::Int32).collect())
        }),
        "_int8" => get(row, idx, |arr: Vec<i64>| {
            Value::Array(arr.into_iter().map(Value::Int64).collect())
        }),
        _ => get(row, idx, |text: PgText| Value::String(text.0)),
    }
}

#[cfg(test)]
pub(crate) fn decode_numeric(raw: &[u8]) -> String {
    PgNumeric::decode(raw).unwrap_or_default()
}
