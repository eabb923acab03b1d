//! MySQL connection implementation

use async_trait::async_trait;
use mysql_async::{Conn, Opts, Pool, Row as MySqlRow, consts::ColumnType, prelude::*};
use quay_core::sql::split_table_path;
use quay_core::{
    ColumnMeta, Connection, ConnectionType, QuayError, QueryResult, Result, Row, RunSqlOptions,
    TableSchema, Value,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Pooled MySQL connection
pub struct MySqlConnection {
    name: String,
    pool: Pool,
    checkout_timeout: Duration,
    closed: AtomicBool,
}

impl MySqlConnection {
    /// Create the pool and prove one session can be checked out
    pub async fn connect(name: String, opts: Opts, checkout_timeout: Duration) -> Result<Self> {
        tracing::info!(
            connection = %name,
            host = %opts.ip_or_hostname(),
            port = opts.tcp_port(),
            database = ?opts.db_name(),
            "connecting to MySQL database"
        );

        let conn = Self {
            name,
            pool: Pool::new(opts),
            checkout_timeout,
            closed: AtomicBool::new(false),
        };
        drop(conn.get_conn().await?);

        tracing::info!(connection = %conn.name, "MySQL connection established");
        Ok(conn)
    }

    async fn get_conn(&self) -> Result<Conn> {
        if self.is_closed() {
            return Err(QuayError::Connection("Connection is closed".into()));
        }
        match tokio::time::timeout(self.checkout_timeout, self.pool.get_conn()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(QuayError::Connection(format!("Failed to connect to MySQL: {}", e))),
            Err(_) => Err(QuayError::Timeout(format!(
                "no MySQL session available within {} ms",
                self.checkout_timeout.as_millis()
            ))),
        }
    }
}

pub(crate) fn mysql_value_to_value(val: mysql_async::Value, col_type: ColumnType) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => match col_type {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_YEAR => {
                    s.parse::<i64>().map(Value::Int64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
                    s.parse::<f64>().map(Value::Float64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                    Value::Decimal(s)
                }
                _ => Value::String(s),
            },
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(i) => Value::Int64(i),
        mysql_async::Value::UInt(u) => i64::try_from(u)
            .map(Value::Int64)
            .unwrap_or_else(|_| Value::Decimal(u.to_string())),
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let date = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32);
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                date.map(Value::Date)
                    .unwrap_or_else(|| Value::String(format!("{:04}-{:02}-{:02}", year, month, day)))
            } else {
                date.and_then(|d| d.and_hms_micro_opt(hour as u32, min as u32, sec as u32, micro))
                    .map(Value::DateTime)
                    .unwrap_or_else(|| {
                        Value::String(format!(
                            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                            year, month, day, hour, min, sec
                        ))
                    })
            }
        }
        mysql_async::Value::Time(negative, days, hours, mins, secs, micros) => {
            let total_hours = days * 24 + hours as u32;
            let sign = if negative { "-" } else { "" };
            Value::String(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                sign, total_hours, mins, secs, micros
            ))
        }
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Mysql
    }

    #[tracing::instrument(skip(self, sql, options), fields(connection = %self.name, sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn run_sql(&self, sql: &str, options: &RunSqlOptions) -> Result<QueryResult> {
        let start = std::time::Instant::now();
        let mut conn = self.get_conn().await?;

        let mysql_rows: Vec<MySqlRow> = conn
            .query(sql)
            .await
            .map_err(|e| QuayError::Query(format!("Failed to execute query: {}", e)))?;

        let mut columns = Vec::new();
        let mut column_names = Vec::new();
        let mut column_types = Vec::new();
        if let Some(first_row) = mysql_rows.first() {
            for (idx, col) in first_row.columns_ref().iter().enumerate() {
                let name = col.name_str().to_string();
                column_names.push(name.clone());
                column_types.push(col.column_type());
                columns.push(ColumnMeta::new(name, format!("{:?}", col.column_type()), idx));
            }
        }

        let limit = options.row_limit.unwrap_or(usize::MAX);
        let rows = mysql_rows
            .into_iter()
            .take(limit)
            .map(|mut mysql_row| {
                let values = column_types
                    .iter()
                    .enumerate()
                    .map(|(idx, col_type)| {
                        let value = mysql_row
                            .take::<mysql_async::Value, _>(idx)
                            .unwrap_or(mysql_async::Value::NULL);
                        mysql_value_to_value(value, *col_type)
                    })
                    .collect();
                Row::new(column_names.clone(), values)
            })
            .collect();

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
            [table] => (None, table.clone()),
            [.., schema, table] => (Some(schema.clone()), table.clone()),
            [] => return Ok(None),
        };

        let mut conn = self.get_conn().await?;
        let described: Vec<(String, String, String)> = conn
            .exec(
                "SELECT column_name, column_type, is_nullable \
                 FROM information_schema.columns \
                 WHERE table_schema = COALESCE(?, DATABASE()) AND table_name = ? \
                 ORDER BY ordinal_position",
                (schema, table),
            )
            .await
            .map_err(|e| QuayError::Query(format!("Failed to describe table: {}", e)))?;

        if described.is_empty() {
            return Ok(None);
        }

        let columns = described
            .into_iter()
            .enumerate()
            .map(|(ordinal, (name, data_type, nullable))| {
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

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pool
            .clone()
            .disconnect()
            .await
            .map_err(|e| QuayError::Connection(format!("Failed to close MySQL pool: {}", e)))?;
        tracing::debug!(connection = %self.name, "MySQL connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_pool(&self) -> Result<bool> {
        Ok(true)
    }

    fn can_persist(&self) -> Result<bool> {
        Ok(true)
    }
}
