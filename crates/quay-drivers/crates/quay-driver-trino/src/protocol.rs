//! Wire types of the Trino client protocol

use quay_core::{ColumnMeta, QuayError, QueryResult, Result, Row, Value};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TrinoColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrinoError {
    pub message: String,
    #[serde(default)]
    pub error_name: Option<String>,
}

/// One response of the statement protocol
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    pub id: String,
    #[serde(default)]
    pub next_uri: Option<String>,
    #[serde(default)]
    pub columns: Option<Vec<TrinoColumn>>,
    #[serde(default)]
    pub data: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    pub error: Option<TrinoError>,
}

/// Accumulates pages into a result set
#[derive(Debug, Default)]
pub struct StatementResults {
    columns: Option<Vec<TrinoColumn>>,
    rows: Vec<Vec<serde_json::Value>>,
    row_limit: Option<usize>,
}

impl StatementResults {
    pub fn new(row_limit: Option<usize>) -> Self {
        Self {
            row_limit,
            ..Default::default()
        }
    }

    /// Take in one page. Returns the URI of the next page, if the query is
    /// still running and more rows are wanted.
    pub fn absorb(&mut self, page: QueryPage) -> Result<Option<String>> {
        if let Some(error) = page.error {
            let name = error.error_name.unwrap_or_else(|| "QUERY_FAILED".to_string());
            return Err(QuayError::Query(format!("{}: {}", name, error.message)));
        }
        if self.columns.is_none() {
            self.columns = page.columns;
        }
        if let Some(data) = page.data {
            self.rows.extend(data);
        }
        if let Some(limit) = self.row_limit {
            if self.rows.len() >= limit {
                self.rows.truncate(limit);
                return Ok(None);
            }
        }
        Ok(page.next_uri)
    }

    pub fn is_limited(&self) -> bool {
        self.row_limit.is_some_and(|limit| self.rows.len() >= limit)
    }

    pub fn into_query_result(self) -> QueryResult {
        let columns = self.columns.unwrap_or_default();
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let rows = self
            .rows
            .into_iter()
            .map(|raw| {
                let values = columns
                    .iter()
                    .zip(raw)
                    .map(|(column, value)| json_to_value(&column.data_type, value))
                    .collect();
                Row::new(names.clone(), values)
            })
            .collect();
        let meta = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| ColumnMeta::new(c.name.clone(), c.data_type.clone(), idx))
            .collect();
        QueryResult::new(meta, rows)
    }
}

/// Convert a JSON cell according to its declared Trino type
pub fn json_to_value(data_type: &str, value: serde_json::Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    let base = data_type
        .split(['(', ' '])
        .next()
        .unwrap_or(data_type)
        .to_ascii_lowercase();
    match base.as_str() {
        "tinyint" | "smallint" | "integer" | "bigint" => value
            .as_i64()
            .map(Value::Int64)
            .unwrap_or(Value::Json(value)),
        "real" | "double" => value
            .as_f64()
            .map(Value::Float64)
            .unwrap_or(Value::Json(value)),
        "boolean" => value
            .as_bool()
            .map(Value::Bool)
            .unwrap_or(Value::Json(value)),
        "decimal" => match value {
            serde_json::Value::String(s) => Value::Decimal(s),
            other => Value::Decimal(other.to_string()),
        },
        "json" => match value {
            serde_json::Value::String(s) => serde_json::from_str(&s)
                .map(Value::Json)
                .unwrap_or(Value::String(s)),
            other => Value::Json(other),
        },
        _ => match value {
            serde_json::Value::String(s) => Value::String(s),
            other => Value::Json(other),
        },
    }
}
