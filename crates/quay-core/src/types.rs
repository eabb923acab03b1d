//! Core types for quay

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A database value that can represent any SQL type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean
    Bool(bool),
    /// 16-bit signed integer
    Int16(i16),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// 32-bit floating point
    Float32(f32),
    /// 64-bit floating point
    Float64(f64),
    /// Decimal/Numeric (stored as string for precision)
    Decimal(String),
    /// UTF-8 string
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// UUID
    Uuid(Uuid),
    /// Date (year, month, day)
    Date(NaiveDate),
    /// Time (hour, minute, second, nanosecond)
    Time(NaiveTime),
    /// DateTime without timezone
    DateTime(NaiveDateTime),
    /// DateTime with timezone (UTC)
    DateTimeUtc(DateTime<Utc>),
    /// JSON value
    Json(serde_json::Value),
    /// Array of values
    Array(Vec<Value>),
}

impl Value {
    /// Check if the value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Plain JSON rendering, used when results leave the process
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(v) => Json::Bool(*v),
            Value::Int16(v) => Json::from(*v),
            Value::Int32(v) => Json::from(*v),
            Value::Int64(v) => Json::from(*v),
            Value::Float32(v) => Json::from(*v as f64),
            Value::Float64(v) => Json::from(*v),
            Value::Json(v) => v.clone(),
            Value::Array(values) => Json::Array(values.iter().map(Value::to_json).collect()),
            other => Json::String(other.to_string()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Uuid(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v),
            Value::Time(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v),
            Value::DateTimeUtc(v) => write!(f, "{}", v),
            Value::Json(v) => write!(f, "{}", v),
            Value::Array(v) => write!(f, "[{} items]", v.len()),
        }
    }
}

/// A row from a query result
#[derive(Debug, Clone)]
pub struct Row {
    /// Column values
    pub values: Vec<Value>,
    /// Column names
    columns: Vec<String>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|idx| self.values.get(idx))
    }
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ColumnMeta {
    /// Column name
    #[serde(default)]
    pub name: String,
    /// Data type (database-specific string)
    #[serde(rename = "type", default)]
    pub data_type: String,
    /// Whether the column can be NULL
    #[serde(default)]
    pub nullable: bool,
    /// Column ordinal position (0-based)
    #[serde(default)]
    pub ordinal: usize,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal: usize) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            ordinal,
        }
    }
}

/// Query result
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Unique query ID
    pub id: Uuid,
    /// Column metadata
    pub columns: Vec<ColumnMeta>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Total row count (if known)
    pub total_rows: Option<u64>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
    /// Warnings from the database
    pub warnings: Vec<String>,
}

impl QueryResult {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Self {
        Self {
            id: Uuid::new_v4(),
            total_rows: Some(rows.len() as u64),
            columns,
            rows,
            execution_time_ms: 0,
            warnings: Vec::new(),
        }
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows as JSON objects keyed by column name
    pub fn rows_as_json(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let object = self
                    .columns
                    .iter()
                    .zip(row.values.iter())
                    .map(|(col, value)| (col.name.clone(), value.to_json()))
                    .collect::<serde_json::Map<_, _>>();
                serde_json::Value::Object(object)
            })
            .collect()
    }
}

/// Options accepted by `Connection::run_sql`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSqlOptions {
    /// Maximum number of rows to return (None = unlimited)
    pub row_limit: Option<usize>,
}

impl RunSqlOptions {
    pub fn with_row_limit(limit: usize) -> Self {
        Self {
            row_limit: Some(limit),
        }
    }
}

/// Schema of a table or select statement as seen by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Key the caller used to refer to the relation (table key or sql text)
    pub name: String,
    /// Backend path of the relation, if it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub columns: Vec<ColumnMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rows_as_json_uses_column_names() {
        let columns = vec![ColumnMeta::new("carrier", "VARCHAR", 0), ColumnMeta::new("n", "BIGINT", 1)];
        let names = vec!["carrier".to_string(), "n".to_string()];
        let rows = vec![Row::new(
            names,
            vec![Value::String("AA".into()), Value::Int64(42)],
        )];
        let result = QueryResult::new(columns, rows);

        assert_eq!(result.total_rows, Some(1));
        assert_eq!(
            result.rows_as_json(),
            vec![serde_json::json!({ "carrier": "AA", "n": 42 })]
        );
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::String("AA".into()).as_str(), Some("AA"));
        assert_eq!(Value::Int32(7).as_str(), None);
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bytes(vec![1, 2]).to_string(), "<2 bytes>");
        assert_eq!(Value::Decimal("1.50".into()).to_json(), serde_json::json!("1.50"));
    }

    #[test]
    fn test_row_lookup_by_name() {
        let row = Row::new(
            vec!["carrier".into(), "n".into()],
            vec![Value::String("AA".into()), Value::Int64(3)],
        );
        assert_eq!(row.get_by_name("n"), Some(&Value::Int64(3)));
        assert_eq!(row.get_by_name("missing"), None);
    }
}
