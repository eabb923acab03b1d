//! Unit tests for Trino driver

use super::*;
use pretty_assertions::assert_eq;
use quay_core::{
    ConnectionConfig, ConnectionType, DatabaseDriver, QuayError, TrinoConnection as TrinoSettings,
    Value,
};
use rstest::rstest;
use std::path::Path;

fn page(json: serde_json::Value) -> QueryPage {
    serde_json::from_value(json).unwrap()
}

#[rstest]
#[case::bare_host("trino.internal", Some(8080), "http://trino.internal:8080")]
#[case::https("https://trino.example.com/", None, "https://trino.example.com")]
fn test_base_url(#[case] server: &str, #[case] port: Option<u16>, #[case] expected: &str) {
    assert_eq!(base_url(server, port), expected);
}

#[test]
fn test_pages_accumulate_until_next_uri_is_gone() {
    let mut results = StatementResults::new(None);

    let next = results
        .absorb(page(serde_json::json!({
            "id": "q1",
            "nextUri": "http://c/v1/statement/q1/1",
            "columns": [
                { "name": "carrier", "type": "varchar(2)" },
                { "name": "n", "type": "bigint" },
                { "name": "avg_delay", "type": "decimal(10,2)" }
            ],
            "data": [["AA", 10, "1.25"]]
        })))
        .unwrap();
    assert_eq!(next.as_deref(), Some("http://c/v1/statement/q1/1"));

    let next = results
        .absorb(page(serde_json::json!({ "id": "q1", "data": [["UA", 7, null]] })))
        .unwrap();
    assert_eq!(next, None);

    let result = results.into_query_result();
    assert_eq!(result.columns[1].data_type, "bigint");
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].get(0), Some(&Value::String("AA".into())));
    assert_eq!(result.rows[0].get(1), Some(&Value::Int64(10)));
    assert_eq!(result.rows[0].get(2), Some(&Value::Decimal("1.25".into())));
    assert_eq!(result.rows[1].get(2), Some(&Value::Null));
}

#[test]
fn test_row_limit_stops_paging() {
    let mut results = StatementResults::new(Some(1));
    let next = results
        .absorb(page(serde_json::json!({
            "id": "q2",
            "nextUri": "http://c/next",
            "columns": [{ "name": "x", "type": "integer" }],
            "data": [[1], [2]]
        })))
        .unwrap();

    assert_eq!(next, None);
    assert!(results.is_limited());
    assert_eq!(results.into_query_result().rows.len(), 1);
}

#[test]
fn test_error_page_is_query_error() {
    let mut results = StatementResults::new(None);
    let err = results
        .absorb(page(serde_json::json!({
            "id": "q3",
            "error": { "message": "line 1:8: Column 'x' cannot be resolved", "errorName": "COLUMN_NOT_FOUND" }
        })))
        .unwrap_err();

    assert!(matches!(err, QuayError::Query(_)));
    assert!(err.to_string().contains("COLUMN_NOT_FOUND"));
}

#[test]
fn test_json_cells_are_parsed() {
    assert_eq!(
        crate::protocol::json_to_value("json", serde_json::json!("{\"a\":1}")),
        Value::Json(serde_json::json!({ "a": 1 }))
    );
    assert_eq!(
        crate::protocol::json_to_value("array(integer)", serde_json::json!([1, 2])),
        Value::Json(serde_json::json!([1, 2]))
    );
}

#[tokio::test]
async fn test_connect_requires_server_and_user() {
    let mut config = ConnectionConfig::new("trino", ConnectionType::Trino);
    config.trino_connection = Some(TrinoSettings {
        server: Some("localhost".into()),
        ..Default::default()
    });

    let err = TrinoDriver::new()
        .connect(&config, Path::new("."))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("trinoConnection.user"));
}
