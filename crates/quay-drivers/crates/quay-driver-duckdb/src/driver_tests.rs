//! Unit tests for DuckDB driver

use super::*;
use pretty_assertions::assert_eq;
use quay_core::{
    AttachedDatabase, AttachedDatabaseType, ConnectionConfig, ConnectionType, DatabaseDriver,
    DuckdbConnection, QuayError, RunSqlOptions, S3Connection, SnowflakeConnection, Value,
};
use rstest::rstest;
use std::path::Path;

fn attached(name: &str, database_type: AttachedDatabaseType) -> AttachedDatabase {
    AttachedDatabase {
        name: name.to_string(),
        database_type,
        bigquery_connection: None,
        snowflake_connection: None,
        postgres_connection: None,
        motherduck_connection: None,
        gcs_connection: None,
        s3_connection: None,
    }
}

#[test]
fn test_duckdb_driver_serves_embedded_and_motherduck() {
    let driver = DuckDbDriver::new();
    assert_eq!(
        driver.connection_types(),
        &[ConnectionType::Duckdb, ConnectionType::Motherduck]
    );
    assert_eq!(driver.display_name(), "DuckDB");
    assert!(driver.capabilities().supports_attachments);
}

#[tokio::test]
async fn test_run_sql_returns_typed_rows() {
    let driver = DuckDbDriver::new();
    let conn = driver
        .connect(&ConnectionConfig::default_duckdb(), Path::new("."))
        .await
        .unwrap();

    let result = conn
        .run_sql("SELECT 42 AS answer, 'hi' AS greeting", &RunSqlOptions::default())
        .await
        .unwrap();

    assert_eq!(result.columns[0].name, "answer");
    assert_eq!(result.columns[0].data_type, "BIGINT");
    assert_eq!(result.rows[0].get_by_name("answer"), Some(&Value::Int64(42)));
    assert_eq!(
        result.rows[0].get_by_name("greeting"),
        Some(&Value::String("hi".into()))
    );
    assert_eq!(conn.dialect_name(), "duckdb");
    assert!(conn.can_persist().unwrap());
}

#[tokio::test]
async fn test_row_limit_truncates() {
    let driver = DuckDbDriver::new();
    let conn = driver
        .connect(&ConnectionConfig::default_duckdb(), Path::new("."))
        .await
        .unwrap();

    let result = conn
        .run_sql("SELECT * FROM range(10)", &RunSqlOptions::with_row_limit(3))
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 3);
}

#[tokio::test]
async fn test_files_resolve_against_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("carriers.csv"), "code,name\nAA,American\nUA,United\n").unwrap();

    let driver = DuckDbDriver::new();
    let conn = driver
        .connect(&ConnectionConfig::default_duckdb(), dir.path())
        .await
        .unwrap();

    let result = conn
        .run_sql("SELECT count(*) AS n FROM 'carriers.csv'", &RunSqlOptions::default())
        .await
        .unwrap();
    assert_eq!(result.rows[0].get_by_name("n"), Some(&Value::Int64(2)));

    let schema = conn
        .fetch_table_schema("carriers", "carriers.csv")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schema.name, "carriers");
    let names: Vec<_> = schema.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["code", "name"]);
    assert_eq!(schema.columns[1].data_type, "VARCHAR");
}

#[tokio::test]
async fn test_missing_table_schema_is_none() {
    let driver = DuckDbDriver::new();
    let conn = driver
        .connect(&ConnectionConfig::default_duckdb(), Path::new("."))
        .await
        .unwrap();

    let schema = conn.fetch_table_schema("nope", "main.nope").await.unwrap();
    assert!(schema.is_none());
}

#[tokio::test]
async fn test_select_schema_describes_columns() {
    let driver = DuckDbDriver::new();
    let conn = driver
        .connect(&ConnectionConfig::default_duckdb(), Path::new("."))
        .await
        .unwrap();

    let schema = conn
        .fetch_select_schema("SELECT 1::INTEGER AS id, 'x' AS label")
        .await
        .unwrap();
    let columns: Vec<_> = schema
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.data_type.as_str()))
        .collect();
    assert_eq!(columns, vec![("id", "INTEGER"), ("label", "VARCHAR")]);
}

#[tokio::test]
async fn test_closed_connection_rejects_queries() {
    let driver = DuckDbDriver::new();
    let conn = driver
        .connect(&ConnectionConfig::default_duckdb(), Path::new("."))
        .await
        .unwrap();
    conn.close().await.unwrap();

    assert!(conn.is_closed());
    let err = conn
        .run_sql("SELECT 1", &RunSqlOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QuayError::Connection(_)));
}

#[tokio::test]
async fn test_invalid_attachment_fails_whole_connect() {
    let mut config = ConnectionConfig::default_duckdb();
    config.duckdb_connection = Some(DuckdbConnection {
        attached_databases: vec![attached("warehouse", AttachedDatabaseType::Snowflake)],
    });

    let err = DuckDbDriver::new()
        .connect(&config, Path::new("."))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("warehouse"), "{err}");
}

#[test]
fn test_secrets_are_escaped_in_attach_statements() {
    let mut db = attached("sf", AttachedDatabaseType::Snowflake);
    db.snowflake_connection = Some(SnowflakeConnection {
        account: Some("acme".into()),
        username: Some("svc".into()),
        password: Some("it's secret".into()),
        ..Default::default()
    });

    let statements = attach_statements(&db).unwrap();
    assert_eq!(
        statements[2],
        "CREATE OR REPLACE SECRET sf_secret (TYPE snowflake, ACCOUNT 'acme', USER 'svc', PASSWORD 'it''s secret')"
    );
    assert_eq!(
        statements[3],
        "ATTACH '' AS \"sf\" (TYPE snowflake, SECRET sf_secret, READ_ONLY)"
    );
}

#[test]
fn test_s3_attachment_creates_secret() {
    let mut db = attached("lake", AttachedDatabaseType::S3);
    db.s3_connection = Some(S3Connection {
        access_key_id: Some("AKIA".into()),
        secret_access_key: Some("s'3".into()),
        region: Some("us-east-1".into()),
        ..Default::default()
    });

    let statements = attach_statements(&db).unwrap();
    assert_eq!(statements[0], "INSTALL httpfs");
    assert_eq!(
        statements[2],
        "CREATE OR REPLACE SECRET lake_secret (TYPE s3, KEY_ID 'AKIA', SECRET 's''3', REGION 'us-east-1')"
    );
}

#[rstest]
#[case::bigquery(AttachedDatabaseType::Bigquery, "bigqueryConnection")]
#[case::postgres(AttachedDatabaseType::Postgres, "postgresConnection")]
#[case::gcs(AttachedDatabaseType::Gcs, "gcsConnection")]
#[case::motherduck(AttachedDatabaseType::Motherduck, "motherduckConnection")]
fn test_attachment_without_credentials_names_field(
    #[case] ty: AttachedDatabaseType,
    #[case] field: &str,
) {
    let err = attach_statements(&attached("x", ty)).unwrap_err();
    assert!(err.to_string().contains(field), "{err}");
}

#[test]
fn test_bigquery_project_falls_back_to_key_file() {
    let mut db = attached("bq", AttachedDatabaseType::Bigquery);
    db.bigquery_connection = Some(quay_core::BigqueryConnection {
        service_account_key_json: Some(r#"{"project_id":"acme-prod","private_key":"k"}"#.into()),
        ..Default::default()
    });

    let statements = attach_statements(&db).unwrap();
    assert_eq!(
        statements.last().unwrap(),
        "ATTACH 'project=acme-prod' AS \"bq\" (TYPE bigquery, READ_ONLY)"
    );
}

#[test]
fn test_already_attached_detection() {
    assert!(crate::attach::is_already_attached(
        "Binder Error: Database \"lake\" is already attached with path"
    ));
    assert!(!crate::attach::is_already_attached("Catalog Error: table not found"));
}
