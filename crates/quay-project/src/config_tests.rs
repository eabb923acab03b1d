//! Tests for config loading and validation

use crate::*;
use pretty_assertions::assert_eq;
use quay_core::ConnectionType;
use rstest::rstest;
use std::path::Path;

#[rstest]
#[case::projects_not_array(r#"{ "projects": {} }"#, "\"projects\" must be an array")]
#[case::projects_missing(r#"{ "frozenConfig": true }"#, "\"projects\" must be an array")]
#[case::project_without_name(r#"{ "projects": [ { "packages": [] } ] }"#, "missing \"name\"")]
#[case::project_without_packages(r#"{ "projects": [ { "name": "P" } ] }"#, "missing a \"packages\" array")]
#[case::package_without_location(
    r#"{ "projects": [ { "name": "P", "packages": [ { "name": "Q" } ] } ] }"#,
    "missing \"location\""
)]
#[case::duplicate_project(
    r#"{ "projects": [ { "name": "P", "packages": [] }, { "name": "P", "packages": [] } ] }"#,
    "declared more than once"
)]
fn test_validate_structure_rejects(#[case] text: &str, #[case] expected: &str) {
    let document: serde_json::Value = serde_json::from_str(text).unwrap();
    let reason = validate_structure(&document).unwrap_err();
    assert!(reason.contains(expected), "{}", reason);
}

#[tokio::test]
async fn test_load_config_parses_projects() {
    let dir = quay_test_support::TestServer::new().unwrap();
    dir.write_config(&serde_json::json!({
        "frozenConfig": true,
        "projects": [{
            "name": "P",
            "packages": [ { "name": "Q", "location": "./P/Q" } ],
            "connections": [ { "name": "pg", "type": "postgres", "postgresConnection": { "host": "db" } } ]
        }]
    }))
    .unwrap();

    let loaded = load_config(&dir.config_path()).await;

    assert_eq!(loaded.error, None);
    assert!(loaded.config.frozen_config);
    let project = loaded.config.project("P").unwrap();
    assert_eq!(project.packages[0].location, "./P/Q");
    assert_eq!(project.connections[0].connection_type, ConnectionType::Postgres);
}

#[rstest]
#[case::syntax("{ projects: ", "failed to parse config")]
#[case::structure(r#"{ "projects": 3 }"#, "invalid config")]
#[case::unknown_connection_type(
    r#"{ "projects": [ { "name": "P", "packages": [], "connections": [ { "name": "x", "type": "oracle" } ] } ] }"#,
    "invalid config"
)]
#[tokio::test]
async fn test_load_config_falls_back_to_empty(#[case] text: &str, #[case] expected: &str) {
    let dir = quay_test_support::TestServer::new().unwrap();
    dir.write_raw_config(text).unwrap();

    let loaded = load_config(&dir.config_path()).await;

    assert_eq!(loaded.config, StoreConfig::default());
    assert!(loaded.error.unwrap().starts_with(expected));
}

#[tokio::test]
async fn test_missing_config_is_empty_without_error() {
    let loaded = load_config(Path::new("/nonexistent/publisher.config.json")).await;
    assert!(!loaded.found);
    assert_eq!(loaded.error, None);
    assert!(loaded.config.projects.is_empty());
}

#[test]
fn test_resolve_location() {
    let root = Path::new("/srv/quay");
    assert_eq!(resolve_location(root, "./P/Q"), Path::new("/srv/quay/./P/Q"));
    assert_eq!(resolve_location(root, "/data/Q"), Path::new("/data/Q"));
}

#[tokio::test]
async fn test_catalog_persists_changes() {
    let dir = quay_test_support::TestServer::new().unwrap();
    let catalog = Catalog::new(dir.config_path(), StoreConfig::default(), true);

    let mut project = ProjectConfig::new("P");
    project.packages.push(PackageConfig {
        name: "Q".into(),
        location: "./P/Q".into(),
    });
    catalog.upsert_project(project).await;

    let written = dir.read_config().unwrap();
    assert_eq!(written["projects"][0]["packages"][0]["name"], "Q");
    assert_eq!(written["frozenConfig"], false);

    catalog.remove_project("P").await;
    assert_eq!(dir.read_config().unwrap()["projects"], serde_json::json!([]));
}

#[tokio::test]
async fn test_catalog_from_broken_file_is_not_written() {
    let dir = quay_test_support::TestServer::new().unwrap();
    dir.write_raw_config("{ broken").unwrap();
    let catalog = Catalog::new(dir.config_path(), StoreConfig::default(), false);

    catalog.upsert_project(ProjectConfig::new("P")).await;

    assert_eq!(std::fs::read_to_string(dir.config_path()).unwrap(), "{ broken");
    assert!(catalog.project("P").await.is_some());
}
