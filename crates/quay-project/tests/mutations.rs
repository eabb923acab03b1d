//! Catalog, package and connection mutations, frozen mode and config fallback

use pretty_assertions::assert_eq;
use quay_core::{ConnectionConfig, ConnectionType, QuayError};
use quay_drivers::{ConnectionFactory, ConnectionTestStatus, DriverRegistry};
use quay_package::{DeclarationCompiler, PackageServices};
use quay_project::{
    PackageUpdate, ProjectConfig, ProjectStore, ProjectUpdate, StoreOptions,
};
use quay_test_support::{MockDriver, PackageFixture, TestServer};
use std::sync::Arc;

fn services(driver: &Arc<MockDriver>) -> PackageServices {
    let mut registry = DriverRegistry::new();
    registry.register(driver.clone());
    PackageServices::new(
        ConnectionFactory::new(Arc::new(registry)),
        Arc::new(DeclarationCompiler::new()),
    )
}

async fn open_with(
    server: &TestServer,
    driver: &Arc<MockDriver>,
    options: StoreOptions,
) -> Arc<ProjectStore> {
    ProjectStore::open(server.root(), options, services(driver)).await
}

fn warehouse(name: &str) -> ConnectionConfig {
    ConnectionConfig::new(name, ConnectionType::Duckdb)
}

#[tokio::test]
async fn test_unparsable_config_gives_empty_catalog() {
    let server = TestServer::new().unwrap();
    server.write_raw_config("{ \"projects\": [ oops").unwrap();

    let store = open_with(&server, &MockDriver::new(), StoreOptions::default()).await;

    assert!(store.list_projects().await.unwrap().is_empty());
    let health = store.health();
    assert!(health.initialized);
    assert!(health.config_error.unwrap().contains("failed to parse config"));
    let err = store.get_project("P", false).await.unwrap_err();
    assert!(matches!(err, QuayError::ProjectNotFound(_)));
}

#[tokio::test]
async fn test_spawned_initialization_is_awaited() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();

    let store = ProjectStore::new(server.root(), StoreOptions::default(), services(&MockDriver::new()));
    store.finished_initialization().await;

    assert!(store.health().initialized);
    assert_eq!(store.health().config_error, None);
    let names: Vec<_> = store.list_projects().await.unwrap().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["P"]);
}

#[tokio::test]
async fn test_frozen_config_blocks_every_mutation() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let before = server.read_config().unwrap();
    let options = StoreOptions {
        frozen_config_override: Some(true),
        ..Default::default()
    };
    let store = open_with(&server, &MockDriver::new(), options).await;
    let project = store.get_project("P", false).await.unwrap();

    let attempts = vec![
        store.add_project(ProjectConfig::new("other")).await.map(|_| ()),
        store.update_project("P", ProjectUpdate::default()).await.map(|_| ()),
        store.delete_project("P").await,
        project.add_package("new").await.map(|_| ()),
        project
            .update_package("Q", PackageUpdate { description: Some("x".into()), ..Default::default() })
            .await
            .map(|_| ()),
        project.delete_package("Q").await,
        project.add_connection(warehouse("wh")).await.map(|_| ()),
        project.update_connection("wh", warehouse("wh")).await.map(|_| ()),
        project.delete_connection("wh").await,
        project
            .update(ProjectUpdate { readme: Some("# changed".into()), ..Default::default() })
            .await
            .map(|_| ()),
    ];

    for attempt in attempts {
        assert!(matches!(attempt, Err(QuayError::FrozenConfig(_))), "{:?}", attempt);
    }
    assert_eq!(project.package_names(), vec!["Q"]);
    assert!(project.list_connections().is_empty());
    assert!(server.package_dir("P", "Q").exists());
    assert_eq!(server.read_config().unwrap(), before);
    assert!(store.health().frozen_config);
}

#[tokio::test]
async fn test_frozen_flag_from_config_file() {
    let server = TestServer::new().unwrap();
    server
        .write_config(&serde_json::json!({ "frozenConfig": true, "projects": [] }))
        .unwrap();
    let store = open_with(&server, &MockDriver::new(), StoreOptions::default()).await;

    assert!(store.is_frozen());
    let err = store.add_project(ProjectConfig::new("P")).await.unwrap_err();
    assert_eq!(err.kind().http_status(), 403);
}

#[tokio::test]
async fn test_add_update_delete_project() {
    let server = TestServer::new().unwrap();
    server.write_config(&serde_json::json!({ "projects": [] })).unwrap();
    let driver = MockDriver::new();
    let store = open_with(&server, &driver, StoreOptions::default()).await;

    let mut config = ProjectConfig::new("P");
    config.connections.push(warehouse("wh"));
    let project = store.add_project(config.clone()).await.unwrap();
    assert_eq!(project.list_connections()[0].name, "wh");
    assert_eq!(server.read_config().unwrap()["projects"][0]["name"], "P");

    let err = store.add_project(config).await.unwrap_err();
    assert!(matches!(err, QuayError::AlreadyExists(_)));

    let metadata = store
        .update_project("P", ProjectUpdate { readme: Some("# P".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(metadata.readme.as_deref(), Some("# P"));
    assert_eq!(std::fs::read_to_string(server.project_dir("P").join("README.md")).unwrap(), "# P");

    store.delete_project("P").await.unwrap();
    assert!(quay_core::Connection::is_closed(driver.created_named("wh")[0].as_ref()));
    assert!(server.project_dir("P").exists());
    assert!(store.list_projects().await.unwrap().is_empty());
    let err = store.delete_project("P").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_failed_project_construction_is_not_kept() {
    let server = TestServer::new().unwrap();
    server.write_config(&serde_json::json!({ "projects": [] })).unwrap();
    let driver = MockDriver::new();
    driver.fail_for("wh", "refused");
    let store = open_with(&server, &driver, StoreOptions::default()).await;

    let mut config = ProjectConfig::new("P");
    config.connections.push(warehouse("wh"));
    let err = store.add_project(config).await.unwrap_err();

    assert!(matches!(err, QuayError::Connection(_)));
    assert!(store.list_projects().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_add_and_rename_package() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let store = open_with(&server, &MockDriver::new(), StoreOptions::default()).await;
    let project = store.get_project("P", false).await.unwrap();

    server
        .write_package("P", "S", &PackageFixture::flights().description("new one"))
        .unwrap();
    let added = project.add_package("S").await.unwrap();
    assert_eq!(added.get_package_metadata().description.as_deref(), Some("new one"));
    let err = project.add_package("S").await.unwrap_err();
    assert!(matches!(err, QuayError::AlreadyExists(_)));

    let metadata = project
        .update_package(
            "S",
            PackageUpdate {
                name: Some("T".into()),
                description: Some("renamed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(metadata.name, "T");
    assert_eq!(metadata.location, "./P/S");
    assert_eq!(project.package_names(), vec!["Q", "T"]);
    assert!(Arc::ptr_eq(&project.get_package("T", false).await.unwrap(), &added));
    assert!(project.get_package("S", false).await.unwrap_err().is_not_found());

    let manifest: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(server.package_dir("P", "S").join("publisher.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest, serde_json::json!({ "name": "T", "description": "renamed" }));
    let persisted = server.read_config().unwrap();
    assert_eq!(persisted["projects"][0]["packages"][1]["name"], "T");
    assert_eq!(persisted["projects"][0]["packages"][1]["location"], "./P/S");

    let err = project
        .update_package("T", PackageUpdate { name: Some("Q".into()), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, QuayError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_add_package_without_directory_is_rolled_back() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let store = open_with(&server, &MockDriver::new(), StoreOptions::default()).await;
    let project = store.get_project("P", false).await.unwrap();

    let err = project.add_package("ghost").await.unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(project.package_names(), vec!["Q"]);
}

#[tokio::test]
async fn test_package_location_update_reloads() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    server
        .write_package("P", "Q2", &PackageFixture::new().model("other.malloy", "source: o is duckdb.table('o')"))
        .unwrap();
    let store = open_with(&server, &MockDriver::new(), StoreOptions::default()).await;
    let project = store.get_project("P", false).await.unwrap();

    project
        .update_package("Q", PackageUpdate { location: Some("./P/Q2".into()), ..Default::default() })
        .await
        .unwrap();

    let package = project.get_package("Q", false).await.unwrap();
    let models: Vec<_> = package.list_models().into_iter().map(|m| m.path).collect();
    assert_eq!(models, vec!["other.malloy"]);
}

#[tokio::test]
async fn test_rename_onto_existing_package_changes_nothing() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q", "R"]).unwrap();
    server
        .write_package("P", "Q", &PackageFixture::flights().description("old"))
        .unwrap();
    server
        .write_package("P", "Q2", &PackageFixture::new().model("other.malloy", "source: o is duckdb.table('o')"))
        .unwrap();
    let store = open_with(&server, &MockDriver::new(), StoreOptions::default()).await;
    let project = store.get_project("P", false).await.unwrap();
    let before = project.get_package("Q", false).await.unwrap();

    let err = project
        .update_package(
            "Q",
            PackageUpdate {
                name: Some("R".into()),
                description: Some("new".into()),
                location: Some("./P/Q2".into()),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, QuayError::AlreadyExists(_)));
    let package = project.get_package("Q", false).await.unwrap();
    assert!(Arc::ptr_eq(&package, &before));
    assert_eq!(package.get_package_metadata().description.as_deref(), Some("old"));
    let models: Vec<_> = package.list_models().into_iter().map(|m| m.path).collect();
    assert_eq!(models, vec!["flights.malloy"]);
    assert_eq!(project.package_names(), vec!["Q", "R"]);
    assert_eq!(project.to_config().packages[0].location, "./P/Q");
}

#[tokio::test]
async fn test_connection_crud_evicts_loaded_packages() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let driver = MockDriver::new();
    let store = open_with(&server, &driver, StoreOptions::default()).await;
    let project = store.get_project("P", false).await.unwrap();
    project.get_package("Q", false).await.unwrap();

    let descriptor = project.add_connection(warehouse("wh")).await.unwrap();
    assert_eq!(descriptor.attributes.unwrap().dialect_name, "duckdb");
    assert_eq!(project.package_status("Q"), None);
    let package = project.get_package("Q", false).await.unwrap();
    assert!(package.get_connection("wh").is_ok());

    let err = project.add_connection(warehouse("wh")).await.unwrap_err();
    assert!(matches!(err, QuayError::AlreadyExists(_)));
    let err = project.add_connection(warehouse("duckdb")).await.unwrap_err();
    assert!(matches!(err, QuayError::Configuration(_)));

    project.update_connection("wh", warehouse("ignored")).await.unwrap();
    assert_eq!(driver.created_named("wh").len(), 2);
    assert!(quay_core::Connection::is_closed(driver.created_named("wh")[0].as_ref()));
    assert_eq!(project.get_connection_config("wh").unwrap().name, "wh");

    project.delete_connection("wh").await.unwrap();
    assert!(project.get_connection("wh").unwrap_err().is_not_found());
    project.delete_connection("never-existed").await.unwrap();

    let persisted = server.read_config().unwrap();
    assert_eq!(persisted["projects"][0].get("connections"), None);
}

#[tokio::test]
async fn test_update_replaces_connection_set() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let driver = MockDriver::new();
    let store = open_with(&server, &driver, StoreOptions::default()).await;
    let project = store.get_project("P", false).await.unwrap();
    let before = project.get_package("Q", false).await.unwrap();

    project
        .update(ProjectUpdate {
            connections: Some(vec![warehouse("a"), warehouse("b")]),
            ..Default::default()
        })
        .await
        .unwrap();

    let names: Vec<_> = project.list_connections().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["a", "b"]);
    let after = project.get_package("Q", false).await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(after.get_connection("b").is_ok());
    assert!(before.get_connection("b").is_err());

    let err = project
        .update(ProjectUpdate {
            connections: Some(vec![warehouse("dup"), warehouse("dup")]),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, QuayError::Configuration(_)));
    assert_eq!(project.list_connections().len(), 2);
}

#[tokio::test]
async fn test_readme_write_failure_is_user_facing() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let store = open_with(&server, &MockDriver::new(), StoreOptions::default()).await;
    let project = store.get_project("P", false).await.unwrap();
    std::fs::create_dir_all(project.path().join("README.md")).unwrap();

    let err = project
        .update(ProjectUpdate { readme: Some("# P".into()), ..Default::default() })
        .await
        .unwrap_err();

    assert!(matches!(err, QuayError::ReadmeUpdate(_)));
    assert_eq!(project.metadata().readme, None);
}

#[tokio::test]
async fn test_test_connection_reports_status() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let driver = MockDriver::new();
    let store = open_with(&server, &driver, StoreOptions::default()).await;
    let project = store.get_project("P", false).await.unwrap();
    project.add_connection(warehouse("wh")).await.unwrap();

    assert_eq!(project.test_connection("wh").await.unwrap().status, ConnectionTestStatus::Ok);

    driver.fail_tests(true);
    let status = project.test_connection("wh").await.unwrap();
    assert_eq!(status.status, ConnectionTestStatus::Failed);
    assert!(status.error_message.unwrap().contains("mock test failure"));

    assert!(project.test_connection("missing").await.unwrap_err().is_not_found());
}
