//! Concurrency scenarios for the project and package caches

use pretty_assertions::assert_eq;
use quay_core::{Connection, QuayError};
use quay_drivers::{ConnectionFactory, DriverRegistry};
use quay_package::{DeclarationCompiler, PackageServices};
use quay_project::{PackageStatus, ProjectStore, StoreOptions};
use quay_test_support::{MockDriver, PackageFixture, TestServer};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn services(driver: &Arc<MockDriver>) -> PackageServices {
    let mut registry = DriverRegistry::new();
    registry.register(driver.clone());
    PackageServices::new(
        ConnectionFactory::new(Arc::new(registry)),
        Arc::new(DeclarationCompiler::new()),
    )
}

async fn open(server: &TestServer, driver: &Arc<MockDriver>) -> Arc<ProjectStore> {
    ProjectStore::open(server.root(), StoreOptions::default(), services(driver)).await
}

/// Project `P` with package `Q` whose package-local `slow` connection takes
/// `delay` to construct, and a fast package `R`
fn slow_and_fast(server: &TestServer) {
    server
        .write_package(
            "P",
            "Q",
            &PackageFixture::flights().connections(serde_json::json!([
                { "name": "slow", "type": "duckdb" }
            ])),
        )
        .unwrap();
    server.write_package("P", "R", &PackageFixture::flights()).unwrap();
    server
        .write_config(&serde_json::json!({
            "projects": [{
                "name": "P",
                "packages": [
                    { "name": "Q", "location": "./P/Q" },
                    { "name": "R", "location": "./P/R" }
                ]
            }]
        }))
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_loads_once() {
    quay_test_support::init_tracing();
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let driver = MockDriver::new().with_delay_for("duckdb", Duration::from_millis(200));
    let store = ProjectStore::new(server.root(), StoreOptions::default(), services(&driver));

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let project = store.get_project("P", false).await?;
                project.get_package("Q", false).await
            })
        })
        .collect();

    let mut packages = Vec::new();
    for task in tasks {
        packages.push(task.await.unwrap().unwrap());
    }

    assert_eq!(driver.connect_count_for("duckdb"), 1);
    for package in &packages {
        assert_eq!(package.name(), "Q");
        assert!(Arc::ptr_eq(package, &packages[0]));
    }
}

#[tokio::test]
async fn test_delete_while_loading_fails_immediately() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let driver = MockDriver::new().with_delay_for("duckdb", Duration::from_millis(300));
    let store = open(&server, &driver).await;
    let project = store.get_project("P", false).await.unwrap();

    let loading = {
        let project = project.clone();
        tokio::spawn(async move { project.get_package("Q", false).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        project.package_status("Q").map(|info| info.status),
        Some(PackageStatus::Loading)
    );

    let started = Instant::now();
    let err = project.delete_package("Q").await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(matches!(err, QuayError::PackageLoading(ref name) if name == "Q"));

    let package = loading.await.unwrap().unwrap();
    assert_eq!(package.name(), "Q");
    assert_eq!(
        project.package_status("Q").map(|info| info.status),
        Some(PackageStatus::Serving)
    );
    assert!(server.package_dir("P", "Q").exists());
}

#[tokio::test]
async fn test_failed_load_is_retried() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let driver = MockDriver::new();
    driver.fail_for("duckdb", "engine unavailable");
    let store = open(&server, &driver).await;
    let project = store.get_project("P", false).await.unwrap();

    let err = project.get_package("Q", false).await.unwrap_err();
    assert!(err.to_string().contains("engine unavailable"));
    assert_eq!(project.package_status("Q"), None);

    driver.clear_failures();
    let package = project.get_package("Q", false).await.unwrap();
    assert_eq!(package.name(), "Q");
    assert_eq!(driver.connect_count_for("duckdb"), 2);
}

#[tokio::test]
async fn test_concurrent_waiters_see_failure_too() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let driver = MockDriver::new().with_delay_for("duckdb", Duration::from_millis(50));
    driver.fail_for("duckdb", "engine unavailable");
    let store = open(&server, &driver).await;
    let project = store.get_project("P", false).await.unwrap();

    let results =
        futures::future::join_all((0..3).map(|_| project.get_package("Q", false))).await;

    for result in results {
        assert!(matches!(result, Err(QuayError::Connection(_))));
    }
    assert_eq!(project.package_status("Q"), None);
}

#[tokio::test]
async fn test_listing_skips_packages_in_flight() {
    let server = TestServer::new().unwrap();
    slow_and_fast(&server);
    let driver = MockDriver::new().with_delay_for("slow", Duration::from_millis(300));
    let store = open(&server, &driver).await;
    let project = store.get_project("P", false).await.unwrap();

    let loading = {
        let project = project.clone();
        tokio::spawn(async move { project.get_package("Q", false).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let names: Vec<_> = project.list_packages().await.into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["R"]);

    loading.await.unwrap().unwrap();
    let names: Vec<_> = project.list_packages().await.into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["Q", "R"]);
}

#[tokio::test]
async fn test_abandoned_load_leaves_no_loading_status() {
    let server = TestServer::new().unwrap();
    slow_and_fast(&server);
    let driver = MockDriver::new().with_delay_for("slow", Duration::from_millis(300));
    let store = open(&server, &driver).await;
    let project = store.get_project("P", false).await.unwrap();

    let result =
        tokio::time::timeout(Duration::from_millis(50), project.get_package("Q", false)).await;
    assert!(result.is_err());

    assert_eq!(project.package_status("Q"), None);
    let names: Vec<_> = project.list_packages().await.into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["Q", "R"]);
    project.delete_package("Q").await.unwrap();
    assert_eq!(project.package_names(), vec!["R"]);
}

#[tokio::test]
async fn test_listing_skips_packages_being_unloaded() {
    let server = TestServer::new().unwrap();
    slow_and_fast(&server);
    let driver = MockDriver::new().with_close_delay_for("slow", Duration::from_millis(300));
    let store = open(&server, &driver).await;
    let project = store.get_project("P", false).await.unwrap();
    project.get_package("Q", false).await.unwrap();
    project.get_package("R", false).await.unwrap();

    let deleting = {
        let project = project.clone();
        tokio::spawn(async move { project.delete_package("Q").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        project.package_status("Q").map(|info| info.status),
        Some(PackageStatus::Unloading)
    );
    let names: Vec<_> = project.list_packages().await.into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["R"]);

    deleting.await.unwrap().unwrap();
    let names: Vec<_> = project.list_packages().await.into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["R"]);
}

#[tokio::test]
async fn test_listing_leaves_out_broken_packages() {
    let server = TestServer::new().unwrap();
    slow_and_fast(&server);
    std::fs::write(server.package_dir("P", "Q").join("publisher.json"), "{ nope").unwrap();
    let store = open(&server, &MockDriver::new()).await;
    let project = store.get_project("P", false).await.unwrap();

    let names: Vec<_> = project.list_packages().await.into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["R"]);
}

#[tokio::test]
async fn test_deleted_package_is_gone() {
    let server = TestServer::new().unwrap();
    slow_and_fast(&server);
    let driver = MockDriver::new();
    let store = open(&server, &driver).await;
    let project = store.get_project("P", false).await.unwrap();
    let package = project.get_package("R", false).await.unwrap();

    project.delete_package("R").await.unwrap();

    assert!(!server.package_dir("P", "R").exists());
    assert_eq!(project.package_status("R"), None);
    assert!(package.get_connection("duckdb").unwrap().is_closed());
    let err = project.get_package("R", false).await.unwrap_err();
    assert!(matches!(err, QuayError::PackageNotFound(_)));
    let names: Vec<_> = project.list_packages().await.into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["Q"]);

    let persisted = server.read_config().unwrap();
    assert_eq!(persisted["projects"][0]["packages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_with_missing_directory_still_unloads() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let store = open(&server, &MockDriver::new()).await;
    let project = store.get_project("P", false).await.unwrap();
    project.get_package("Q", false).await.unwrap();
    std::fs::remove_dir_all(server.package_dir("P", "Q")).unwrap();

    project.delete_package("Q").await.unwrap();

    assert!(project.package_names().is_empty());
}

#[tokio::test]
async fn test_reload_constructs_again() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let driver = MockDriver::new();
    let store = open(&server, &driver).await;
    let project = store.get_project("P", false).await.unwrap();

    let first = project.get_package("Q", true).await.unwrap();
    let second = project.get_package("Q", true).await.unwrap();

    assert_eq!(driver.connect_count_for("duckdb"), 2);
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.get_model("flights.malloy").await.is_ok());
    assert!(Arc::ptr_eq(&project.get_package("Q", false).await.unwrap(), &second));
}

#[tokio::test]
async fn test_concurrent_reloads_do_not_overlap() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q"]).unwrap();
    let driver = MockDriver::new().with_delay_for("duckdb", Duration::from_millis(150));
    let store = open(&server, &driver).await;
    let project = store.get_project("P", false).await.unwrap();

    let started = Instant::now();
    let (a, b) = tokio::join!(project.get_package("Q", true), project.get_package("Q", true));

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(driver.connect_count_for("duckdb"), 2);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_unrelated_packages_load_in_parallel() {
    let server = TestServer::new().unwrap();
    server.single_project("P", &["Q", "R"]).unwrap();
    let driver = MockDriver::new().with_delay_for("duckdb", Duration::from_millis(200));
    let store = open(&server, &driver).await;
    let project = store.get_project("P", false).await.unwrap();

    let started = Instant::now();
    let (q, r) = tokio::join!(project.get_package("Q", false), project.get_package("R", false));

    assert!(q.is_ok() && r.is_ok());
    assert!(started.elapsed() < Duration::from_millis(390));
}

#[tokio::test]
async fn test_concurrent_project_access_builds_once() {
    let server = TestServer::new().unwrap();
    server
        .write_config(&serde_json::json!({
            "projects": [{
                "name": "P",
                "packages": [],
                "connections": [ { "name": "warehouse", "type": "duckdb" } ]
            }]
        }))
        .unwrap();
    let driver = MockDriver::new().with_delay_for("warehouse", Duration::from_millis(100));
    let store = open(&server, &driver).await;

    let results = futures::future::join_all((0..4).map(|_| store.get_project("P", false))).await;

    assert_eq!(driver.connect_count_for("warehouse"), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert!(Arc::ptr_eq(result.as_ref().unwrap(), first));
    }
    assert!(server.project_dir("P").is_dir());
}
