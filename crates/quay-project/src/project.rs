//! A project: declared packages loaded lazily, plus project-level connections

use crate::config::{Catalog, PackageConfig, ProjectConfig, resolve_location};
use crate::locks::KeyedLocks;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use quay_core::{Connection, ConnectionConfig, QuayError, Result};
use quay_drivers::{ConnectionFactory, ConnectionSet, ConnectionStatus};
use quay_package::{Package, PackageMetadata, PackageServices, README_NAME, read_readme};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load state of one package name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageStatus {
    Loading,
    Serving,
    Unloading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub status: PackageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    pub name: String,
    pub resource: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
}

/// Changes accepted by `Project::update`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<ConnectionConfig>>,
}

/// Changes accepted by `Project::update_package`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Project-level connections: live set plus the configs they were built
/// from, secrets included
#[derive(Default)]
struct Connections {
    live: ConnectionSet,
    configs: Vec<ConnectionConfig>,
}

pub struct Project {
    name: String,
    root: PathBuf,
    path: PathBuf,
    frozen: bool,
    metadata: RwLock<ProjectMetadata>,
    declared: RwLock<Vec<PackageConfig>>,
    packages: RwLock<HashMap<String, Arc<Package>>>,
    statuses: RwLock<HashMap<String, PackageInfo>>,
    locks: KeyedLocks,
    connections: RwLock<Connections>,
    /// Serializes connection mutations
    connection_writes: tokio::sync::Mutex<()>,
    services: PackageServices,
    catalog: Option<Arc<Catalog>>,
}

impl Project {
    /// Build a project from its catalog entry. Packages are not loaded until
    /// first requested.
    #[tracing::instrument(skip(config, root, services, catalog), fields(project = %config.name))]
    pub async fn create(
        config: &ProjectConfig,
        root: &Path,
        services: PackageServices,
        frozen: bool,
        catalog: Option<Arc<Catalog>>,
    ) -> Result<Project> {
        let path = root.join(&config.name);
        tokio::fs::create_dir_all(&path).await?;
        let readme = read_readme(&path).await;
        let live = services
            .factory
            .create_connections(&config.connections, &path)
            .await?;

        tracing::info!(
            packages = config.packages.len(),
            connections = live.len(),
            "project loaded"
        );

        Ok(Project {
            name: config.name.clone(),
            root: root.to_path_buf(),
            metadata: RwLock::new(ProjectMetadata {
                name: config.name.clone(),
                resource: format!("/api/v0/projects/{}", config.name),
                location: path.display().to_string(),
                readme,
            }),
            path,
            frozen,
            declared: RwLock::new(config.packages.clone()),
            packages: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
            connections: RwLock::new(Connections {
                live,
                configs: config.connections.clone(),
            }),
            connection_writes: tokio::sync::Mutex::new(()),
            services,
            catalog,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn metadata(&self) -> ProjectMetadata {
        self.metadata.read().clone()
    }

    fn ensure_mutable(&self, action: &str) -> Result<()> {
        if self.frozen {
            return Err(QuayError::FrozenConfig(action.to_string()));
        }
        Ok(())
    }

    /// Catalog entry reflecting the current in-memory state
    pub fn to_config(&self) -> ProjectConfig {
        ProjectConfig {
            name: self.name.clone(),
            packages: self.declared.read().clone(),
            connections: self.connections.read().configs.clone(),
        }
    }

    async fn persist(&self) {
        if let Some(catalog) = &self.catalog {
            catalog.upsert_project(self.to_config()).await;
        }
    }

    /// Location as written in the catalog
    fn declared_location(&self, name: &str) -> Option<String> {
        self.declared
            .read()
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.location.clone())
    }

    fn package_location(&self, name: &str) -> Option<PathBuf> {
        self.declared_location(name)
            .map(|location| resolve_location(&self.root, &location))
    }

    pub fn package_names(&self) -> Vec<String> {
        self.declared.read().iter().map(|p| p.name.clone()).collect()
    }

    pub fn package_status(&self, name: &str) -> Option<PackageInfo> {
        self.statuses.read().get(name).copied()
    }

    fn set_status(&self, name: &str, status: PackageStatus) {
        let load_timestamp = (status == PackageStatus::Serving).then(Utc::now);
        self.statuses.write().insert(
            name.to_string(),
            PackageInfo {
                status,
                load_timestamp,
            },
        );
    }

    fn cached(&self, name: &str) -> Option<Arc<Package>> {
        self.packages.read().get(name).cloned()
    }

    /// Package `name`, loading it on first use.
    ///
    /// At most one load per name is in flight; concurrent callers wait for it
    /// and share its result. `reload` forces a fresh load.
    #[tracing::instrument(skip(self), fields(project = %self.name))]
    pub async fn get_package(&self, name: &str, reload: bool) -> Result<Arc<Package>> {
        if !reload {
            if let Some(package) = self.cached(name) {
                return Ok(package);
            }
        }

        let _guard = self.locks.lock(name).await;

        if !reload {
            if let Some(package) = self.cached(name) {
                tracing::debug!("package loaded by a concurrent caller");
                return Ok(package);
            }
        }
        if self
            .package_status(name)
            .is_some_and(|info| info.status == PackageStatus::Unloading)
        {
            return Err(QuayError::PackageNotFound(name.to_string()));
        }
        let declared_location = self
            .declared_location(name)
            .ok_or_else(|| QuayError::PackageNotFound(name.to_string()))?;
        let location = resolve_location(&self.root, &declared_location);

        self.set_status(name, PackageStatus::Loading);
        // Clears the entry if construction fails or this future is dropped
        let loading = LoadingGuard {
            project: self,
            name,
            armed: true,
        };
        let inherited = self.connections.read().live.clone();
        match Package::create(&self.name, name, &location, &inherited, &self.services).await {
            Ok(package) => {
                package.set_location(&declared_location);
                let package = Arc::new(package);
                // A replaced package keeps its connections until its last holder drops it
                self.packages
                    .write()
                    .insert(name.to_string(), package.clone());
                self.set_status(name, PackageStatus::Serving);
                loading.disarm();
                tracing::info!(package = %name, "package serving");
                Ok(package)
            }
            Err(e) => {
                tracing::error!(package = %name, error = %e, "package load failed");
                Err(e)
            }
        }
    }

    fn forget(&self, name: &str) {
        self.packages.write().remove(name);
        self.statuses.write().remove(name);
    }

    /// Metadata of every declared package that is not loading or unloading.
    /// A package that fails to load is left out.
    pub async fn list_packages(&self) -> Vec<PackageMetadata> {
        let names: Vec<String> = self
            .package_names()
            .into_iter()
            .filter(|name| {
                !matches!(
                    self.package_status(name).map(|info| info.status),
                    Some(PackageStatus::Loading | PackageStatus::Unloading)
                )
            })
            .collect();

        let loads = names.iter().map(|name| async move {
            match self.get_package(name, false).await {
                Ok(package) => Some(package.get_package_metadata()),
                Err(e) => {
                    tracing::warn!(
                        project = %self.name,
                        package = %name,
                        error = %e,
                        "skipping package in listing"
                    );
                    None
                }
            }
        });
        join_all(loads).await.into_iter().flatten().collect()
    }

    /// Declare and load a package at `<project>/<name>`
    #[tracing::instrument(skip(self), fields(project = %self.name))]
    pub async fn add_package(&self, name: &str) -> Result<Arc<Package>> {
        self.ensure_mutable("adding a package")?;
        if name.trim().is_empty() {
            return Err(QuayError::BadRequest("package name must not be empty".into()));
        }
        {
            let mut declared = self.declared.write();
            if declared.iter().any(|p| p.name == name) {
                return Err(QuayError::AlreadyExists(format!("package \"{}\"", name)));
            }
            declared.push(PackageConfig {
                name: name.to_string(),
                location: format!("./{}/{}", self.name, name),
            });
        }

        match self.get_package(name, true).await {
            Ok(package) => {
                self.persist().await;
                Ok(package)
            }
            Err(e) => {
                self.declared.write().retain(|p| p.name != name);
                Err(e)
            }
        }
    }

    /// Update a package's metadata, location or name
    #[tracing::instrument(skip(self, update), fields(project = %self.name))]
    pub async fn update_package(
        &self,
        name: &str,
        update: PackageUpdate,
    ) -> Result<PackageMetadata> {
        self.ensure_mutable("updating a package")?;
        let new_name = update.name.filter(|n| n != name);
        if let Some(new_name) = &new_name {
            self.check_new_package_name(new_name)?;
        }
        let mut package = self.get_package(name, false).await?;

        let mut previous_location = None;
        if let Some(location) = &update.location {
            let previous = self.set_declared_location(name, location)?;
            package = match self.get_package(name, true).await {
                Ok(package) => package,
                Err(e) => {
                    self.set_declared_location(name, &previous)?;
                    return Err(e);
                }
            };
            previous_location = Some(previous);
        }

        let mut current = name.to_string();
        if let Some(new_name) = new_name {
            if let Err(e) = self.rename_package(name, &new_name, &package).await {
                if let Some(previous) = previous_location {
                    self.restore_location(name, &previous).await?;
                }
                return Err(e);
            }
            current = new_name;
        }
        if let Some(description) = update.description {
            package.set_description(Some(description));
        }

        package.write_manifest().await?;
        self.persist().await;
        tracing::info!(package = %current, "package updated");
        Ok(package.get_package_metadata())
    }

    fn check_new_package_name(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(QuayError::BadRequest("package name must not be empty".into()));
        }
        if self.declared.read().iter().any(|p| p.name == name) {
            return Err(QuayError::AlreadyExists(format!("package \"{}\"", name)));
        }
        Ok(())
    }

    /// Point `name` back at `location` and drop the package loaded from the
    /// abandoned one
    async fn restore_location(&self, name: &str, location: &str) -> Result<()> {
        let _guard = self.locks.lock(name).await;
        self.set_declared_location(name, location)?;
        self.forget(name);
        Ok(())
    }

    fn set_declared_location(&self, name: &str, location: &str) -> Result<String> {
        let mut declared = self.declared.write();
        let entry = declared
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| QuayError::PackageNotFound(name.to_string()))?;
        Ok(std::mem::replace(&mut entry.location, location.to_string()))
    }

    async fn rename_package(&self, from: &str, to: &str, package: &Arc<Package>) -> Result<()> {
        let guards = self.locks.lock_pair(from, to).await;
        {
            let mut declared = self.declared.write();
            if declared.iter().any(|p| p.name == to) {
                return Err(QuayError::AlreadyExists(format!("package \"{}\"", to)));
            }
            let entry = declared
                .iter_mut()
                .find(|p| p.name == from)
                .ok_or_else(|| QuayError::PackageNotFound(from.to_string()))?;
            entry.name = to.to_string();
        }

        let mut packages = self.packages.write();
        let mut statuses = self.statuses.write();
        packages.remove(from);
        packages.insert(to.to_string(), package.clone());
        if let Some(info) = statuses.remove(from) {
            statuses.insert(to.to_string(), info);
        }
        package.set_name(to);
        drop(statuses);
        drop(packages);
        drop(guards);
        self.locks.remove(from);
        Ok(())
    }

    /// Unload a package and remove its directory.
    ///
    /// Fails immediately while the package is loading. Directory removal is
    /// best effort.
    #[tracing::instrument(skip(self), fields(project = %self.name))]
    pub async fn delete_package(&self, name: &str) -> Result<()> {
        self.ensure_mutable("deleting a package")?;
        if self
            .package_status(name)
            .is_some_and(|info| info.status == PackageStatus::Loading)
        {
            return Err(QuayError::PackageLoading(name.to_string()));
        }

        let guard = self.locks.lock(name).await;
        let location = self
            .package_location(name)
            .ok_or_else(|| QuayError::PackageNotFound(name.to_string()))?;

        let package = {
            let mut packages = self.packages.write();
            let mut statuses = self.statuses.write();
            statuses.insert(
                name.to_string(),
                PackageInfo {
                    status: PackageStatus::Unloading,
                    load_timestamp: None,
                },
            );
            packages.remove(name)
        };
        tracing::info!(package = %name, "package unloading");

        if let Some(package) = &package {
            package.close().await;
        }
        if let Err(e) = tokio::fs::remove_dir_all(&location).await {
            tracing::warn!(
                package = %name,
                path = %location.display(),
                error = %e,
                "failed to remove package directory"
            );
        }

        self.declared.write().retain(|p| p.name != name);
        self.statuses.write().remove(name);
        drop(guard);
        self.locks.remove(name);

        self.persist().await;
        tracing::info!(package = %name, "package deleted");
        Ok(())
    }

    /// Update the readme and/or replace the project-level connections.
    ///
    /// A new connection set evicts loaded packages so their next use picks it
    /// up; loads already in flight finish with the set they started with.
    #[tracing::instrument(skip(self, update), fields(project = %self.name))]
    pub async fn update(&self, update: ProjectUpdate) -> Result<ProjectMetadata> {
        self.ensure_mutable("updating a project")?;

        if let Some(readme) = update.readme {
            tokio::fs::write(self.path.join(README_NAME), &readme)
                .await
                .map_err(|e| QuayError::ReadmeUpdate(e.to_string()))?;
            self.metadata.write().readme = Some(readme);
        }

        if let Some(configs) = update.connections {
            let _writes = self.connection_writes.lock().await;
            let live = self
                .services
                .factory
                .create_connections(&configs, &self.path)
                .await?;
            *self.connections.write() = Connections { live, configs };
            self.evict_packages().await;
            self.persist().await;
        }

        Ok(self.metadata())
    }

    /// Drop every loaded package from the cache
    async fn evict_packages(&self) {
        let names: Vec<String> = self.packages.read().keys().cloned().collect();
        for name in names {
            let _guard = self.locks.lock(&name).await;
            let evicted = {
                let mut packages = self.packages.write();
                let mut statuses = self.statuses.write();
                let evicted = packages.remove(&name).is_some();
                if evicted {
                    statuses.remove(&name);
                }
                evicted
            };
            if evicted {
                tracing::debug!(package = %name, "package evicted");
            }
        }
    }

    pub fn list_connections(&self) -> Vec<ConnectionConfig> {
        self.connections.read().live.descriptors().to_vec()
    }

    pub fn get_connection(&self, name: &str) -> Result<Arc<dyn Connection>> {
        self.connections
            .read()
            .live
            .get(name)
            .ok_or_else(|| QuayError::ConnectionNotFound(name.to_string()))
    }

    /// Api-facing descriptor of a connection, secrets removed
    pub fn get_connection_config(&self, name: &str) -> Result<ConnectionConfig> {
        self.connections
            .read()
            .live
            .descriptor(name)
            .cloned()
            .ok_or_else(|| QuayError::ConnectionNotFound(name.to_string()))
    }

    #[tracing::instrument(skip(self, config), fields(project = %self.name, connection = %config.name))]
    pub async fn add_connection(&self, config: ConnectionConfig) -> Result<ConnectionConfig> {
        self.ensure_mutable("adding a connection")?;
        let _writes = self.connection_writes.lock().await;
        if self.connections.read().live.contains(&config.name) {
            return Err(QuayError::AlreadyExists(format!("connection \"{}\"", config.name)));
        }
        ConnectionFactory::validate_names(std::slice::from_ref(&config))?;

        let (connection, descriptor) = self
            .services
            .factory
            .create_connection(&config, &self.path)
            .await?;
        {
            let mut connections = self.connections.write();
            connections.live.insert(connection, descriptor.clone());
            connections.configs.push(config);
        }
        self.evict_packages().await;
        self.persist().await;
        Ok(descriptor)
    }

    #[tracing::instrument(skip(self, config), fields(project = %self.name))]
    pub async fn update_connection(
        &self,
        name: &str,
        mut config: ConnectionConfig,
    ) -> Result<ConnectionConfig> {
        self.ensure_mutable("updating a connection")?;
        let _writes = self.connection_writes.lock().await;
        if !self.connections.read().live.contains(name) {
            return Err(QuayError::ConnectionNotFound(name.to_string()));
        }
        config.name = name.to_string();

        let (connection, descriptor) = self
            .services
            .factory
            .create_connection(&config, &self.path)
            .await?;
        let replaced = {
            let mut connections = self.connections.write();
            if let Some(existing) = connections.configs.iter_mut().find(|c| c.name == name) {
                *existing = config;
            }
            connections.live.insert(connection, descriptor.clone())
        };
        if let Some(replaced) = replaced {
            if let Err(e) = replaced.close().await {
                tracing::warn!(
                    connection = %name,
                    error = %e,
                    "failed to close replaced connection"
                );
            }
        }
        self.evict_packages().await;
        self.persist().await;
        Ok(descriptor)
    }

    /// Close and forget a connection. Unknown names are ignored.
    #[tracing::instrument(skip(self), fields(project = %self.name))]
    pub async fn delete_connection(&self, name: &str) -> Result<()> {
        self.ensure_mutable("deleting a connection")?;
        let _writes = self.connection_writes.lock().await;
        let removed = {
            let mut connections = self.connections.write();
            connections.configs.retain(|c| c.name != name);
            connections.live.remove(name)
        };
        let Some((connection, _)) = removed else {
            tracing::info!(connection = %name, "connection not present, nothing to delete");
            return Ok(());
        };
        if let Err(e) = connection.close().await {
            tracing::warn!(connection = %name, error = %e, "failed to close connection");
        }
        self.evict_packages().await;
        self.persist().await;
        Ok(())
    }

    /// Probe a configured connection with a fresh, throwaway session
    pub async fn test_connection(&self, name: &str) -> Result<ConnectionStatus> {
        let config = self
            .connections
            .read()
            .configs
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| QuayError::ConnectionNotFound(name.to_string()))?;
        Ok(self
            .services
            .factory
            .test_connection_config(&config, &self.path)
            .await)
    }

    /// Close loaded packages and project connections
    pub async fn close(&self) {
        let packages: Vec<Arc<Package>> = self.packages.write().drain().map(|(_, p)| p).collect();
        self.statuses.write().clear();
        for package in packages {
            package.close().await;
        }
        let live = std::mem::take(&mut self.connections.write().live);
        live.close_all().await;
    }
}

/// Undoes a LOADING entry unless the load completed
struct LoadingGuard<'a> {
    project: &'a Project,
    name: &'a str,
    armed: bool,
}

impl LoadingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.project.forget(self.name);
            tracing::debug!(package = %self.name, "cleared unfinished load");
        }
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("frozen", &self.frozen)
            .field("packages", &self.package_names())
            .finish_non_exhaustive()
    }
}
