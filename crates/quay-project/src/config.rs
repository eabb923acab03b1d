//! Server configuration: loading, structural validation and persistence

use quay_core::{ConnectionConfig, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

/// Catalog file name at the server root
pub const CONFIG_FILE_NAME: &str = "publisher.config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub frozen_config: bool,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

impl StoreConfig {
    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<ConnectionConfig>,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            packages: Vec::new(),
            connections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConfig {
    pub name: String,
    /// Directory of the package, relative to the server root unless absolute
    pub location: String,
}

/// Resolve a package location against the server root
pub fn resolve_location(root: &Path, location: &str) -> PathBuf {
    let path = Path::new(location);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Runtime knobs that are not part of the catalog file
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Overrides `frozenConfig` from the catalog when set
    pub frozen_config_override: Option<bool>,
    /// Bound on connection probes
    pub probe_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            frozen_config_override: None,
            probe_timeout: quay_drivers::DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Outcome of reading the catalog file
#[derive(Debug, Clone, Default)]
pub struct ConfigLoad {
    pub config: StoreConfig,
    /// Why the file was ignored, when it was
    pub error: Option<String>,
    pub found: bool,
}

/// Check the shape of a parsed catalog before typed deserialization
pub fn validate_structure(document: &serde_json::Value) -> std::result::Result<(), String> {
    let projects = document
        .get("projects")
        .and_then(|p| p.as_array())
        .ok_or_else(|| "\"projects\" must be an array".to_string())?;

    let mut project_names = std::collections::HashSet::new();
    for (i, project) in projects.iter().enumerate() {
        let name = project
            .get("name")
            .and_then(|n| n.as_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| format!("projects[{}] is missing \"name\"", i))?;
        if !project_names.insert(name) {
            return Err(format!("project \"{}\" is declared more than once", name));
        }
        let packages = project
            .get("packages")
            .and_then(|p| p.as_array())
            .ok_or_else(|| format!("project \"{}\" is missing a \"packages\" array", name))?;

        let mut package_names = std::collections::HashSet::new();
        for (j, package) in packages.iter().enumerate() {
            let package_name = package
                .get("name")
                .and_then(|n| n.as_str())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    format!("project \"{}\" packages[{}] is missing \"name\"", name, j)
                })?;
            if package
                .get("location")
                .and_then(|l| l.as_str())
                .is_none()
            {
                return Err(format!(
                    "package \"{}\" of project \"{}\" is missing \"location\"",
                    package_name, name
                ));
            }
            if !package_names.insert(package_name) {
                return Err(format!(
                    "package \"{}\" is declared more than once in project \"{}\"",
                    package_name, name
                ));
            }
        }
    }
    Ok(())
}

/// Read the catalog at `path`.
///
/// Never fails: an unreadable, unparsable or structurally invalid file yields
/// an empty catalog and the reason in `ConfigLoad::error`. A missing file is
/// an empty catalog without an error.
pub async fn load_config(path: &Path) -> ConfigLoad {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(
                path = %path.display(),
                "no config file, starting with an empty catalog"
            );
            return ConfigLoad::default();
        }
        Err(e) => return fallback(path, format!("failed to read config: {}", e)),
    };

    let document: serde_json::Value = match serde_json::from_str(&text) {
        Ok(document) => document,
        Err(e) => return fallback(path, format!("failed to parse config: {}", e)),
    };
    if let Err(reason) = validate_structure(&document) {
        return fallback(path, format!("invalid config: {}", reason));
    }
    match serde_json::from_value::<StoreConfig>(document) {
        Ok(config) => {
            tracing::info!(
                path = %path.display(),
                projects = config.projects.len(),
                frozen_config = config.frozen_config,
                "config loaded"
            );
            ConfigLoad {
                config,
                error: None,
                found: true,
            }
        }
        Err(e) => fallback(path, format!("invalid config: {}", e)),
    }
}

fn fallback(path: &Path, reason: String) -> ConfigLoad {
    tracing::warn!(
        path = %path.display(),
        reason = %reason,
        "ignoring config, falling back to an empty catalog"
    );
    ConfigLoad {
        config: StoreConfig::default(),
        error: Some(reason),
        found: true,
    }
}

/// In-memory catalog document, written back to disk after each change.
///
/// A catalog that was loaded from a broken file is not written back, so the
/// original file survives for the operator to fix.
pub struct Catalog {
    path: PathBuf,
    document: Mutex<StoreConfig>,
    writable: bool,
}

impl Catalog {
    pub fn new(path: PathBuf, document: StoreConfig, writable: bool) -> Self {
        Self {
            path,
            document: Mutex::new(document),
            writable,
        }
    }

    pub async fn project(&self, name: &str) -> Option<ProjectConfig> {
        self.document.lock().await.project(name).cloned()
    }

    pub async fn project_names(&self) -> Vec<String> {
        self.document
            .lock()
            .await
            .projects
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Insert or replace a project entry and persist
    pub async fn upsert_project(&self, project: ProjectConfig) {
        let mut document = self.document.lock().await;
        match document.projects.iter_mut().find(|p| p.name == project.name) {
            Some(existing) => *existing = project,
            None => document.projects.push(project),
        }
        self.persist(&document).await;
    }

    pub async fn remove_project(&self, name: &str) -> Option<ProjectConfig> {
        let mut document = self.document.lock().await;
        let index = document.projects.iter().position(|p| p.name == name)?;
        let removed = document.projects.remove(index);
        self.persist(&document).await;
        Some(removed)
    }

    /// Best-effort write; failures are logged
    async fn persist(&self, document: &StoreConfig) {
        if !self.writable {
            tracing::warn!(
                path = %self.path.display(),
                "catalog came from an invalid file, not persisting changes"
            );
            return;
        }
        if let Err(e) = write_config(&self.path, document).await {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist catalog");
        }
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("path", &self.path)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

pub async fn write_config(path: &Path, config: &StoreConfig) -> Result<()> {
    let text = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, text).await?;
    Ok(())
}
