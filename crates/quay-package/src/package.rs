//! A loaded package: scanned model files plus the connections they query

use crate::compiler::{CompiledModel, ModelCompiler, ModelType, QueryRequest};
use crate::manifest::{self, PackageManifest};
use crate::model::{ModelEntry, ModelInfo, Notebook};
use parking_lot::RwLock;
use quay_core::{
    Connection, ConnectionConfig, QuayError, QueryResult, Result, TableSchema,
};
use quay_drivers::{ConnectionFactory, ConnectionSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Process-wide collaborators every package is built with
#[derive(Clone)]
pub struct PackageServices {
    pub factory: ConnectionFactory,
    pub compiler: Arc<dyn ModelCompiler>,
}

impl PackageServices {
    pub fn new(factory: ConnectionFactory, compiler: Arc<dyn ModelCompiler>) -> Self {
        Self { factory, compiler }
    }
}

impl std::fmt::Debug for PackageServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageServices")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

/// Api-facing package description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub location: String,
    pub resource: String,
}

fn package_resource(project_name: &str, package_name: &str) -> String {
    format!("/api/v0/projects/{}/packages/{}", project_name, package_name)
}

pub struct Package {
    project_name: String,
    path: PathBuf,
    metadata: RwLock<PackageMetadata>,
    readme: Option<String>,
    models: BTreeMap<String, ModelEntry>,
    /// Connections this package constructed and must close
    owned: ConnectionSet,
    /// Owned connections layered over the inherited project connections
    connections: ConnectionSet,
    compiler: Arc<dyn ModelCompiler>,
}

impl Package {
    /// Load the package at `path`.
    ///
    /// Package-local connections from `publisher.connections.json` and the
    /// default embedded connection are layered over `inherited`; local names
    /// win on a collision.
    #[tracing::instrument(skip(path, inherited, services), fields(project = %project_name, package = %package_name))]
    pub async fn create(
        project_name: &str,
        package_name: &str,
        path: &Path,
        inherited: &ConnectionSet,
        services: &PackageServices,
    ) -> Result<Package> {
        if !tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(QuayError::PackageNotFound(format!(
                "{} (no directory at {})",
                package_name,
                path.display()
            )));
        }

        let manifest = PackageManifest::read(package_name, path).await?;
        let local_configs = manifest::read_connections(package_name, path).await?;
        let models = scan_models(path).await?;
        let readme = manifest::read_readme(path).await;

        let mut owned = services
            .factory
            .create_connections(&local_configs, path)
            .await?;
        match services.factory.create_default_connection(path).await {
            Ok((connection, descriptor)) => {
                owned.insert(connection, descriptor);
            }
            Err(e) => {
                owned.close_all().await;
                return Err(e);
            }
        }
        let connections = owned.layered_over(inherited);

        tracing::info!(
            models = models.len(),
            connections = connections.len(),
            "package loaded"
        );

        Ok(Package {
            project_name: project_name.to_string(),
            path: path.to_path_buf(),
            metadata: RwLock::new(PackageMetadata {
                name: package_name.to_string(),
                description: manifest.description,
                location: path.display().to_string(),
                resource: package_resource(project_name, package_name),
            }),
            readme,
            models,
            owned,
            connections,
            compiler: services.compiler.clone(),
        })
    }

    pub fn name(&self) -> String {
        self.metadata.read().name.clone()
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn readme(&self) -> Option<&str> {
        self.readme.as_deref()
    }

    pub fn get_package_metadata(&self) -> PackageMetadata {
        self.metadata.read().clone()
    }

    /// Rename the package. The owning project checks uniqueness.
    pub fn set_name(&self, name: &str) {
        let mut metadata = self.metadata.write();
        metadata.name = name.to_string();
        metadata.resource = package_resource(&self.project_name, name);
    }

    pub fn set_description(&self, description: Option<String>) {
        self.metadata.write().description = description;
    }

    /// Location reported in metadata, as the owning project declares it
    pub fn set_location(&self, location: &str) {
        self.metadata.write().location = location.to_string();
    }

    /// Rewrite `publisher.json` from the current metadata
    pub async fn write_manifest(&self) -> Result<()> {
        let manifest = {
            let metadata = self.metadata.read();
            PackageManifest {
                name: Some(metadata.name.clone()),
                description: metadata.description.clone(),
            }
        };
        manifest.write(&self.path).await
    }

    pub fn list_models(&self) -> Vec<ModelInfo> {
        self.list_of(ModelType::Model)
    }

    pub fn list_notebooks(&self) -> Vec<ModelInfo> {
        self.list_of(ModelType::Notebook)
    }

    fn list_of(&self, model_type: ModelType) -> Vec<ModelInfo> {
        let package_name = self.name();
        self.models
            .values()
            .filter(|entry| entry.model_type == model_type)
            .map(|entry| ModelInfo {
                package_name: package_name.clone(),
                path: entry.path.clone(),
                model_type: entry.model_type,
            })
            .collect()
    }

    fn entry(&self, model_path: &str) -> Result<&ModelEntry> {
        self.models
            .get(model_path.trim_start_matches("./"))
            .ok_or_else(|| QuayError::ModelNotFound(model_path.to_string()))
    }

    /// Compiled model at `model_path`, compiling it on first access
    pub async fn get_model(&self, model_path: &str) -> Result<Arc<CompiledModel>> {
        self.entry(model_path)?
            .compiled(self.compiler.as_ref())
            .await
    }

    pub async fn get_notebook(&self, notebook_path: &str) -> Result<Notebook> {
        let entry = self.entry(notebook_path)?;
        if entry.model_type != ModelType::Notebook {
            return Err(QuayError::BadRequest(format!(
                "{} is not a notebook",
                notebook_path
            )));
        }
        let model = entry.compiled(self.compiler.as_ref()).await?;
        Ok(Notebook {
            path: entry.path.clone(),
            cells: entry.cells().await?,
            model,
        })
    }

    /// Run `request` against the model at `model_path` on the connection the
    /// model declares for it
    #[tracing::instrument(skip(self, request), fields(package = %self.name()))]
    pub async fn execute_query(
        &self,
        model_path: &str,
        request: &QueryRequest,
    ) -> Result<QueryResult> {
        let model = self.get_model(model_path).await?;
        let connection_name = self.compiler.connection_for(&model, request)?;
        let connection = self.get_connection(&connection_name)?;
        self.compiler
            .execute(&model, request, connection.as_ref())
            .await
    }

    pub fn get_connection(&self, name: &str) -> Result<Arc<dyn Connection>> {
        self.connections
            .get(name)
            .ok_or_else(|| QuayError::ConnectionNotFound(name.to_string()))
    }

    pub fn list_connections(&self) -> Vec<ConnectionConfig> {
        self.connections.descriptors().to_vec()
    }

    pub async fn get_table_schema(
        &self,
        connection_name: &str,
        table_key: &str,
        table_path: &str,
    ) -> Result<Option<TableSchema>> {
        self.get_connection(connection_name)?
            .fetch_table_schema(table_key, table_path)
            .await
    }

    pub async fn get_select_schema(&self, connection_name: &str, sql: &str) -> Result<TableSchema> {
        self.get_connection(connection_name)?
            .fetch_select_schema(sql)
            .await
    }

    /// Close the connections this package constructed. Inherited project
    /// connections stay open.
    pub async fn close(&self) {
        tracing::debug!(package = %self.name(), "closing package connections");
        self.owned.close_all().await;
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("project", &self.project_name)
            .field("name", &self.name())
            .field("path", &self.path)
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .field("connections", &self.connections)
            .finish()
    }
}

/// Find model and notebook files below `root`, keyed by relative path.
/// Hidden files and directories are skipped.
async fn scan_models(root: &Path) -> Result<BTreeMap<String, ModelEntry>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut models = BTreeMap::new();
        let walker = WalkDir::new(&root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry.map_err(|e| {
                QuayError::Io(std::io::Error::other(format!(
                    "failed to scan {}: {}",
                    root.display(),
                    e
                )))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(model_type) = ModelType::from_path(entry.path()) else {
                continue;
            };
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let key = relative.to_string_lossy().replace('\\', "/");
            models.insert(
                key.clone(),
                ModelEntry::new(key, model_type, entry.path().to_path_buf()),
            );
        }
        Ok(models)
    })
    .await
    .map_err(|e| QuayError::Internal(format!("model scan task failed: {}", e)))?
}
