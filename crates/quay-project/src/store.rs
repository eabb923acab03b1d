//! Registry of projects backed by the catalog file

use crate::config::{CONFIG_FILE_NAME, Catalog, ProjectConfig, StoreOptions, load_config};
use crate::locks::KeyedLocks;
use crate::project::{Project, ProjectMetadata, ProjectUpdate};
use futures::future::join_all;
use parking_lot::RwLock;
use quay_core::{QuayError, Result};
use quay_package::PackageServices;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OnceCell, watch};

/// Startup signal: whether initialization finished and why the config was
/// ignored, if it was
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub initialized: bool,
    pub frozen_config: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_error: Option<String>,
}

pub struct ProjectStore {
    root: PathBuf,
    options: StoreOptions,
    services: PackageServices,
    catalog: OnceCell<Arc<Catalog>>,
    frozen: AtomicBool,
    config_error: RwLock<Option<String>>,
    ready: watch::Sender<bool>,
    projects: RwLock<HashMap<String, Arc<Project>>>,
    locks: KeyedLocks,
}

impl ProjectStore {
    /// Create the store and start reading the catalog in the background.
    ///
    /// Must be called from within a tokio runtime. Every lookup waits for
    /// `finished_initialization`.
    pub fn new(
        root: impl Into<PathBuf>,
        options: StoreOptions,
        services: PackageServices,
    ) -> Arc<Self> {
        let store = Self::unstarted(root.into(), options, services);
        let init = store.clone();
        tokio::spawn(async move { init.initialize().await });
        store
    }

    /// Create the store and wait for the catalog to be read
    pub async fn open(
        root: impl Into<PathBuf>,
        options: StoreOptions,
        services: PackageServices,
    ) -> Arc<Self> {
        let store = Self::unstarted(root.into(), options, services);
        store.initialize().await;
        store
    }

    fn unstarted(root: PathBuf, options: StoreOptions, services: PackageServices) -> Arc<Self> {
        let services = PackageServices {
            factory: services.factory.with_probe_timeout(options.probe_timeout),
            compiler: services.compiler,
        };
        let (ready, _) = watch::channel(false);
        Arc::new(Self {
            root,
            options,
            services,
            catalog: OnceCell::new(),
            frozen: AtomicBool::new(false),
            config_error: RwLock::new(None),
            ready,
            projects: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
        })
    }

    #[tracing::instrument(skip(self), fields(root = %self.root.display()))]
    async fn initialize(&self) {
        let path = self.root.join(CONFIG_FILE_NAME);
        let loaded = load_config(&path).await;
        let frozen = self
            .options
            .frozen_config_override
            .unwrap_or(loaded.config.frozen_config);

        self.frozen.store(frozen, Ordering::SeqCst);
        let writable = loaded.error.is_none();
        *self.config_error.write() = loaded.error;
        let project_count = loaded.config.projects.len();
        if self
            .catalog
            .set(Arc::new(Catalog::new(path, loaded.config, writable)))
            .is_err()
        {
            tracing::warn!("project store initialized twice, keeping the first catalog");
        }
        self.ready.send_replace(true);
        tracing::info!(
            projects = project_count,
            frozen_config = frozen,
            "project store initialized"
        );
    }

    /// Resolves once the catalog has been read
    pub async fn finished_initialization(&self) {
        let mut ready = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = ready.wait_for(|ready| *ready).await;
    }

    async fn catalog(&self) -> Result<&Arc<Catalog>> {
        self.finished_initialization().await;
        self.catalog
            .get()
            .ok_or_else(|| QuayError::Internal("project store is not initialized".into()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub fn health(&self) -> StoreHealth {
        StoreHealth {
            initialized: *self.ready.borrow(),
            frozen_config: self.is_frozen(),
            config_error: self.config_error.read().clone(),
        }
    }

    fn ensure_mutable(&self, action: &str) -> Result<()> {
        if self.is_frozen() {
            return Err(QuayError::FrozenConfig(action.to_string()));
        }
        Ok(())
    }

    fn cached(&self, name: &str) -> Option<Arc<Project>> {
        self.projects.read().get(name).cloned()
    }

    /// Project `name`, built on first use. Same locking discipline as
    /// `Project::get_package`.
    #[tracing::instrument(skip(self))]
    pub async fn get_project(&self, name: &str, reload: bool) -> Result<Arc<Project>> {
        let catalog = self.catalog().await?;
        if !reload {
            if let Some(project) = self.cached(name) {
                return Ok(project);
            }
        }

        let _guard = self.locks.lock(name).await;
        if !reload {
            if let Some(project) = self.cached(name) {
                tracing::debug!("project loaded by a concurrent caller");
                return Ok(project);
            }
        }
        let config = catalog
            .project(name)
            .await
            .ok_or_else(|| QuayError::ProjectNotFound(name.to_string()))?;

        let result = Project::create(
            &config,
            &self.root,
            self.services.clone(),
            self.is_frozen(),
            Some(catalog.clone()),
        )
        .await;

        match result {
            Ok(project) => {
                let project = Arc::new(project);
                self.projects
                    .write()
                    .insert(name.to_string(), project.clone());
                tracing::info!(project = %name, "project serving");
                Ok(project)
            }
            Err(e) => {
                self.projects.write().remove(name);
                tracing::error!(project = %name, error = %e, "project load failed");
                Err(e)
            }
        }
    }

    /// Metadata of every catalog project. A project that fails to load is
    /// left out.
    pub async fn list_projects(&self) -> Result<Vec<ProjectMetadata>> {
        let names = self.catalog().await?.project_names().await;
        let loads = names.iter().map(|name| async move {
            match self.get_project(name, false).await {
                Ok(project) => Some(project.metadata()),
                Err(e) => {
                    tracing::warn!(project = %name, error = %e, "skipping project in listing");
                    None
                }
            }
        });
        Ok(join_all(loads).await.into_iter().flatten().collect())
    }

    #[tracing::instrument(skip(self, config), fields(project = %config.name))]
    pub async fn add_project(&self, config: ProjectConfig) -> Result<Arc<Project>> {
        let catalog = self.catalog().await?;
        self.ensure_mutable("adding a project")?;
        if config.name.trim().is_empty() {
            return Err(QuayError::BadRequest("project name must not be empty".into()));
        }

        let name = config.name.clone();
        {
            let _guard = self.locks.lock(&name).await;
            if catalog.project(&name).await.is_some() {
                return Err(QuayError::AlreadyExists(format!("project \"{}\"", name)));
            }
            catalog.upsert_project(config).await;
        }

        match self.get_project(&name, true).await {
            Ok(project) => Ok(project),
            Err(e) => {
                catalog.remove_project(&name).await;
                Err(e)
            }
        }
    }

    pub async fn update_project(
        &self,
        name: &str,
        update: ProjectUpdate,
    ) -> Result<ProjectMetadata> {
        self.finished_initialization().await;
        self.ensure_mutable("updating a project")?;
        self.get_project(name, false).await?.update(update).await
    }

    /// Close a project and drop it from the catalog. Package directories are
    /// left in place.
    #[tracing::instrument(skip(self))]
    pub async fn delete_project(&self, name: &str) -> Result<()> {
        let catalog = self.catalog().await?;
        self.ensure_mutable("deleting a project")?;
        let guard = self.locks.lock(name).await;
        if catalog.remove_project(name).await.is_none() {
            return Err(QuayError::ProjectNotFound(name.to_string()));
        }
        let project = self.projects.write().remove(name);
        drop(guard);
        self.locks.remove(name);

        if let Some(project) = project {
            project.close().await;
        }
        tracing::info!(project = %name, "project deleted");
        Ok(())
    }
}

impl std::fmt::Debug for ProjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectStore")
            .field("root", &self.root)
            .field("health", &self.health())
            .finish_non_exhaustive()
    }
}
