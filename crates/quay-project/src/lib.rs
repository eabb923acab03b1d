//! Quay projects
//!
//! The lifecycle layer of the server:
//!
//! - `ProjectStore` - Registry of projects read from `publisher.config.json`,
//!   with a frozen (read-only) mode
//! - `Project` - Declared packages loaded lazily, one load per name at a time,
//!   plus project-level connections
//! - `KeyedLocks` - The per-name locks both caches use
//!
//! # Package states
//!
//! ```text
//! (absent) -> LOADING -> SERVING -> UNLOADING -> (absent)
//!                |
//!                +-- load failed -> (absent)
//! ```

mod config;
#[cfg(test)]
mod config_tests;
mod locks;
mod project;
mod store;

pub use config::{
    CONFIG_FILE_NAME, Catalog, ConfigLoad, PackageConfig, ProjectConfig, StoreConfig,
    StoreOptions, load_config, resolve_location, validate_structure, write_config,
};
pub use locks::KeyedLocks;
pub use project::{
    PackageInfo, PackageStatus, PackageUpdate, Project, ProjectMetadata, ProjectUpdate,
};
pub use store::{ProjectStore, StoreHealth};
