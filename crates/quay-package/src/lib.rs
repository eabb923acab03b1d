//! Quay packages
//!
//! A package is a directory of `.malloy` models and `.malloynb` notebooks plus
//! the connections they query. Loading a package scans the directory, reads
//! `publisher.json` and `publisher.connections.json`, and builds the
//! package-local connections. Models compile lazily on first access through
//! the injected `ModelCompiler`.

mod compiler;
mod manifest;
mod model;
mod package;

pub use compiler::{
    CompiledModel, DeclarationCompiler, ModelCompiler, ModelSource, ModelType, NamedQuery,
    QueryRequest, Relation, SourceDef,
};
pub use manifest::{
    CONNECTIONS_MANIFEST_NAME, PACKAGE_MANIFEST_NAME, PackageManifest, README_NAME,
    read_connections, read_readme,
};
pub use model::{CellType, ModelInfo, Notebook, NotebookCell, parse_notebook};
pub use package::{Package, PackageMetadata, PackageServices};
