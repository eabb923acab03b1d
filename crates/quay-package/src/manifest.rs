//! On-disk package manifests

use quay_core::{ConnectionConfig, QuayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Package manifest file name
pub const PACKAGE_MANIFEST_NAME: &str = "publisher.json";
/// Package-local connection descriptors
pub const CONNECTIONS_MANIFEST_NAME: &str = "publisher.connections.json";
pub const README_NAME: &str = "README.md";

/// Contents of `publisher.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PackageManifest {
    /// Read the manifest of the package at `dir`
    pub async fn read(package_name: &str, dir: &Path) -> Result<Self> {
        let file = dir.join(PACKAGE_MANIFEST_NAME);
        let text = match tokio::fs::read_to_string(&file).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QuayError::PackageNotFound(format!(
                    "{} (no {} in {})",
                    package_name,
                    PACKAGE_MANIFEST_NAME,
                    dir.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|e| {
            QuayError::PackageValidation(format!(
                "{} of package \"{}\" is malformed: {}",
                PACKAGE_MANIFEST_NAME, package_name, e
            ))
        })
    }

    pub async fn write(&self, dir: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        tokio::fs::write(dir.join(PACKAGE_MANIFEST_NAME), text).await?;
        Ok(())
    }
}

/// Read package-local connection descriptors. A missing file means none.
pub async fn read_connections(package_name: &str, dir: &Path) -> Result<Vec<ConnectionConfig>> {
    let file = dir.join(CONNECTIONS_MANIFEST_NAME);
    let text = match tokio::fs::read_to_string(&file).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&text).map_err(|e| {
        QuayError::PackageValidation(format!(
            "{} of package \"{}\" is malformed: {}",
            CONNECTIONS_MANIFEST_NAME, package_name, e
        ))
    })
}

/// Read an optional README next to a manifest
pub async fn read_readme(dir: &Path) -> Option<String> {
    match tokio::fs::read_to_string(dir.join(README_NAME)).await {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to read README");
            None
        }
    }
}
