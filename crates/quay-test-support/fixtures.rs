//! On-disk project and package fixtures

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Model used by most fixtures: one table source on the default connection
pub const FLIGHTS_MODEL: &str = "source: flights is duckdb.table('data/flights.parquet')\n\
query: by_carrier is duckdb.sql(\"SELECT carrier, count(*) AS n FROM 'data/flights.parquet' GROUP BY 1\")\n";

/// Files making up one package directory
#[derive(Debug, Clone, Default)]
pub struct PackageFixture {
    description: Option<String>,
    write_manifest: bool,
    readme: Option<String>,
    models: Vec<(String, String)>,
    notebooks: Vec<(String, String)>,
    connections: Option<serde_json::Value>,
    raw_manifest: Option<String>,
}

impl PackageFixture {
    /// A package with a manifest and no files
    pub fn new() -> Self {
        Self {
            write_manifest: true,
            ..Default::default()
        }
    }

    /// A package with a manifest and `flights.malloy`
    pub fn flights() -> Self {
        Self::new().model("flights.malloy", FLIGHTS_MODEL)
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn readme(mut self, readme: &str) -> Self {
        self.readme = Some(readme.to_string());
        self
    }

    pub fn model(mut self, path: &str, source: &str) -> Self {
        self.models.push((path.to_string(), source.to_string()));
        self
    }

    pub fn notebook(mut self, path: &str, source: &str) -> Self {
        self.notebooks.push((path.to_string(), source.to_string()));
        self
    }

    /// Package-local connection descriptors (`publisher.connections.json`)
    pub fn connections(mut self, connections: serde_json::Value) -> Self {
        self.connections = Some(connections);
        self
    }

    /// Write `text` verbatim as the manifest, e.g. to test malformed JSON
    pub fn raw_manifest(mut self, text: &str) -> Self {
        self.raw_manifest = Some(text.to_string());
        self
    }

    pub fn without_manifest(mut self) -> Self {
        self.write_manifest = false;
        self
    }

    /// Write the package into `dir`, creating it if needed
    pub fn write_to(&self, dir: &Path, name: &str) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

        if let Some(raw) = &self.raw_manifest {
            fs::write(dir.join("publisher.json"), raw)?;
        } else if self.write_manifest {
            let mut manifest = serde_json::json!({ "name": name });
            if let Some(description) = &self.description {
                manifest["description"] = serde_json::Value::String(description.clone());
            }
            fs::write(
                dir.join("publisher.json"),
                serde_json::to_string_pretty(&manifest)?,
            )?;
        }

        if let Some(connections) = &self.connections {
            fs::write(
                dir.join("publisher.connections.json"),
                serde_json::to_string_pretty(connections)?,
            )?;
        }
        if let Some(readme) = &self.readme {
            fs::write(dir.join("README.md"), readme)?;
        }
        for (path, source) in self.models.iter().chain(self.notebooks.iter()) {
            let file = dir.join(path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&file, source).with_context(|| format!("writing {}", file.display()))?;
        }
        Ok(())
    }
}

/// A server root on a temp dir
pub struct TestServer {
    dir: TempDir,
}

impl TestServer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("creating server root")?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join("publisher.config.json")
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.root().join(project)
    }

    pub fn package_dir(&self, project: &str, package: &str) -> PathBuf {
        self.project_dir(project).join(package)
    }

    pub fn write_config(&self, config: &serde_json::Value) -> Result<()> {
        fs::write(self.config_path(), serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    pub fn write_raw_config(&self, text: &str) -> Result<()> {
        fs::write(self.config_path(), text)?;
        Ok(())
    }

    pub fn read_config(&self) -> Result<serde_json::Value> {
        let text = fs::read_to_string(self.config_path())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write a package under `<root>/<project>/<package>` and return its path
    pub fn write_package(
        &self,
        project: &str,
        package: &str,
        fixture: &PackageFixture,
    ) -> Result<PathBuf> {
        let dir = self.package_dir(project, package);
        fixture.write_to(&dir, package)?;
        Ok(dir)
    }

    /// Write one project with the given packages (all using `PackageFixture::flights`)
    /// and a matching config file
    pub fn single_project(&self, project: &str, packages: &[&str]) -> Result<()> {
        let mut entries = Vec::new();
        for package in packages {
            self.write_package(project, package, &PackageFixture::flights())?;
            entries.push(serde_json::json!({
                "name": package,
                "location": format!("./{}/{}", project, package),
            }));
        }
        self.write_config(&serde_json::json!({
            "frozenConfig": false,
            "projects": [ { "name": project, "packages": entries } ]
        }))
    }
}
