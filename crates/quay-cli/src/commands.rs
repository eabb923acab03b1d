//! Subcommand handlers

use crate::output;
use crate::{Cli, Command};
use anyhow::{Context, Result, bail};
use quay_core::ConnectionConfig;
use quay_drivers::{ConnectionFactory, DriverRegistry};
use quay_package::{DeclarationCompiler, PackageServices, QueryRequest};
use quay_project::{ProjectStore, StoreOptions};
use std::sync::Arc;
use std::time::Duration;

fn services(probe_timeout: Duration) -> PackageServices {
    let factory = ConnectionFactory::new(Arc::new(DriverRegistry::with_defaults()))
        .with_probe_timeout(probe_timeout);
    PackageServices::new(factory, Arc::new(DeclarationCompiler::new()))
}

pub(crate) fn query_request(
    source: Option<String>,
    query_name: Option<String>,
    sql: Option<String>,
    limit: Option<usize>,
) -> Result<QueryRequest> {
    let request = match (source, query_name, sql) {
        (Some(source), None, None) => QueryRequest::source(source),
        (None, Some(name), None) => QueryRequest::named_query(name),
        (None, None, Some(sql)) => QueryRequest::sql(sql),
        _ => bail!("exactly one of --source, --query-name or --sql is required"),
    };
    Ok(match limit {
        Some(limit) => request.with_row_limit(limit),
        None => request,
    })
}

pub async fn run(cli: Cli) -> Result<()> {
    let probe_timeout = Duration::from_millis(cli.probe_timeout_ms);
    let options = StoreOptions {
        frozen_config_override: cli.frozen_config.then_some(true),
        probe_timeout,
    };
    let services = services(probe_timeout);
    let store = ProjectStore::open(cli.root.clone(), options, services.clone()).await;

    let health = store.health();
    if let Some(error) = &health.config_error {
        tracing::warn!(error = %error, "serving without a catalog");
    }

    match cli.command {
        Command::Health => output::print_json(&health)?,
        Command::Projects => {
            let projects = store.list_projects().await?;
            if cli.json {
                output::print_json(&projects)?;
            } else {
                println!("{}", output::projects_table(&projects));
            }
        }
        Command::Packages { project } => {
            let project = store.get_project(&project, false).await?;
            let packages = project.list_packages().await;
            if cli.json {
                output::print_json(&packages)?;
            } else {
                let statuses = packages
                    .iter()
                    .map(|p| project.package_status(&p.name))
                    .collect::<Vec<_>>();
                println!("{}", output::packages_table(&packages, &statuses));
            }
        }
        Command::Models { project, package } => {
            let project = store.get_project(&project, false).await?;
            let package = project.get_package(&package, false).await?;
            let mut models = package.list_models();
            models.extend(package.list_notebooks());
            if cli.json {
                output::print_json(&models)?;
            } else {
                println!("{}", output::models_table(&models));
            }
        }
        Command::Connections { project } => {
            let project = store.get_project(&project, false).await?;
            let connections = project.list_connections();
            if cli.json {
                output::print_json(&connections)?;
            } else {
                println!("{}", output::connections_table(&connections));
            }
        }
        Command::Query {
            project,
            package,
            model,
            source,
            query_name,
            sql,
            limit,
        } => {
            let request = query_request(source, query_name, sql, limit)?;
            let project = store.get_project(&project, false).await?;
            let package = project.get_package(&package, false).await?;
            let result = package.execute_query(&model, &request).await?;
            if cli.json {
                output::print_json(&result.rows_as_json())?;
            } else {
                println!("{}", output::result_table(&result));
                println!("{} row(s)", result.row_count());
            }
        }
        Command::TestConnection {
            project,
            connection,
            file,
        } => {
            let project = store.get_project(&project, false).await?;
            let status = match (connection, file) {
                (Some(name), None) => project.test_connection(&name).await?,
                (None, Some(file)) => {
                    let text = tokio::fs::read_to_string(&file)
                        .await
                        .with_context(|| format!("reading {}", file.display()))?;
                    let config: ConnectionConfig = serde_json::from_str(&text)
                        .with_context(|| format!("parsing {}", file.display()))?;
                    services
                        .factory
                        .test_connection_config(&config, project.path())
                        .await
                }
                _ => bail!("pass a connection name or --file"),
            };
            output::print_json(&status)?;
            if !status.is_ok() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_request_picks_target() {
        let request = query_request(None, Some("by_carrier".into()), None, Some(10)).unwrap();
        assert_eq!(request.query_name.as_deref(), Some("by_carrier"));
        assert_eq!(request.row_limit, Some(10));

        let request = query_request(None, None, Some("SELECT 1".into()), None).unwrap();
        assert_eq!(request.query.as_deref(), Some("SELECT 1"));
        assert_eq!(request.row_limit, None);
    }

    #[test]
    fn test_query_request_needs_a_target() {
        assert!(query_request(None, None, None, None).is_err());
    }
}
