//! Table and JSON rendering for command output

use anyhow::Result;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use quay_core::{ConnectionConfig, QueryResult};
use quay_package::{ModelInfo, PackageMetadata};
use quay_project::{PackageInfo, ProjectMetadata};
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

pub fn projects_table(projects: &[ProjectMetadata]) -> Table {
    let mut table = table(&["Project", "Location", "Readme"]);
    for project in projects {
        let readme = project
            .readme
            .as_deref()
            .and_then(|r| r.lines().next())
            .unwrap_or("");
        table.add_row(vec![project.name.as_str(), project.location.as_str(), readme]);
    }
    table
}

pub fn packages_table(packages: &[PackageMetadata], statuses: &[Option<PackageInfo>]) -> Table {
    let mut table = table(&["Package", "Description", "Location", "Status", "Loaded"]);
    for (package, info) in packages.iter().zip(statuses) {
        let status = info
            .map(|i| format!("{:?}", i.status).to_uppercase())
            .unwrap_or_default();
        let loaded = info
            .and_then(|i| i.load_timestamp)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        table.add_row(vec![
            package.name.clone(),
            package.description.clone().unwrap_or_default(),
            package.location.clone(),
            status,
            loaded,
        ]);
    }
    table
}

pub fn models_table(models: &[ModelInfo]) -> Table {
    let mut table = table(&["Path", "Type"]);
    for model in models {
        let model_type = serde_json::to_value(model.model_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        table.add_row(vec![model.path.clone(), model_type]);
    }
    table
}

pub fn connections_table(connections: &[ConnectionConfig]) -> Table {
    let mut table = table(&["Name", "Type", "Dialect", "Pool", "Persist", "Stream"]);
    for connection in connections {
        let mut row = vec![connection.name.clone(), connection.connection_type.to_string()];
        match &connection.attributes {
            Some(attrs) => row.extend([
                attrs.dialect_name.clone(),
                attrs.is_pool.to_string(),
                attrs.can_persist.to_string(),
                attrs.can_stream.to_string(),
            ]),
            None => row.extend(std::iter::repeat_n(String::new(), 4)),
        }
        table.add_row(row);
    }
    table
}

pub fn result_table(result: &QueryResult) -> Table {
    let header = result.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
    let mut table = table(&header);
    for row in &result.rows {
        table.add_row(row.values.iter().map(|v| v.to_string()).collect::<Vec<_>>());
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quay_core::{ColumnMeta, Row, Value};

    #[test]
    fn test_result_table_renders_cells() {
        let columns = vec![ColumnMeta::new("carrier", "VARCHAR", 0), ColumnMeta::new("n", "BIGINT", 1)];
        let names = vec!["carrier".to_string(), "n".to_string()];
        let result = QueryResult::new(
            columns,
            vec![Row::new(names, vec![Value::String("AA".into()), Value::Null])],
        );

        let rendered = result_table(&result).to_string();
        assert!(rendered.contains("carrier"));
        assert!(rendered.contains("AA"));
        assert!(rendered.contains("NULL"));
    }

    #[test]
    fn test_projects_table_shows_first_readme_line() {
        let projects = vec![ProjectMetadata {
            name: "P".into(),
            resource: "/api/v0/projects/P".into(),
            location: "/srv/P".into(),
            readme: Some("Flights\nmore text".into()),
        }];

        let table = projects_table(&projects);
        assert_eq!(table.row_iter().count(), 1);
        let rendered = table.to_string();
        assert!(rendered.contains("Flights"));
        assert!(!rendered.contains("more text"));
    }
}
