//! Model compilation seam and the built-in declaration compiler

use async_trait::async_trait;
use quay_core::sql::table_reference;
use quay_core::{Connection, QuayError, QueryResult, Result, RunSqlOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Kind of file a model was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Model,
    Notebook,
}

impl ModelType {
    pub const MODEL_EXTENSION: &'static str = "malloy";
    pub const NOTEBOOK_EXTENSION: &'static str = "malloynb";

    /// Classify a file by extension
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(Self::MODEL_EXTENSION) => Some(ModelType::Model),
            Some(Self::NOTEBOOK_EXTENSION) => Some(ModelType::Notebook),
            _ => None,
        }
    }
}

/// Model text handed to a compiler
#[derive(Debug, Clone)]
pub struct ModelSource {
    /// Path relative to the package root
    pub path: String,
    pub model_type: ModelType,
    pub text: String,
}

/// Where a source's rows come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum Relation {
    Table(String),
    Sql(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDef {
    pub name: String,
    pub connection: String,
    pub relation: Relation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedQuery {
    pub name: String,
    pub connection: String,
    pub sql: String,
}

/// Result of compiling one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledModel {
    pub path: String,
    pub model_type: ModelType,
    pub sources: Vec<SourceDef>,
    pub queries: Vec<NamedQuery>,
    pub imports: Vec<String>,
}

impl CompiledModel {
    pub fn source(&self, name: &str) -> Option<&SourceDef> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn query(&self, name: &str) -> Option<&NamedQuery> {
        self.queries.iter().find(|q| q.name == name)
    }

    /// Connection names in order of first use
    pub fn connection_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.sources
            .iter()
            .map(|s| s.connection.as_str())
            .chain(self.queries.iter().map(|q| q.connection.as_str()))
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

/// What to run against a compiled model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_name: Option<String>,
    /// Ad-hoc SQL run against the model's first connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<usize>,
}

impl QueryRequest {
    pub fn named_query(name: impl Into<String>) -> Self {
        Self {
            query_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn source(name: impl Into<String>) -> Self {
        Self {
            source_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn sql(sql: impl Into<String>) -> Self {
        Self {
            query: Some(sql.into()),
            ..Default::default()
        }
    }

    pub fn with_row_limit(mut self, limit: usize) -> Self {
        self.row_limit = Some(limit);
        self
    }
}

/// Compiler and execution engine for models.
///
/// One instance is constructed at startup and shared by every package.
#[async_trait]
pub trait ModelCompiler: Send + Sync {
    fn compile(&self, source: &ModelSource) -> Result<CompiledModel>;

    /// Name of the connection `request` runs against
    fn connection_for(&self, model: &CompiledModel, request: &QueryRequest) -> Result<String>;

    async fn execute(
        &self,
        model: &CompiledModel,
        request: &QueryRequest,
        connection: &dyn Connection,
    ) -> Result<QueryResult>;
}

/// Line-oriented compiler for `source:` / `query:` / `import` declarations
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarationCompiler;

impl DeclarationCompiler {
    pub fn new() -> Self {
        Self
    }

    fn parse_line(
        &self,
        source: &ModelSource,
        line_no: usize,
        line: &str,
        model: &mut CompiledModel,
    ) -> Result<()> {
        let error = |message: &str| {
            QuayError::Compilation(format!("{}:{}: {}", source.path, line_no, message))
        };

        if let Some(rest) = line.strip_prefix("import ") {
            let target = unquote(rest.trim()).ok_or_else(|| error("import expects a quoted path"))?;
            model.imports.push(target.to_string());
            return Ok(());
        }

        let (keyword, rest) = line
            .split_once(':')
            .ok_or_else(|| error("expected `source:`, `query:` or `import`"))?;
        let (name, definition) = rest
            .trim()
            .split_once(" is ")
            .ok_or_else(|| error("expected `<name> is <connection>.<call>`"))?;
        let name = name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(error(&format!("invalid name \"{}\"", name)));
        }
        let (connection, call) = definition
            .trim()
            .split_once('.')
            .ok_or_else(|| error("expected `<connection>.table(..)` or `<connection>.sql(..)`"))?;
        let (function, argument) = call
            .strip_suffix(')')
            .and_then(|c| c.split_once('('))
            .ok_or_else(|| error("unterminated call"))?;
        let argument = unquote(argument.trim())
            .ok_or_else(|| error("call argument must be a quoted string"))?
            .to_string();

        match (keyword.trim(), function) {
            ("source", "table") | ("source", "sql") => {
                if model.source(name).is_some() {
                    return Err(error(&format!("source \"{}\" is already defined", name)));
                }
                let relation = if function == "table" {
                    Relation::Table(argument)
                } else {
                    Relation::Sql(argument)
                };
                model.sources.push(SourceDef {
                    name: name.to_string(),
                    connection: connection.to_string(),
                    relation,
                });
            }
            ("query", "sql") => {
                if model.query(name).is_some() {
                    return Err(error(&format!("query \"{}\" is already defined", name)));
                }
                model.queries.push(NamedQuery {
                    name: name.to_string(),
                    connection: connection.to_string(),
                    sql: argument,
                });
            }
            ("query", other) => {
                return Err(error(&format!("queries only support sql(..), found {}(..)", other)));
            }
            (other, _) => return Err(error(&format!("unknown declaration \"{}\"", other))),
        }
        Ok(())
    }

    fn statement_for(
        &self,
        model: &CompiledModel,
        request: &QueryRequest,
        dialect: &str,
    ) -> Result<String> {
        if let Some(name) = &request.query_name {
            let query = model.query(name).ok_or_else(|| {
                QuayError::BadRequest(format!("query \"{}\" is not defined in {}", name, model.path))
            })?;
            return Ok(query.sql.clone());
        }
        if let Some(name) = &request.source_name {
            let source = model.source(name).ok_or_else(|| {
                QuayError::BadRequest(format!("source \"{}\" is not defined in {}", name, model.path))
            })?;
            return Ok(match &source.relation {
                Relation::Table(path) => format!("SELECT * FROM {}", table_reference(dialect, path)),
                Relation::Sql(sql) => format!("SELECT * FROM ({}) AS {}", sql, source.name),
            });
        }
        request
            .query
            .clone()
            .ok_or_else(|| QuayError::BadRequest("one of sourceName, queryName or query is required".into()))
    }
}

#[async_trait]
impl ModelCompiler for DeclarationCompiler {
    fn compile(&self, source: &ModelSource) -> Result<CompiledModel> {
        let mut model = CompiledModel {
            path: source.path.clone(),
            model_type: source.model_type,
            sources: Vec::new(),
            queries: Vec::new(),
            imports: Vec::new(),
        };
        for (index, raw) in source.text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("//") || line.starts_with("--") {
                continue;
            }
            self.parse_line(source, index + 1, line, &mut model)?;
        }
        tracing::debug!(
            path = %source.path,
            sources = model.sources.len(),
            queries = model.queries.len(),
            "model compiled"
        );
        Ok(model)
    }

    fn connection_for(&self, model: &CompiledModel, request: &QueryRequest) -> Result<String> {
        if let Some(name) = &request.query_name {
            if let Some(query) = model.query(name) {
                return Ok(query.connection.clone());
            }
        }
        if let Some(name) = &request.source_name {
            if let Some(source) = model.source(name) {
                return Ok(source.connection.clone());
            }
        }
        model
            .connection_names()
            .first()
            .map(|name| name.to_string())
            .ok_or_else(|| {
                QuayError::BadRequest(format!("{} does not declare any connection", model.path))
            })
    }

    async fn execute(
        &self,
        model: &CompiledModel,
        request: &QueryRequest,
        connection: &dyn Connection,
    ) -> Result<QueryResult> {
        let sql = self.statement_for(model, request, connection.dialect_name())?;
        let options = RunSqlOptions {
            row_limit: request.row_limit,
        };
        connection.run_sql(&sql, &options).await
    }
}

fn unquote(text: &str) -> Option<&str> {
    ['\'', '"'].into_iter().find_map(|quote| {
        text.strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
    })
}
