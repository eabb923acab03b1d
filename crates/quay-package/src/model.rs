//! Model and notebook files of a package, compiled on first use

use crate::compiler::{CompiledModel, ModelCompiler, ModelSource, ModelType};
use quay_core::{QuayError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Listing entry for one model or notebook file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub package_name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Markdown,
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookCell {
    #[serde(rename = "type")]
    pub cell_type: CellType,
    pub text: String,
}

/// A notebook's cells together with the model its code cells compile to
#[derive(Debug, Clone)]
pub struct Notebook {
    pub path: String,
    pub cells: Vec<NotebookCell>,
    pub model: Arc<CompiledModel>,
}

/// Split notebook text on `>>>markdown` / `>>>malloy` separators
pub fn parse_notebook(text: &str) -> Vec<NotebookCell> {
    let mut cells = Vec::new();
    let mut current: Option<(CellType, Vec<&str>)> = None;

    let mut flush = |current: &mut Option<(CellType, Vec<&str>)>| {
        if let Some((cell_type, lines)) = current.take() {
            let text = lines.join("\n").trim().to_string();
            if !text.is_empty() {
                cells.push(NotebookCell { cell_type, text });
            }
        }
    };

    for line in text.lines() {
        let marker = line.trim_end();
        let next = match marker {
            ">>>markdown" => Some(CellType::Markdown),
            ">>>malloy" => Some(CellType::Code),
            _ => None,
        };
        match next {
            Some(cell_type) => {
                flush(&mut current);
                current = Some((cell_type, Vec::new()));
            }
            None => current
                .get_or_insert_with(|| (CellType::Markdown, Vec::new()))
                .1
                .push(line),
        }
    }
    flush(&mut current);
    cells
}

/// One scanned file and its compilation slot
pub(crate) struct ModelEntry {
    pub(crate) path: String,
    pub(crate) model_type: ModelType,
    file: PathBuf,
    compiled: OnceCell<Arc<CompiledModel>>,
}

impl ModelEntry {
    pub(crate) fn new(path: String, model_type: ModelType, file: PathBuf) -> Self {
        Self {
            path,
            model_type,
            file,
            compiled: OnceCell::new(),
        }
    }

    async fn read(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.file).await.map_err(|e| {
            tracing::error!(path = %self.path, error = %e, "failed to read model file");
            QuayError::Io(e)
        })
    }

    /// Compile on first call; later calls share the result. A failed
    /// compilation is not cached.
    pub(crate) async fn compiled(&self, compiler: &dyn ModelCompiler) -> Result<Arc<CompiledModel>> {
        self.compiled
            .get_or_try_init(|| async {
                let text = self.read().await?;
                let text = match self.model_type {
                    ModelType::Model => text,
                    ModelType::Notebook => code_of(&parse_notebook(&text)),
                };
                let source = ModelSource {
                    path: self.path.clone(),
                    model_type: self.model_type,
                    text,
                };
                compiler.compile(&source).map(Arc::new)
            })
            .await
            .cloned()
    }

    pub(crate) async fn cells(&self) -> Result<Vec<NotebookCell>> {
        Ok(parse_notebook(&self.read().await?))
    }
}

fn code_of(cells: &[NotebookCell]) -> String {
    cells
        .iter()
        .filter(|c| c.cell_type == CellType::Code)
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
