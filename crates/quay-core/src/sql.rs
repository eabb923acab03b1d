//! SQL text helpers shared by drivers

/// Escape a value for use inside a single-quoted SQL string literal
pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Quote an identifier with double quotes, doubling embedded quotes
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Quote an identifier with backticks (MySQL)
pub fn quote_backtick(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Split a dotted table path into its parts, honoring double quotes
pub fn split_table_path(path: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            '.' if !quoted => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Whether a table path names a file the embedded engine reads directly
pub fn is_file_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    path.contains('/')
        || path.contains("://")
        || [".parquet", ".csv", ".json", ".jsonl", ".ndjson", ".tsv"]
            .iter()
            .any(|ext| lower.ends_with(ext))
}

/// Render a table path as a relation reference for `dialect`.
///
/// The embedded engines read files by string literal; everything else gets
/// per-part identifier quoting in the dialect's style.
pub fn table_reference(dialect: &str, path: &str) -> String {
    match dialect {
        "duckdb" | "motherduck" if is_file_path(path) => {
            format!("'{}'", escape_sql_string(path))
        }
        "mysql" => split_table_path(path)
            .iter()
            .map(|part| quote_backtick(part))
            .collect::<Vec<_>>()
            .join("."),
        _ => split_table_path(path)
            .iter()
            .map(|part| quote_identifier(part))
            .collect::<Vec<_>>()
            .join("."),
    }
}
