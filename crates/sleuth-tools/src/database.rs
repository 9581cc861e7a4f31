use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use sleuth_core::{Tool, ToolError, ToolInput, ToolKind};
use tokio_util::sync::CancellationToken;

use crate::walk::run_blocking;

/// Cap on rendered cell width.
const MAX_CELL_CHARS: usize = 200;

/// Runs one read-only `SELECT`/`WITH` statement against a SQLite file.
pub struct DatabaseQueryTool {
    path: PathBuf,
}

fn validate(sql: &str) -> Result<&str, ToolError> {
    let sql = sql.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        return Err(ToolError::InvalidInput("empty SQL query".to_string()));
    }
    let first = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if first != "SELECT" && first != "WITH" {
        return Err(ToolError::InvalidInput(format!(
            "only SELECT queries are allowed, got '{}'",
            first
        )));
    }
    if sql.contains(';') {
        return Err(ToolError::InvalidInput(
            "multiple statements are not allowed".to_string(),
        ));
    }
    Ok(sql)
}

fn render(value: ValueRef<'_>) -> String {
    let text = match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    };
    sleuth_core::heuristics::truncate_chars(&text, MAX_CELL_CHARS)
}

fn db_error(e: rusqlite::Error) -> ToolError {
    ToolError::Execution(format!("database error: {}", e))
}

impl DatabaseQueryTool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn query(path: &Path, input: &ToolInput, cancel: &CancellationToken) -> Result<String, ToolError> {
        let sql = validate(&input.query)?;
        if !path.is_file() {
            return Err(ToolError::Execution(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(db_error)?;
        let mut stmt = conn.prepare(sql).map_err(db_error)?;
        if !stmt.readonly() {
            return Err(ToolError::InvalidInput(
                "statement would modify the database".to_string(),
            ));
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let max_rows = input.max_results.max(1);
        let mut rows = stmt.query([]).map_err(db_error)?;
        let mut lines = Vec::new();
        let mut truncated = false;

        while let Some(row) = rows.next().map_err(db_error)? {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            if lines.len() >= max_rows {
                truncated = true;
                break;
            }
            let cells: Vec<String> = (0..columns.len())
                .map(|i| row.get_ref(i).map(render).unwrap_or_default())
                .collect();
            lines.push(cells.join(" | "));
        }

        if lines.is_empty() {
            return Ok("Query returned no rows".to_string());
        }

        let mut output = format!("{} row(s)", lines.len());
        if truncated {
            output.push_str(&format!(" (limited to {})", max_rows));
        }
        output.push_str(":\n\n");
        output.push_str(&columns.join(" | "));
        output.push('\n');
        for line in lines {
            output.push_str(&line);
            output.push('\n');
        }
        Ok(output)
    }
}

#[async_trait]
impl Tool for DatabaseQueryTool {
    fn kind(&self) -> ToolKind {
        ToolKind::DatabaseQuery
    }

    fn description(&self) -> &str {
        "Run a read-only SELECT query against the application database."
    }

    async fn invoke(&self, input: &ToolInput, cancel: &CancellationToken) -> Result<String, ToolError> {
        let path = self.path.clone();
        let input = input.clone();
        let cancel = cancel.clone();
        run_blocking(move || Self::query(&path, &input, &cancel)).await
    }
}
