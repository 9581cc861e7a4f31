use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use regex::Regex;
use sleuth_core::{Tool, ToolError, ToolInput, ToolKind, DEFAULT_LOG_QUERY};
use tokio_util::sync::CancellationToken;

use crate::walk::{collect_files, relative, run_blocking};

/// Greps `*.log` files (rotated ones included) under a directory.
///
/// The query is a list of terms joined by `OR`; a line matches when it
/// contains any term. `time_range` (`15m`, `1h`, `2d`) limits the search to
/// files modified within that window.
pub struct LogSearchTool {
    dir: PathBuf,
}

/// Parse `30s`, `15m`, `1h`, `2d`.
pub fn parse_time_range(text: &str) -> Option<Duration> {
    let text = text.trim();
    let split = text.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = text.split_at(split);
    let amount: u64 = amount.parse().ok()?;
    let seconds = match unit.trim() {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        "d" => amount * 86_400,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| {
            let name = name.to_string_lossy();
            name.ends_with(".log") || name.contains(".log.")
        })
        .unwrap_or(false)
}

fn build_matcher(query: &str) -> Result<Regex, ToolError> {
    let split = Regex::new(r"(?i)\s+OR\s+")
        .map_err(|e| ToolError::Execution(e.to_string()))?;
    let terms: Vec<String> = split
        .split(query)
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(regex::escape)
        .collect();
    if terms.is_empty() {
        return Err(ToolError::InvalidInput("empty log query".to_string()));
    }
    Regex::new(&format!("(?i){}", terms.join("|")))
        .map_err(|e| ToolError::InvalidInput(format!("invalid log query: {}", e)))
}

impl LogSearchTool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn search(dir: &Path, input: &ToolInput, cancel: &CancellationToken) -> Result<String, ToolError> {
        let query = if input.query.trim().is_empty() {
            DEFAULT_LOG_QUERY
        } else {
            input.query.trim()
        };
        let matcher = build_matcher(query)?;
        let window = input.time_range.as_deref().and_then(parse_time_range);
        let cutoff = window.and_then(|window| SystemTime::now().checked_sub(window));

        let files = collect_files(dir, cancel, |path| {
            if !is_log_file(path) {
                return false;
            }
            match cutoff {
                Some(cutoff) => fs::metadata(path)
                    .and_then(|meta| meta.modified())
                    .map(|modified| modified >= cutoff)
                    .unwrap_or(false),
                None => true,
            }
        })?;

        if files.is_empty() {
            return Ok(format!("No log files found under {}", dir.display()));
        }

        let max_results = input.max_results.max(1);
        let mut lines = Vec::new();
        let mut files_hit = 0;

        'files: for path in &files {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };
            let before = lines.len();
            for (line_num, line) in content.lines().enumerate() {
                if matcher.is_match(line) {
                    lines.push(format!(
                        "{}:{}: {}",
                        relative(dir, path),
                        line_num + 1,
                        line.trim()
                    ));
                    if lines.len() >= max_results {
                        files_hit += 1;
                        break 'files;
                    }
                }
            }
            if lines.len() > before {
                files_hit += 1;
            }
        }

        if lines.is_empty() {
            return Ok(format!(
                "No log lines matching '{}' in {} file(s)",
                query,
                files.len()
            ));
        }

        let mut output = format!(
            "Found {} matching line(s) in {} file(s):\n\n",
            lines.len(),
            files_hit
        );
        for (i, line) in lines.iter().enumerate() {
            output.push_str(&format!("{}. {}\n", i + 1, line));
        }
        Ok(output)
    }
}

#[async_trait]
impl Tool for LogSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::LogSearch
    }

    fn description(&self) -> &str {
        "Search application log files for lines containing any of the query terms (joined with OR)."
    }

    async fn invoke(&self, input: &ToolInput, cancel: &CancellationToken) -> Result<String, ToolError> {
        let dir = self.dir.clone();
        let input = input.clone();
        let cancel = cancel.clone();
        run_blocking(move || Self::search(&dir, &input, &cancel)).await
    }
}
