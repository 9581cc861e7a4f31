use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use sleuth_core::{Tool, ToolError, ToolInput, ToolKind};
use tokio_util::sync::CancellationToken;

use crate::walk::{collect_files, relative, run_blocking};

/// Lines shown either side of a single requested line.
const LINE_WINDOW: usize = 10;
const MAX_TOKEN_ATTEMPTS: usize = 3;

/// Searches a source tree: exact file lookups with optional line ranges,
/// then literal text search, then the most distinctive token of the query.
pub struct CodeSearchTool {
    root: PathBuf,
}

#[derive(Debug)]
struct CodeMatch {
    file_path: String,
    line_number: usize,
    content: String,
}

impl CodeSearchTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn looks_like_path(query: &str) -> bool {
        !query.contains(char::is_whitespace)
            && (query.contains('/')
                || Path::new(query)
                    .extension()
                    .is_some_and(|ext| !ext.is_empty() && ext.len() <= 5))
    }

    fn find_file(
        root: &Path,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>, ToolError> {
        let wanted = query.trim_start_matches("./");
        let suffix = format!("/{}", wanted);
        let mut files = collect_files(root, cancel, |path| {
            let rel = relative(root, path);
            rel == wanted || rel.ends_with(&suffix)
        })?;
        // Shallowest match wins.
        files.sort_by_key(|path| path.components().count());
        Ok(files.into_iter().next())
    }

    fn read_range(root: &Path, path: &Path, input: &ToolInput) -> Result<String, ToolError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ToolError::Execution(format!("failed to read {}: {}", path.display(), e)))?;
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        let max_lines = input.max_results.max(1);

        let (start, end) = match (input.line_start, input.line_end) {
            (Some(start), Some(end)) => (start, end.min(start + max_lines - 1)),
            (Some(line), None) => (line.saturating_sub(LINE_WINDOW).max(1), line + LINE_WINDOW),
            (None, _) => (1, max_lines),
        };
        let start = start.max(1);
        let end = end.min(total).max(start);
        if total == 0 || start > total {
            return Err(ToolError::InvalidInput(format!(
                "{} has {} lines, requested from line {}",
                relative(root, path),
                total,
                start
            )));
        }

        let mut output = format!(
            "File: {} (lines {}-{} of {})\n",
            relative(root, path),
            start,
            end,
            total
        );
        for (offset, line) in lines[start - 1..end].iter().enumerate() {
            output.push_str(&format!("{}: {}\n", start + offset, line));
        }
        Ok(output)
    }

    fn grep(
        root: &Path,
        regex: &Regex,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<CodeMatch>, ToolError> {
        let files = collect_files(root, cancel, |_| true)?;
        let mut matches = Vec::new();

        for path in files {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            for (line_num, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(CodeMatch {
                        file_path: relative(root, &path),
                        line_number: line_num + 1,
                        content: line.trim().to_string(),
                    });
                    if matches.len() >= max_results {
                        return Ok(matches);
                    }
                }
            }
        }

        Ok(matches)
    }

    /// Up to `MAX_TOKEN_ATTEMPTS` tokens of the query, longest first.
    fn distinctive_tokens(query: &str) -> Vec<&str> {
        let mut tokens: Vec<&str> = query
            .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
            .map(|token| token.trim_matches('.'))
            .filter(|token| token.chars().count() >= 3 && *token != query)
            .collect();
        tokens.sort_by_key(|token| std::cmp::Reverse(token.chars().count()));
        tokens.dedup();
        tokens.truncate(MAX_TOKEN_ATTEMPTS);
        tokens
    }

    fn format_results(query: &str, results: &[CodeMatch]) -> String {
        let mut output = format!("Found {} match(es) for '{}':\n\n", results.len(), query);
        for (i, m) in results.iter().enumerate() {
            output.push_str(&format!(
                "{}. {}:{}: {}\n",
                i + 1,
                m.file_path,
                m.line_number,
                m.content
            ));
        }
        output
    }

    fn search(root: &Path, input: &ToolInput, cancel: &CancellationToken) -> Result<String, ToolError> {
        let query = input.query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidInput("empty search query".to_string()));
        }
        let max_results = input.max_results.max(1);

        if Self::looks_like_path(query) {
            if let Some(path) = Self::find_file(root, query, cancel)? {
                return Self::read_range(root, &path, input);
            }
        }

        let mut attempts = vec![query];
        attempts.extend(Self::distinctive_tokens(query));

        for attempt in attempts {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            let regex = Regex::new(&format!("(?i){}", regex::escape(attempt)))
                .map_err(|e| ToolError::InvalidInput(format!("invalid pattern: {}", e)))?;
            let matches = Self::grep(root, &regex, max_results, cancel)?;
            if !matches.is_empty() {
                return Ok(Self::format_results(attempt, &matches));
            }
            log::debug!("code search: no hits for '{}'", attempt);
        }

        Ok(format!("No matches found for '{}'", query))
    }
}

#[async_trait]
impl Tool for CodeSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::CodeSearch
    }

    fn description(&self) -> &str {
        "Search the code repository: open a file (optionally a line range) or find lines containing the query text."
    }

    async fn invoke(&self, input: &ToolInput, cancel: &CancellationToken) -> Result<String, ToolError> {
        let root = self.root.clone();
        let input = input.clone();
        let cancel = cancel.clone();
        run_blocking(move || Self::search(&root, &input, &cancel)).await
    }
}
