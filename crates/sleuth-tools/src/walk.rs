use std::path::{Path, PathBuf};

use sleuth_core::ToolError;
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "dist", "build", "__pycache__", "venv"];

/// Files larger than this are not scanned line by line.
pub const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
}

/// Regular files under `root` accepted by `keep`, in walk order. Checks the
/// token between entries.
pub fn collect_files<F>(
    root: &Path,
    cancel: &CancellationToken,
    mut keep: F,
) -> Result<Vec<PathBuf>, ToolError>
where
    F: FnMut(&Path) -> bool,
{
    if !root.is_dir() {
        return Err(ToolError::Execution(format!(
            "directory not found: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry));

    for entry in walker {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let too_big = entry
            .metadata()
            .map(|meta| meta.len() > MAX_FILE_BYTES)
            .unwrap_or(true);
        if too_big {
            continue;
        }
        if keep(entry.path()) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

pub fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Run blocking tool work off the async runtime.
pub async fn run_blocking<T, F>(work: F) -> Result<T, ToolError>
where
    F: FnOnce() -> Result<T, ToolError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ToolError::Execution(format!("tool worker failed: {}", e)))?
}
