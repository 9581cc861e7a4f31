pub mod code_search;
pub mod database;
pub mod log_search;
mod walk;

use std::path::PathBuf;

use sleuth_core::ToolRegistry;

pub use code_search::CodeSearchTool;
pub use database::DatabaseQueryTool;
pub use log_search::LogSearchTool;

/// Where the concrete tools look. Unset locations leave the tool
/// unregistered.
#[derive(Debug, Clone, Default)]
pub struct ToolsConfig {
    pub repo_root: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
}

pub fn default_registry(config: &ToolsConfig) -> ToolRegistry {
    let registry = ToolRegistry::new();
    if let Some(root) = &config.repo_root {
        registry.register(CodeSearchTool::new(root));
    }
    if let Some(dir) = &config.log_dir {
        registry.register(LogSearchTool::new(dir));
    }
    if let Some(path) = &config.database_path {
        registry.register(DatabaseQueryTool::new(path));
    }
    log::info!("registered {} investigation tools", registry.len());
    registry
}
