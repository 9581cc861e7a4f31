use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sleuth_core::{ResultCacheConfig, SessionStoreConfig};
use sleuth_loop::OrchestratorConfig;
use sleuth_tools::ToolsConfig;

use crate::multiplexer::StreamSettings;

#[derive(Parser, Debug, Clone)]
#[command(name = "sleuth-server")]
#[command(about = "LLM-directed incident investigation server")]
#[command(version)]
pub struct ServerConfig {
    /// Enable debug mode
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Server port
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub llm_base_url: String,

    /// LLM model name
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    /// LLM API key
    #[arg(long, env = "LLM_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    /// Per-request LLM timeout in seconds
    #[arg(long, env = "LLM_TIMEOUT_SECS", default_value = "120")]
    pub llm_timeout_secs: u64,

    /// Repository searched by the code tool
    #[arg(long, env = "CODE_REPO_PATH")]
    pub code_repo_path: Option<PathBuf>,

    /// Directory searched by the log tool
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// SQLite database opened read-only by the database tool
    #[arg(long, env = "DATABASE_PATH")]
    pub database_path: Option<PathBuf>,

    /// Steps after which an analysis is forced to conclude
    #[arg(long, env = "AGENT_MAX_ITERATIONS", default_value = "15")]
    pub max_iterations: usize,

    /// Whole-run timeout in seconds
    #[arg(long, env = "AGENT_MAX_EXECUTION_TIME", default_value = "300")]
    pub max_execution_time: u64,

    /// Seconds a suspended analysis waits for a reply
    #[arg(long, env = "SESSION_TTL_SECS", default_value = "1800")]
    pub session_ttl_secs: u64,

    /// Suspended analyses kept before the oldest are evicted
    #[arg(long, env = "SESSION_MAX_ENTRIES", default_value = "1000")]
    pub session_max_entries: usize,

    /// Reuse results of identical analysis requests
    #[arg(long, env = "CACHE_ENABLED", default_value_t = true, action = clap::ArgAction::Set)]
    pub cache_enabled: bool,

    /// Seconds a cached result stays valid
    #[arg(long, env = "CACHE_TTL", default_value = "3600")]
    pub cache_ttl_secs: u64,

    /// Cached results kept before the least recently used is dropped
    #[arg(long, env = "CACHE_MAX_SIZE", default_value = "1000")]
    pub cache_max_entries: usize,

    /// Seconds of silence before a heartbeat is streamed
    #[arg(long, env = "HEARTBEAT_SECS", default_value = "2")]
    pub heartbeat_secs: u64,

    /// How long shutdown waits for running analyses to stop
    #[arg(long, env = "SHUTDOWN_GRACE_MS", default_value = "5000")]
    pub shutdown_grace_ms: u64,

    /// Log level (overrides debug flag)
    #[arg(long, env = "RUST_LOG")]
    pub log_level: Option<String>,
}

impl ServerConfig {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_iterations: self.max_iterations.max(1),
            ..OrchestratorConfig::default()
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs.max(1)),
            run_timeout: Duration::from_secs(self.max_execution_time.max(1)),
            ..StreamSettings::default()
        }
    }

    pub fn session_config(&self) -> SessionStoreConfig {
        SessionStoreConfig {
            ttl: Duration::from_secs(self.session_ttl_secs),
            max_entries: self.session_max_entries,
            ..SessionStoreConfig::default()
        }
    }

    pub fn cache_config(&self) -> ResultCacheConfig {
        ResultCacheConfig {
            enabled: self.cache_enabled,
            ttl: Duration::from_secs(self.cache_ttl_secs),
            max_entries: self.cache_max_entries,
        }
    }

    pub fn tools_config(&self) -> ToolsConfig {
        ToolsConfig {
            repo_root: self.code_repo_path.clone(),
            log_dir: self.log_dir.clone(),
            database_path: self.database_path.clone(),
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
