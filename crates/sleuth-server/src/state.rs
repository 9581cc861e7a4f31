use std::sync::Arc;

use chrono::{DateTime, Utc};

use sleuth_core::{ResultCache, SessionStore, TaskRegistry, ToolRegistry};
use sleuth_llm::{LlmClient, OpenAiClient};
use sleuth_loop::Orchestrator;
use sleuth_tools::default_registry;

use crate::config::ServerConfig;
use crate::multiplexer::{StreamMultiplexer, StreamSettings};

/// Services shared by every request, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub multiplexer: StreamMultiplexer,
    pub sessions: Arc<SessionStore>,
    pub cache: Arc<ResultCache>,
    pub tasks: TaskRegistry,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        sessions: SessionStore,
        cache: ResultCache,
        config: sleuth_loop::OrchestratorConfig,
        settings: StreamSettings,
    ) -> Self {
        let sessions = Arc::new(sessions);
        let cache = Arc::new(cache);
        let tasks = TaskRegistry::new();
        Self {
            orchestrator: Orchestrator::new(llm, Arc::new(tools), sessions.clone(), config),
            multiplexer: StreamMultiplexer::new(tasks.clone(), settings).with_cache(cache.clone()),
            sessions,
            cache,
            tasks,
            started_at: Utc::now(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        log::info!(
            "Creating LLM client with base URL: {} and model: {}",
            config.llm_base_url,
            config.model
        );
        if config.api_key.is_empty() {
            log::warn!("LLM_API_KEY is empty; requests are sent without authorization");
        }
        let llm = OpenAiClient::new(config.api_key.clone())
            .with_base_url(config.llm_base_url.clone())
            .with_model(config.model.clone())
            .with_timeout(config.llm_timeout());

        Self::new(
            Arc::new(llm),
            default_registry(&config.tools_config()),
            SessionStore::new(config.session_config()),
            ResultCache::new(config.cache_config()),
            config.orchestrator_config(),
            config.stream_settings(),
        )
    }
}
