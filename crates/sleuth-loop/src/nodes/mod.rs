//! The state machine nodes. Each takes the run state by `&mut` and returns
//! the node to run next.

pub(crate) mod decide;
pub(crate) mod execute;
pub(crate) mod plan;
pub(crate) mod request_input;
pub(crate) mod synthesize;

use sleuth_core::{
    AgentError, AgentEvent, EventSink, ExecutionState, Message, SessionStore, ToolRegistry,
};
use sleuth_llm::LlmClient;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Plan,
    ExecuteStep,
    Decide,
    Synthesize,
    RequestUserInput,
}

/// Borrowed collaborators for one run.
pub(crate) struct RunContext<'a> {
    pub run_id: &'a str,
    pub llm: &'a dyn LlmClient,
    pub tools: &'a ToolRegistry,
    pub sessions: &'a SessionStore,
    pub config: &'a OrchestratorConfig,
    pub sink: &'a EventSink,
}

impl RunContext<'_> {
    pub fn cancel(&self) -> &CancellationToken {
        self.sink.cancel_token()
    }

    pub async fn emit(&self, event: AgentEvent) {
        self.sink.emit(event).await;
    }

    pub fn over_budget(&self, state: &ExecutionState) -> bool {
        state.conversation_chars() > self.config.context_char_budget
    }

    pub fn progress(&self, state: &ExecutionState) -> f64 {
        self.config.progress_at(state.current_step)
    }

    /// One model call. Gives up as soon as the run is cancelled; transport
    /// errors are mapped to their user-facing message.
    pub async fn ask(&self, purpose: &str, messages: &[Message]) -> Result<Message, AgentError> {
        if self.cancel().is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let timer = Timer::new(purpose);
        let reply = tokio::select! {
            biased;
            _ = self.cancel().cancelled() => return Err(AgentError::Cancelled),
            reply = self.llm.invoke(messages) => reply,
        };
        timer.debug(self.run_id);

        reply.map_err(|error| {
            log::warn!("[{}] {} LLM call failed: {}", self.run_id, purpose, error);
            AgentError::Llm(error.user_message())
        })
    }
}

pub(crate) struct Timer {
    name: String,
    start: std::time::Instant,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: std::time::Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }

    pub fn debug(&self, run_id: &str) {
        log::debug!("[{}] {} completed in {}ms", run_id, self.name, self.elapsed_ms());
    }
}
