use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sleuth_core::heuristics::truncate_chars;
use sleuth_core::{
    AgentError, AgentEvent, AnalysisResult, ContextFile, EventSink, ExecutionState, Message,
    SessionStore, ToolRegistry,
};
use sleuth_llm::LlmClient;

use crate::config::OrchestratorConfig;
use crate::nodes::{decide, execute, plan, request_input, synthesize, Node, RunContext, Timer};

pub type Result<T> = std::result::Result<T, AgentError>;

/// A new investigation as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub input: String,
    #[serde(default)]
    pub context_files: Vec<ContextFile>,
}

impl AnalysisRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            context_files: Vec::new(),
        }
    }
}

/// How a run left the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(AnalysisResult),
    /// Parked in the session store until someone replies.
    Suspended { request_id: String, question: String },
}

/// Drives investigations. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    config: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            llm,
            tools,
            sessions,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Start a fresh investigation.
    pub async fn run(&self, run_id: &str, request: AnalysisRequest, sink: EventSink) -> Result<RunOutcome> {
        log::info!(
            "[{}] starting analysis: {}",
            run_id,
            truncate_chars(request.input.trim(), 200)
        );
        sink.emit(AgentEvent::progress("Starting analysis", 0.05, None))
            .await;
        let state = ExecutionState::new(request.input, request.context_files);
        self.drive(run_id, state, Node::Plan, &sink).await
    }

    /// Consume a suspended run. Each id can be taken once.
    pub fn take_suspended(&self, request_id: &str) -> Result<ExecutionState> {
        self.sessions
            .take(request_id)
            .map(|session| session.state)
            .ok_or_else(|| AgentError::SessionNotFound(request_id.to_string()))
    }

    /// Continue a suspended run with the caller's reply. Re-enters Decide.
    pub async fn resume(
        &self,
        run_id: &str,
        mut state: ExecutionState,
        reply: &str,
        sink: EventSink,
    ) -> Result<RunOutcome> {
        let question = state
            .pending_question
            .take()
            .map(|pending| pending.question)
            .unwrap_or_default();
        state.suspension_id = None;
        state.decision = None;
        state.should_continue = true;
        state.add_message(Message::user(format!(
            "User reply to \"{question}\": {}",
            reply.trim()
        )));
        log::info!("[{}] resuming after step {}", run_id, state.current_step);

        sink.emit(AgentEvent::progress(
            "Resuming analysis with your reply",
            self.config.progress_at(state.current_step),
            None,
        ))
        .await;
        self.drive(run_id, state, Node::Decide, &sink).await
    }

    /// Give up on the pending question and conclude with what is known.
    pub async fn skip(&self, run_id: &str, mut state: ExecutionState, sink: EventSink) -> Result<RunOutcome> {
        let question = state
            .pending_question
            .take()
            .map(|pending| pending.question)
            .unwrap_or_default();
        state.suspension_id = None;
        state.add_message(Message::user(format!(
            "The user cannot provide more information about \"{question}\". \
Conclude with the evidence collected so far."
        )));
        log::info!("[{}] input skipped, synthesizing", run_id);

        sink.emit(AgentEvent::progress(
            "Finishing analysis without further input",
            self.config.progress_at(state.current_step),
            None,
        ))
        .await;
        self.drive(run_id, state, Node::Synthesize, &sink).await
    }

    async fn drive(&self, run_id: &str, mut state: ExecutionState, start: Node, sink: &EventSink) -> Result<RunOutcome> {
        let ctx = RunContext {
            run_id,
            llm: self.llm.as_ref(),
            tools: self.tools.as_ref(),
            sessions: self.sessions.as_ref(),
            config: self.config.as_ref(),
            sink,
        };
        let timer = Timer::new("analysis");
        let mut node = start;

        loop {
            if ctx.cancel().is_cancelled() {
                log::info!("[{}] cancelled before {:?}", run_id, node);
                return Err(AgentError::Cancelled);
            }
            log::debug!("[{}] entering {:?}", run_id, node);

            node = match node {
                Node::Plan => plan::run(&ctx, &mut state).await?,
                Node::ExecuteStep => execute::run(&ctx, &mut state).await?,
                Node::Decide => decide::run(&ctx, &mut state).await?,
                Node::Synthesize => {
                    let result = synthesize::run(&ctx, &mut state).await?;
                    timer.debug(run_id);
                    return Ok(RunOutcome::Completed(result));
                }
                Node::RequestUserInput => match request_input::run(&ctx, &mut state).await? {
                    Some(request_id) => {
                        timer.debug(run_id);
                        let question = state
                            .pending_question
                            .as_ref()
                            .map(|pending| pending.question.clone())
                            .unwrap_or_default();
                        return Ok(RunOutcome::Suspended {
                            request_id,
                            question,
                        });
                    }
                    None => Node::Synthesize,
                },
            };
        }
    }
}
