use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Session not found or expired: {0}")]
    SessionNotFound(String),

    /// Carries the user-facing message of an LLM transport failure.
    #[error("{0}")]
    Llm(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Analysis timed out after {0} seconds")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}
