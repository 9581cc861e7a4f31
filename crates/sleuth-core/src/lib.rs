pub mod agent;
pub mod cache;
pub mod heuristics;
pub mod session;
pub mod tasks;
pub mod tools;

pub use agent::channel::{event_channel, EventReceiver, EventSink};
pub use agent::events::{AgentEvent, AnalysisResult};
pub use agent::types::{
    ContextFile, ContextFileKind, Decision, ExecutionState, Message, PendingQuestion, Plan,
    PlannedStep, Role, Step, StepResult, StepStatus,
};
pub use agent::AgentError;
pub use cache::{cache_key, CacheStats, ResultCache, ResultCacheConfig};
pub use session::{Session, SessionStore, SessionStoreConfig};
pub use tasks::{RunGuard, TaskRegistry};
pub use tools::{Tool, ToolError, ToolInput, ToolKind, ToolRegistry, DEFAULT_LOG_QUERY};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
