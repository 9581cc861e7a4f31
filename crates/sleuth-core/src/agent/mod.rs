pub mod channel;
pub mod error;
pub mod events;
pub mod types;

pub use error::AgentError;
pub use events::{AgentEvent, AnalysisResult};
pub use types::{ExecutionState, Message, Plan, PlannedStep, Role, Step, StepResult, StepStatus};
