pub mod config;
mod nodes;
pub mod parse;
pub mod prompts;
pub mod runner;

pub use config::OrchestratorConfig;
pub use nodes::Node;
pub use runner::{AnalysisRequest, Orchestrator, RunOutcome};
