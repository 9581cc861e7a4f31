pub mod openai;
pub mod provider;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

pub use openai::OpenAiClient;
pub use provider::{LlmClient, LlmError, Result};
#[cfg(any(test, feature = "test-util"))]
pub use scripted::ScriptedLlm;
