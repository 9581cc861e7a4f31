/// Configuration for the investigation loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Executed steps after which Decide stops asking the model and
    /// synthesizes.
    pub max_iterations: usize,
    /// Conversation size in characters past which planning stops and
    /// synthesis takes the degraded path.
    pub context_char_budget: usize,
    /// Cap on the tool output copied into `step_execution` events.
    pub result_preview_chars: usize,
    /// Cap on each tool output kept in the conversation and prompts.
    pub history_result_chars: usize,
    /// Step results quoted by the degraded synthesis prompt.
    pub degraded_highlights: usize,
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            context_char_budget: 60_000,
            result_preview_chars: 1_000,
            history_result_chars: 4_000,
            degraded_highlights: 5,
            system_prompt: None,
        }
    }
}

impl OrchestratorConfig {
    /// Progress fraction once `executed` steps have run.
    pub fn progress_at(&self, executed: usize) -> f64 {
        let max = self.max_iterations.max(1) as f64;
        0.1 + 0.8 * (executed as f64).min(max) / max
    }
}
