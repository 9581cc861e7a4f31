use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tools::ToolKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

/// One unit of planned work. `index` is 1-based and never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    #[serde(rename = "step")]
    pub index: usize,
    pub action: String,
    pub target: String,
    pub status: StepStatus,
}

/// An action/target pair proposed by the model before it gets an index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedStep {
    pub action: String,
    #[serde(default)]
    pub target: String,
}

impl PlannedStep {
    pub fn new(action: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target: target.into(),
        }
    }
}

/// Ordered, append-only-after-completion list of steps.
///
/// Indices come from a high-water mark, so a step dropped from the
/// unexecuted tail never has its index handed out again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    steps: Vec<Step>,
    next_index: usize,
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

impl Plan {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            next_index: 1,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn max_index(&self) -> Option<usize> {
        self.steps.iter().map(|step| step.index).max()
    }

    /// Append a pending step and return its index.
    pub fn append(&mut self, action: impl Into<String>, target: impl Into<String>) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.steps.push(Step {
            index,
            action: action.into(),
            target: target.into(),
            status: StepStatus::Pending,
        });
        index
    }

    /// Step at a 0-based execution position.
    pub fn step_at(&self, position: usize) -> Option<&Step> {
        self.steps.get(position)
    }

    pub fn set_status(&mut self, index: usize, status: StepStatus) -> bool {
        match self.steps.iter_mut().find(|step| step.index == index) {
            Some(step) => {
                step.status = status;
                true
            }
            None => false,
        }
    }

    /// Keep the first `completed` steps untouched, replace the unexecuted
    /// tail with `new_steps`, and return the indices assigned to them.
    pub fn fold_onto_completed(&mut self, completed: usize, new_steps: Vec<PlannedStep>) -> Vec<usize> {
        if completed < self.steps.len() {
            self.steps.truncate(completed);
        }
        new_steps
            .into_iter()
            .map(|step| self.append(step.action, step.target))
            .collect()
    }

    pub fn pending_after(&self, completed: usize) -> usize {
        self.steps.len().saturating_sub(completed)
    }
}

/// Recorded outcome of executing one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: usize,
    pub action: String,
    pub target: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool: ToolKind,
    pub tool_input: serde_json::Value,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Completed
    }

    /// Result text for successes, error text for failures.
    pub fn outcome_text(&self) -> &str {
        self.result
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContextFileKind {
    Code,
    Log,
}

/// Auxiliary snippet supplied by the caller alongside the input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextFile {
    #[serde(rename = "type")]
    pub kind: ContextFileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Continue,
    Synthesize,
    RequestInput,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Continue => "continue",
            Decision::Synthesize => "synthesize",
            Decision::RequestInput => "request_input",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingQuestion {
    pub question: String,
    #[serde(default)]
    pub context: String,
}

/// Everything a run carries between nodes. Owned by one node at a time;
/// moved into the session store only while suspended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub original_input: String,
    #[serde(default)]
    pub context_files: Vec<ContextFile>,
    pub messages: Vec<Message>,
    pub plan: Plan,
    pub current_step: usize,
    pub step_results: Vec<StepResult>,
    pub should_continue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    /// Steps chosen by the last `continue` decision, waiting to be folded
    /// into the plan.
    #[serde(default)]
    pub decided_steps: Vec<PlannedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<PendingQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension_id: Option<String>,
}

impl ExecutionState {
    pub fn new(original_input: impl Into<String>, context_files: Vec<ContextFile>) -> Self {
        Self {
            original_input: original_input.into(),
            context_files,
            messages: Vec::new(),
            plan: Plan::new(),
            current_step: 0,
            step_results: Vec::new(),
            should_continue: true,
            decision: None,
            decided_steps: Vec::new(),
            pending_question: None,
            suspension_id: None,
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Accumulated conversation size in characters.
    pub fn conversation_chars(&self) -> usize {
        self.messages
            .iter()
            .map(|message| message.content.chars().count())
            .sum()
    }

    /// The only way step results grow: one result, one index advance.
    pub fn record_step_result(&mut self, result: StepResult) {
        self.plan.set_status(result.step, result.status);
        self.step_results.push(result);
        self.current_step += 1;
        debug_assert_eq!(self.step_results.len(), self.current_step);
    }

    pub fn current_step_def(&self) -> Option<&Step> {
        self.plan.step_at(self.current_step)
    }

    pub fn has_successful_result(&self) -> bool {
        self.step_results.iter().any(StepResult::succeeded)
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
    }
}
