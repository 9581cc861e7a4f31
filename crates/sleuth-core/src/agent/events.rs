use serde::{Deserialize, Serialize};

use super::types::{Step, StepStatus};

/// Final structured answer of an investigation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub root_cause: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_logs: Option<String>,
}

impl AnalysisResult {
    /// Clamp confidence into `[0, ceiling]`; NaN becomes 0.
    pub fn cap_confidence(&mut self, ceiling: f64) {
        let value = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence
        };
        self.confidence = value.clamp(0.0, ceiling.clamp(0.0, 1.0));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Progress {
        message: String,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<usize>,
    },

    /// Full step list, re-sent every time the plan changes.
    Plan {
        steps: Vec<Step>,
    },

    StepExecution {
        step: usize,
        action: String,
        target: String,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Placement hints for UIs: the reasoning sits after `after_step` and
    /// before the steps it introduced.
    DecisionReasoning {
        reasoning: String,
        after_step: usize,
        before_steps: Vec<usize>,
    },

    UserInputRequest {
        request_id: String,
        question: String,
        context: String,
    },

    Result {
        #[serde(flatten)]
        result: AnalysisResult,
    },

    Error {
        error: String,
    },

    Done {
        message: String,
    },
}

impl AgentEvent {
    pub fn progress(message: impl Into<String>, progress: f64, step: Option<usize>) -> Self {
        AgentEvent::Progress {
            message: message.into(),
            progress: progress.clamp(0.0, 1.0),
            step,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        AgentEvent::Error {
            error: error.into(),
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        AgentEvent::Done {
            message: message.into(),
        }
    }

    /// SSE `event:` name.
    pub fn event_name(&self) -> &'static str {
        match self {
            AgentEvent::Progress { .. } => "progress",
            AgentEvent::Plan { .. } => "plan",
            AgentEvent::StepExecution { .. } => "step_execution",
            AgentEvent::DecisionReasoning { .. } => "decision_reasoning",
            AgentEvent::UserInputRequest { .. } => "user_input_request",
            AgentEvent::Result { .. } => "result",
            AgentEvent::Error { .. } => "error",
            AgentEvent::Done { .. } => "done",
        }
    }

    /// SSE `data:` payload: the event body without the `type` tag.
    pub fn payload(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(object) = value.as_object_mut() {
            object.remove("type");
        }
        value
    }

    /// One complete `event: ..\ndata: ..\n\n` frame.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_name(), self.payload())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::Done { .. } | AgentEvent::Error { .. } | AgentEvent::UserInputRequest { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_payload_is_flat() {
        let event = AgentEvent::Result {
            result: AnalysisResult {
                root_cause: "missing config".to_string(),
                suggestions: vec!["create config.json".to_string()],
                confidence: 0.8,
                related_code: None,
                related_logs: None,
            },
        };

        let payload = event.payload();
        assert_eq!(payload["root_cause"], "missing config");
        assert_eq!(payload["confidence"], 0.8);
        assert!(payload.get("type").is_none());
        assert!(payload.get("related_code").is_none());
    }

    #[test]
    fn sse_frame_carries_event_name() {
        let frame = AgentEvent::done("finished").to_sse();
        assert_eq!(frame, "event: done\ndata: {\"message\":\"finished\"}\n\n");
    }

    #[test]
    fn step_execution_omits_missing_error() {
        let event = AgentEvent::StepExecution {
            step: 1,
            action: "search code".to_string(),
            target: "config.json".to_string(),
            status: StepStatus::Completed,
            result: Some("1. src/main.rs:3: config.json".to_string()),
            error: None,
        };

        let payload = event.payload();
        assert_eq!(payload["status"], "completed");
        assert!(payload.get("error").is_none());
    }

    #[test]
    fn progress_is_clamped() {
        match AgentEvent::progress("x", 1.7, None) {
            AgentEvent::Progress { progress, .. } => assert_eq!(progress, 1.0),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn terminal_events() {
        assert!(AgentEvent::done("ok").is_terminal());
        assert!(AgentEvent::error("boom").is_terminal());
        assert!(!AgentEvent::Plan { steps: vec![] }.is_terminal());
    }

    #[test]
    fn confidence_cap_handles_nan() {
        let mut result = AnalysisResult {
            root_cause: String::new(),
            suggestions: vec![],
            confidence: f64::NAN,
            related_code: None,
            related_logs: None,
        };
        result.cap_confidence(0.5);
        assert_eq!(result.confidence, 0.0);

        result.confidence = 0.9;
        result.cap_confidence(0.3);
        assert_eq!(result.confidence, 0.3);
    }
}
