//! Lenient readers for model replies. Every function returns something
//! usable; callers decide what an empty answer means.

use serde_json::Value;
use sleuth_core::heuristics::{extract_json_object, extract_step_lines, truncate_chars};
use sleuth_core::{AnalysisResult, Decision, PlannedStep};

/// Confidence assumed when the model does not state one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const MAX_FALLBACK_REASONING_CHARS: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDecision {
    pub action: Option<Decision>,
    pub reasoning: String,
    pub question: Option<String>,
    pub context: String,
    pub next_steps: Vec<PlannedStep>,
}

fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn planned_step(value: &Value) -> Option<PlannedStep> {
    match value {
        Value::String(text) => {
            let (action, target) = text.split_once(" - ").unwrap_or((text.as_str(), ""));
            let action = action.trim();
            (!action.is_empty()).then(|| PlannedStep::new(action, target.trim()))
        }
        Value::Object(_) => {
            let action = non_empty(&value["action"])?;
            let target = non_empty(&value["target"]).unwrap_or_default();
            Some(PlannedStep::new(action, target))
        }
        _ => None,
    }
}

fn planned_steps(value: &Value) -> Vec<PlannedStep> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(planned_step).collect())
        .unwrap_or_default()
}

/// Steps proposed by a planning reply: `{"steps": [...]}`, a bare
/// `{"action", "target"}` object, or `Step N: action - target` lines.
pub fn parse_plan(text: &str) -> Vec<PlannedStep> {
    if let Some(value) = extract_json_object(text) {
        let steps = planned_steps(&value["steps"]);
        if !steps.is_empty() {
            return steps;
        }
        if let Some(step) = planned_step(&value) {
            return vec![step];
        }
    }
    extract_step_lines(text)
}

pub fn parse_decision_action(action: &str) -> Option<Decision> {
    let normalised = action.trim().to_lowercase().replace(['-', ' '], "_");
    match normalised.as_str() {
        "continue" | "next_step" => Some(Decision::Continue),
        "synthesize" | "synthesise" | "finish" | "conclude" => Some(Decision::Synthesize),
        "request_input" | "request_user_input" | "ask_user" => Some(Decision::RequestInput),
        _ => None,
    }
}

fn keyword_decision(text: &str) -> Option<Decision> {
    let lower = text.to_lowercase();
    ["request_input", "continue", "synthesize", "synthesise"]
        .iter()
        .filter_map(|keyword| lower.find(keyword).map(|at| (at, *keyword)))
        .min_by_key(|(at, _)| *at)
        .and_then(|(_, keyword)| parse_decision_action(keyword))
}

/// Read a decide reply. Falls back to the first decision keyword in the
/// raw text when no JSON object parses.
pub fn parse_decision(text: &str) -> ParsedDecision {
    match extract_json_object(text) {
        Some(value) => ParsedDecision {
            action: value["action"].as_str().and_then(parse_decision_action),
            reasoning: non_empty(&value["reasoning"]).unwrap_or_default(),
            question: non_empty(&value["question"]),
            context: non_empty(&value["context"]).unwrap_or_default(),
            next_steps: planned_steps(&value["next_steps"]),
        },
        None => ParsedDecision {
            action: keyword_decision(text),
            reasoning: truncate_chars(text.trim(), MAX_FALLBACK_REASONING_CHARS),
            ..ParsedDecision::default()
        },
    }
}

/// `{"file", "lines", "description"}` or `{"timestamp", "content",
/// "description"}` reference objects rendered on one line.
fn describe_reference(item: &Value) -> String {
    let head = match (non_empty(&item["file"]), non_empty(&item["content"])) {
        (Some(file), _) => match item["lines"].as_array().map(Vec::as_slice) {
            Some([start, end]) => format!("{file}:{start}-{end}"),
            Some([line]) => format!("{file}:{line}"),
            _ => file,
        },
        (None, Some(content)) => match non_empty(&item["timestamp"]) {
            Some(timestamp) => format!("[{timestamp}] {content}"),
            None => content,
        },
        (None, None) => return item.to_string(),
    };
    match non_empty(&item["description"]) {
        Some(description) => format!("{head} ({description})"),
        None => head,
    }
}

fn joined(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    Value::Object(_) => describe_reference(item),
                    other => other.to_string(),
                })
                .filter(|text| !text.trim().is_empty())
                .collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn confidence(value: &Value) -> f64 {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        // Percent-style answers.
        Some(value) if value > 1.0 && value <= 100.0 => value / 100.0,
        Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

/// Read a synthesis reply into a result. Unstructured text becomes the
/// root cause at the default confidence.
pub fn parse_analysis(text: &str) -> AnalysisResult {
    let Some(value) = extract_json_object(text) else {
        return AnalysisResult {
            root_cause: text.trim().to_string(),
            suggestions: Vec::new(),
            confidence: DEFAULT_CONFIDENCE,
            related_code: None,
            related_logs: None,
        };
    };

    let suggestions = match &value["suggestions"] {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.trim().to_string()),
                Value::Object(_) => non_empty(&item["suggestion"])
                    .or_else(|| non_empty(&item["description"]))
                    .or_else(|| Some(item.to_string())),
                _ => None,
            })
            .filter(|text| !text.is_empty())
            .collect(),
        Value::String(text) => vec![text.trim().to_string()],
        _ => Vec::new(),
    };

    AnalysisResult {
        root_cause: non_empty(&value["root_cause"]).unwrap_or_else(|| text.trim().to_string()),
        suggestions,
        confidence: confidence(&value["confidence"]),
        related_code: joined(&value["related_code"]),
        related_logs: joined(&value["related_logs"]),
    }
}
