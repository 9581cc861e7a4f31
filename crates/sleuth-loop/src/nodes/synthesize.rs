use sleuth_core::heuristics::truncate_chars;
use sleuth_core::{AgentError, AgentEvent, AnalysisResult, Decision, ExecutionState, Message, ToolKind};

use super::RunContext;
use crate::parse::parse_analysis;
use crate::prompts::{compressed_synthesize_prompt, synthesize_prompt, DEFAULT_SYSTEM_PROMPT};

/// Confidence ceiling for summaries written from truncated highlights.
pub const DEGRADED_CONFIDENCE: f64 = 0.5;
/// Confidence of the summary assembled locally when the model is unreachable.
pub const TEMPLATED_CONFIDENCE: f64 = 0.2;
/// Confidence ceiling when no step produced evidence.
pub const NO_EVIDENCE_CONFIDENCE: f64 = 0.3;

const FINDING_CHARS: usize = 200;
const MAX_FINDINGS: usize = 3;

/// Summary built from the step results alone.
pub(crate) fn templated_summary(state: &ExecutionState) -> AnalysisResult {
    let findings: Vec<String> = state
        .step_results
        .iter()
        .filter(|result| result.succeeded())
        .rev()
        .take(MAX_FINDINGS)
        .map(|result| {
            format!(
                "Step {} ({} - {}): {}",
                result.step,
                result.action,
                result.target,
                truncate_chars(result.outcome_text().trim(), FINDING_CHARS)
            )
        })
        .collect();

    let root_cause = if findings.is_empty() {
        format!(
            "The root cause of \"{}\" could not be determined: none of the {} investigation step(s) produced usable output.",
            truncate_chars(state.original_input.trim(), FINDING_CHARS),
            state.step_results.len()
        )
    } else {
        format!(
            "Automatic summary for \"{}\". Most recent findings:\n{}",
            truncate_chars(state.original_input.trim(), FINDING_CHARS),
            findings.join("\n")
        )
    };

    let targets = |kind: ToolKind| {
        let targets: Vec<&str> = state
            .step_results
            .iter()
            .filter(|result| result.succeeded() && result.tool == kind && !result.target.is_empty())
            .map(|result| result.target.as_str())
            .collect();
        (!targets.is_empty()).then(|| targets.join("\n"))
    };

    AnalysisResult {
        root_cause,
        suggestions: vec![
            "Review the step results listed above.".to_string(),
            "Narrow the problem description and run the analysis again.".to_string(),
        ],
        confidence: TEMPLATED_CONFIDENCE,
        related_code: targets(ToolKind::CodeSearch),
        related_logs: targets(ToolKind::LogSearch),
    }
}

async fn degraded(ctx: &RunContext<'_>, state: &ExecutionState) -> Result<AnalysisResult, AgentError> {
    log::info!(
        "[{}] conversation at {} chars, synthesizing from highlights",
        ctx.run_id,
        state.conversation_chars()
    );
    let system = ctx
        .config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let prompt = [
        Message::system(system),
        Message::user(compressed_synthesize_prompt(
            state,
            ctx.config.degraded_highlights,
        )),
    ];

    match ctx.ask("synthesize (compressed)", &prompt).await {
        Ok(reply) => {
            let mut result = parse_analysis(&reply.content);
            result.cap_confidence(DEGRADED_CONFIDENCE);
            Ok(result)
        }
        Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
        Err(error) => {
            log::warn!("[{}] compressed synthesis failed ({}), using local summary", ctx.run_id, error);
            Ok(templated_summary(state))
        }
    }
}

pub(crate) async fn run(ctx: &RunContext<'_>, state: &mut ExecutionState) -> Result<AnalysisResult, AgentError> {
    state.should_continue = false;
    state.decision = Some(Decision::Synthesize);

    let mut result = if ctx.over_budget(state) {
        degraded(ctx, state).await?
    } else {
        let mut prompt = state.messages.clone();
        prompt.push(Message::user(synthesize_prompt(
            state,
            ctx.config.history_result_chars,
        )));
        let reply = ctx.ask("synthesize", &prompt).await?;
        let result = parse_analysis(&reply.content);
        state.add_message(reply);
        result
    };

    if state.has_successful_result() {
        result.cap_confidence(1.0);
    } else {
        result.cap_confidence(NO_EVIDENCE_CONFIDENCE);
    }

    log::info!(
        "[{}] analysis finished after {} step(s), confidence {:.2}",
        ctx.run_id,
        state.step_results.len(),
        result.confidence
    );

    ctx.emit(AgentEvent::Result {
        result: result.clone(),
    })
    .await;
    ctx.emit(AgentEvent::done("Analysis complete")).await;
    Ok(result)
}
