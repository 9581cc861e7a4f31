use sleuth_core::heuristics::{
    extract_error_token, looks_like_description, map_action_to_tool, split_line_range,
    truncate_chars,
};
use sleuth_core::{
    AgentError, AgentEvent, ExecutionState, Message, Step, StepResult, StepStatus, ToolError,
    ToolInput, ToolKind, DEFAULT_LOG_QUERY,
};

use super::{Node, RunContext};

const DEFAULT_SQL_QUERY: &str = "SELECT * FROM logs ORDER BY timestamp DESC LIMIT 100";
const MAX_RESULTS: usize = 100;
const DEFAULT_TIME_RANGE: &str = "1h";

fn between(text: &str, open: &str, close: char) -> Option<String> {
    let start = text.find(open)? + open.len();
    let len = text[start..].find(close)?;
    (len > 0).then(|| text[start..start + len].to_string())
}

fn error_message(text: &str) -> Option<String> {
    ["error:", "Error:", "ERROR:"].iter().find_map(|marker| {
        let at = text.find(marker)? + marker.len();
        let rest = text[at..].lines().next()?.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    })
}

/// A file or error reference found in earlier successful results.
fn query_from_results(results: &[StepResult]) -> Option<String> {
    let texts = || {
        results
            .iter()
            .filter(|result| result.succeeded())
            .map(StepResult::outcome_text)
    };
    texts()
        .find_map(|text| between(text, "File \"", '"'))
        .or_else(|| texts().find_map(error_message))
}

/// Turn a planned step into concrete tool input.
pub(crate) fn build_tool_input(kind: ToolKind, step: &Step, state: &ExecutionState) -> ToolInput {
    let target = step.target.trim();

    let query = if target.is_empty() {
        match kind {
            ToolKind::CodeSearch => extract_error_token(&state.original_input)
                .or_else(|| query_from_results(&state.step_results))
                .unwrap_or_else(|| "error".to_string()),
            ToolKind::LogSearch => DEFAULT_LOG_QUERY.to_string(),
            ToolKind::DatabaseQuery => DEFAULT_SQL_QUERY.to_string(),
        }
    } else if kind != ToolKind::DatabaseQuery && looks_like_description(target) {
        extract_error_token(&state.original_input).unwrap_or_else(|| target.to_string())
    } else {
        target.to_string()
    };

    match kind {
        ToolKind::CodeSearch => {
            let (query, start, end) = split_line_range(&query);
            ToolInput::new(query)
                .with_lines(start, end)
                .with_max_results(MAX_RESULTS)
        }
        ToolKind::LogSearch => ToolInput::new(query)
            .with_max_results(MAX_RESULTS)
            .with_time_range(DEFAULT_TIME_RANGE),
        ToolKind::DatabaseQuery => ToolInput::new(query).with_max_results(MAX_RESULTS),
    }
}

pub(crate) async fn run(ctx: &RunContext<'_>, state: &mut ExecutionState) -> Result<Node, AgentError> {
    let Some(step) = state.current_step_def().cloned() else {
        log::warn!(
            "[{}] no step at position {}, moving to synthesis",
            ctx.run_id,
            state.current_step
        );
        state.should_continue = false;
        return Ok(Node::Synthesize);
    };

    ctx.emit(AgentEvent::progress(
        format!("Step {}: {}", step.index, step.action),
        ctx.progress(state),
        Some(step.index),
    ))
    .await;
    state.plan.set_status(step.index, StepStatus::Running);

    let kind = map_action_to_tool(&step.action);
    let input = build_tool_input(kind, &step, state);
    log::info!(
        "[{}] step {} -> {} {:?}",
        ctx.run_id,
        step.index,
        kind,
        input.query
    );

    let outcome = tokio::select! {
        biased;
        _ = ctx.cancel().cancelled() => Err(ToolError::Cancelled),
        outcome = ctx.tools.invoke(kind, &input, ctx.cancel()) => outcome,
    };

    let (status, result, error) = match outcome {
        Ok(text) => (StepStatus::Completed, Some(text), None),
        Err(ToolError::Cancelled) => {
            log::info!("[{}] step {} cancelled", ctx.run_id, step.index);
            return Err(AgentError::Cancelled);
        }
        Err(error) => {
            log::warn!("[{}] step {} failed: {}", ctx.run_id, step.index, error);
            (StepStatus::Failed, None, Some(error.to_string()))
        }
    };

    let record = StepResult {
        step: step.index,
        action: step.action.clone(),
        target: step.target.clone(),
        status,
        result,
        error,
        tool: kind,
        tool_input: input.snapshot(),
    };

    let observation = crate::prompts::format_step_result(&record, ctx.config.history_result_chars);
    let preview = truncate_chars(record.outcome_text(), ctx.config.result_preview_chars);
    let event = AgentEvent::StepExecution {
        step: record.step,
        action: record.action.clone(),
        target: record.target.clone(),
        status,
        result: record.succeeded().then(|| preview.clone()),
        error: (!record.succeeded()).then_some(preview),
    };

    state.record_step_result(record);
    state.add_message(Message::user(observation));
    ctx.emit(event).await;

    Ok(Node::Decide)
}
