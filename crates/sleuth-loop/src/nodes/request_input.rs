use sleuth_core::{AgentError, AgentEvent, ExecutionState};

use super::RunContext;

/// Park the run in the session store and ask the caller. Returns the
/// suspension id, or `None` when there is no question to ask.
pub(crate) async fn run(ctx: &RunContext<'_>, state: &mut ExecutionState) -> Result<Option<String>, AgentError> {
    let Some(pending) = state.pending_question.clone() else {
        log::warn!("[{}] no pending question, cannot suspend", ctx.run_id);
        return Ok(None);
    };
    if ctx.cancel().is_cancelled() {
        return Err(AgentError::Cancelled);
    }

    let request_id = ctx.sessions.insert(state.clone());
    state.suspension_id = Some(request_id.clone());
    log::info!(
        "[{}] suspended as {} waiting for: {}",
        ctx.run_id,
        request_id,
        pending.question
    );

    ctx.emit(AgentEvent::UserInputRequest {
        request_id: request_id.clone(),
        question: pending.question,
        context: pending.context,
    })
    .await;
    Ok(Some(request_id))
}
