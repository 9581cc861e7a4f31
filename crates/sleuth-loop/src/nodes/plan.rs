use sleuth_core::heuristics::{extract_error_token, truncate_chars};
use sleuth_core::{AgentError, AgentEvent, ExecutionState, Message, PlannedStep, ToolKind};

use super::{Node, RunContext};
use crate::parse::parse_plan;
use crate::prompts::{first_step_prompt, problem_statement, DEFAULT_SYSTEM_PROMPT};

/// Step used when the model proposes nothing usable.
fn default_step(input: &str) -> PlannedStep {
    let target = extract_error_token(input).unwrap_or_else(|| truncate_chars(input.trim(), 120));
    PlannedStep::new("search code", target)
}

pub(crate) async fn run(ctx: &RunContext<'_>, state: &mut ExecutionState) -> Result<Node, AgentError> {
    if ctx.over_budget(state) {
        log::info!(
            "[{}] conversation at {} chars, skipping planning",
            ctx.run_id,
            state.conversation_chars()
        );
        state.should_continue = false;
        emit_plan(ctx, state).await;
        return Ok(Node::Synthesize);
    }

    if state.plan.is_empty() {
        first_pass(ctx, state).await?;
    } else {
        let decided = std::mem::take(&mut state.decided_steps);
        if !decided.is_empty() {
            let added = state.plan.fold_onto_completed(state.current_step, decided);
            log::debug!("[{}] plan extended with steps {:?}", ctx.run_id, added);
        } else if state.current_step_def().is_none() {
            log::debug!("[{}] nothing left to plan", ctx.run_id);
            state.should_continue = false;
            return Ok(Node::Synthesize);
        }
    }

    emit_plan(ctx, state).await;
    Ok(Node::ExecuteStep)
}

async fn first_pass(ctx: &RunContext<'_>, state: &mut ExecutionState) -> Result<(), AgentError> {
    if state.messages.is_empty() {
        let system = ctx
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        state.add_message(Message::system(system));
        state.add_message(Message::user(problem_statement(
            &state.original_input,
            &state.context_files,
        )));
    }

    let available: Vec<ToolKind> = ToolKind::ALL
        .into_iter()
        .filter(|kind| ctx.tools.contains(*kind))
        .collect();
    let mut prompt = state.messages.clone();
    prompt.push(Message::user(first_step_prompt(&available)));

    let reply = ctx.ask("plan", &prompt).await?;
    let step = parse_plan(&reply.content)
        .into_iter()
        .next()
        .unwrap_or_else(|| {
            log::info!("[{}] no step in planning reply, using default", ctx.run_id);
            default_step(&state.original_input)
        });
    state.add_message(reply);

    log::info!(
        "[{}] first step: {} - {}",
        ctx.run_id,
        step.action,
        step.target
    );
    state.plan.append(step.action, step.target);
    Ok(())
}

async fn emit_plan(ctx: &RunContext<'_>, state: &ExecutionState) {
    ctx.emit(AgentEvent::Plan {
        steps: state.plan.steps().to_vec(),
    })
    .await;
}
