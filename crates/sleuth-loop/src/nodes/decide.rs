use sleuth_core::heuristics::{extract_question, extract_step_lines, truncate_chars};
use sleuth_core::{AgentError, AgentEvent, Decision, ExecutionState, Message, PendingQuestion};

use super::{Node, RunContext};
use crate::parse::parse_decision;
use crate::prompts::decide_prompt;

const TEMPLATED_QUESTION_CHARS: usize = 200;

fn conclude(state: &mut ExecutionState) -> Node {
    state.should_continue = false;
    state.decision = Some(Decision::Synthesize);
    Node::Synthesize
}

/// Question built from the model's reasoning when it asked for input
/// without phrasing one.
fn templated_question(reasoning: &str) -> Option<String> {
    let topic = reasoning.trim().trim_end_matches(['.', '?', '!', '。', '？']);
    (!topic.is_empty()).then(|| {
        format!(
            "Could you provide more details about: {}?",
            truncate_chars(topic, TEMPLATED_QUESTION_CHARS)
        )
    })
}

pub(crate) async fn run(ctx: &RunContext<'_>, state: &mut ExecutionState) -> Result<Node, AgentError> {
    let max = ctx.config.max_iterations;
    if state.current_step >= max {
        log::info!(
            "[{}] reached {} executed steps (max {}), synthesizing",
            ctx.run_id,
            state.current_step,
            max
        );
        return Ok(conclude(state));
    }
    if ctx.over_budget(state) {
        log::info!(
            "[{}] conversation at {} chars, synthesizing",
            ctx.run_id,
            state.conversation_chars()
        );
        return Ok(conclude(state));
    }

    let mut prompt = state.messages.clone();
    prompt.push(Message::user(decide_prompt(
        state,
        ctx.config.result_preview_chars,
        max - state.current_step,
    )));
    let reply = ctx.ask("decide", &prompt).await?;
    let parsed = parse_decision(&reply.content);
    let raw = reply.content.clone();
    state.add_message(reply);

    let after_step = state.step_results.last().map_or(0, |result| result.step);

    let next = match parsed.action {
        Some(Decision::Continue) => {
            let mut steps = parsed.next_steps;
            if steps.is_empty() {
                steps = extract_step_lines(&raw);
            }

            let before_steps: Vec<usize> = if !steps.is_empty() {
                let first = state.plan.next_index();
                (first..first + steps.len()).collect()
            } else if let Some(pending) = state.current_step_def() {
                log::debug!(
                    "[{}] continue without steps, keeping planned step {}",
                    ctx.run_id,
                    pending.index
                );
                vec![pending.index]
            } else {
                log::info!("[{}] continue without usable steps, synthesizing", ctx.run_id);
                Vec::new()
            };

            if before_steps.is_empty() {
                conclude(state)
            } else {
                emit_reasoning(ctx, &parsed.reasoning, after_step, before_steps).await;
                state.decided_steps = steps;
                state.decision = Some(Decision::Continue);
                state.should_continue = true;
                Node::Plan
            }
        }
        Some(Decision::RequestInput) => {
            let question = parsed
                .question
                .or_else(|| extract_question(&parsed.reasoning))
                .or_else(|| templated_question(&parsed.reasoning));
            match question {
                Some(question) => {
                    let context = if parsed.context.is_empty() {
                        parsed.reasoning
                    } else {
                        parsed.context
                    };
                    state.pending_question = Some(PendingQuestion { question, context });
                    state.decision = Some(Decision::RequestInput);
                    state.should_continue = false;
                    Node::RequestUserInput
                }
                None => {
                    log::info!("[{}] input requested without a question, synthesizing", ctx.run_id);
                    conclude(state)
                }
            }
        }
        Some(Decision::Synthesize) => conclude(state),
        None => {
            log::warn!("[{}] unreadable decision, synthesizing", ctx.run_id);
            conclude(state)
        }
    };

    log::info!(
        "[{}] decision after step {}: {:?}",
        ctx.run_id,
        after_step,
        state.decision
    );
    Ok(next)
}

/// Only a `continue` carries reasoning outward; it always introduces steps.
async fn emit_reasoning(ctx: &RunContext<'_>, reasoning: &str, after_step: usize, before_steps: Vec<usize>) {
    if reasoning.is_empty() {
        return;
    }
    ctx.emit(AgentEvent::DecisionReasoning {
        reasoning: reasoning.to_string(),
        after_step,
        before_steps,
    })
    .await;
}
