use sleuth_core::heuristics::truncate_chars;
use sleuth_core::{ContextFile, ContextFileKind, ExecutionState, StepResult, ToolKind};

/// Context file content quoted into prompts.
const CONTEXT_FILE_CHARS: usize = 2_000;
/// Per-step excerpt used by the compressed synthesis prompt.
const HIGHLIGHT_CHARS: usize = 300;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an experienced engineer investigating a production problem. \
You work step by step with three tools: code_search (search the code repository or open a file), \
log_search (search application logs) and database_query (run a read-only SQL SELECT). \
Base every conclusion on tool output and say so when evidence is missing.";

pub fn format_context_files(files: &[ContextFile]) -> String {
    files
        .iter()
        .map(|file| {
            let kind = match file.kind {
                ContextFileKind::Code => "code",
                ContextFileKind::Log => "log",
            };
            let location = match (file.line_start, file.line_end) {
                (Some(start), Some(end)) => format!(" (lines {start}-{end})"),
                (Some(start), None) => format!(" (from line {start})"),
                _ => String::new(),
            };
            format!(
                "[{kind}] {}{location}:\n{}",
                file.path.as_deref().unwrap_or("snippet"),
                truncate_chars(&file.content, CONTEXT_FILE_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// First user turn of a run: the problem plus any attached files.
pub fn problem_statement(input: &str, files: &[ContextFile]) -> String {
    let mut prompt = format!("Problem to investigate:\n{input}");
    if !files.is_empty() {
        prompt.push_str("\n\nAttached context:\n");
        prompt.push_str(&format_context_files(files));
    }
    prompt
}

pub fn first_step_prompt(available: &[ToolKind]) -> String {
    let tools = available
        .iter()
        .map(|kind| kind.name())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Decide only the FIRST investigation step. Later steps will be chosen after seeing its result.\n\
Available tools: {tools}.\n\
The action should name the tool area (code, log or database); the target is a literal search token, \
a file path (optionally `path:10-50`) or a SQL SELECT.\n\
Reply with JSON only:\n\
{{\"steps\": [{{\"action\": \"search code\", \"target\": \"...\"}}]}}"
    )
}

/// One step outcome as it is shown to the model: successes and failures
/// are labelled differently.
pub fn format_step_result(result: &StepResult, max_chars: usize) -> String {
    let header = format!(
        "Step {} [{}] {} - {}",
        result.step,
        result.tool.name(),
        result.action,
        result.target
    );
    if result.succeeded() {
        format!(
            "{header}\nSUCCEEDED:\n{}",
            truncate_chars(result.outcome_text(), max_chars)
        )
    } else {
        format!(
            "{header}\nFAILED: {}",
            truncate_chars(result.outcome_text(), max_chars)
        )
    }
}

pub fn format_step_results(results: &[StepResult], max_chars: usize) -> String {
    if results.is_empty() {
        return "(no steps executed)".to_string();
    }
    results
        .iter()
        .map(|result| format_step_result(result, max_chars))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn decide_prompt(state: &ExecutionState, max_chars: usize, remaining: usize) -> String {
    format!(
        "Original problem:\n{}\n\n\
Results so far:\n{}\n\n\
Choose what happens next (at most {remaining} more steps are allowed):\n\
- \"continue\": run more steps; give at least one in next_steps.\n\
- \"synthesize\": enough evidence, or nothing useful left to try.\n\
- \"request_input\": only a human can unblock you; give a concrete question.\n\
If a step failed, consider retrying with a different target or tool.\n\
Reply with JSON only:\n\
{{\"action\": \"continue|synthesize|request_input\", \"reasoning\": \"...\", \
\"question\": \"...\", \"context\": \"...\", \
\"next_steps\": [{{\"action\": \"...\", \"target\": \"...\"}}]}}",
        state.original_input,
        format_step_results(&state.step_results, max_chars),
    )
}

const RESULT_SHAPE: &str = "Reply with JSON only:\n\
{\"root_cause\": \"...\", \"suggestions\": [\"...\"], \"confidence\": 0.0, \
\"related_code\": [{\"file\": \"...\", \"lines\": [1, 2], \"description\": \"...\"}], \
\"related_logs\": [{\"timestamp\": \"...\", \"content\": \"...\", \"description\": \"...\"}]}";

pub fn synthesize_prompt(state: &ExecutionState, max_chars: usize) -> String {
    let mut prompt = format!(
        "Write the final analysis.\n\nOriginal problem:\n{}\n\nInvestigation steps:\n{}\n",
        state.original_input,
        format_step_results(&state.step_results, max_chars),
    );
    if !state.context_files.is_empty() {
        prompt.push_str("\nAttached context:\n");
        prompt.push_str(&format_context_files(&state.context_files));
        prompt.push('\n');
    }
    prompt.push_str(
        "\nThe root cause must say where the error happens and why. \
Confidence is between 0 and 1 and must reflect how well the evidence supports the conclusion.\n",
    );
    prompt.push_str(RESULT_SHAPE);
    prompt
}

/// Short prompt for when the full conversation no longer fits.
pub fn compressed_synthesize_prompt(state: &ExecutionState, highlights: usize) -> String {
    let excerpts = state
        .step_results
        .iter()
        .rev()
        .take(highlights)
        .rev()
        .map(|result| format_step_result(result, HIGHLIGHT_CHARS))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "The investigation grew too large to review in full. Summarise from these excerpts only.\n\n\
Original problem:\n{}\n\nExcerpts:\n{}\n\n\
Keep the answer short and lower your confidence accordingly.\n{RESULT_SHAPE}",
        truncate_chars(&state.original_input, 2_000),
        if excerpts.is_empty() { "(none)".to_string() } else { excerpts },
    )
}
