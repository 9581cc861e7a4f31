//! Pure text heuristics used by the orchestrator: tool mapping, target
//! rewriting and lenient parsing of model output. Tuning lives here so the
//! state machine never depends on the exact rules.

use std::sync::OnceLock;

use regex::Regex;

use crate::agent::types::PlannedStep;
use crate::tools::ToolKind;

/// Targets shorter than this are treated as literal tokens even when they
/// contain a description verb.
pub const DESCRIPTION_MIN_CHARS: usize = 24;

const DESCRIPTION_VERBS: &[&str] = &[
    "find",
    "check",
    "locate",
    "search",
    "look",
    "analyze",
    "analyse",
    "investigate",
    "identify",
    "inspect",
    "examine",
    "review",
    "determine",
    "verify",
    "understand",
    "trace",
];

const ERROR_KEYWORDS: &[&str] = &[
    "error",
    "exception",
    "fail",
    "not found",
    "no such",
    "denied",
    "refused",
    "timeout",
    "timed out",
    "invalid",
    "panic",
    "错误",
    "异常",
    "失败",
];

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

macro_rules! regex {
    ($pattern:expr) => {{
        static CELL: OnceLock<Option<Regex>> = OnceLock::new();
        cached(&CELL, $pattern)
    }};
}

fn has_cjk(text: &str) -> bool {
    regex!(r"\p{Han}").is_some_and(|re| re.is_match(text))
}

/// Keyword mapping from a step's action text to a tool. Code wins over log,
/// log over database; anything else is a code search.
pub fn map_action_to_tool(action: &str) -> ToolKind {
    let lower = action.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));

    if any(&["code", "file", "代码", "文件"]) {
        ToolKind::CodeSearch
    } else if any(&["log", "日志"]) {
        ToolKind::LogSearch
    } else if any(&["database", "数据库", "db", "sql"]) {
        ToolKind::DatabaseQuery
    } else {
        ToolKind::CodeSearch
    }
}

/// Whether a step target reads like an instruction rather than something
/// to grep for.
pub fn looks_like_description(target: &str) -> bool {
    let target = target.trim();
    if target.is_empty() {
        return false;
    }
    if has_cjk(target) {
        return true;
    }
    if target.chars().count() < DESCRIPTION_MIN_CHARS {
        return false;
    }
    let lower = target.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| DESCRIPTION_VERBS.contains(&word))
}

fn is_error_like(text: &str) -> bool {
    let lower = text.to_lowercase();
    ERROR_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Pull a literal error token out of free-form user input.
///
/// Quoted fragments with error wording win; then well-known error shapes.
pub fn extract_error_token(input: &str) -> Option<String> {
    if let Some(re) = regex!(r#"["`“‘]([^"`”’\n]{3,200})["`”’]"#) {
        for caps in re.captures_iter(input) {
            let quoted = caps[1].trim();
            if is_error_like(quoted) {
                return Some(quoted.to_string());
            }
        }
    }

    if let Some(caps) =
        regex!(r"No such file or directory:?\s*'([^']+)'").and_then(|re| re.captures(input))
    {
        return Some(caps[1].to_string());
    }

    let shapes = [
        regex!(r"\b\w+(?:Error|Exception):[ \t]*[^\n]+"),
        regex!(r"(?i)\b(?:error|exception):[ \t]*[^\n]+"),
        regex!(r"\b\w+(?:Error|Exception)\b"),
    ];
    shapes
        .into_iter()
        .flatten()
        .find_map(|re| re.find(input))
        .map(|found| truncate_chars(found.as_str().trim(), 160))
}

/// Split a trailing line range off a target.
///
/// Recognises `path:10-50`, `path:10`, `path line 10` and
/// `path lines 10-50`. Bounds are returned in ascending order.
pub fn split_line_range(target: &str) -> (String, Option<usize>, Option<usize>) {
    let trimmed = target.trim();
    let patterns = [
        regex!(r"^(.+?):(\d+)\s*-\s*(\d+)$"),
        regex!(r"^(.+?):(\d+)$"),
        regex!(r"(?i)^(.+?)\s+lines?\s+(\d+)\s*-\s*(\d+)$"),
        regex!(r"(?i)^(.+?)\s+lines?\s+(\d+)$"),
    ];

    for re in patterns.into_iter().flatten() {
        let Some(caps) = re.captures(trimmed) else {
            continue;
        };
        let path = caps[1].trim();
        let start = caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok());
        let end = caps.get(3).and_then(|m| m.as_str().parse::<usize>().ok());
        if path.is_empty() || start.is_none() {
            continue;
        }
        let (start, end) = match (start, end) {
            (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
            other => other,
        };
        return (path.to_string(), start, end);
    }

    (trimmed.to_string(), None, None)
}

/// Cap `text` at `max` characters, appending `...` when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Normalise the usual model-output damage: smart quotes and trailing
/// commas.
pub fn repair_json(text: &str) -> String {
    let normalised = text
        .replace(['“', '”'], "\"")
        .replace(['‘', '’'], "'");
    match regex!(r",\s*([}\]])") {
        Some(re) => re.replace_all(&normalised, "$1").into_owned(),
        None => normalised,
    }
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_object(candidate: &str) -> Option<serde_json::Value> {
    let parsed = serde_json::from_str::<serde_json::Value>(candidate)
        .ok()
        .or_else(|| serde_json::from_str(&repair_json(candidate)).ok())?;
    parsed.is_object().then_some(parsed)
}

/// Find a JSON object in model output: a fenced block first, then the
/// first balanced `{...}`. Each candidate is retried after `repair_json`.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    if let Some(caps) = regex!(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").and_then(|re| re.captures(text)) {
        if let Some(value) = parse_object(&caps[1]) {
            return Some(value);
        }
    }

    let normalised = repair_json(text);
    first_balanced_object(&normalised).and_then(parse_object)
}

/// Fallback plan parsing for `Step N: action - target` lines.
pub fn extract_step_lines(text: &str) -> Vec<PlannedStep> {
    let Some(re) = regex!(r"(?im)^\s*(?:[-*]\s*)?\**\s*(?:step|步骤)\s*(\d+)\s*\**\s*[:：.)]\s*(.+?)\s*$") else {
        return Vec::new();
    };

    re.captures_iter(text)
        .filter_map(|caps| {
            let body = caps[2].replace("**", "");
            let (action, target) = match body.split_once(" - ") {
                Some((action, target)) => (action.trim(), target.trim()),
                None => (body.trim(), ""),
            };
            (!action.is_empty()).then(|| PlannedStep::new(action, target))
        })
        .collect()
}

/// First sentence in `text` that ends with a question mark.
pub fn extract_question(text: &str) -> Option<String> {
    let re = regex!(r"[^.!?。！？\n]*[?？]")?;
    re.find_iter(text)
        .map(|found| found.as_str().trim())
        .find(|question| question.chars().count() > 1)
        .map(str::to_string)
}
