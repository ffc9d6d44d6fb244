//! Optional planning step: turn a free-form model reply into a step list.

use crate::message::Message;

const PLANNER_PROMPT: &str = "Break the user's request into a short list of concrete steps. \
One step per line, no commentary.";

/// Messages asking for a plan for `goal`
pub fn plan_messages(goal: &str) -> Vec<Message> {
    vec![Message::system(PLANNER_PROMPT), Message::user(goal)]
}

/// One step per non-empty line with bullets and numbering stripped.
/// When no line survives, the whole text is a single step.
pub fn parse_plan(text: &str) -> Vec<String> {
    let steps: Vec<String> = text
        .lines()
        .map(strip_marker)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if steps.is_empty() && !text.trim().is_empty() {
        vec![text.trim().to_string()]
    } else {
        steps
    }
}

/// System note carrying the plan into the turn's provider calls
pub fn plan_note(steps: &[String]) -> Message {
    let body = steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n");
    Message::system(format!("Plan for this request:\n{body}"))
}

fn strip_marker(line: &str) -> &str {
    let line = line.trim_matches(|c: char| c == '-' || c == '•' || c == '*' || c.is_whitespace());
    // "1." / "2)" numbering
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return stripped.trim();
        }
    }
    line
}
