//! Structured action parsing (spec §4.4 step 4): the model streams prose mixed with
//! JSON objects carrying a leading `"type"` field. Parsing is brace-depth aware and
//! tolerates arbitrary text around the JSON — it does not require the whole chunk to
//! be valid JSON, only that a balanced `{...}` span be found.

use super::types::Plan;
use crate::tools::ToolCall;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum ModelAction {
    Tool(ToolCall),
    Plan(Plan),
    FinalizeTask { output: String },
    AskUser(Value),
    ChangeReport(Value),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Splits `text` into the prose preceding the first recognized JSON action object
/// and that object's raw span, if any. Used by the Engine to emit a `TextSegment`
/// for prose before opening a `tool_use`/`finalize_task` content block.
pub fn text_before_first_json(text: &str) -> (&str, Option<&str>) {
    match find_json_spans(text).into_iter().next() {
        Some((start, end)) => (&text[..start], Some(&text[start..end])),
        None => (text, None),
    }
}

/// Scans `text` for every balanced top-level `{...}` span, returning their byte
/// ranges in order. Ignores braces inside string literals.
pub(crate) fn find_json_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = scan_balanced(bytes, i) {
                spans.push((i, end));
                i = end;
                continue;
            }
        }
        i += 1;
    }
    spans
}

fn scan_balanced(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Parses every recognized action object found in `text`, skipping spans that parse
/// as JSON but don't carry a recognized `type` (tolerated as incidental JSON in
/// prose, not an error).
pub fn parse_all_actions(text: &str) -> Vec<ModelAction> {
    let mut actions = Vec::new();
    for (start, end) in find_json_spans(text) {
        let span = &text[start..end];
        let Ok(envelope) = serde_json::from_str::<Envelope>(span) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(span) else {
            continue;
        };
        match envelope.kind.as_str() {
            "tool" => {
                if let Ok(call) = parse_tool_call(&value) {
                    actions.push(ModelAction::Tool(call));
                }
            }
            "plan" => {
                if let Ok(plan) = serde_json::from_value::<Plan>(value) {
                    actions.push(ModelAction::Plan(plan));
                }
            }
            "finalize_task" => {
                let output = value
                    .get("output")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                actions.push(ModelAction::FinalizeTask { output });
            }
            "ask_user" => actions.push(ModelAction::AskUser(value)),
            "change_report" => actions.push(ModelAction::ChangeReport(value)),
            _ => {}
        }
    }
    actions
}

/// If `span` is a closed `tool` action, returns the tool's name — used by the
/// Engine to announce a `ContentBlockStart` as soon as the call is recognizable in
/// the growing stream buffer, before the whole turn has finished.
pub(crate) fn peek_tool_name(span: &str) -> Option<String> {
    let envelope: Envelope = serde_json::from_str(span).ok()?;
    if envelope.kind != "tool" {
        return None;
    }
    let value: Value = serde_json::from_str(span).ok()?;
    value.get("name").and_then(|v| v.as_str()).map(str::to_string)
}

fn parse_tool_call(value: &Value) -> Result<ToolCall, String> {
    let name = value
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or("tool action missing 'name'")?
        .to_string();
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let args = value.get("args").cloned().unwrap_or(Value::Null);
    Ok(ToolCall { id, name, args })
}

/// Returns the first recognized action only, used by callers that dispatch a single
/// action per stream (kept for compatibility with simpler call sites, e.g. tests
/// exercising one action in isolation).
pub fn parse_first_action(text: &str) -> Option<ModelAction> {
    parse_all_actions(text).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_json_after_prose() {
        let text = r#"Let me check that file. {"type": "tool", "name": "Read", "args": {"path": "a.rs"}}"#;
        let (prose, json) = text_before_first_json(text);
        assert_eq!(prose.trim(), "Let me check that file.");
        assert!(json.unwrap().contains("\"Read\""));
    }

    #[test]
    fn tolerates_braces_inside_string_values() {
        let text = r#"{"type": "tool", "name": "Bash", "args": {"command": "echo {not json}"}}"#;
        let actions = parse_all_actions(text);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], ModelAction::Tool(c) if c.name == "Bash"));
    }

    #[test]
    fn parses_multiple_actions_in_sequence() {
        let text = r#"{"type":"tool","name":"Read","args":{"path":"a"}} then {"type":"tool","name":"Read","args":{"path":"b"}}"#;
        let actions = parse_all_actions(text);
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn ignores_json_without_recognized_type() {
        let text = r#"{"foo": "bar"}"#;
        assert!(parse_all_actions(text).is_empty());
    }

    #[test]
    fn parses_finalize_task() {
        let text = r#"{"type": "finalize_task", "output": "done"}"#;
        let actions = parse_all_actions(text);
        assert!(matches!(&actions[0], ModelAction::FinalizeTask { output } if output == "done"));
    }
}
