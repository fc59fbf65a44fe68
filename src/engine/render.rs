//! Tool-result transcript rendering (design note §9 "Tool-result round-trip"): every
//! tool result is re-serialized as a synthetic message of the form
//! `Tool <Name>: <summary>\n<details>` and appended to the transcript the model sees
//! next turn.

use crate::tools::ToolResult;

pub fn render_tool_result(result: &ToolResult) -> String {
    let details = serde_json::to_string_pretty(&result.detail).unwrap_or_default();
    let status = if result.ok { "ok" } else { "error" };
    format!("Tool {} ({status}): {}\n{details}", result.tool, result.summary)
}

pub fn render_text_segment(text: &str) -> String {
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolCall;

    #[test]
    fn renders_ok_result_with_tool_name_and_summary() {
        let call = ToolCall { id: "1".into(), name: "Read".into(), args: serde_json::json!({}) };
        let result = ToolResult::ok(&call, "read 3 lines", serde_json::json!({"content": "a\nb\nc"}));
        let rendered = render_tool_result(&result);
        assert!(rendered.starts_with("Tool Read (ok): read 3 lines"));
        assert!(rendered.contains("a\\nb\\nc"));
    }
}
