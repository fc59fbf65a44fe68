//! AskUser bridge (spec §4.3): suspends the run until a user answers, or the run is
//! cancelled. Registration and wakeup live on the Manager (`manager::ask_user`
//! module) since the answer arrives on a different task (an HTTP handler) than the
//! one blocked awaiting it.

use super::{ToolCall, ToolContext, ToolError, ToolResult};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AskUserQuestion {
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
}

pub async fn ask(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let question_id = call
        .args
        .get("question_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("AskUser requires 'question_id'".into()))?
        .to_string();
    let questions: Vec<AskUserQuestion> = call
        .args
        .get("questions")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ToolError::InvalidArgs(format!("invalid 'questions': {e}")))?
        .ok_or_else(|| ToolError::InvalidArgs("AskUser requires 'questions'".into()))?;
    if questions.is_empty() {
        return Err(ToolError::InvalidArgs("AskUser requires at least one question".into()));
    }

    let manager = ctx.manager()?;
    let payload = serde_json::json!({
        "question_id": question_id,
        "questions": questions.iter().map(|q| serde_json::json!({
            "prompt": q.prompt,
            "options": q.options,
        })).collect::<Vec<_>>(),
    });

    let answers = tokio::select! {
        answers = manager.ask_user(
            &ctx.project_root,
            &ctx.session_id,
            &ctx.run_id,
            &ctx.agent_id,
            &question_id,
            payload,
        ) => answers.map_err(|e| ToolError::ChildFailed(e.to_string()))?,
        _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
    };

    Ok(ToolResult::ok(
        call,
        format!("user answered {} question(s)", answers.len()),
        serde_json::json!({ "question_id": question_id, "answers": answers }),
    ))
}
