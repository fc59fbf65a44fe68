//! Skill tool (spec §4.3): invokes an already-installed skill by name. Skill
//! discovery/installation is out of scope (spec.md Non-goals); this tool only
//! consumes what `skills::SkillRegistry` has already loaded.

use super::{ToolCall, ToolContext, ToolError, ToolResult};

pub async fn invoke(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let name = call
        .args
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Skill requires 'name'".into()))?;
    let args = call.args.get("args").cloned().unwrap_or(serde_json::json!({}));

    let manager = ctx.manager()?;
    let skill = manager
        .find_skill(&ctx.project_root, name)
        .await
        .ok_or_else(|| ToolError::SkillError(format!("no such skill: {name}")))?;

    Ok(ToolResult::ok(
        call,
        format!("invoked skill '{name}'"),
        serde_json::json!({ "name": name, "instructions": skill.instructions, "args": args }),
    ))
}
