//! Task tool (`delegate_to_agent`, spec §4.3/§4.5): spawns a child run on another
//! agent, blocks until it finishes, and returns its final packet. Depth is enforced
//! here so a misbehaving agent can't recurse the delegation tree unboundedly.

use super::{ToolCall, ToolContext, ToolError, ToolResult};

pub async fn delegate(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let target_agent_id = call
        .args
        .get("target_agent_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Task requires 'target_agent_id'".into()))?
        .to_string();
    let task = call
        .args
        .get("task")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Task requires 'task'".into()))?
        .to_string();

    if ctx.depth >= ctx.max_depth {
        return Err(ToolError::DepthExceeded(ctx.max_depth));
    }

    let manager = ctx.manager()?;
    let outcome = tokio::select! {
        result = manager.delegate(
            &ctx.project_root,
            &ctx.session_id,
            &ctx.run_id,
            &ctx.agent_id,
            &target_agent_id,
            &task,
            ctx.depth + 1,
        ) => result,
        _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
    };

    let packet = outcome.map_err(|e| ToolError::ChildFailed(e.to_string()))?;

    Ok(ToolResult::ok(
        call,
        format!("{target_agent_id} finished: {}", packet.summary),
        serde_json::json!({
            "target_agent_id": target_agent_id,
            "output": packet.output,
            "summary": packet.summary,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Mutex, Weak};
    use tokio_util::sync::CancellationToken;

    fn ctx(depth: usize, max_depth: usize) -> ToolContext {
        ToolContext {
            root: std::path::PathBuf::from("/tmp"),
            agent_id: "a".into(),
            run_id: "r".into(),
            project_root: "p".into(),
            session_id: "s".into(),
            work_globs: vec![],
            write_policy: crate::sandbox::WritePolicy::Off,
            allowed_tools: None,
            policy: crate::config::AgentPolicy::default(),
            depth,
            max_depth,
            manager: Weak::new(),
            cancel: CancellationToken::new(),
            read_paths: Mutex::new(HashSet::new()),
        }
    }

    #[tokio::test]
    async fn depth_at_limit_is_rejected_before_reaching_manager() {
        let ctx = ctx(2, 2);
        let call = ToolCall {
            id: "1".into(),
            name: "Task".into(),
            args: serde_json::json!({ "target_agent_id": "reviewer", "task": "look at this" }),
        };
        let err = delegate(&ctx, &call).await.unwrap_err();
        assert!(matches!(err, ToolError::DepthExceeded(2)));
    }
}
