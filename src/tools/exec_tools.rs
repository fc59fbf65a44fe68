//! Bash tool (spec §4.3): runs a command under the sandbox's allowlist and per-call
//! timeout, with the run's cancellation token wired through so a cancelled run kills
//! any in-flight subprocess.

use super::{ToolCall, ToolContext, ToolError, ToolResult};
use crate::sandbox;

pub async fn bash(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let command = call
        .args
        .get("command")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Bash requires 'command'".into()))?;
    let cwd_rel = call.args.get("cwd").and_then(|v| v.as_str());
    let timeout_ms = call.args.get("timeout_ms").and_then(|v| v.as_u64());

    let cwd = match cwd_rel {
        Some(rel) => sandbox::resolve(&ctx.root, rel)?,
        None => ctx.root.clone(),
    };

    let output = sandbox::bash(command, &cwd, timeout_ms, &ctx.cancel).await?;
    let ok = output.exit_code == Some(0);
    Ok(ToolResult {
        call_id: call.id.clone(),
        tool: call.name.clone(),
        ok,
        summary: if ok {
            format!("ran `{command}` (exit 0)")
        } else {
            format!("`{command}` exited {:?}", output.exit_code)
        },
        detail: serde_json::json!({
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
            "truncated": output.truncated,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Mutex, Weak};
    use tokio_util::sync::CancellationToken;

    fn ctx(root: std::path::PathBuf) -> ToolContext {
        ToolContext {
            root,
            agent_id: "a".into(),
            run_id: "r".into(),
            project_root: "p".into(),
            session_id: "s".into(),
            work_globs: vec![],
            write_policy: crate::sandbox::WritePolicy::Off,
            allowed_tools: None,
            policy: crate::config::AgentPolicy::default(),
            depth: 0,
            max_depth: 2,
            manager: Weak::new(),
            cancel: CancellationToken::new(),
            read_paths: Mutex::new(HashSet::new()),
        }
    }

    #[tokio::test]
    async fn bash_runs_allowlisted_command() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let call = ToolCall {
            id: "1".into(),
            name: "Bash".into(),
            args: serde_json::json!({ "command": "pwd" }),
        };
        let result = bash(&ctx, &call).await.unwrap();
        assert!(result.ok);
    }

    #[tokio::test]
    async fn bash_rejects_blocked_command() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let call = ToolCall {
            id: "1".into(),
            name: "Bash".into(),
            args: serde_json::json!({ "command": "curl http://evil" }),
        };
        assert!(bash(&ctx, &call).await.is_err());
    }
}
