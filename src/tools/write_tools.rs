//! Write and Edit tools (spec §4.3): both go through the Sandbox's write-scope check
//! and `write-safety-mode`, and both record the touched path as a Working Place Entry
//! for the workspace-tree projection (spec §3 supplement).

use super::{ToolCall, ToolContext, ToolError, ToolResult};
use crate::sandbox;

pub async fn write(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let path = call
        .args
        .get("path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Write requires 'path'".into()))?;
    let content = call
        .args
        .get("content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Write requires 'content'".into()))?;

    let resolved = sandbox::resolve(&ctx.root, path)?;
    sandbox::write(&ctx.root, &ctx.work_globs, &resolved, content.as_bytes(), ctx.write_policy)?;

    record_touch(ctx, path).await;

    Ok(ToolResult::ok(
        call,
        format!("wrote {} ({} bytes)", path, content.len()),
        serde_json::json!({ "path": path }),
    ))
}

pub async fn edit(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let path = call
        .args
        .get("path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Edit requires 'path'".into()))?;
    let old_string = call
        .args
        .get("old_string")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Edit requires 'old_string'".into()))?;
    let new_string = call
        .args
        .get("new_string")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Edit requires 'new_string'".into()))?;
    let start_line = call
        .args
        .get("start_line")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize);

    let resolved = sandbox::resolve(&ctx.root, path)?;
    if ctx.write_policy == sandbox::WritePolicy::Strict && !sandbox::may_write(&ctx.root, &ctx.work_globs, &resolved)
    {
        return Err(ToolError::Sandbox(crate::sandbox::SandboxError::WriteScope(path.to_string())));
    }

    let result = sandbox::edit(&resolved, old_string, new_string, start_line)?;
    record_touch(ctx, path).await;

    Ok(ToolResult::ok(
        call,
        format!("edited {path}"),
        serde_json::json!({ "path": path, "diff": result.diff }),
    ))
}

async fn record_touch(ctx: &ToolContext, path: &str) {
    if let Some(manager) = ctx.manager.upgrade() {
        manager
            .record_working_place(&ctx.project_root, path, &ctx.agent_id, Some(&ctx.run_id))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Mutex, Weak};
    use tokio_util::sync::CancellationToken;

    fn ctx(root: std::path::PathBuf, globs: Vec<String>, policy: sandbox::WritePolicy) -> ToolContext {
        ToolContext {
            root,
            agent_id: "a".into(),
            run_id: "r".into(),
            project_root: "p".into(),
            session_id: "s".into(),
            work_globs: globs,
            write_policy: policy,
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
    async fn write_creates_file_in_scope() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf(), vec!["src/**".into()], sandbox::WritePolicy::Strict);
        let call = ToolCall {
            id: "1".into(),
            name: "Write".into(),
            args: serde_json::json!({ "path": "src/lib.rs", "content": "fn main() {}" }),
        };
        let result = write(&ctx, &call).await.unwrap();
        assert!(result.ok);
        assert_eq!(std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(), "fn main() {}");
    }

    #[tokio::test]
    async fn write_out_of_scope_strict_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf(), vec!["src/**".into()], sandbox::WritePolicy::Strict);
        let call = ToolCall {
            id: "1".into(),
            name: "Write".into(),
            args: serde_json::json!({ "path": "docs/readme.md", "content": "hi" }),
        };
        assert!(write(&ctx, &call).await.is_err());
    }

    #[tokio::test]
    async fn edit_applies_unique_replacement() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "hello world").unwrap();
        let ctx = ctx(dir.path().to_path_buf(), vec!["src/**".into()], sandbox::WritePolicy::Strict);
        let call = ToolCall {
            id: "1".into(),
            name: "Edit".into(),
            args: serde_json::json!({ "path": "src/lib.rs", "old_string": "hello", "new_string": "goodbye" }),
        };
        let result = edit(&ctx, &call).await.unwrap();
        assert!(result.ok);
        assert_eq!(std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(), "goodbye world");
    }
}
