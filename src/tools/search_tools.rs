//! Glob and Grep tools (spec §4.3): read-only traversal, both scoped to the project
//! root and respecting `.gitignore`.

use super::{ToolCall, ToolContext, ToolError, ToolResult};
use crate::sandbox;

pub async fn glob(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let pattern = call
        .args
        .get("pattern")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Glob requires 'pattern'".into()))?;

    let matches = sandbox::glob(&ctx.root, pattern)?;
    Ok(ToolResult::ok(
        call,
        format!("{} match(es) for {pattern}", matches.len()),
        serde_json::json!({ "matches": matches }),
    ))
}

pub async fn grep(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let pattern = call
        .args
        .get("pattern")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Grep requires 'pattern'".into()))?;
    let path = call.args.get("path").and_then(|v| v.as_str());
    let case_sensitive = call.args.get("case").and_then(|v| v.as_bool()).unwrap_or(true);

    let scope = match path {
        Some(p) => Some(sandbox::resolve(&ctx.root, p)?),
        None => None,
    };
    let scope_rel = scope.as_ref().map(|p| p.strip_prefix(&ctx.root).unwrap_or(p));

    let hits = sandbox::grep(&ctx.root, pattern, scope_rel, case_sensitive)?;
    let rendered: Vec<serde_json::Value> = hits
        .iter()
        .map(|h| serde_json::json!({ "path": h.path, "line": h.line, "preview": h.preview }))
        .collect();

    Ok(ToolResult::ok(
        call,
        format!("{} hit(s) for {pattern}", hits.len()),
        serde_json::json!({ "hits": rendered }),
    ))
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
    async fn glob_finds_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let call = ToolCall {
            id: "1".into(),
            name: "Glob".into(),
            args: serde_json::json!({ "pattern": "src/**/*.rs" }),
        };
        let result = glob(&ctx, &call).await.unwrap();
        let matches = result.detail["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn grep_finds_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "needle here\nnothing\n").unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let call = ToolCall {
            id: "1".into(),
            name: "Grep".into(),
            args: serde_json::json!({ "pattern": "needle" }),
        };
        let result = grep(&ctx, &call).await.unwrap();
        let hits = result.detail["hits"].as_array().unwrap();
        assert_eq!(hits.len(), 1);
    }
}
