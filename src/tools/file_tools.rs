//! Read tool: returns file contents, line-numbered, with a size cap so a model can't
//! pull a multi-hundred-megabyte binary into the transcript.

use super::{ToolCall, ToolContext, ToolError, ToolResult};
use crate::sandbox;

const MAX_READ_BYTES: usize = 512 * 1024;

pub async fn read(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let path = call
        .args
        .get("path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("Read requires 'path'".into()))?;

    let resolved = sandbox::resolve(&ctx.root, path)?;
    let bytes = sandbox::read(&resolved)?;
    if bytes.len() > MAX_READ_BYTES {
        return Err(ToolError::InvalidArgs(format!(
            "{path} is {} bytes, exceeds the {MAX_READ_BYTES}-byte read cap",
            bytes.len()
        )));
    }

    let text = String::from_utf8_lossy(&bytes);
    let numbered: String = text
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{:>6}\t{line}\n", i + 1))
        .collect();

    ctx.read_paths.lock().unwrap().insert(resolved.clone());

    Ok(ToolResult::ok(
        call,
        format!("read {} ({} bytes)", path, bytes.len()),
        serde_json::json!({ "path": path, "content": numbered }),
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
    async fn read_numbers_lines_and_records_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let call = ToolCall {
            id: "1".into(),
            name: "Read".into(),
            args: serde_json::json!({ "path": "a.txt" }),
        };
        let result = read(&ctx, &call).await.unwrap();
        assert!(result.ok);
        let content = result.detail["content"].as_str().unwrap();
        assert!(content.contains("1\tone"));
        assert!(content.contains("2\ttwo"));
        assert_eq!(ctx.read_paths.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn read_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let call = ToolCall {
            id: "1".into(),
            name: "Read".into(),
            args: serde_json::json!({ "path": "missing.txt" }),
        };
        assert!(read(&ctx, &call).await.is_err());
    }
}
