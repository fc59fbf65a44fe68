//! Tool Subsystem (spec §4.3): a closed set of tools, each with a typed argument
//! schema, a validation step, an execution step that goes through the Sandbox, and a
//! result re-serialized back into the prompt transcript.

pub mod ask_user;
pub mod delegation;
pub mod exec_tools;
pub mod file_tools;
pub mod plan_tool;
pub mod search_tools;
pub mod skill_tool;
pub mod web_tools;
pub mod write_tools;

use crate::config::{AgentPolicy, AgentPolicyCapability};
use crate::manager::AgentManager;
use crate::sandbox::{SandboxError, WritePolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("tool '{0}' is not in this agent's allowlist")]
    PolicyDenied(String),
    #[error("delegation depth exceeded (max {0})")]
    DepthExceeded(usize),
    #[error("child run failed: {0}")]
    ChildFailed(String),
    #[error("unknown tool: {0}")]
    NotFound(String),
    #[error("skill error: {0}")]
    SkillError(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("missing credential: {0}")]
    CredentialMissing(String),
    #[error("cancelled")]
    Cancelled,
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

/// A single structured tool invocation parsed out of a model's `tool` action.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The outcome of executing a `ToolCall`, carrying both a short summary (for the
/// `Activity`/`ContentBlockUpdate` events) and the full structured payload the
/// renderer turns into a transcript message.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub ok: bool,
    pub summary: String,
    pub detail: serde_json::Value,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, summary: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            ok: true,
            summary: summary.into(),
            detail,
        }
    }

    pub fn err(call: &ToolCall, err: &ToolError) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            ok: false,
            summary: err.to_string(),
            detail: serde_json::json!({ "error": err.to_string() }),
        }
    }
}

/// Maps a tool name to the policy capability its use implies, if any. Tools not
/// listed here (Read, Glob, Grep, Bash, WebFetch, WebSearch, Skill, AskUser, Plan)
/// are gated only by the per-agent tool allowlist.
fn required_capability(tool: &str) -> Option<AgentPolicyCapability> {
    match tool {
        "Write" | "Edit" => Some(AgentPolicyCapability::Patch),
        "FinalizeTask" => Some(AgentPolicyCapability::Finalize),
        "Task" => Some(AgentPolicyCapability::Delegate),
        _ => None,
    }
}

/// Per-run tool execution context: everything a tool needs to reach into the
/// Sandbox, check policy, or reach the Manager for delegation/AskUser, without
/// holding a strong reference back to the Manager (which owns the run that owns
/// this context, in turn).
pub struct ToolContext {
    pub root: PathBuf,
    pub agent_id: String,
    pub run_id: String,
    pub project_root: String,
    pub session_id: String,
    pub work_globs: Vec<String>,
    pub write_policy: WritePolicy,
    pub allowed_tools: Option<HashSet<String>>,
    pub policy: AgentPolicy,
    pub depth: usize,
    pub max_depth: usize,
    pub manager: Weak<AgentManager>,
    pub cancel: CancellationToken,
    pub read_paths: std::sync::Mutex<HashSet<PathBuf>>,
}

impl ToolContext {
    fn is_allowed(&self, tool: &str) -> bool {
        match &self.allowed_tools {
            None => true,
            Some(set) => set.contains(tool),
        }
    }

    fn check_policy(&self, tool: &str) -> Result<(), ToolError> {
        if !self.is_allowed(tool) {
            return Err(ToolError::PolicyDenied(tool.to_string()));
        }
        if let Some(cap) = required_capability(tool) {
            if !self.policy.allows(cap) {
                return Err(ToolError::PolicyDenied(tool.to_string()));
            }
        }
        Ok(())
    }

    fn manager(&self) -> Result<Arc<AgentManager>, ToolError> {
        self.manager
            .upgrade()
            .ok_or_else(|| ToolError::ChildFailed("manager shut down".into()))
    }
}

/// Dispatches a parsed tool call against the given context, enforcing per-agent
/// policy gating before execution (spec §4.3 "Per-agent policy gating").
pub async fn dispatch(ctx: &ToolContext, call: ToolCall) -> ToolResult {
    if ctx.cancel.is_cancelled() {
        return ToolResult::err(&call, &ToolError::Cancelled);
    }
    if let Err(e) = ctx.check_policy(&call.name) {
        return ToolResult::err(&call, &e);
    }

    let outcome = match call.name.as_str() {
        "Read" => file_tools::read(ctx, &call).await,
        "Write" => write_tools::write(ctx, &call).await,
        "Edit" => write_tools::edit(ctx, &call).await,
        "Bash" => exec_tools::bash(ctx, &call).await,
        "Glob" => search_tools::glob(ctx, &call).await,
        "Grep" => search_tools::grep(ctx, &call).await,
        "WebFetch" => web_tools::fetch(ctx, &call).await,
        "WebSearch" => web_tools::search(ctx, &call).await,
        "Skill" => skill_tool::invoke(ctx, &call).await,
        "AskUser" => ask_user::ask(ctx, &call).await,
        "Task" => delegation::delegate(ctx, &call).await,
        "Plan" => plan_tool::plan(ctx, &call).await,
        "FinalizeTask" => finalize(ctx, &call),
        other => Err(ToolError::NotFound(other.to_string())),
    };

    match outcome {
        Ok(result) => result,
        Err(e) => ToolResult::err(&call, &e),
    }
}

/// `FinalizeTask` has no sandbox interaction — it just validates the packet shape
/// and hands it back for the Engine to mark the run successful.
fn finalize(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let _ = ctx;
    let output = call
        .args
        .get("output")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("FinalizeTask requires 'output'".into()))?;
    Ok(ToolResult::ok(
        call,
        "task finalized",
        serde_json::json!({ "output": output }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with(caps: &[AgentPolicyCapability]) -> AgentPolicy {
        AgentPolicy {
            flags: caps.iter().copied().collect(),
        }
    }

    fn ctx_with(allowed: Option<&[&str]>, policy: AgentPolicy) -> ToolContext {
        ToolContext {
            root: PathBuf::from("/tmp"),
            agent_id: "a1".into(),
            run_id: "r1".into(),
            project_root: "/tmp".into(),
            session_id: "s1".into(),
            work_globs: vec![],
            write_policy: WritePolicy::Strict,
            allowed_tools: allowed.map(|s| s.iter().map(|t| t.to_string()).collect()),
            policy,
            depth: 0,
            max_depth: 2,
            manager: Weak::new(),
            cancel: CancellationToken::new(),
            read_paths: std::sync::Mutex::new(HashSet::new()),
        }
    }

    #[test]
    fn tool_not_in_allowlist_is_denied() {
        let ctx = ctx_with(Some(&["Read"]), AgentPolicy::default());
        assert!(matches!(ctx.check_policy("Write"), Err(ToolError::PolicyDenied(_))));
        assert!(ctx.check_policy("Read").is_ok());
    }

    #[test]
    fn write_requires_patch_capability() {
        let ctx = ctx_with(None, AgentPolicy::default());
        assert!(matches!(ctx.check_policy("Write"), Err(ToolError::PolicyDenied(_))));
        let ctx = ctx_with(None, policy_with(&[AgentPolicyCapability::Patch]));
        assert!(ctx.check_policy("Write").is_ok());
    }

    #[test]
    fn task_requires_delegate_capability() {
        let ctx = ctx_with(None, AgentPolicy::default());
        assert!(matches!(ctx.check_policy("Task"), Err(ToolError::PolicyDenied(_))));
        let ctx = ctx_with(None, policy_with(&[AgentPolicyCapability::Delegate]));
        assert!(ctx.check_policy("Task").is_ok());
    }

    #[tokio::test]
    async fn unknown_tool_name_returns_not_found_result() {
        let ctx = ctx_with(None, AgentPolicy::default());
        let call = ToolCall {
            id: "1".into(),
            name: "Nonexistent".into(),
            args: serde_json::json!({}),
        };
        let result = dispatch(&ctx, call).await;
        assert!(!result.ok);
        assert!(result.summary.contains("unknown tool"));
    }

    #[tokio::test]
    async fn finalize_task_requires_output_field() {
        let ctx = ctx_with(None, policy_with(&[AgentPolicyCapability::Finalize]));
        let call = ToolCall {
            id: "1".into(),
            name: "FinalizeTask".into(),
            args: serde_json::json!({}),
        };
        let result = dispatch(&ctx, call).await;
        assert!(!result.ok);
    }
}
