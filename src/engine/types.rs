//! Core types shared across the Agent Engine (spec §3, §4.4): the engine struct
//! itself, its configuration, plan types, and the context-record/importance scheme
//! the Context Manager compacts against.

use crate::config::AgentPolicy;
use crate::manager::AgentManager;
use crate::router::ModelRouter;
use crate::sandbox::WritePolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_iters: usize,
    pub max_delegation_depth: usize,
    pub write_safety_mode: WritePolicy,
    pub token_budget: usize,
    pub loop_breaker_threshold: usize,
    pub loop_detected_threshold: usize,
    pub prompt_loop_breaker: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iters: 40,
            max_delegation_depth: 2,
            write_safety_mode: WritePolicy::Warn,
            token_budget: 64_000,
            loop_breaker_threshold: 4,
            loop_detected_threshold: 6,
            prompt_loop_breaker: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentRole {
    Primary,
    Delegate,
}

/// Packet a finished run hands back to its parent (root runs hand it to the
/// Manager's run record; delegated runs hand it to the `Task` tool call that
/// spawned them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPacket {
    pub success: bool,
    pub output: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Planned,
    Approved,
    Executing,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub title: String,
    #[serde(default)]
    pub status: PlanItemStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub status: PlanStatus,
    pub items: Vec<PlanItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageImportance {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct ContextRecord {
    pub role: String,
    pub content: String,
    pub importance: MessageImportance,
    pub estimated_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextType {
    System,
    Task,
    Transcript,
    ToolResult,
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    BuildingPrompt,
    StreamingModel,
    ExecutingTool,
    WaitingUser,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    Success(String),
    Failed(String),
    Cancelled,
    LoopDetected,
    Budget,
}

#[derive(Debug, Clone)]
pub struct ThinkingEvent {
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum ReplEvent {
    Token { text: String, thinking: bool },
    ToolActivity { tool: String, detail: String },
}

/// One running agent turn. Owns its own cancellation token, the model chain it's
/// allowed to use, and a handle back to the Manager for delegation/AskUser/plan/
/// event publication. Constructed fresh per run; never reused across runs.
pub struct AgentEngine {
    pub run_id: String,
    pub agent_id: String,
    pub project_root: PathBuf,
    pub session_id: String,
    pub role: AgentRole,
    pub depth: usize,
    pub config: EngineConfig,
    pub policy: AgentPolicy,
    pub work_globs: Vec<String>,
    pub allowed_tools: Option<HashSet<String>>,
    pub model_chain: Vec<String>,
    pub system_prompt: String,
    pub router: Arc<ModelRouter>,
    pub manager: Weak<AgentManager>,
    pub cancel: CancellationToken,
}

impl AgentEngine {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
