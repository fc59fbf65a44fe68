//! Run Record (spec §3): the persisted summary of one run, independent of the
//! in-memory `AgentEngine` that drives it while it's active.

use crate::engine::types::TaskPacket;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    WaitingUser,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub project_root: String,
    pub session_id: String,
    pub agent_id: String,
    pub parent_run_id: Option<String>,
    pub depth: usize,
    pub status: RunStatus,
    pub packet: Option<TaskPacket>,
    pub created_at_ms: u64,
}

impl RunRecord {
    pub fn new(
        run_id: String,
        project_root: String,
        session_id: String,
        agent_id: String,
        parent_run_id: Option<String>,
        depth: usize,
        created_at_ms: u64,
    ) -> Self {
        Self {
            run_id,
            project_root,
            session_id,
            agent_id,
            parent_run_id,
            depth,
            status: RunStatus::Running,
            packet: None,
            created_at_ms,
        }
    }

    pub fn finish(&mut self, packet: TaskPacket) {
        self.status = if packet.success { RunStatus::Succeeded } else { RunStatus::Failed };
        self.packet = Some(packet);
    }
}
