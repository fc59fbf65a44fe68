//! Workspace snapshot (spec §6.2): `<project>/.ridgeline/state/workspace.json`, the
//! current agent-tree and active task. Refreshed on every run-lifecycle change and by
//! the workspace watcher (spec §4.5 supplement, §9 "sync_world_state").

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub busy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub agents: Vec<AgentSnapshot>,
    pub active_mission: Option<String>,
    pub updated_at_ms: u64,
}

pub struct WorkspaceSnapshotStore {
    path: PathBuf,
}

impl WorkspaceSnapshotStore {
    pub fn new(project_root: &std::path::Path) -> Self {
        Self { path: project_root.join(".ridgeline").join("state").join("workspace.json") }
    }

    pub fn write(&self, snapshot: &WorkspaceSnapshot) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(snapshot)?)?;
        Ok(())
    }

    pub fn read(&self) -> anyhow::Result<Option<WorkspaceSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&std::fs::read_to_string(&self.path)?)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceSnapshotStore::new(dir.path());
        assert!(store.read().unwrap().is_none());

        let snapshot = WorkspaceSnapshot {
            agents: vec![AgentSnapshot { agent_id: "lead".into(), busy: true }],
            active_mission: Some("ship it".into()),
            updated_at_ms: 42,
        };
        store.write(&snapshot).unwrap();
        let read_back = store.read().unwrap().unwrap();
        assert_eq!(read_back.agents.len(), 1);
        assert_eq!(read_back.active_mission.as_deref(), Some("ship it"));
    }
}
