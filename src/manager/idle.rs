//! Idle scheduler (spec §4.5 "Drive the idle scheduler..."): one timer per
//! (project, agent). When the timer fires and the agent is still idle and the
//! project has an active mission, it starts a new run from the agent's
//! `idle_prompt`. Stops when the mission is cleared or the agent stops being idle.

use super::AgentManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct IdleScheduler {
    timers: Mutex<HashMap<(String, String), JoinHandle<()>>>,
}

impl IdleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)starts the idle timer for `(project_root, agent_id)`. Replacing an
    /// existing timer aborts the old one first, so re-arming on every non-idle
    /// transition is safe and idempotent.
    pub fn arm(
        &self,
        manager: Weak<AgentManager>,
        project_root: String,
        agent_id: String,
        idle_prompt: String,
        interval_secs: u64,
    ) {
        let key = (project_root.clone(), agent_id.clone());
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval_secs)).await;
                let Some(manager) = manager.upgrade() else { break };
                if !manager.has_active_mission(&project_root).await {
                    break;
                }
                if manager.is_agent_busy(&project_root, &agent_id).await {
                    continue;
                }
                let _ = manager
                    .start_run(&project_root, None, &agent_id, idle_prompt.clone())
                    .await;
            }
        });
        let mut timers = self.timers.lock().unwrap();
        if let Some(old) = timers.insert(key, handle) {
            old.abort();
        }
    }

    pub fn disarm(&self, project_root: &str, agent_id: &str) {
        let mut timers = self.timers.lock().unwrap();
        if let Some(handle) = timers.remove(&(project_root.to_string(), agent_id.to_string())) {
            handle.abort();
        }
    }

    pub fn disarm_project(&self, project_root: &str) {
        let mut timers = self.timers.lock().unwrap();
        let keys: Vec<_> = timers.keys().filter(|(p, _)| p == project_root).cloned().collect();
        for key in keys {
            if let Some(handle) = timers.remove(&key) {
                handle.abort();
            }
        }
    }
}

impl Drop for IdleScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.timers.lock().unwrap().drain() {
            handle.abort();
        }
    }
}

pub type SharedIdleScheduler = Arc<IdleScheduler>;
