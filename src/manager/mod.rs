//! Agent Manager (spec §4.5): owns global runtime state and exposes the public API
//! — run lifecycle, the event bus, delegation, AskUser routing, and the idle
//! scheduler.

pub mod events;
pub mod idle;
pub mod run_record;
pub mod watcher;

use crate::config::{AgentSpec, Config};
use crate::engine::types::{AgentEngine, AgentRole, EngineConfig, Plan, TaskPacket};
use crate::router::ModelRouter;
use crate::skills::{Skill, SkillRegistry};
use crate::state_fs::workspace_snapshot::{AgentSnapshot, WorkspaceSnapshot};
use crate::state_fs::{MissionStore, RunStore, WorkspaceSnapshotStore};
use anyhow::{Context, Result};
use events::{EventBody, EventBus};
use idle::IdleScheduler;
use run_record::{RunRecord, RunStatus};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A recorded write touch, surfaced via `GET /api/workspace/tree` (spec §3
/// supplement "Working Place Entry").
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkingPlaceEntry {
    pub repo_path: String,
    pub file_path: String,
    pub agent_id: String,
    pub run_id: Option<String>,
    pub last_modified_ms: u64,
}

struct ProjectContext {
    skills: SkillRegistry,
    mission: Option<String>,
    working_places: Vec<WorkingPlaceEntry>,
    busy_agents: std::collections::HashSet<String>,
    watcher: Option<notify::RecommendedWatcher>,
}

impl ProjectContext {
    fn new(skills: SkillRegistry, mission: Option<String>) -> Self {
        Self {
            skills,
            mission,
            working_places: Vec::new(),
            busy_agents: std::collections::HashSet::new(),
            watcher: None,
        }
    }
}

struct RunEntry {
    record: RunRecord,
    cancel: CancellationToken,
}

pub struct AgentManager {
    config: Config,
    router: Arc<ModelRouter>,
    events: Arc<EventBus>,
    idle: IdleScheduler,
    runs: Mutex<HashMap<String, RunEntry>>,
    children: Mutex<HashMap<String, Vec<String>>>,
    pending_ask_user: Mutex<HashMap<String, oneshot::Sender<Vec<serde_json::Value>>>>,
    plans: Mutex<HashMap<String, Plan>>,
    projects: Mutex<HashMap<String, ProjectContext>>,
    global_skills_dir: Option<PathBuf>,
    start_ms: std::time::Instant,
}

impl AgentManager {
    pub fn new(config: Config, router: Arc<ModelRouter>, global_skills_dir: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            config,
            router,
            events: Arc::new(EventBus::new()),
            idle: IdleScheduler::new(),
            runs: Mutex::new(HashMap::new()),
            children: Mutex::new(HashMap::new()),
            pending_ask_user: Mutex::new(HashMap::new()),
            plans: Mutex::new(HashMap::new()),
            projects: Mutex::new(HashMap::new()),
            global_skills_dir,
            start_ms: std::time::Instant::now(),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    fn now_ms(&self) -> u64 {
        self.start_ms.elapsed().as_millis() as u64
    }

    fn project_context<'a>(&self, projects: &'a mut HashMap<String, ProjectContext>, project_root: &str) -> &'a mut ProjectContext {
        projects.entry(project_root.to_string()).or_insert_with(|| {
            let skills = SkillRegistry::load(Path::new(project_root), self.global_skills_dir.as_deref()).unwrap_or_default();
            let mission = MissionStore::new(Path::new(project_root))
                .load()
                .ok()
                .flatten()
                .filter(|m| m.active)
                .map(|m| m.text);
            ProjectContext::new(skills, mission)
        })
    }

    /// Starts the workspace watcher for `project_root` the first time a run touches
    /// it; idempotent.
    fn ensure_watcher(self: &Arc<Self>, project_root: &str) {
        let mut projects = self.projects.lock().unwrap();
        let ctx = self.project_context(&mut projects, project_root);
        if ctx.watcher.is_none() {
            ctx.watcher = watcher::spawn(Arc::downgrade(self), PathBuf::from(project_root));
        }
    }

    /// Rebuilds and writes `state/workspace.json` (spec §6.2) from current in-memory
    /// agent-busy state and the active mission.
    pub async fn refresh_workspace_snapshot(&self, project_root: &str) {
        let (mission, busy) = {
            let projects = self.projects.lock().unwrap();
            match projects.get(project_root) {
                Some(ctx) => (ctx.mission.clone(), ctx.busy_agents.clone()),
                None => (None, std::collections::HashSet::new()),
            }
        };
        let agents = self
            .config
            .agents
            .iter()
            .map(|a| AgentSnapshot { agent_id: a.id.clone(), busy: busy.contains(&a.id) })
            .collect();
        let snapshot = WorkspaceSnapshot { agents, active_mission: mission, updated_at_ms: self.now_ms() };
        if let Err(e) = WorkspaceSnapshotStore::new(Path::new(project_root)).write(&snapshot) {
            tracing::warn!(error = %e, "failed to write workspace snapshot");
        }
    }

    /// Publishes an event on the bus and appends it to the run's persisted timeline
    /// (spec §6.2 `timeline.jsonl`) in the same call, so every caller gets both for
    /// free instead of remembering to do both. A finalized `Message` additionally
    /// lands in the session's transcript (`messages.jsonl`), since that's the
    /// replayable chat history `GET /api/sessions`'s consumers read back.
    pub async fn publish_event(
        &self,
        project_root: &str,
        session_id: &str,
        run_id: &str,
        agent_id: &str,
        body: EventBody,
    ) -> events::Event {
        if let EventBody::Message { ref from, ref to, ref content } = body {
            let msg = crate::state_fs::sessions::ChatMessage {
                agent_id: agent_id.to_string(),
                from_id: from.clone(),
                to_id: to.clone(),
                content: content.clone(),
                timestamp: self.now_ms(),
            };
            if let Err(e) = crate::state_fs::SessionStore::new(Path::new(project_root)).append_message(session_id, &msg) {
                tracing::warn!(error = %e, "failed to append chat message to session transcript");
            }
        }
        let event = self.events.publish(project_root, session_id, run_id, agent_id, body).await;
        if let Err(e) = RunStore::new(Path::new(project_root)).append_event(run_id, &event) {
            tracing::warn!(error = %e, "failed to append timeline event");
        }
        event
    }

    fn resolve_agent_spec(&self, project_root: &str, agent_id: &str) -> Result<(AgentSpec, String)> {
        let spec_ref = self
            .config
            .agents
            .iter()
            .find(|a| a.id == agent_id)
            .with_context(|| format!("no agent configured with id '{agent_id}'"))?;
        let path = Path::new(project_root).join(&spec_ref.spec_path);
        AgentSpec::from_markdown(&path)
    }

    // -----------------------------------------------------------------
    // Public API (spec §4.5)
    // -----------------------------------------------------------------

    pub async fn start_run(
        self: &Arc<Self>,
        project_root: &str,
        session_id: Option<&str>,
        agent_id: &str,
        user_message: String,
    ) -> Result<String> {
        let session_id = session_id.unwrap_or("default").to_string();
        self.spawn_run(project_root, &session_id, agent_id, None, 0, user_message)
            .await
            .map(|(run_id, _rx)| run_id)
    }

    /// Cancelling a run cascades to all descendants (spec §4.5 invariant), so this
    /// recurses down the delegation tree; it returns a boxed future since async fns
    /// can't recurse directly without indirection.
    pub fn cancel_run<'a>(&'a self, run_id: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let cancel = {
                let runs = self.runs.lock().unwrap();
                runs.get(run_id).map(|e| e.cancel.clone())
            };
            let Some(cancel) = cancel else { return };
            cancel.cancel();

            let children: Vec<String> = {
                let children = self.children.lock().unwrap();
                children.get(run_id).cloned().unwrap_or_default()
            };
            for child in children {
                self.cancel_run(&child).await;
            }
        })
    }

    pub async fn answer(&self, question_id: &str, answers: Vec<serde_json::Value>) {
        let sender = self.pending_ask_user.lock().unwrap().remove(question_id);
        if let Some(sender) = sender {
            let _ = sender.send(answers);
        }
    }

    pub fn get_run(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.lock().unwrap().get(run_id).map(|e| e.record.clone())
    }

    pub fn list_runs(&self, project_root: &str, session_id: &str) -> Vec<RunRecord> {
        let runs = self.runs.lock().unwrap();
        let mut out: Vec<RunRecord> = runs
            .values()
            .map(|e| &e.record)
            .filter(|r| r.project_root == project_root && r.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at_ms);
        out
    }

    pub async fn subscribe(
        &self,
        project_root: &str,
        session_id: &str,
        from_sequence: Option<u64>,
    ) -> (Vec<events::Event>, tokio::sync::broadcast::Receiver<events::Event>) {
        self.events.subscribe(project_root, session_id, from_sequence).await
    }

    pub async fn set_mission(&self, project_root: &str, text: String) {
        if let Err(e) = MissionStore::new(Path::new(project_root)).set(&text, self.now_ms()) {
            tracing::warn!(error = %e, "failed to persist mission.json");
        }
        {
            let mut projects = self.projects.lock().unwrap();
            self.project_context(&mut projects, project_root).mission = Some(text);
        }
        self.refresh_workspace_snapshot(project_root).await;
    }

    pub async fn clear_mission(&self, project_root: &str) {
        if let Err(e) = MissionStore::new(Path::new(project_root)).clear() {
            tracing::warn!(error = %e, "failed to clear mission.json");
        }
        {
            let mut projects = self.projects.lock().unwrap();
            self.project_context(&mut projects, project_root).mission = None;
        }
        self.idle.disarm_project(project_root);
        self.refresh_workspace_snapshot(project_root).await;
    }

    pub async fn has_active_mission(&self, project_root: &str) -> bool {
        self.projects
            .lock()
            .unwrap()
            .get(project_root)
            .map(|p| p.mission.is_some())
            .unwrap_or(false)
    }

    pub async fn is_agent_busy(&self, project_root: &str, agent_id: &str) -> bool {
        self.projects
            .lock()
            .unwrap()
            .get(project_root)
            .map(|p| p.busy_agents.contains(agent_id))
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------
    // Called from the Tool Subsystem
    // -----------------------------------------------------------------

    pub async fn record_working_place(&self, project_root: &str, file_path: &str, agent_id: &str, run_id: Option<&str>) {
        let entry = WorkingPlaceEntry {
            repo_path: project_root.to_string(),
            file_path: file_path.to_string(),
            agent_id: agent_id.to_string(),
            run_id: run_id.map(str::to_string),
            last_modified_ms: self.now_ms(),
        };
        {
            let mut projects = self.projects.lock().unwrap();
            self.project_context(&mut projects, project_root).working_places.push(entry);
        }
        self.refresh_workspace_snapshot(project_root).await;
    }

    pub fn workspace_tree(&self, project_root: &str) -> Vec<WorkingPlaceEntry> {
        self.projects
            .lock()
            .unwrap()
            .get(project_root)
            .map(|p| p.working_places.clone())
            .unwrap_or_default()
    }

    pub async fn find_skill(&self, project_root: &str, name: &str) -> Option<Skill> {
        let mut projects = self.projects.lock().unwrap();
        self.project_context(&mut projects, project_root).skills.get(name).cloned()
    }

    pub async fn set_plan(&self, run_id: &str, plan: Plan) {
        self.plans.lock().unwrap().insert(run_id.to_string(), plan);
    }

    pub fn get_plan(&self, run_id: &str) -> Option<Plan> {
        self.plans.lock().unwrap().get(run_id).cloned()
    }

    /// AskUser bridge (spec §4.3): registers a pending promise keyed by
    /// `question_id`, publishes the `AskUser` event, and suspends until
    /// `answer()` is called from the HTTP layer.
    pub async fn ask_user(
        &self,
        project_root: &str,
        session_id: &str,
        run_id: &str,
        agent_id: &str,
        question_id: &str,
        payload: serde_json::Value,
    ) -> Result<Vec<serde_json::Value>> {
        let (tx, rx) = oneshot::channel();
        self.pending_ask_user.lock().unwrap().insert(question_id.to_string(), tx);

        if let Some(entry) = self.runs.lock().unwrap().get_mut(run_id) {
            entry.record.status = RunStatus::WaitingUser;
        }

        self.publish_event(project_root, session_id, run_id, agent_id, EventBody::AskUser {
            question_id: question_id.to_string(),
            payload,
        })
        .await;

        rx.await.context("ask_user sender dropped without an answer")
    }

    /// Plan-mode gate (spec §4.4 "Plan mode"): suspends until a `planned` plan is
    /// approved or rejected, posing the question through the same AskUser bridge
    /// rather than a dedicated channel — the HTTP layer's existing answer endpoint
    /// is reused, with a boolean `selected` answer standing in for approve/reject.
    pub async fn await_plan_approval(
        &self,
        project_root: &str,
        session_id: &str,
        run_id: &str,
        agent_id: &str,
        plan: &Plan,
    ) -> Result<bool> {
        let question_id = format!("plan-{run_id}");
        let payload = serde_json::json!({
            "kind": "plan_approval",
            "items": plan.items.iter().map(|i| i.title.clone()).collect::<Vec<_>>(),
        });
        let answers = self.ask_user(project_root, session_id, run_id, agent_id, &question_id, payload).await?;
        Ok(answers.first().and_then(|v| v.as_bool()).unwrap_or(false))
    }

    /// Task tool (spec §4.3/§4.5): spawns a child run and blocks until it finishes.
    pub async fn delegate(
        self: &Arc<Self>,
        project_root: &str,
        session_id: &str,
        parent_run_id: &str,
        _parent_agent_id: &str,
        target_agent_id: &str,
        task: &str,
        depth: usize,
    ) -> Result<TaskPacket> {
        let (child_run_id, rx) = self
            .spawn_run(project_root, session_id, target_agent_id, Some(parent_run_id.to_string()), depth, task.to_string())
            .await?;

        self.children
            .lock()
            .unwrap()
            .entry(parent_run_id.to_string())
            .or_default()
            .push(child_run_id.clone());

        self.publish_event(
            project_root,
            session_id,
            parent_run_id,
            _parent_agent_id,
            EventBody::Run {
                phase: "subagent_spawned".into(),
                detail: serde_json::json!({ "child_run_id": child_run_id, "target_agent_id": target_agent_id }),
            },
        )
        .await;

        let packet = rx.await.context("child run dropped its result channel")?;

        self.publish_event(
            project_root,
            session_id,
            parent_run_id,
            _parent_agent_id,
            EventBody::Run {
                phase: "subagent_result".into(),
                detail: serde_json::json!({ "child_run_id": child_run_id, "success": packet.success }),
            },
        )
        .await;

        Ok(packet)
    }

    // Returns a boxed future (rather than `async fn`) because this function's call
    // graph is indirectly recursive: the task it spawns runs the agent loop, which
    // may invoke the Task tool's delegate(), which calls back into spawn_run(). Rust
    // can't resolve the `Send` auto-trait for a directly/indirectly self-referential
    // `impl Future`, so it needs this same boxing indirection `cancel_run` uses below.
    fn spawn_run<'a>(
        self: &'a Arc<Self>,
        project_root: &'a str,
        session_id: &'a str,
        agent_id: &'a str,
        parent_run_id: Option<String>,
        depth: usize,
        message: String,
    ) -> Pin<Box<dyn Future<Output = Result<(String, oneshot::Receiver<TaskPacket>)>> + Send + 'a>> {
        Box::pin(async move {
        let (spec, system_prompt) = self.resolve_agent_spec(project_root, agent_id)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        let record = RunRecord::new(
            run_id.clone(),
            project_root.to_string(),
            session_id.to_string(),
            agent_id.to_string(),
            parent_run_id,
            depth,
            self.now_ms(),
        );
        self.ensure_watcher(project_root);
        if let Err(e) = RunStore::new(Path::new(project_root)).save_meta(&record) {
            tracing::warn!(error = %e, "failed to persist run meta.json");
        }
        self.runs.lock().unwrap().insert(run_id.clone(), RunEntry { record, cancel: cancel.clone() });

        {
            let mut projects = self.projects.lock().unwrap();
            self.project_context(&mut projects, project_root).busy_agents.insert(agent_id.to_string());
        }
        self.refresh_workspace_snapshot(project_root).await;

        let model_chain = spec
            .model
            .clone()
            .into_iter()
            .chain(self.config.routing.default_models.iter().cloned())
            .collect();

        let engine = AgentEngine {
            run_id: run_id.clone(),
            agent_id: agent_id.to_string(),
            project_root: PathBuf::from(project_root),
            session_id: session_id.to_string(),
            role: if depth == 0 { AgentRole::Primary } else { AgentRole::Delegate },
            depth,
            config: EngineConfig {
                max_iters: self.config.agent.max_iters,
                max_delegation_depth: self.config.agent.max_delegation_depth,
                write_safety_mode: write_policy_from(self.config.agent.write_safety_mode),
                prompt_loop_breaker: self.config.agent.prompt_loop_breaker.clone(),
                ..Default::default()
            },
            policy: spec.policy.clone(),
            work_globs: spec.work_globs.clone(),
            allowed_tools: if spec.tools.is_empty() { None } else { Some(spec.tools.iter().cloned().collect()) },
            model_chain,
            system_prompt,
            router: self.router.clone(),
            manager: Arc::downgrade(self),
            cancel,
        };

        if let (Some(idle_prompt), Some(interval)) = (spec.idle_prompt.clone(), spec.idle_interval_secs) {
            self.idle.arm(Arc::downgrade(self), project_root.to_string(), agent_id.to_string(), idle_prompt, interval);
        }

        let (tx, rx) = oneshot::channel();
        let manager = self.clone();
        let project_root_owned = project_root.to_string();
        let session_id_owned = session_id.to_string();
        let agent_id_owned = agent_id.to_string();
        let run_id_for_task = run_id.clone();
        tokio::spawn(async move {
            let packet = crate::engine::run_agent_loop(engine, message).await;
            let finished_record = {
                let mut runs = manager.runs.lock().unwrap();
                runs.get_mut(&run_id_for_task).map(|entry| {
                    entry.record.finish(packet.clone());
                    entry.record.clone()
                })
            };
            if let Some(record) = finished_record {
                if let Err(e) = RunStore::new(Path::new(&project_root_owned)).save_meta(&record) {
                    tracing::warn!(error = %e, "failed to persist finished run meta.json");
                }
            }
            manager
                .publish_event(
                    &project_root_owned,
                    &session_id_owned,
                    &run_id_for_task,
                    &agent_id_owned,
                    EventBody::Run {
                        phase: "outcome".into(),
                        detail: serde_json::json!({
                            "status": if packet.success { "succeeded" } else { "failed" },
                            "summary": packet.summary,
                        }),
                    },
                )
                .await;
            {
                let mut projects = manager.projects.lock().unwrap();
                if let Some(ctx) = projects.get_mut(&project_root_owned) {
                    ctx.busy_agents.remove(&agent_id_owned);
                }
            }
            manager.refresh_workspace_snapshot(&project_root_owned).await;
            let _ = tx.send(packet);
        });

        Ok((run_id, rx))
        })
    }
}

fn write_policy_from(mode: crate::config::WriteSafetyMode) -> crate::sandbox::WritePolicy {
    match mode {
        crate::config::WriteSafetyMode::Strict => crate::sandbox::WritePolicy::Strict,
        crate::config::WriteSafetyMode::Warn => crate::sandbox::WritePolicy::Warn,
        crate::config::WriteSafetyMode::Off => crate::sandbox::WritePolicy::Off,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn manager() -> Arc<AgentManager> {
        AgentManager::new(Config::default(), Arc::new(ModelRouter::new(vec![])), None)
    }

    #[tokio::test]
    async fn mission_lifecycle_tracks_active_state() {
        let mgr = manager();
        assert!(!mgr.has_active_mission("/tmp/proj").await);
        mgr.set_mission("/tmp/proj", "ship it".into()).await;
        assert!(mgr.has_active_mission("/tmp/proj").await);
        mgr.clear_mission("/tmp/proj").await;
        assert!(!mgr.has_active_mission("/tmp/proj").await);
    }

    #[tokio::test]
    async fn cancel_run_on_unknown_id_is_a_no_op() {
        let mgr = manager();
        mgr.cancel_run("does-not-exist").await;
    }

    #[tokio::test]
    async fn start_run_fails_fast_for_unknown_agent() {
        let mgr = manager();
        let result = mgr.start_run("/tmp/proj", None, "ghost-agent", "hi".into()).await;
        assert!(result.is_err());
    }
}
