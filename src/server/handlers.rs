//! Endpoint handlers for spec §6.1's HTTP API: chat/settings, file/tree, and
//! projects/events, built against this crate's `state_fs`/`AgentManager`
//! in-memory+on-disk split rather than a database-backed one.

use super::ServerState;
use crate::manager::events::{Event, EventBody};
use crate::state_fs::sessions::ChatMessage;
use crate::state_fs::{RunStore, SessionStore};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": msg.into() })))
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(crate) struct ProjectPathRequest {
    path: String,
}

pub(crate) async fn list_projects(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.registry.list() {
        Ok(projects) => Json(projects).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub(crate) async fn add_project(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<ProjectPathRequest>,
) -> impl IntoResponse {
    match state.registry.add(req.path, now_ms()) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub(crate) async fn remove_project(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<ProjectPathRequest>,
) -> impl IntoResponse {
    match state.registry.remove(&req.path) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(crate) struct ProjectRootQuery {
    project_root: String,
}

#[derive(Serialize)]
struct SessionListItem {
    id: String,
    repo_path: String,
    title: String,
    created_at: u64,
}

pub(crate) async fn list_sessions(
    State(_state): State<Arc<ServerState>>,
    Query(q): Query<ProjectRootQuery>,
) -> impl IntoResponse {
    let store = SessionStore::new(Path::new(&q.project_root));
    match store.list() {
        Ok(sessions) => {
            let items: Vec<SessionListItem> = sessions
                .into_iter()
                .map(|s| SessionListItem { id: s.id, repo_path: q.project_root.clone(), title: s.title, created_at: s.created_at })
                .collect();
            Json(items).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
pub(crate) struct CreateSessionRequest {
    project_root: String,
    title: String,
}

#[derive(Serialize)]
struct CreateSessionResponse {
    id: String,
}

pub(crate) async fn create_session(
    State(_state): State<Arc<ServerState>>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let store = SessionStore::new(Path::new(&req.project_root));
    match store.create(&req.title, now_ms()) {
        Ok(meta) => Json(CreateSessionResponse { id: meta.id }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Chat / runs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(crate) struct ChatRequest {
    project_root: String,
    agent_id: String,
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

pub(crate) async fn chat(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let session_id = req.session_id.clone().unwrap_or_else(|| "default".to_string());
    let user_msg = ChatMessage {
        agent_id: req.agent_id.clone(),
        from_id: "user".into(),
        to_id: req.agent_id.clone(),
        content: req.message.clone(),
        timestamp: now_ms(),
    };
    let store = SessionStore::new(Path::new(&req.project_root));
    if let Err(e) = store.append_message(&session_id, &user_msg) {
        return bad_request(format!("failed to persist chat message: {e}")).into_response();
    }

    match state
        .manager
        .start_run(&req.project_root, Some(&session_id), &req.agent_id, req.message)
        .await
    {
        Ok(_run_id) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => bad_request(e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
pub(crate) struct ClearChatRequest {
    project_root: String,
    #[serde(default)]
    session_id: Option<String>,
}

pub(crate) async fn clear_chat(
    State(_state): State<Arc<ServerState>>,
    Json(req): Json<ClearChatRequest>,
) -> impl IntoResponse {
    let session_id = req.session_id.unwrap_or_else(|| "default".to_string());
    let store = SessionStore::new(Path::new(&req.project_root));
    match store.clear(&session_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
pub(crate) struct RunRequest {
    project_root: String,
    agent_id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct RunResponse {
    run_id: String,
}

pub(crate) async fn run_agent(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<RunRequest>,
) -> impl IntoResponse {
    match state
        .manager
        .start_run(&req.project_root, req.session_id.as_deref(), &req.agent_id, req.message)
        .await
    {
        Ok(run_id) => Json(RunResponse { run_id }).into_response(),
        Err(e) => bad_request(e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
pub(crate) struct CancelRunRequest {
    run_id: String,
}

pub(crate) async fn cancel_run(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<CancelRunRequest>,
) -> impl IntoResponse {
    state.manager.cancel_run(&req.run_id).await;
    StatusCode::NO_CONTENT
}

// ---------------------------------------------------------------------------
// Agent context / children
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(crate) struct AgentContextQuery {
    run_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    view: Option<String>,
}

#[derive(Serialize)]
struct AgentContextResponse {
    run: Option<crate::manager::run_record::RunRecord>,
    summary: Option<String>,
    messages: Vec<Event>,
}

pub(crate) async fn agent_context(
    State(state): State<Arc<ServerState>>,
    Query(q): Query<AgentContextQuery>,
) -> impl IntoResponse {
    let run = state.manager.get_run(&q.run_id);
    let Some(run) = run else {
        return (StatusCode::NOT_FOUND, "unknown run_id").into_response();
    };
    let store = RunStore::new(Path::new(&run.project_root));
    let messages = store.load_timeline(&q.run_id).unwrap_or_default();
    let summary = run.packet.as_ref().map(|p| p.summary.clone());
    Json(AgentContextResponse { run: Some(run), summary, messages }).into_response()
}

#[derive(Deserialize)]
pub(crate) struct AgentChildrenQuery {
    run_id: String,
}

pub(crate) async fn agent_children(
    State(state): State<Arc<ServerState>>,
    Query(q): Query<AgentChildrenQuery>,
) -> impl IntoResponse {
    let Some(parent) = state.manager.get_run(&q.run_id) else {
        return (StatusCode::NOT_FOUND, "unknown run_id").into_response();
    };
    let store = RunStore::new(Path::new(&parent.project_root));
    match store.list_children(&q.run_id) {
        Ok(children) => Json(children).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ---------------------------------------------------------------------------
// AskUser
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(crate) struct AskUserAnswer {
    #[allow(dead_code)]
    question_index: usize,
    selected: Option<serde_json::Value>,
    custom_text: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct AskUserRespondRequest {
    question_id: String,
    answers: Vec<AskUserAnswer>,
}

pub(crate) async fn ask_user_respond(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<AskUserRespondRequest>,
) -> impl IntoResponse {
    let values: Vec<serde_json::Value> = req
        .answers
        .into_iter()
        .map(|a| {
            a.selected
                .or_else(|| a.custom_text.map(serde_json::Value::String))
                .unwrap_or(serde_json::Value::Null)
        })
        .collect();
    state.manager.answer(&req.question_id, values).await;
    StatusCode::NO_CONTENT
}

// ---------------------------------------------------------------------------
// Events (SSE)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(crate) struct EventsQuery {
    project_root: String,
    #[serde(default = "default_session")]
    session_id: String,
    #[serde(default)]
    from_sequence: Option<u64>,
}

fn default_session() -> String {
    "default".to_string()
}

pub(crate) async fn events(
    State(state): State<Arc<ServerState>>,
    Query(q): Query<EventsQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let (backlog, rx) = state.manager.subscribe(&q.project_root, &q.session_id, q.from_sequence).await;

    let backlog_stream = tokio_stream::iter(backlog.into_iter().map(|e| {
        Ok(SseEvent::default().data(serde_json::to_string(&e).unwrap_or_default()))
    }));
    let resync_agent_id = q.session_id.clone();
    let live_stream = BroadcastStream::new(rx).map(move |msg| {
        let event = match msg {
            Ok(event) => event,
            // The subscriber fell behind the replay buffer; tell it to resync rather
            // than silently resuming on a gapped sequence.
            Err(_) => Event {
                run_id: String::new(),
                agent_id: resync_agent_id.clone(),
                sequence: 0,
                monotonic_timestamp_ms: now_ms(),
                body: EventBody::Run { phase: "resync".to_string(), detail: serde_json::Value::Null },
            },
        };
        Ok(SseEvent::default().data(serde_json::to_string(&event).unwrap_or_default()))
    });

    Sse::new(backlog_stream.chain(live_stream)).keep_alive(KeepAlive::default())
}

// ---------------------------------------------------------------------------
// Workspace tree / file read
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TreeNode {
    Dir { path: String, children: Vec<TreeNode> },
    File { path: String, agent: String, status: String },
}

pub(crate) async fn workspace_tree(
    State(state): State<Arc<ServerState>>,
    Query(q): Query<ProjectRootQuery>,
) -> impl IntoResponse {
    let entries = state.manager.workspace_tree(&q.project_root);
    let mut root: Vec<TreeNode> = Vec::new();
    for entry in entries {
        let segments: Vec<&str> = entry.file_path.split('/').filter(|s| !s.is_empty()).collect();
        insert_path(&mut root, &segments, &entry.agent_id);
    }
    Json(root).into_response()
}

fn insert_path(level: &mut Vec<TreeNode>, segments: &[&str], agent_id: &str) {
    let Some((head, rest)) = segments.split_first() else { return };
    if rest.is_empty() {
        level.push(TreeNode::File { path: head.to_string(), agent: agent_id.to_string(), status: "touched".into() });
        return;
    }
    for node in level.iter_mut() {
        if let TreeNode::Dir { path, children } = node {
            if path == head {
                insert_path(children, rest, agent_id);
                return;
            }
        }
    }
    let mut children = Vec::new();
    insert_path(&mut children, rest, agent_id);
    level.push(TreeNode::Dir { path: head.to_string(), children });
}

#[derive(Deserialize)]
pub(crate) struct ReadFileQuery {
    project_root: String,
    path: String,
}

#[derive(Serialize)]
struct ReadFileResponse {
    content: String,
}

pub(crate) async fn read_file(Query(q): Query<ReadFileQuery>) -> impl IntoResponse {
    let root = PathBuf::from(&q.project_root);
    match crate::sandbox::resolve(&root, &q.path) {
        Ok(resolved) => match std::fs::read_to_string(&resolved) {
            Ok(content) => Json(ReadFileResponse { content }).into_response(),
            Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        },
        Err(e) => bad_request(e.to_string()).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

pub(crate) async fn get_config(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let config = state.config.lock().unwrap().clone();
    let mut value = serde_json::to_value(config).unwrap_or_default();
    if let serde_json::Value::Object(ref mut map) = value {
        map.insert("dev".to_string(), serde_json::Value::Bool(state.dev_mode));
    }
    Json(value)
}

pub(crate) async fn update_config(
    State(state): State<Arc<ServerState>>,
    Json(new_config): Json<crate::config::Config>,
) -> impl IntoResponse {
    let path = state.config_path.lock().unwrap().clone();
    if let Some(path) = path {
        let toml = match toml::to_string_pretty(&new_config) {
            Ok(t) => t,
            Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        };
        if let Err(e) = std::fs::write(&path, toml) {
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    }
    *state.config.lock().unwrap() = new_config;
    StatusCode::NO_CONTENT.into_response()
}

// ---------------------------------------------------------------------------
// Model health
// ---------------------------------------------------------------------------

pub(crate) async fn models_health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let records = state.manager.router().health.snapshot().await;
    let out: Vec<serde_json::Value> = records
        .into_iter()
        .map(|(id, rec)| {
            serde_json::json!({
                "id": id,
                "health": rec.status,
                "last_error": rec.last_error,
                "since_secs": rec.since_secs,
            })
        })
        .collect();
    Json(out)
}
