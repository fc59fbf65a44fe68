//! HTTP API (spec §6.1): the Agent Manager's only external surface. Router assembly
//! and SSE pattern trimmed to the endpoint list spec.md §6.1 names — no marketplace/
//! eval/TUI-only routes, and no embedded static-asset serving (the web UI is an
//! external consumer of this API, not served by this crate).

pub mod handlers;
pub mod project_registry;

use crate::config::Config;
use crate::manager::AgentManager;
use axum::routing::{delete, get, post};
use axum::Router;
use project_registry::ProjectRegistry;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub manager: Arc<AgentManager>,
    pub registry: ProjectRegistry,
    pub config: Mutex<Config>,
    pub config_path: Mutex<Option<std::path::PathBuf>>,
    pub dev_mode: bool,
}

/// Binds and serves the HTTP API on `0.0.0.0:{port}` until the process is signalled
/// to stop. `dev_mode` only affects `GET /api/config`'s `dev` flag in its response —
/// there is no static-asset fallback to vary (spec.md's "Out of scope" names the web
/// UI as an external consumer).
pub async fn start_server(
    manager: Arc<AgentManager>,
    config: Config,
    config_path: Option<std::path::PathBuf>,
    ws_root: std::path::PathBuf,
    port: u16,
    dev_mode: bool,
) -> anyhow::Result<()> {
    let registry = ProjectRegistry::new();
    let added_at = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    if let Err(e) = registry.add(ws_root.to_string_lossy().to_string(), added_at) {
        tracing::warn!(error = %e, "failed to register startup workspace in the project registry");
    }

    let state = Arc::new(ServerState {
        manager,
        registry,
        config: Mutex::new(config),
        config_path: Mutex::new(config_path),
        dev_mode,
    });

    let app = Router::new()
        .route("/api/projects", get(handlers::list_projects))
        .route("/api/projects", post(handlers::add_project))
        .route("/api/projects", delete(handlers::remove_project))
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/api/sessions", post(handlers::create_session))
        .route("/api/chat", post(handlers::chat))
        .route("/api/chat/clear", post(handlers::clear_chat))
        .route("/api/run", post(handlers::run_agent))
        .route("/api/run/cancel", post(handlers::cancel_run))
        .route("/api/agent-context", get(handlers::agent_context))
        .route("/api/agent-children", get(handlers::agent_children))
        .route("/api/ask-user/respond", post(handlers::ask_user_respond))
        .route("/api/events", get(handlers::events))
        .route("/api/workspace/tree", get(handlers::workspace_tree))
        .route("/api/file", get(handlers::read_file))
        .route("/api/config", get(handlers::get_config))
        .route("/api/config", post(handlers::update_config))
        .route("/api/models/health", get(handlers::models_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "ridgeline-agent server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
