mod config;
mod credentials;
mod engine;
mod logging;
mod manager;
mod paths;
mod router;
mod sandbox;
mod server;
mod skills;
mod state_fs;
mod tools;
mod workspace;

use anyhow::Result;
use clap::Parser;
use config::Config;
use std::sync::Arc;

/// Ridgeline Agent — a local-first multi-agent coding runtime (spec §6.4). No
/// `doctor`/`self-update`/`skills`/`init`/`daemon` subcommands and no TUI (spec.md
/// names the installer/doctor tooling and the terminal UI as out of scope), so this
/// binary only ever starts the HTTP API.
#[derive(Parser, Debug)]
#[command(name = "ridge", version)]
#[command(about = "Ridgeline — a local-first multi-agent coding runtime")]
struct Cli {
    /// Workspace root. If omitted, detects by walking up for .git.
    #[arg(long)]
    root: Option<std::path::PathBuf>,

    /// Port for the HTTP API (overrides [server] port in the config file).
    #[arg(long)]
    port: Option<u16>,

    /// Accepted for parity with the spec's CLI surface; this binary always runs the
    /// HTTP API (there is no TUI to fall back to without it).
    #[arg(long, default_value_t = false)]
    web: bool,

    /// Dev mode: no behavioral difference here since this crate serves no static
    /// web-UI assets, but it's surfaced on `GET /api/config` for the web UI to read.
    #[arg(long, default_value_t = false)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = match Config::load_with_path() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::setup_tracing_with_settings(logging::LoggingSettings {
        level: config.logging.level.as_deref(),
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
        suppress_stdout: false,
    }) {
        eprintln!("failed to initialize logging: {e}");
    }

    let ws_root = workspace::resolve_workspace_root(cli.root)?;
    let port = cli.port.unwrap_or(config.server.port);

    let router = Arc::new(router::ModelRouter::new(config.models.clone()));
    let global_skills_dir = Some(paths::global_skills_dir());
    let manager = manager::AgentManager::new(config.clone(), router, global_skills_dir);

    tracing::info!(workspace = %ws_root.display(), port, web = cli.web, "ridgeline-agent starting");

    match server::start_server(manager, config, config_path, ws_root, port, cli.dev).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "server failed to start");
            std::process::exit(2);
        }
    }
}
