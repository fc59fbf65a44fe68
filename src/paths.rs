//! Runtime data directories, distinct from the project-scoped `.ridgeline/` layout
//! (see `state_fs`) and from the config search path (see `config`).

use std::path::PathBuf;
use std::sync::OnceLock;

static RIDGELINE_HOME: OnceLock<PathBuf> = OnceLock::new();

/// `~/.ridgeline/`, overridable with `$RIDGELINE_HOME`.
pub fn ridgeline_home() -> &'static PathBuf {
    RIDGELINE_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("RIDGELINE_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ridgeline")
    })
}

/// `~/.ridgeline/logs/`
pub fn logs_dir() -> PathBuf {
    ridgeline_home().join("logs")
}

/// `~/.ridgeline/credentials.json` — model API keys, never written into project config.
pub fn credentials_file() -> PathBuf {
    ridgeline_home().join("credentials.json")
}

/// `~/.ridgeline/plans/` — plan files keyed by run id, used by the Engine to resume a
/// plan across a session restart.
pub fn plans_dir() -> PathBuf {
    ridgeline_home().join("plans")
}

/// `~/.ridgeline/skills/` — globally installed skill definitions.
pub fn global_skills_dir() -> PathBuf {
    ridgeline_home().join("skills")
}

/// `~/.ridgeline/projects.json` — the small registry backing `GET/POST/DELETE
/// /api/projects` (spec §6.1); everything else about a project lives under its own
/// `<project_root>/.ridgeline/` (spec §6.2).
pub fn projects_file() -> PathBuf {
    ridgeline_home().join("projects.json")
}

/// `~/.config/ridgeline-agent/` and `~/.local/share/ridgeline-agent/`, the two
/// XDG-style fallback locations in the config search order (spec §6.3).
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".config").join("ridgeline-agent"))
}

pub fn xdg_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".local").join("share").join("ridgeline-agent"))
}
