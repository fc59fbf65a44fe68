//! Workspace watcher (spec §4.5 supplement, §9 "sync_world_state"): one
//! `notify::RecommendedWatcher` per project root, a non-recursive watcher that
//! ignores build/VCS directories and pushes a refresh on every relevant change.

use super::AgentManager;
use notify::{RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Weak;

const IGNORED_SEGMENTS: [&str; 4] = [".ridgeline", ".git", "target", "node_modules"];

fn is_ignored(path: &std::path::Path) -> bool {
    path.components().any(|c| IGNORED_SEGMENTS.contains(&c.as_os_str().to_string_lossy().as_ref()))
}

/// Spawns a watcher that refreshes the workspace snapshot on any non-ignored
/// filesystem event under `project_root`. Returns the watcher handle; dropping it
/// stops watching.
pub fn spawn(manager: Weak<AgentManager>, project_root: PathBuf) -> Option<notify::RecommendedWatcher> {
    let handle = tokio::runtime::Handle::try_current().ok()?;
    let root_for_cb = project_root.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let Ok(event) = res else { return };
        if event.paths.iter().any(|p| is_ignored(p)) {
            return;
        }
        let manager = manager.clone();
        let project_root = root_for_cb.clone();
        handle.spawn(async move {
            if let Some(manager) = manager.upgrade() {
                manager.refresh_workspace_snapshot(&project_root.to_string_lossy()).await;
            }
        });
    })
    .ok()?;

    if let Err(e) = watcher.watch(&project_root, RecursiveMode::Recursive) {
        tracing::warn!(path = %project_root.display(), error = %e, "failed to start workspace watcher");
        return None;
    }
    Some(watcher)
}
