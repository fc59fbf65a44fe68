//! Persistent state layout (spec §6.2): everything lives under the project's own
//! `<project_root>/.ridgeline/` — append-only JSONL session transcripts
//! (`SessionStore`) and per-run `meta.json` (`RunStore`) — a purely project-local
//! layout rather than a central `~/<app>/projects/<encoded>/` registry, as spec §6.2
//! names it. Global state is limited to `~/.ridgeline/credentials.json` (see
//! `credentials`/`paths`).

pub mod mission;
pub mod runs;
pub mod sessions;
pub mod workspace_snapshot;

pub use mission::MissionStore;
pub use runs::RunStore;
pub use sessions::SessionStore;
pub use workspace_snapshot::WorkspaceSnapshotStore;
