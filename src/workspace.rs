//! Workspace root resolution (spec §6.4): the CLI takes an explicit `--root`, or
//! falls back to the nearest ancestor of the current directory that contains `.git`,
//! or the current directory itself if neither is found.

use anyhow::Result;
use std::path::{Path, PathBuf};

pub fn resolve_workspace_root(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    let cwd = std::env::current_dir()?;
    Ok(find_git_root(&cwd).unwrap_or(cwd))
}

fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        cur = dir.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_root_wins_over_discovery() {
        let explicit = PathBuf::from("/some/explicit/root");
        assert_eq!(resolve_workspace_root(Some(explicit.clone())).unwrap(), explicit);
    }

    #[test]
    fn falls_back_to_cwd_when_no_git_root_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_git_root(dir.path()).is_none());
    }
}
