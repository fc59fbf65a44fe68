//! The global project registry (spec §6.1 `GET/POST/DELETE /api/projects`), in the
//! style of a `ProjectStore::{add_project,list_projects,remove_project}` API but
//! trimmed to a single JSON file since everything else about a project lives under
//! its own `<project_root>/.ridgeline/` (spec §6.2) rather than a central
//! per-project directory tree.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub path: String,
    pub name: String,
    pub added_at: u64,
}

pub struct ProjectRegistry {
    path: PathBuf,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self { path: crate::paths::projects_file() }
    }

    fn load(&self) -> Result<Vec<ProjectInfo>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(&self.path)?)?)
    }

    fn save(&self, projects: &[ProjectInfo]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(projects)?)?;
        Ok(())
    }

    pub fn add(&self, path: String, added_at: u64) -> Result<ProjectInfo> {
        let mut projects = self.load()?;
        if let Some(existing) = projects.iter().find(|p| p.path == path) {
            return Ok(existing.clone());
        }
        let name = std::path::Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        let info = ProjectInfo { path, name, added_at };
        projects.push(info.clone());
        self.save(&projects)?;
        Ok(info)
    }

    pub fn list(&self) -> Result<Vec<ProjectInfo>> {
        self.load()
    }

    pub fn remove(&self, path: &str) -> Result<()> {
        let mut projects = self.load()?;
        projects.retain(|p| p.path != path);
        self.save(&projects)
    }
}

impl Default for ProjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (ProjectRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (ProjectRegistry { path: dir.path().join("projects.json") }, dir)
    }

    #[test]
    fn add_is_idempotent_on_same_path() {
        let (registry, _dir) = registry();
        registry.add("/tmp/proj".into(), 1).unwrap();
        registry.add("/tmp/proj".into(), 2).unwrap();
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn remove_drops_the_entry() {
        let (registry, _dir) = registry();
        registry.add("/tmp/proj".into(), 1).unwrap();
        registry.remove("/tmp/proj").unwrap();
        assert!(registry.list().unwrap().is_empty());
    }
}
