//! Mission file (spec §6.2): `<project>/.ridgeline/mission.json`, a single standing
//! instruction that drives the idle scheduler (spec §4.5, §9 "Idle scheduler").

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub text: String,
    pub created_at: u64,
    pub active: bool,
}

pub struct MissionStore {
    path: PathBuf,
}

impl MissionStore {
    pub fn new(project_root: &std::path::Path) -> Self {
        Self { path: project_root.join(".ridgeline").join("mission.json") }
    }

    pub fn load(&self) -> anyhow::Result<Option<Mission>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(&self.path)?)?))
    }

    pub fn set(&self, text: &str, created_at: u64) -> anyhow::Result<Mission> {
        let mission = Mission { text: text.to_string(), created_at, active: true };
        self.write(&mission)?;
        Ok(mission)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        if let Some(mut mission) = self.load()? {
            mission.active = false;
            self.write(&mission)?;
        }
        Ok(())
    }

    fn write(&self, mission: &Mission) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(mission)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_clear_toggles_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = MissionStore::new(dir.path());
        assert!(store.load().unwrap().is_none());

        store.set("ship the feature", 1000).unwrap();
        let mission = store.load().unwrap().unwrap();
        assert!(mission.active);
        assert_eq!(mission.text, "ship the feature");

        store.clear().unwrap();
        assert!(!store.load().unwrap().unwrap().active);
    }
}
