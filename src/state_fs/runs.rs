//! Run persistence (spec §6.2): `<project>/.ridgeline/runs/<run-id>/{meta.json,timeline.jsonl}`.
//! `meta.json` holds the current `RunRecord`, overwritten on every status change;
//! `timeline.jsonl` is the append-only event log used to reconstruct `agent-context`
//! after a restart.

use crate::manager::events::Event;
use crate::manager::run_record::RunRecord;
use anyhow::Result;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

pub struct RunStore {
    runs_dir: PathBuf,
}

impl RunStore {
    pub fn new(project_root: &std::path::Path) -> Self {
        Self { runs_dir: project_root.join(".ridgeline").join("runs") }
    }

    pub fn save_meta(&self, record: &RunRecord) -> Result<()> {
        let dir = self.run_dir(&record.run_id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("meta.json"), serde_json::to_string_pretty(record)?)?;
        Ok(())
    }

    pub fn load_meta(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let path = self.run_dir(run_id).join("meta.json");
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
    }

    pub fn append_event(&self, run_id: &str, event: &Event) -> Result<()> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir)?;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(dir.join("timeline.jsonl"))?;
        writeln!(file, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }

    pub fn load_timeline(&self, run_id: &str) -> Result<Vec<Event>> {
        let path = self.run_dir(run_id).join("timeline.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&path)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => out.push(event),
                Err(e) => tracing::warn!(error = %e, "skipping corrupt timeline.jsonl line"),
            }
        }
        Ok(out)
    }

    pub fn list_all(&self) -> Result<Vec<RunRecord>> {
        if !self.runs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.runs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = entry.path().join("meta.json");
            if let Ok(content) = fs::read_to_string(&meta_path) {
                match serde_json::from_str(&content) {
                    Ok(record) => out.push(record),
                    Err(e) => tracing::warn!(path = %meta_path.display(), error = %e, "skipping corrupt run meta.json"),
                }
            }
        }
        out.sort_by(|a: &RunRecord, b: &RunRecord| b.created_at_ms.cmp(&a.created_at_ms));
        Ok(out)
    }

    pub fn list_children(&self, parent_run_id: &str) -> Result<Vec<RunRecord>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|r| r.parent_run_id.as_deref() == Some(parent_run_id))
            .collect())
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::events::EventBody;
    use crate::manager::run_record::RunStatus;

    fn store() -> (RunStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (RunStore::new(dir.path()), dir)
    }

    fn record(run_id: &str, parent: Option<&str>, created_at_ms: u64) -> RunRecord {
        RunRecord::new(run_id.into(), "/p".into(), "s1".into(), "lead".into(), parent.map(String::from), 0, created_at_ms)
    }

    #[test]
    fn save_then_load_meta_round_trips() {
        let (store, _dir) = store();
        let record = record("r1", None, 1000);
        store.save_meta(&record).unwrap();
        let loaded = store.load_meta("r1").unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
    }

    #[test]
    fn append_and_load_timeline_preserves_order() {
        let (store, _dir) = store();
        let e1 = Event { run_id: "r1".into(), agent_id: "a".into(), sequence: 0, monotonic_timestamp_ms: 1, body: EventBody::TurnComplete };
        let e2 = Event { sequence: 1, ..e1.clone() };
        store.append_event("r1", &e1).unwrap();
        store.append_event("r1", &e2).unwrap();
        let timeline = store.load_timeline("r1").unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[1].sequence, 1);
    }

    #[test]
    fn list_children_filters_by_parent() {
        let (store, _dir) = store();
        store.save_meta(&record("parent", None, 1000)).unwrap();
        store.save_meta(&record("child1", Some("parent"), 1001)).unwrap();
        store.save_meta(&record("other", None, 1002)).unwrap();
        let children = store.list_children("parent").unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].run_id, "child1");
    }
}
