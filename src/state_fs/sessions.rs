//! Session store (spec §6.2): `<project>/.ridgeline/sessions/<id>/{meta.json,messages.jsonl}`.
//! Messages are appended one JSON object per line so a crash mid-write loses at most
//! the last partial line, never corrupts earlier history.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

pub struct SessionStore {
    sessions_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub title: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub agent_id: String,
    pub from_id: String,
    pub to_id: String,
    pub content: String,
    pub timestamp: u64,
}

impl SessionStore {
    pub fn new(project_root: &std::path::Path) -> Self {
        Self { sessions_dir: project_root.join(".ridgeline").join("sessions") }
    }

    pub fn create(&self, title: &str, created_at: u64) -> Result<SessionMeta> {
        let id = format!("sess-{created_at}-{}", uuid::Uuid::new_v4().simple());
        let meta = SessionMeta { id, title: title.to_string(), created_at };
        self.write_meta(&meta)?;
        let msgs_path = self.session_dir(&meta.id).join("messages.jsonl");
        if !msgs_path.exists() {
            fs::write(&msgs_path, "")?;
        }
        Ok(meta)
    }

    pub fn list(&self) -> Result<Vec<SessionMeta>> {
        if !self.sessions_dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = entry.path().join("meta.json");
            if !meta_path.exists() {
                continue;
            }
            match fs::read_to_string(&meta_path).ok().and_then(|s| serde_json::from_str(&s).ok()) {
                Some(meta) => out.push(meta),
                None => tracing::warn!(path = %meta_path.display(), "skipping corrupt session meta.json"),
            }
        }
        out.sort_by(|a: &SessionMeta, b: &SessionMeta| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub fn append_message(&self, session_id: &str, msg: &ChatMessage) -> Result<()> {
        Self::validate_id(session_id)?;
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(dir.join("messages.jsonl"))?;
        writeln!(file, "{}", serde_json::to_string(msg)?)?;
        Ok(())
    }

    pub fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        Self::validate_id(session_id)?;
        let path = self.session_dir(session_id).join("messages.jsonl");
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
                Ok(msg) => out.push(msg),
                Err(e) => tracing::warn!(error = %e, "skipping corrupt message.jsonl line"),
            }
        }
        Ok(out)
    }

    pub fn clear(&self, session_id: &str) -> Result<()> {
        Self::validate_id(session_id)?;
        let path = self.session_dir(session_id).join("messages.jsonl");
        if path.exists() {
            fs::write(path, "")?;
        }
        Ok(())
    }

    fn write_meta(&self, meta: &SessionMeta) -> Result<()> {
        Self::validate_id(&meta.id)?;
        let dir = self.session_dir(&meta.id);
        fs::create_dir_all(&dir).with_context(|| format!("creating session dir {}", dir.display()))?;
        fs::write(dir.join("meta.json"), serde_json::to_string_pretty(meta)?)?;
        Ok(())
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(id)
    }

    fn validate_id(id: &str) -> Result<()> {
        if id.is_empty() || id.contains("..") || id.contains('/') || id.contains('\\') {
            bail!("invalid session id: {id}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (SessionStore::new(dir.path()), dir)
    }

    #[test]
    fn create_then_list_round_trips_meta() {
        let (store, _dir) = store();
        let meta = store.create("first chat", 1000).unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, meta.id);
        assert_eq!(listed[0].title, "first chat");
    }

    #[test]
    fn list_sorts_newest_first() {
        let (store, _dir) = store();
        store.create("a", 100).unwrap();
        store.create("b", 300).unwrap();
        store.create("c", 200).unwrap();
        let titles: Vec<String> = store.list().unwrap().into_iter().map(|m| m.title).collect();
        assert_eq!(titles, vec!["b", "c", "a"]);
    }

    #[test]
    fn append_and_read_history_in_order() {
        let (store, _dir) = store();
        let meta = store.create("s", 1000).unwrap();
        store
            .append_message(&meta.id, &ChatMessage { agent_id: "lead".into(), from_id: "user".into(), to_id: "lead".into(), content: "hi".into(), timestamp: 1 })
            .unwrap();
        store
            .append_message(&meta.id, &ChatMessage { agent_id: "lead".into(), from_id: "lead".into(), to_id: "user".into(), content: "hello".into(), timestamp: 2 })
            .unwrap();
        let history = store.history(&meta.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "hello");
    }

    #[test]
    fn clear_truncates_but_keeps_session() {
        let (store, _dir) = store();
        let meta = store.create("s", 1000).unwrap();
        store
            .append_message(&meta.id, &ChatMessage { agent_id: "a".into(), from_id: "user".into(), to_id: "a".into(), content: "x".into(), timestamp: 1 })
            .unwrap();
        store.clear(&meta.id).unwrap();
        assert!(store.history(&meta.id).unwrap().is_empty());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn rejects_path_traversal_in_session_id() {
        let (store, _dir) = store();
        let result = store.append_message("../escape", &ChatMessage { agent_id: "a".into(), from_id: "u".into(), to_id: "a".into(), content: "x".into(), timestamp: 1 });
        assert!(result.is_err());
    }
}
