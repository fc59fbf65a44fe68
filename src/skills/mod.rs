//! Skill loading (spec §4.3 `Skill` tool; marketplace/search/install are out of
//! scope per spec.md Non-goals). A skill is a markdown file with YAML frontmatter
//! (`name`, `description`) and a body of instructions, dropped by a human or a build
//! step into `<project>/.ridgeline/skills/` or the global skills directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
struct SkillFrontmatter {
    name: String,
    description: String,
}

#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub instructions: String,
}

#[derive(Debug, Clone)]
pub struct SkillSummary {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Skill>,
}

impl SkillRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads every `*.md` skill file from `project_dir` and the global skills
    /// directory, project-local skills taking precedence on name collision.
    pub fn load(project_dir: &Path, global_dir: Option<&Path>) -> Result<Self> {
        let mut skills = HashMap::new();
        if let Some(dir) = global_dir {
            load_dir_into(dir, &mut skills)?;
        }
        load_dir_into(&project_dir.join(".ridgeline").join("skills"), &mut skills)?;
        Ok(Self { skills })
    }

    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.get(name)
    }

    pub fn summaries(&self) -> Vec<SkillSummary> {
        let mut out: Vec<SkillSummary> = self
            .skills
            .values()
            .map(|s| SkillSummary { name: s.name.clone(), description: s.description.clone() })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

fn load_dir_into(dir: &Path, out: &mut HashMap<String, Skill>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading skills dir {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        match load_skill_file(&path) {
            Ok(skill) => {
                out.insert(skill.name.clone(), skill);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed skill file");
            }
        }
    }
    Ok(())
}

fn load_skill_file(path: &Path) -> Result<Skill> {
    let content = std::fs::read_to_string(path)?;
    if !content.starts_with("---") {
        anyhow::bail!("skill file missing YAML frontmatter");
    }
    let parts: Vec<&str> = content.splitn(3, "---").collect();
    if parts.len() < 3 {
        anyhow::bail!("skill file missing closing frontmatter delimiter");
    }
    let front: SkillFrontmatter = serde_yml::from_str(parts[1])?;
    Ok(Skill {
        name: front.name,
        description: front.description,
        instructions: parts[2].trim().to_string(),
    })
}

pub fn default_skill_path(project_dir: &Path, name: &str) -> PathBuf {
    project_dir.join(".ridgeline").join("skills").join(format!("{name}.md"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_project_local_skill() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".ridgeline/skills")).unwrap();
        std::fs::write(
            dir.path().join(".ridgeline/skills/review.md"),
            "---\nname: review\ndescription: reviews a diff\n---\nLook for bugs.",
        )
        .unwrap();
        let registry = SkillRegistry::load(dir.path(), None).unwrap();
        let skill = registry.get("review").unwrap();
        assert_eq!(skill.description, "reviews a diff");
        assert_eq!(skill.instructions, "Look for bugs.");
    }

    #[test]
    fn project_skill_overrides_global_of_same_name() {
        let project = tempfile::tempdir().unwrap();
        let global = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(project.path().join(".ridgeline/skills")).unwrap();
        std::fs::write(
            global.path().join("review.md"),
            "---\nname: review\ndescription: global\n---\nglobal body",
        )
        .unwrap();
        std::fs::write(
            project.path().join(".ridgeline/skills/review.md"),
            "---\nname: review\ndescription: local\n---\nlocal body",
        )
        .unwrap();
        let registry = SkillRegistry::load(project.path(), Some(global.path())).unwrap();
        assert_eq!(registry.get("review").unwrap().description, "local");
    }
}
