//! Configuration file loading (spec §6.3) and the static `AgentSpec` schema loaded
//! from per-project agent markdown files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default, rename = "models")]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default, rename = "agents")]
    pub agents: Vec<AgentSpecRef>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub id: String,
    pub provider: ProviderKind,
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub keep_alive: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Native streaming chat protocol (newline-delimited JSON chunks).
    Native,
    /// OpenAI-compatible streaming chat protocol (SSE, `data:` lines, `[DONE]`).
    OpenaiCompat,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentSpecRef {
    pub id: String,
    pub spec_path: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    4695
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteSafetyMode {
    Strict,
    Warn,
    Off,
}

impl Default for WriteSafetyMode {
    fn default() -> Self {
        WriteSafetyMode::Warn
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolPermissionMode {
    /// Every tool call runs without interactive confirmation (the runtime's only
    /// supported mode — AskUser is a tool the model invokes explicitly, not a
    /// confirmation gate on other tools).
    Auto,
}

impl Default for ToolPermissionMode {
    fn default() -> Self {
        ToolPermissionMode::Auto
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_iters")]
    pub max_iters: usize,
    #[serde(default)]
    pub write_safety_mode: WriteSafetyMode,
    #[serde(default)]
    pub tool_permission_mode: ToolPermissionMode,
    #[serde(default)]
    pub prompt_loop_breaker: Option<String>,
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: usize,
}

fn default_max_iters() -> usize {
    40
}

fn default_max_delegation_depth() -> usize {
    2
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iters: default_max_iters(),
            write_safety_mode: WriteSafetyMode::default(),
            tool_permission_mode: ToolPermissionMode::default(),
            prompt_loop_breaker: None,
            max_delegation_depth: default_max_delegation_depth(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub directory: Option<String>,
    pub retention_days: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RoutingConfig {
    #[serde(default)]
    pub default_models: Vec<String>,
}

// ---------------------------------------------------------------------------
// Agent spec: static per-agent definition loaded from `<project>/agents/*.md`.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AgentPolicyCapability {
    Patch,
    Finalize,
    Delegate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPolicy {
    #[serde(default)]
    pub flags: HashSet<AgentPolicyCapability>,
}

impl AgentPolicy {
    pub fn allows(&self, cap: AgentPolicyCapability) -> bool {
        self.flags.contains(&cap)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    /// Tool names this agent may invoke; `None` means every built-in tool is allowed.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub work_globs: Vec<String>,
    #[serde(default)]
    pub policy: AgentPolicy,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub idle_prompt: Option<String>,
    #[serde(default)]
    pub idle_interval_secs: Option<u64>,
}

impl AgentSpec {
    /// Parses a markdown file with YAML frontmatter: `---\n<yaml>\n---\n<system prompt>`.
    /// Fields beyond this schema in the frontmatter are accepted and ignored — this
    /// runtime does not interpret skill/agent markdown beyond the fields it reads
    /// (spec.md's Out of Scope item on frontmatter parsing).
    pub fn from_markdown(path: &Path) -> Result<(Self, String)> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading agent spec {}", path.display()))?;
        if !content.starts_with("---") {
            anyhow::bail!(
                "agent spec at {} must start with YAML frontmatter (---)",
                path.display()
            );
        }
        let parts: Vec<&str> = content.splitn(3, "---").collect();
        if parts.len() < 3 {
            anyhow::bail!(
                "agent spec at {} is missing the closing frontmatter delimiter (---)",
                path.display()
            );
        }
        let spec: AgentSpec = serde_yml::from_str(parts[1])
            .with_context(|| format!("parsing frontmatter in {}", path.display()))?;
        let system_prompt = parts[2].trim().to_string();
        Ok((spec, system_prompt))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

impl Config {
    /// Loads the config following the search order in spec §6.3:
    /// `$RIDGELINE_CONFIG`, `./ridgeline-agent.toml`, `~/.config/ridgeline-agent/`,
    /// `~/.local/share/ridgeline-agent/`. Returns the config and the path it was
    /// loaded from (`None` for an in-memory default).
    pub fn load_with_path() -> Result<(Self, Option<PathBuf>)> {
        if let Ok(explicit) = std::env::var("RIDGELINE_CONFIG") {
            let path = PathBuf::from(explicit);
            return Self::load_from(&path).map(|c| (c, Some(path)));
        }

        let cwd_candidate = PathBuf::from("ridgeline-agent.toml");
        if cwd_candidate.is_file() {
            return Self::load_from(&cwd_candidate).map(|c| (c, Some(cwd_candidate)));
        }

        for dir in [crate::paths::xdg_config_dir(), crate::paths::xdg_data_dir()]
            .into_iter()
            .flatten()
        {
            let candidate = dir.join("ridgeline-agent.toml");
            if candidate.is_file() {
                return Self::load_from(&candidate).map(|c| (c, Some(candidate)));
            }
        }

        Ok((Config::default(), None))
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_limits() {
        let cfg = Config::default();
        assert_eq!(cfg.agent.max_iters, 40);
        assert_eq!(cfg.agent.max_delegation_depth, 2);
        assert_eq!(cfg.agent.write_safety_mode, WriteSafetyMode::Warn);
    }

    #[test]
    fn policy_allows_only_granted_capabilities() {
        let mut policy = AgentPolicy::default();
        assert!(!policy.allows(AgentPolicyCapability::Finalize));
        policy.flags.insert(AgentPolicyCapability::Finalize);
        assert!(policy.allows(AgentPolicyCapability::Finalize));
        assert!(!policy.allows(AgentPolicyCapability::Delegate));
    }

    #[test]
    fn agent_spec_requires_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.md");
        std::fs::write(&path, "no frontmatter here").unwrap();
        assert!(AgentSpec::from_markdown(&path).is_err());
    }

    #[test]
    fn agent_spec_parses_minimal_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coder.md");
        std::fs::write(
            &path,
            "---\nname: coder\ndescription: writes code\ntools: [Read, Write]\nwork_globs: [\"src/**\"]\npolicy:\n  flags: [Patch]\n---\nYou are a careful engineer.\n",
        )
        .unwrap();
        let (spec, prompt) = AgentSpec::from_markdown(&path).unwrap();
        assert_eq!(spec.name, "coder");
        assert!(spec.policy.allows(AgentPolicyCapability::Patch));
        assert!(!spec.policy.allows(AgentPolicyCapability::Finalize));
        assert_eq!(prompt, "You are a careful engineer.");
    }
}
