//! Workspace Sandbox (spec §4.1): binds every filesystem and process operation to a
//! project root and a per-agent write scope. Nothing in this module trusts model
//! output — every path is resolved and re-checked on every call.

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("path escapes workspace root: {0}")]
    OutsidePath(String),
    #[error("path '{0}' is not in this agent's write scope")]
    WriteScope(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("ambiguous match: {0}")]
    Ambiguous(String),
    #[error("command blocked: {0}")]
    Blocked(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

const MAX_BASH_OUTPUT_BYTES: usize = 64 * 1024;
const DEFAULT_BASH_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    Strict,
    Warn,
    Off,
}

/// Resolves `relative` against `root`, rejecting `..` escapes and symlink escapes.
/// The returned path is guaranteed to be a prefix of the canonicalized root.
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    if relative.is_empty() {
        return Err(SandboxError::OutsidePath("empty path".into()));
    }

    let raw = Path::new(relative);
    let rel = if raw.is_absolute() {
        raw.strip_prefix(root)
            .map_err(|_| SandboxError::OutsidePath(relative.to_string()))?
            .to_path_buf()
    } else {
        raw.to_path_buf()
    };

    if rel
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(SandboxError::OutsidePath(relative.to_string()));
    }

    let candidate = root.join(&rel);

    // Reject symlink escapes: canonicalize the deepest existing ancestor and verify
    // it (plus whatever trailing components don't exist yet) still resolves inside
    // the canonical root.
    let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let mut existing = candidate.clone();
    let mut trailing: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        if let Some(name) = existing.file_name() {
            trailing.push(name.to_os_string());
        }
        if !existing.pop() {
            break;
        }
    }
    if existing.exists() {
        let canonical_existing = existing
            .canonicalize()
            .map_err(SandboxError::Io)?;
        if !canonical_existing.starts_with(&canonical_root) {
            return Err(SandboxError::OutsidePath(relative.to_string()));
        }
    }
    let _ = trailing; // trailing components don't exist yet; nothing further to canonicalize

    Ok(candidate)
}

fn to_rel(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// True iff `path` (absolute, already resolved) matches one of `work_globs`, matched
/// against the path relative to `root`. An empty scope allows nothing.
pub fn may_write(root: &Path, work_globs: &[String], path: &Path) -> bool {
    if work_globs.is_empty() {
        return false;
    }
    let Some(set) = build_globset(work_globs) else {
        return false;
    };
    set.is_match(Path::new(&to_rel(root, path)))
}

fn build_globset(globs: &[String]) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for g in globs {
        builder.add(Glob::new(g).ok()?);
    }
    builder.build().ok()
}

pub fn read(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(SandboxError::NotFound(path.display().to_string()));
    }
    Ok(std::fs::read(path)?)
}

/// Writes `bytes` to `path`, creating parent directories, subject to `policy`.
/// `root`/`work_globs` define the write scope checked against `path`.
pub fn write(
    root: &Path,
    work_globs: &[String],
    path: &Path,
    bytes: &[u8],
    policy: WritePolicy,
) -> Result<()> {
    let in_scope = may_write(root, work_globs, path);
    match policy {
        WritePolicy::Strict if !in_scope => {
            return Err(SandboxError::WriteScope(to_rel(root, path)));
        }
        WritePolicy::Warn if !in_scope => {
            tracing::warn!(path = %to_rel(root, path), "write outside agent work scope");
        }
        _ => {}
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

pub struct EditResult {
    pub diff: String,
    pub new_content: String,
}

/// Applies a unique in-place textual edit. `old_text` must match exactly once in the
/// file unless `start_line` disambiguates which occurrence to replace.
pub fn edit(
    path: &Path,
    old_text: &str,
    new_text: &str,
    start_line: Option<usize>,
) -> Result<EditResult> {
    if !path.exists() {
        return Err(SandboxError::NotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;

    let occurrences: Vec<usize> = content.match_indices(old_text).map(|(i, _)| i).collect();
    let chosen = match occurrences.len() {
        0 => return Err(SandboxError::NotFound(format!("old_string not found in {}", path.display()))),
        1 => occurrences[0],
        _ => {
            let Some(line) = start_line else {
                return Err(SandboxError::Ambiguous(format!(
                    "old_string matches {} times in {}; pass start_line to disambiguate",
                    occurrences.len(),
                    path.display()
                )));
            };
            let mut picked = None;
            for offset in &occurrences {
                let line_at = content[..*offset].matches('\n').count() + 1;
                if line_at == line {
                    picked = Some(*offset);
                    break;
                }
            }
            picked.ok_or_else(|| {
                SandboxError::Ambiguous(format!(
                    "no occurrence of old_string begins at line {}",
                    line
                ))
            })?
        }
    };

    let mut new_content = String::with_capacity(content.len() + new_text.len());
    new_content.push_str(&content[..chosen]);
    new_content.push_str(new_text);
    new_content.push_str(&content[chosen + old_text.len()..]);

    std::fs::write(path, &new_content)?;
    let diff = unified_diff(&content, &new_content, &path.display().to_string());
    Ok(EditResult { diff, new_content })
}

fn unified_diff(old: &str, new: &str, label: &str) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let mut out = format!("--- {label}\n+++ {label}\n");
    let common_prefix = old_lines
        .iter()
        .zip(new_lines.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let common_suffix = old_lines[common_prefix..]
        .iter()
        .rev()
        .zip(new_lines[common_prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    for line in &old_lines[common_prefix..old_lines.len() - common_suffix] {
        out.push_str("-");
        out.push_str(line);
        out.push('\n');
    }
    for line in &new_lines[common_prefix..new_lines.len() - common_suffix] {
        out.push_str("+");
        out.push_str(line);
        out.push('\n');
    }
    out
}

pub struct BashOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

/// Commands whose leading token is permitted. Mirrors the spirit of a code/search/
/// build/test toolchain; anything else is rejected pre-execution.
const ALLOWED_COMMANDS: &[&str] = &[
    "ls", "pwd", "cat", "head", "tail", "wc", "cut", "sort", "uniq", "tr", "sed", "awk", "find",
    "fd", "rg", "grep", "git", "cargo", "rustc", "npm", "pnpm", "yarn", "node", "python",
    "python3", "pip", "pip3", "pytest", "go", "make", "just", "bash", "sh", "jq",
];

pub fn validate_shell_command(cmd: &str) -> Result<()> {
    let trimmed = cmd.trim();
    if trimmed.is_empty() {
        return Err(SandboxError::Blocked("empty command".into()));
    }
    for banned in ["$(", "`", "\n", "\r", "<(", ">(", "sudo "] {
        if trimmed.contains(banned) {
            return Err(SandboxError::Blocked(format!(
                "disallowed construct: {banned:?}"
            )));
        }
    }
    for op in [" > ", " >> ", " < ", " >|"] {
        if trimmed.contains(op) {
            return Err(SandboxError::Blocked("shell redirection is not allowed".into()));
        }
    }
    for segment in split_shell_segments(trimmed) {
        let Some(token) = segment.split_whitespace().next() else {
            return Err(SandboxError::Blocked(format!("invalid segment: {segment}")));
        };
        let token = token.trim_start_matches('(');
        if !ALLOWED_COMMANDS.contains(&token) {
            return Err(SandboxError::Blocked(format!("command not allowed: {token}")));
        }
    }
    Ok(())
}

fn split_shell_segments(cmd: &str) -> Vec<&str> {
    cmd.split(['|', ';'])
        .flat_map(|p| p.split("&&"))
        .flat_map(|p| p.split("||"))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Runs `command` via the system shell, subject to the allowlist, under `cwd` (must
/// already be inside the workspace root), killing the whole process group on
/// timeout or external cancellation.
pub async fn bash(
    command: &str,
    cwd: &Path,
    timeout_ms: Option<u64>,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<BashOutput> {
    validate_shell_command(command)?;

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdout_pipe = child.stdout.take().expect("piped stdout");
    let mut stderr_pipe = child.stderr.take().expect("piped stderr");
    let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_BASH_TIMEOUT_MS));

    let read_stdout = async {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            Err(SandboxError::Blocked("cancelled".into()))
        }
        result = async {
            let (stdout_buf, stderr_buf) = tokio::join!(read_stdout, read_stderr);
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout_buf, stderr_buf))
        } => {
            match tokio::time::timeout(timeout, async { result }).await {
                Ok(Ok((status, stdout_buf, stderr_buf))) => {
                    let (stdout, stdout_trunc) = cap_output(&stdout_buf);
                    let (stderr, stderr_trunc) = cap_output(&stderr_buf);
                    Ok(BashOutput {
                        exit_code: status.code(),
                        stdout,
                        stderr,
                        truncated: stdout_trunc || stderr_trunc,
                    })
                }
                Ok(Err(e)) => Err(SandboxError::Io(e)),
                Err(_) => {
                    let _ = child.start_kill();
                    Err(SandboxError::Timeout(timeout))
                }
            }
        }
    }
}

fn cap_output(buf: &[u8]) -> (String, bool) {
    if buf.len() <= MAX_BASH_OUTPUT_BYTES {
        (String::from_utf8_lossy(buf).to_string(), false)
    } else {
        (
            String::from_utf8_lossy(&buf[..MAX_BASH_OUTPUT_BYTES]).to_string(),
            true,
        )
    }
}

/// Lists files under `root` matching `pattern`, respecting `.gitignore`.
pub fn glob(root: &Path, pattern: &str) -> Result<Vec<String>> {
    let set = build_globset(&[pattern.to_string()])
        .ok_or_else(|| SandboxError::Blocked(format!("invalid glob: {pattern}")))?;
    let mut out = Vec::new();
    let walker = WalkBuilder::new(root).standard_filters(true).hidden(true).build();
    for entry in walker.flatten() {
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let rel = to_rel(root, entry.path());
        if set.is_match(Path::new(&rel)) {
            out.push(rel);
        }
    }
    out.sort();
    Ok(out)
}

pub struct GrepHit {
    pub path: String,
    pub line: usize,
    pub preview: String,
}

/// Greps `pattern` (a regex) under `root`, optionally scoped to a sub-path.
pub fn grep(root: &Path, pattern: &str, scope: Option<&Path>, case_sensitive: bool) -> Result<Vec<GrepHit>> {
    let matcher = if case_sensitive {
        grep_regex::RegexMatcher::new(pattern)
    } else {
        grep_regex::RegexMatcherBuilder::new()
            .case_insensitive(true)
            .build(pattern)
    }
    .map_err(|e| SandboxError::Blocked(format!("invalid pattern: {e}")))?;

    let search_root = scope.map(|s| root.join(s)).unwrap_or_else(|| root.to_path_buf());
    let mut out = Vec::new();
    let walker = WalkBuilder::new(&search_root).standard_filters(true).hidden(true).build();
    for entry in walker.flatten() {
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path().to_path_buf();
        let rel = to_rel(root, &path);
        let mut searcher = grep_searcher::Searcher::new();
        let matcher = matcher.clone();
        let _ = searcher.search_path(
            &matcher,
            &path,
            grep_searcher::sinks::UTF8(|line_num, line| {
                out.push(GrepHit {
                    path: rel.clone(),
                    line: line_num as usize,
                    preview: line.trim_end().to_string(),
                });
                Ok(true)
            }),
        );
    }
    Ok(out)
}

pub fn assert_no_escape(root: &Path, relative: &str) -> HashSet<PathBuf> {
    // Test helper retained for property-test ergonomics; not used by production code.
    let mut out = HashSet::new();
    if let Ok(p) = resolve(root, relative) {
        out.insert(p);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resolve_rejects_parent_dir_escape() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(dir.path(), "../outside.txt").unwrap_err();
        assert!(matches!(err, SandboxError::OutsidePath(_)));
    }

    #[test]
    fn resolve_accepts_nested_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let resolved = resolve(dir.path(), "src/main.rs").unwrap();
        assert!(resolved.starts_with(dir.path()));
    }

    #[test]
    fn resolve_rejects_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(outside.path(), root.join("escape")).unwrap();
            let err = resolve(&root, "escape/secret.txt").unwrap_err();
            assert!(matches!(err, SandboxError::OutsidePath(_)));
        }
    }

    #[test]
    fn write_scope_denies_paths_outside_work_globs() {
        let dir = tempfile::tempdir().unwrap();
        let globs = vec!["src/**".to_string()];
        let denied = dir.path().join("docs/x.md");
        assert!(!may_write(dir.path(), &globs, &denied));
        let allowed = dir.path().join("src/lib.rs");
        assert!(may_write(dir.path(), &globs, &allowed));
    }

    #[test]
    fn write_strict_mode_rejects_out_of_scope() {
        let dir = tempfile::tempdir().unwrap();
        let globs = vec!["src/**".to_string()];
        let path = dir.path().join("docs/x.md");
        let err = write(dir.path(), &globs, &path, b"hi", WritePolicy::Strict).unwrap_err();
        assert!(matches!(err, SandboxError::WriteScope(_)));
    }

    #[test]
    fn edit_requires_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "foo\nfoo\n").unwrap();
        let err = edit(&path, "foo", "bar", None).unwrap_err();
        assert!(matches!(err, SandboxError::Ambiguous(_)));
    }

    #[test]
    fn edit_idempotence_second_apply_fails_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "hello world\n").unwrap();
        edit(&path, "hello", "goodbye", None).unwrap();
        let err = edit(&path, "hello", "goodbye", None).unwrap_err();
        assert!(matches!(err, SandboxError::NotFound(_)));
    }

    #[test]
    fn validate_shell_command_blocks_command_substitution() {
        assert!(validate_shell_command("echo $(whoami)").is_err());
    }

    #[test]
    fn validate_shell_command_blocks_unlisted_binary() {
        assert!(validate_shell_command("curl http://example.com").is_err());
    }

    #[test]
    fn validate_shell_command_allows_cargo_test() {
        assert!(validate_shell_command("cargo test --quiet").is_ok());
    }
}
