//! Unified diff inspection and contained application.
//!
//! Every path a diff could write is checked against the target repository
//! before anything is applied; a single bad path rejects the whole patch.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::errors::{PilotError, Result};

/// Targets and line counts of a unified diff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSummary {
    pub targets: Vec<String>,
    pub added: usize,
    pub removed: usize,
}

impl PatchSummary {
    /// One-line form shown before asking for approval
    pub fn describe(&self) -> String {
        format!("files={} +{} -{}", self.targets.len(), self.added, self.removed)
    }

    pub fn changed_lines(&self) -> usize {
        self.added + self.removed
    }
}

pub fn summarize_patch(diff: &str) -> PatchSummary {
    let mut summary = PatchSummary::default();
    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(target) = header_path(rest, "b/") {
                summary.targets.push(target);
            }
        } else if line.starts_with('+') && !line.starts_with("+++") {
            summary.added += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            summary.removed += 1;
        }
    }
    summary
}

/// Path named by a `---`/`+++` header, without its side prefix or timestamp
fn header_path(rest: &str, side: &str) -> Option<String> {
    let path = rest.split('\t').next().unwrap_or("").trim_end();
    let path = unquote(path);
    if path.is_empty() || path == "/dev/null" {
        return None;
    }
    Some(path.strip_prefix(side).unwrap_or(path).to_string())
}

fn unquote(path: &str) -> &str {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
}

/// Every path the diff could create, modify, rename or delete, in order of appearance.
pub fn patch_paths(diff: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    let mut push = |path: String| {
        if !paths.contains(&path) {
            paths.push(path);
        }
    };

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(path) = header_path(rest, "b/") {
                push(path);
            }
        } else if let Some(rest) = line.strip_prefix("--- ") {
            if let Some(path) = header_path(rest, "a/") {
                push(path);
            }
        } else if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(idx) = rest.rfind(" b/") {
                let from = unquote(rest[..idx].trim());
                push(from.strip_prefix("a/").unwrap_or(from).to_string());
                push(unquote(rest[idx + 3..].trim()).to_string());
            }
        } else {
            for header in ["rename from ", "rename to ", "copy from ", "copy to "] {
                if let Some(rest) = line.strip_prefix(header) {
                    push(unquote(rest.trim()).to_string());
                }
            }
        }
    }
    paths
}

/// Resolve `relative` under the canonical `root`, following symlinks of every
/// existing component. The returned path is inside `root` or an error says why not.
fn resolve_within(root: &Path, relative: &str) -> std::result::Result<PathBuf, String> {
    let candidate = Path::new(relative);
    if relative.trim().is_empty() {
        return Err("empty path".to_string());
    }
    if candidate.is_absolute() {
        return Err("absolute paths are not allowed".to_string());
    }

    let mut current = root.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
            }
            Component::Normal(part) => {
                current.push(part);
                if fs::symlink_metadata(&current).is_ok() {
                    current = current
                        .canonicalize()
                        .map_err(|e| format!("cannot resolve {}: {}", current.display(), e))?;
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err("absolute paths are not allowed".to_string());
            }
        }
        if !current.starts_with(root) {
            return Err("escapes the repository".to_string());
        }
    }

    Ok(current)
}

/// Check every path of `diff` against `root` without touching anything.
pub fn validate_patch(diff: &str, root: &Path) -> Result<Vec<PathBuf>> {
    let root = root.canonicalize()?;
    let mut resolved = Vec::new();
    for path in patch_paths(diff) {
        match resolve_within(&root, &path) {
            Ok(absolute) => resolved.push(absolute),
            Err(reason) => {
                warn!("Rejecting patch: {} ({})", path, reason);
                return Err(PilotError::PatchSafety { path, reason });
            }
        }
    }
    debug!("Patch paths validated: {}", resolved.len());
    Ok(resolved)
}

/// How a validated diff is written into a repository
pub trait ApplyMechanism {
    fn apply(&self, diff: &str, root: &Path) -> Result<()>;
}

/// `git apply` with the diff on stdin.
///
/// When the root sits below the top of a git work tree, patch paths are
/// re-rooted with `--directory` so git does not skip them, and any path git
/// still reports as skipped fails the apply.
#[derive(Debug, Clone, Default)]
pub struct GitApply;

impl GitApply {
    /// Path of `root` relative to the top of its work tree, empty at the top
    /// or outside any repository
    fn work_tree_prefix(root: &Path) -> String {
        Command::new("git")
            .arg("-C")
            .arg(root)
            .args(["rev-parse", "--show-prefix"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()
            .filter(|output| output.status.success())
            .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
            .unwrap_or_default()
    }
}

impl ApplyMechanism for GitApply {
    fn apply(&self, diff: &str, root: &Path) -> Result<()> {
        let mut args = vec![
            "apply".to_string(),
            "--verbose".to_string(),
            "--whitespace=nowarn".to_string(),
        ];
        let prefix = Self::work_tree_prefix(root);
        if !prefix.is_empty() {
            debug!("{} is inside a work tree at prefix {}", root.display(), prefix);
            args.push(format!("--directory={}", prefix));
        }
        args.push("-".to_string());

        let command = format!("git -C {} {}", root.display(), args.join(" "));
        let spawn_error = |source| PilotError::ProcessExecution {
            command: command.clone(),
            source,
        };

        let mut child = Command::new("git")
            .arg("-C")
            .arg(root)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(diff.as_bytes())?;
        }
        let output = child.wait_with_output().map_err(spawn_error)?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(PilotError::PatchApply(if stderr.is_empty() {
                format!("git apply exited with {}", output.status)
            } else {
                stderr
            }));
        }

        let skipped = skipped_paths(&stderr);
        if !skipped.is_empty() {
            return Err(PilotError::PatchApply(format!(
                "git apply skipped {}",
                skipped.join(", ")
            )));
        }
        Ok(())
    }
}

/// Paths named by `Skipped patch '...'` lines of `git apply --verbose`
fn skipped_paths(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Skipped patch "))
        .map(|rest| rest.trim_end_matches('.').trim_matches('\'').to_string())
        .collect()
}

/// Validate every path of `diff`, then hand it to `mechanism`.
pub fn apply_patch_safe(diff: &str, root: &Path, mechanism: &dyn ApplyMechanism) -> Result<PatchSummary> {
    validate_patch(diff, root)?;
    mechanism.apply(diff, root)?;
    let summary = summarize_patch(diff);
    info!("Applied patch to {}: {}", root.display(), summary.describe());
    Ok(summary)
}
