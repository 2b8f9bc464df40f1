//! Evidence packets: bounded copies of closure files plus a readable summary.
//!
//! The character budget counts Unicode scalar values. Files are taken in the
//! order given and retrieval stops at the first file that would overflow the
//! budget, so a packet is always a prefix of the input (minus skipped files).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::Result;
use crate::index::RepoFile;
use crate::query::ClosureResult;

/// One file copied into the evidence folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceArtifact {
    pub file: RepoFile,
    pub path: PathBuf,
    pub chars: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidencePacket {
    pub artifacts: Vec<EvidenceArtifact>,
    pub chars_used: usize,
}

/// Limits reported in the context summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budgets {
    pub max_files: usize,
    pub max_chars: usize,
}

/// Artifact file name for the `index`-th input file
pub fn artifact_name(index: usize, file: &RepoFile) -> String {
    format!("{:02}_{}_{}", index, file.repo, file.path.replace('/', "_"))
}

/// Copy `files` into `out_dir` until `max_chars` would be exceeded.
///
/// Files of unknown repositories, missing files and files that are not valid
/// UTF-8 are skipped; the artifact index is still the input position.
pub fn retrieve(
    repositories: &BTreeMap<String, PathBuf>,
    files: &[RepoFile],
    out_dir: &Path,
    max_chars: usize,
) -> Result<EvidencePacket> {
    fs::create_dir_all(out_dir)?;
    let mut packet = EvidencePacket::default();

    for (index, file) in files.iter().enumerate() {
        let Some(root) = repositories.get(&file.repo) else {
            debug!("Unknown repository for {}, skipping", file);
            continue;
        };

        let source = root.join(&file.path);
        if !source.is_file() {
            debug!("Missing file {}, skipping", source.display());
            continue;
        }

        let text = match fs::read_to_string(&source) {
            Ok(text) => text,
            Err(e) => {
                debug!("Unreadable file {}: {}", source.display(), e);
                continue;
            }
        };

        let chars = text.chars().count();
        if packet.chars_used + chars > max_chars {
            debug!("Budget reached at {} ({} + {} > {})", file, packet.chars_used, chars, max_chars);
            break;
        }

        let dest = out_dir.join(artifact_name(index, file));
        fs::write(&dest, &text)?;
        packet.chars_used += chars;
        packet.artifacts.push(EvidenceArtifact {
            file: file.clone(),
            path: dest,
            chars,
        });
    }

    info!(
        "Evidence: {} files, {} / {} chars",
        packet.artifacts.len(),
        packet.chars_used,
        max_chars
    );
    Ok(packet)
}

/// Markdown summary of what went into the evidence folder
pub fn render_context_summary(
    entrypoints: &[RepoFile],
    closure: &ClosureResult,
    packet: &EvidencePacket,
    budgets: Budgets,
) -> String {
    let mut lines = vec!["# Context Summary".to_string(), "## Selected entrypoints".to_string()];
    lines.extend(entrypoints.iter().map(|f| format!("- {}", f)));
    lines.push("## Files included".to_string());
    lines.extend(closure.files.iter().map(|f| format!("- {}", f)));
    lines.push("## Import edges followed".to_string());
    lines.extend(
        closure
            .edges
            .iter()
            .map(|e| format!("- {} -> {} ({})", e.from, e.to, e.import)),
    );
    lines.push("## Budgets used".to_string());
    lines.push(format!("- files: {} / {}", closure.files.len(), budgets.max_files));
    lines.push(format!("- chars: {} / {}", packet.chars_used, budgets.max_chars));
    lines.join("\n")
}

pub fn write_context_summary(
    path: &Path,
    entrypoints: &[RepoFile],
    closure: &ClosureResult,
    packet: &EvidencePacket,
    budgets: Budgets,
) -> Result<String> {
    let summary = render_context_summary(entrypoints, closure, packet, budgets);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &summary)?;
    Ok(summary)
}

/// Context handed to the codegen oracle: the summary followed by every artifact's text
pub fn render_oracle_context(summary: &str, packet: &EvidencePacket) -> Result<String> {
    let mut context = summary.to_string();
    for artifact in &packet.artifacts {
        let text = fs::read_to_string(&artifact.path)?;
        context.push_str(&format!("\n\n## File: {}\n```python\n{}\n```", artifact.file, text.trim_end()));
    }
    Ok(context)
}
