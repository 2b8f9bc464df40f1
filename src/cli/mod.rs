// CLI command implementations

pub mod closure;
pub mod index;
pub mod patch;
pub mod run;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use std::path::Path;

use patchpilot::config::{load_config, Config};
use patchpilot::index::RepoFile;

/// Configuration for a command: `--config` if given, else `<project>/.patchpilot.toml`
pub fn load(project: &str, config: Option<&str>) -> Result<Config> {
    load_config(config.map(Path::new), Path::new(project))
        .with_context(|| format!("loading configuration for {}", project))
}

/// Parse `repo/path/to/file.py` into a RepoFile
pub fn parse_repo_file(raw: &str) -> Result<RepoFile> {
    let (repo, path) = raw
        .split_once('/')
        .filter(|(repo, path)| !repo.is_empty() && !path.is_empty())
        .with_context(|| format!("expected <repo>/<path>, got '{}'", raw))?;
    Ok(RepoFile::new(repo, path))
}
