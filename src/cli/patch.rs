use anyhow::{Context, Result};

use patchpilot::patch::{apply_patch_safe, summarize_patch, validate_patch, GitApply};
use patchpilot::session::{ConsoleSession, Session};

pub async fn patch_repository(
    diff_file: String,
    repository: Option<String>,
    check: bool,
    yes: bool,
    project: String,
    config: Option<String>,
) -> Result<()> {
    let config = super::load(&project, config.as_deref())?;
    let diff = std::fs::read_to_string(&diff_file).with_context(|| format!("reading {}", diff_file))?;

    let name = repository.unwrap_or_else(|| config.workflow.target_repository.clone());
    let root = config
        .repository_map()
        .remove(&name)
        .with_context(|| format!("unknown repository '{}'", name))?;

    let summary = summarize_patch(&diff);
    println!("Patch summary: {}", summary.describe());
    for target in &summary.targets {
        println!("  {}", target);
    }

    validate_patch(&diff, &root)?;
    println!("All paths stay inside {} ({})", name, root.display());
    if check {
        return Ok(());
    }

    let mut session = ConsoleSession;
    if !yes && !session.approve(&format!("Approve patch apply to {} repo?", name))? {
        println!("Patch not applied.");
        return Ok(());
    }

    apply_patch_safe(&diff, &root, &GitApply)?;
    println!("Patch applied.");
    Ok(())
}
