use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::info;

use patchpilot::config::Config;
use patchpilot::controller::Capabilities;
use patchpilot::oracle::{load_template, HttpCompletionProvider, PromptedOracle, CODEGEN_TEMPLATE, DEBUGGER_TEMPLATE};
use patchpilot::patch::GitApply;
use patchpilot::runner::SystemRunner;
use patchpilot::session::ConsoleSession;
use patchpilot::workflow::{RunReport, Workflow};

pub async fn run_task(description: String, task_dir: String, project: String, config: Option<String>) -> Result<()> {
    let config = super::load(&project, config.as_deref())?;
    let task_dir = PathBuf::from(task_dir);

    info!("Running task in {}", task_dir.display());
    let report = tokio::task::spawn_blocking(move || run_blocking(&config, &description, &task_dir))
        .await
        .context("workflow thread panicked")??;

    println!("\nOutcome: {}", report.outcome);
    println!("Debug iterations: {}", report.debug_iterations);
    println!("Patches applied: {}", report.patches_applied);
    println!("Evidence: {} files, {} chars", report.files.len(), report.chars_used);
    println!("Deliverable: {}", report.deliverable_dir.display());
    Ok(())
}

fn run_blocking(config: &Config, description: &str, task_dir: &std::path::Path) -> Result<RunReport> {
    let oracle = &config.oracle;
    let provider = HttpCompletionProvider::new(&oracle.endpoint, &oracle.model, &oracle.api_key_env)
        .with_max_tokens(oracle.max_tokens);
    let codegen = PromptedOracle::new(
        load_template(oracle.codegen_prompt.as_deref(), CODEGEN_TEMPLATE).context("codegen prompt")?,
        provider.clone(),
    );
    let debugger = PromptedOracle::new(
        load_template(oracle.debug_prompt.as_deref(), DEBUGGER_TEMPLATE).context("debugger prompt")?,
        provider,
    );

    let runner = SystemRunner::new(config.runner_timeout());
    let mut session = ConsoleSession;

    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::with_template("{spinner} indexing [{bar:40}] {pos}/{len} {msg}")?);

    let report = Workflow::new(config).with_progress(bar).run(
        description,
        task_dir,
        &mut Capabilities {
            codegen: &codegen,
            debugger: &debugger,
            session: &mut session,
            runner: &runner,
            applier: &GitApply,
        },
    )?;
    Ok(report)
}
