use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use patchpilot::index::db::IndexDatabase;

pub async fn index_repositories(project: String, config: Option<String>, quiet: bool) -> Result<()> {
    let config = super::load(&project, config.as_deref())?;
    if config.repositories.is_empty() {
        anyhow::bail!("no [[repositories]] configured; add them to .patchpilot.toml");
    }

    println!("patchpilot indexer v{}", env!("CARGO_PKG_VERSION"));
    for repo in &config.repositories {
        println!("Repository: {} ({})", repo.name, repo.root.display());
    }
    println!("Database: {}", config.index.path.display());

    let db = IndexDatabase::new(&config.index.path).context("opening index database")?;
    let mut indexer = config.indexer();
    if !quiet {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );
        indexer = indexer.with_progress(bar);
    }

    let report = indexer.build(&db, &config.repositories())?;
    info!("Indexed {} files in {}ms", report.files_indexed, report.elapsed_ms);

    println!("\nIndexing complete!");
    println!("Files indexed: {}", report.files_indexed);
    println!("Symbols: {}", report.symbols);
    println!("Imports: {}", report.imports);
    if !report.skipped.is_empty() {
        println!("Skipped {} files:", report.skipped.len());
        for skipped in &report.skipped {
            println!("  - {}: {}", skipped.file, skipped.reason);
        }
    }

    Ok(())
}
