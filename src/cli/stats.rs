use anyhow::Result;
use std::path::Path;

use patchpilot::index::db::IndexDatabase;

pub async fn show_stats(project: String, config: Option<String>, verbose: bool) -> Result<()> {
    let config = super::load(&project, config.as_deref())?;
    let db_path = &config.index.path;
    let db = IndexDatabase::open(db_path)?;
    let stats = db.get_stats()?;

    println!("patchpilot statistics v{}", env!("CARGO_PKG_VERSION"));
    println!("Database: {}", db_path.display());
    if let Some(built_at) = &stats.built_at {
        println!("Built at: {}", built_at);
    }

    println!("\nIndex Statistics:");
    println!("  Modules: {}", stats.total_modules());
    println!("  Symbols: {}", stats.total_symbols());
    println!("  Imports: {}", stats.total_imports());
    println!("  Index size: {:.2} MB", get_db_size(db_path)?);

    if verbose {
        println!("\nRepositories:");
        for repo in &stats.repositories {
            println!(
                "  {}: {} modules, {} symbols, {} imports",
                repo.name, repo.modules, repo.symbols, repo.imports
            );
        }

        if !stats.symbols_by_kind.is_empty() {
            println!("Symbols by kind:");
            for (kind, count) in &stats.symbols_by_kind {
                println!("  {}: {}", kind, count);
            }
        }
    }

    Ok(())
}

fn get_db_size(db_path: &Path) -> Result<f64> {
    let metadata = std::fs::metadata(db_path)?;
    Ok(metadata.len() as f64 / (1024.0 * 1024.0))
}
