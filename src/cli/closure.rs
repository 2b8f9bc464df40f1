use anyhow::Result;

use patchpilot::index::db::IndexDatabase;
use patchpilot::query::ClosureResolver;

pub async fn show_closure(
    seeds: Vec<String>,
    max_files: Option<usize>,
    project: String,
    config: Option<String>,
    format: String,
) -> Result<()> {
    let config = super::load(&project, config.as_deref())?;
    let seeds = seeds
        .iter()
        .map(|s| super::parse_repo_file(s))
        .collect::<Result<Vec<_>>>()?;
    let max_files = max_files.unwrap_or(config.workflow.max_files);

    let db = IndexDatabase::open(&config.index.path)?;
    let result = ClosureResolver::new(db).closure(&seeds, max_files)?;

    match format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Files ({} / {}):", result.files.len(), max_files);
            for file in &result.files {
                println!("  {}", file);
            }
            println!("Edges:");
            for edge in &result.edges {
                println!("  {} -> {} ({})", edge.from, edge.to, edge.import);
            }
        }
    }

    Ok(())
}
