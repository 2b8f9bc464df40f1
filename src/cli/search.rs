use anyhow::Result;

use patchpilot::index::db::IndexDatabase;
use patchpilot::query::navigate;

pub async fn search_index(
    query: String,
    limit: usize,
    navigate_terms: bool,
    project: String,
    config: Option<String>,
    format: String,
) -> Result<()> {
    let config = super::load(&project, config.as_deref())?;
    let db = IndexDatabase::open(&config.index.path)?;

    let (hits, reason) = if navigate_terms {
        let navigation = navigate(&db, &query, limit)?;
        (navigation.entrypoints, Some(navigation.reason))
    } else {
        (db.search(&query, limit)?, None)
    };

    match format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        _ => {
            if let Some(reason) = reason {
                println!("{}", reason);
            }
            if hits.is_empty() {
                println!("No symbols match '{}'", query);
            }
            for hit in &hits {
                println!("{}/{}:{}  {} {}", hit.repo, hit.file_path, hit.line, hit.kind, hit.symbol);
            }
        }
    }

    Ok(())
}
