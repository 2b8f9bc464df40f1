// Entry point selection from a task description

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;
use crate::index::db::IndexDatabase;
use crate::index::{RepoFile, SymbolHit};

const MIN_TERM_LEN: usize = 3;

static TERM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid term pattern"));

/// Symbols judged most relevant to a task, plus why
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Navigation {
    pub entrypoints: Vec<SymbolHit>,
    pub reason: String,
}

impl Navigation {
    /// Distinct files of the entry point hits, in hit order
    pub fn entry_files(&self) -> Vec<RepoFile> {
        let mut files: Vec<RepoFile> = Vec::new();
        for hit in &self.entrypoints {
            let file = hit.repo_file();
            if !files.contains(&file) {
                files.push(file);
            }
        }
        files
    }
}

/// Search the index with the whole description, then word by word.
pub fn navigate(db: &IndexDatabase, description: &str, limit: usize) -> Result<Navigation> {
    let description = description.trim();
    if description.is_empty() || limit == 0 {
        return Ok(Navigation {
            entrypoints: Vec::new(),
            reason: "Empty task description.".to_string(),
        });
    }

    let hits = db.search(description, limit)?;
    if !hits.is_empty() {
        return Ok(Navigation {
            entrypoints: hits,
            reason: "Top symbol/file matches for task query.".to_string(),
        });
    }

    let mut entrypoints: Vec<SymbolHit> = Vec::new();
    for term in TERM
        .find_iter(description)
        .map(|m| m.as_str())
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
    {
        for hit in db.search(term, limit)? {
            if entrypoints.len() >= limit {
                break;
            }
            if !entrypoints.contains(&hit) {
                debug!("Term '{}' matched {} in {}", term, hit.symbol, hit.file_path);
                entrypoints.push(hit);
            }
        }
        if entrypoints.len() >= limit {
            break;
        }
    }

    let reason = if entrypoints.is_empty() {
        "No symbol/file matched the task description.".to_string()
    } else {
        "Top symbol/file matches for individual task terms.".to_string()
    };

    Ok(Navigation { entrypoints, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Repository;
    use crate::indexer::Indexer;
    use std::fs;
    use tempfile::tempdir;

    fn db_with(files: &[(&str, &str)]) -> (tempfile::TempDir, IndexDatabase) {
        let dir = tempdir().unwrap();
        let root = dir.path().join("meridian_aux");
        for (rel, content) in files {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let db = IndexDatabase::new(dir.path().join("index.sqlite")).unwrap();
        Indexer::new()
            .build(&db, &[Repository::new("meridian_aux", root)])
            .unwrap();
        (dir, db)
    }

    #[test]
    fn test_whole_description_match() {
        let (_dir, db) = db_with(&[("billing.py", "def compute_invoice():\n    pass\n")]);
        let nav = navigate(&db, "compute_invoice", 5).unwrap();
        assert_eq!(nav.entrypoints.len(), 1);
        assert_eq!(nav.entry_files(), vec![RepoFile::new("meridian_aux", "billing.py")]);
    }

    #[test]
    fn test_falls_back_to_terms() {
        let (_dir, db) = db_with(&[
            ("billing.py", "def compute_invoice():\n    pass\n\ndef refund():\n    pass\n"),
            ("mail.py", "def send():\n    pass\n"),
        ]);
        let nav = navigate(&db, "Fix the refund rounding in invoice totals", 5).unwrap();
        let symbols: Vec<&str> = nav.entrypoints.iter().map(|h| h.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["refund", "compute_invoice"]);
        assert_eq!(nav.entry_files().len(), 1);
    }

    #[test]
    fn test_no_match() {
        let (_dir, db) = db_with(&[("a.py", "def a():\n    pass\n")]);
        let nav = navigate(&db, "zzz qqq", 5).unwrap();
        assert!(nav.entrypoints.is_empty());
    }
}
