// Source tree indexing

pub mod parser;

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::errors::{PilotError, Result};
use crate::index::db::IndexDatabase;
use crate::index::{ModuleRecord, RepoFile, Repository};
use parser::{module_name_for_path, PythonParser};

/// What to do with a file that does not parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseFailurePolicy {
    /// Log a warning, leave the file out of the index and keep going
    #[default]
    Skip,
    /// Fail the whole build; the previous index is kept
    Abort,
}

/// A file left out of the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    pub file: RepoFile,
    pub reason: String,
}

/// Outcome of one index build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildReport {
    pub repositories: Vec<String>,
    pub files_indexed: usize,
    pub skipped: Vec<SkippedFile>,
    pub symbols: usize,
    pub imports: usize,
    pub elapsed_ms: u128,
}

struct SourceFile {
    file: RepoFile,
    absolute: PathBuf,
    relative: PathBuf,
}

/// Builds the structural index for a set of repositories
pub struct Indexer {
    parser: PythonParser,
    extension: String,
    exclude: Vec<String>,
    policy: ParseFailurePolicy,
    progress: Option<ProgressBar>,
}

impl Indexer {
    pub fn new() -> Self {
        Self {
            parser: PythonParser::new(),
            extension: "py".to_string(),
            exclude: Vec::new(),
            policy: ParseFailurePolicy::default(),
            progress: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    /// Directory names to leave out, in addition to `.git`
    pub fn with_exclude(mut self, exclude: Vec<String>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn with_policy(mut self, policy: ParseFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Drop and rebuild the index from every source file of every repository.
    pub fn build(&self, db: &IndexDatabase, repositories: &[Repository]) -> Result<BuildReport> {
        let started = Instant::now();

        // Phase 1: scan
        let mut sources = Vec::new();
        for repo in repositories {
            sources.extend(self.scan_repository(repo)?);
        }
        info!(
            "Found {} source files across {} repositories",
            sources.len(),
            repositories.len()
        );
        if let Some(bar) = &self.progress {
            bar.set_length(sources.len() as u64);
        }

        // Phase 2: parse and store
        let mut report = db.rebuild(repositories, |writer| {
            let mut report = BuildReport {
                repositories: repositories.iter().map(|r| r.name.clone()).collect(),
                ..BuildReport::default()
            };

            for source in &sources {
                if let Some(bar) = &self.progress {
                    bar.set_message(source.file.to_string());
                    bar.inc(1);
                }

                let parsed = match self.parse_source(source) {
                    Ok(parsed) => parsed,
                    Err(reason) => match self.policy {
                        ParseFailurePolicy::Skip => {
                            warn!("Skipping {}: {}", source.file, reason);
                            report.skipped.push(SkippedFile {
                                file: source.file.clone(),
                                reason,
                            });
                            continue;
                        }
                        ParseFailurePolicy::Abort => {
                            return Err(PilotError::IndexParse {
                                path: source.absolute.clone(),
                                reason,
                            });
                        }
                    },
                };

                let (module, parsed) = parsed;
                writer.insert_module(&module)?;
                for symbol in &parsed.symbols {
                    writer.insert_symbol(symbol)?;
                }
                for import in &parsed.imports {
                    writer.insert_import(import)?;
                }

                debug!(
                    "Indexed {}: {} symbols, {} imports",
                    source.file,
                    parsed.symbols.len(),
                    parsed.imports.len()
                );
                report.files_indexed += 1;
                report.symbols += parsed.symbols.len();
                report.imports += parsed.imports.len();
            }

            Ok(report)
        })?;

        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }

        report.elapsed_ms = started.elapsed().as_millis();
        info!(
            "Index built: {} files, {} symbols, {} imports, {} skipped in {}ms",
            report.files_indexed,
            report.symbols,
            report.imports,
            report.skipped.len(),
            report.elapsed_ms
        );

        Ok(report)
    }

    fn parse_source(
        &self,
        source: &SourceFile,
    ) -> std::result::Result<(ModuleRecord, parser::ParsedFile), String> {
        let bytes = std::fs::read(&source.absolute).map_err(|e| e.to_string())?;
        let content = String::from_utf8(bytes).map_err(|e| format!("not valid UTF-8: {}", e))?;

        let parsed = self
            .parser
            .parse(&content, &source.file)
            .map_err(|e| e.to_string())?;

        let module = ModuleRecord {
            file: source.file.clone(),
            module_name: module_name_for_path(&source.relative),
            content_hash: blake3::hash(content.as_bytes()).to_string(),
        };

        Ok((module, parsed))
    }

    fn scan_repository(&self, repo: &Repository) -> Result<Vec<SourceFile>> {
        if !repo.root.is_dir() {
            return Err(PilotError::Config(format!(
                "repository '{}' root {} is not a directory",
                repo.name,
                repo.root.display()
            )));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&repo.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_excluded(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error under {}: {}", repo.root.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.has_source_extension(entry.path()) {
                continue;
            }

            let relative = match entry.path().strip_prefix(&repo.root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => continue,
            };

            files.push(SourceFile {
                file: RepoFile::new(repo.name.clone(), relative_path_string(&relative)),
                absolute: entry.path().to_path_buf(),
                relative,
            });
        }

        debug!("Repository {} has {} source files", repo.name, files.len());
        Ok(files)
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        name == ".git" || (entry.file_type().is_dir() && self.exclude.iter().any(|e| *e == name))
    }

    fn has_source_extension(&self, path: &Path) -> bool {
        path.extension()
            .map_or(false, |ext| ext.to_string_lossy() == self.extension.as_str())
    }
}

impl Default for Indexer {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward-slash form of a relative path, independent of the host separator
pub fn relative_path_string(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
