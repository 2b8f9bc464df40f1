// Index storage and record types

pub mod db;
pub mod schema;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A repository to index: a short name plus its root directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub root: PathBuf,
}

impl Repository {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }
}

/// Identity of a source file: repository name plus path relative to its root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoFile {
    pub repo: String,
    pub path: String,
}

impl RepoFile {
    pub fn new(repo: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for RepoFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo, self.path)
    }
}

/// One row per parsed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub file: RepoFile,
    pub module_name: String,
    pub content_hash: String,
}

impl ModuleRecord {
    /// A package initializer is its own package for relative imports.
    pub fn is_package(&self) -> bool {
        is_package_init(&self.file.path)
    }
}

pub fn is_package_init(path: &str) -> bool {
    path.rsplit('/').next().map_or(false, |name| {
        name.strip_suffix(".py").map_or(false, |stem| stem == "__init__")
    })
}

/// Symbol kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    AsyncFunction,
    Class,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::AsyncFunction => "async_function",
            SymbolKind::Class => "class",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "function" => Some(SymbolKind::Function),
            "async_function" => Some(SymbolKind::AsyncFunction),
            "class" => Some(SymbolKind::Class),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A function, async function or class definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub file: RepoFile,
    pub name: String,
    pub kind: SymbolKind,
    pub line: usize,
    pub docstring: String,
}

/// An import as literally written, relative imports keep their leading dots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawImport {
    pub file: RepoFile,
    pub imported_module: String,
}

/// Concrete file-to-file import relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEdge {
    pub from: RepoFile,
    pub to: RepoFile,
    pub import: String,
}

/// Row returned by symbol search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolHit {
    pub repo: String,
    pub file_path: String,
    pub symbol: String,
    pub kind: SymbolKind,
    pub line: usize,
}

impl SymbolHit {
    pub fn repo_file(&self) -> RepoFile {
        RepoFile::new(self.repo.clone(), self.file_path.clone())
    }
}
