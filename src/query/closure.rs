// Bounded dependency closure over indexed import edges

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

use super::imports::{resolve_module_name, ImportSpec};
use crate::errors::Result;
use crate::index::db::IndexDatabase;
use crate::index::{RepoFile, ResolvedEdge};

/// Files reached from the seeds, in visitation order, plus every edge followed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureResult {
    pub files: Vec<RepoFile>,
    pub edges: Vec<ResolvedEdge>,
}

/// Breadth-first walk of the import graph
pub struct ClosureResolver {
    db: IndexDatabase,
}

impl ClosureResolver {
    pub fn new(db: IndexDatabase) -> Self {
        Self { db }
    }

    /// Follow imports from `seeds` until the queue drains or `max_files` is reached.
    ///
    /// Imports resolve only within the importer's repository. An edge is
    /// recorded for every match, including matches already visited; a target
    /// is only queued while `visited + queued < max_files`, so the result
    /// never holds more than `max_files` files.
    pub fn closure(&self, seeds: &[RepoFile], max_files: usize) -> Result<ClosureResult> {
        let mut result = ClosureResult::default();
        let mut visited: HashSet<RepoFile> = HashSet::new();
        let mut queued: HashSet<RepoFile> = HashSet::new();
        let mut queue: VecDeque<RepoFile> = VecDeque::new();

        for seed in seeds {
            if queue.len() >= max_files {
                break;
            }
            if queued.contains(seed) {
                continue;
            }
            if self.db.module_for(seed)?.is_none() {
                warn!("Seed {} is not in the index, skipping", seed);
                continue;
            }
            queued.insert(seed.clone());
            queue.push_back(seed.clone());
        }

        while let Some(file) = queue.pop_front() {
            if !visited.insert(file.clone()) {
                continue;
            }
            result.files.push(file.clone());

            let Some(module) = self.db.module_for(&file)? else {
                continue;
            };

            for raw in self.db.imports_of(&file)? {
                let spec = ImportSpec::parse(&raw);
                let Some(target) = resolve_module_name(&module.module_name, module.is_package(), &spec) else {
                    continue;
                };

                for matched in self.db.modules_matching(&file.repo, &target)? {
                    debug!("Edge {} -> {} ({})", file, matched.file, raw);
                    result.edges.push(ResolvedEdge {
                        from: file.clone(),
                        to: matched.file.clone(),
                        import: raw.clone(),
                    });

                    let seen = visited.contains(&matched.file) || queued.contains(&matched.file);
                    if !seen && visited.len() + queue.len() < max_files {
                        queued.insert(matched.file.clone());
                        queue.push_back(matched.file);
                    }
                }
            }
        }

        info!(
            "Closure: {} files, {} edges (max {})",
            result.files.len(),
            result.edges.len(),
            max_files
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Repository;
    use crate::indexer::Indexer;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn build(files: &[(&str, &str, &str)]) -> (TempDir, IndexDatabase) {
        let dir = tempdir().unwrap();
        let mut repos: Vec<Repository> = Vec::new();
        for (repo, rel, content) in files {
            let root = dir.path().join(repo);
            write(&root, rel, content);
            if !repos.iter().any(|r| r.name == *repo) {
                repos.push(Repository::new(*repo, root));
            }
        }
        let db = IndexDatabase::new(dir.path().join("index.sqlite")).unwrap();
        Indexer::new().build(&db, &repos).unwrap();
        (dir, db)
    }

    #[test]
    fn test_closure_follows_imports() {
        let (_dir, db) = build(&[
            ("meridian", "shared.py", "def helper():\n    return 1\n"),
            ("meridian_aux", "util.py", "def x():\n    return 1\n"),
            ("meridian_aux", "main.py", "import util\n"),
        ]);

        let result = ClosureResolver::new(db)
            .closure(&[RepoFile::new("meridian_aux", "main.py")], 5)
            .unwrap();

        assert_eq!(
            result.files,
            vec![
                RepoFile::new("meridian_aux", "main.py"),
                RepoFile::new("meridian_aux", "util.py"),
            ]
        );
        assert_eq!(
            result.edges,
            vec![ResolvedEdge {
                from: RepoFile::new("meridian_aux", "main.py"),
                to: RepoFile::new("meridian_aux", "util.py"),
                import: "util".to_string(),
            }]
        );
    }

    #[test]
    fn test_closure_is_transitive() {
        let (_dir, db) = build(&[
            ("r", "a.py", "import b\n"),
            ("r", "b.py", "import c\n"),
            ("r", "c.py", "X = 1\n"),
        ]);

        let result = ClosureResolver::new(db)
            .closure(&[RepoFile::new("r", "a.py")], 100)
            .unwrap();
        assert!(result.files.contains(&RepoFile::new("r", "c.py")));
    }

    #[test]
    fn test_closure_respects_bound() {
        let (_dir, db) = build(&[
            ("r", "a.py", "import b\nimport c\nimport d\n"),
            ("r", "b.py", ""),
            ("r", "c.py", ""),
            ("r", "d.py", ""),
        ]);

        let result = ClosureResolver::new(db)
            .closure(&[RepoFile::new("r", "a.py")], 2)
            .unwrap();
        assert_eq!(
            result.files,
            vec![RepoFile::new("r", "a.py"), RepoFile::new("r", "b.py")]
        );
        // every import is still recorded as an edge
        assert_eq!(result.edges.len(), 3);
    }

    #[test]
    fn test_relative_parent_import() {
        let (_dir, db) = build(&[
            ("r", "pkg/__init__.py", ""),
            ("r", "pkg/shared.py", "def helper(): pass\n"),
            ("r", "pkg/sub/__init__.py", ""),
            ("r", "pkg/sub/mod.py", "from .. import shared\n"),
        ]);

        let result = ClosureResolver::new(db)
            .closure(&[RepoFile::new("r", "pkg/sub/mod.py")], 10)
            .unwrap();

        let targets: Vec<&str> = result.edges.iter().map(|e| e.to.path.as_str()).collect();
        assert!(targets.contains(&"pkg/shared.py"));
        assert!(result.files.contains(&RepoFile::new("r", "pkg/shared.py")));
    }

    #[test]
    fn test_imports_do_not_cross_repositories() {
        let (_dir, db) = build(&[
            ("meridian", "util.py", ""),
            ("meridian_aux", "main.py", "import util\n"),
        ]);

        let result = ClosureResolver::new(db)
            .closure(&[RepoFile::new("meridian_aux", "main.py")], 10)
            .unwrap();
        assert_eq!(result.files, vec![RepoFile::new("meridian_aux", "main.py")]);
        assert!(result.edges.is_empty());
    }

    #[test]
    fn test_unknown_seed_yields_nothing() {
        let (_dir, db) = build(&[("r", "a.py", "")]);

        let result = ClosureResolver::new(db)
            .closure(&[RepoFile::new("r", "missing.py"), RepoFile::new("r", "a.py")], 10)
            .unwrap();
        assert_eq!(result.files, vec![RepoFile::new("r", "a.py")]);
    }

    #[test]
    fn test_cycles_record_edges_into_visited_files() {
        let (_dir, db) = build(&[
            ("r", "a.py", "import b\n"),
            ("r", "b.py", "import a\n"),
        ]);

        let result = ClosureResolver::new(db)
            .closure(&[RepoFile::new("r", "a.py")], 10)
            .unwrap();
        assert_eq!(result.files.len(), 2);
        assert_eq!(result.edges.len(), 2);
        assert_eq!(result.edges[1].to, RepoFile::new("r", "a.py"));
    }
}
