// End-to-end tests over the test_python_project fixture tree

use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

use patchpilot::evidence;
use patchpilot::index::db::IndexDatabase;
use patchpilot::index::{RepoFile, Repository, SymbolKind};
use patchpilot::indexer::Indexer;
use patchpilot::query::{navigate, ClosureResolver};

fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("test_python_project")
}

fn fixture_repositories() -> Vec<Repository> {
    vec![
        Repository::new("meridian", fixture_root().join("meridian")),
        Repository::new("meridian_aux", fixture_root().join("meridian_aux")),
    ]
}

fn build_fixture_index() -> (TempDir, IndexDatabase) {
    let dir = tempdir().unwrap();
    let db = IndexDatabase::new(dir.path().join("index.sqlite")).unwrap();
    let report = Indexer::new().build(&db, &fixture_repositories()).unwrap();
    assert!(report.skipped.is_empty(), "fixture files must parse: {:?}", report.skipped);
    (dir, db)
}

#[test]
fn test_fixture_index_contents() {
    let (_dir, db) = build_fixture_index();

    let shared = db
        .symbols_in(&RepoFile::new("meridian", "pkg/shared.py"))
        .unwrap();
    let names: Vec<(&str, SymbolKind, usize)> = shared
        .iter()
        .map(|s| (s.name.as_str(), s.kind, s.line))
        .collect();
    assert_eq!(
        names,
        vec![
            ("helper", SymbolKind::Function, 8),
            ("Ledger", SymbolKind::Class, 13),
            ("__init__", SymbolKind::Function, 20),
            ("add", SymbolKind::Function, 23),
            ("flush", SymbolKind::AsyncFunction, 26),
        ]
    );
    assert_eq!(
        shared[1].docstring,
        "In-memory ledger.\n\n    Entries are kept in insertion order."
    );

    assert_eq!(
        db.imports_of(&RepoFile::new("meridian", "pkg/shared.py")).unwrap(),
        vec!["__future__".to_string(), "json".to_string()]
    );
    assert_eq!(
        db.imports_of(&RepoFile::new("meridian", "pkg/sub/mod.py")).unwrap(),
        vec!["..".to_string(), ".".to_string()]
    );

    let init = db
        .module_for(&RepoFile::new("meridian_aux", "reports/__init__.py"))
        .unwrap()
        .unwrap();
    assert_eq!(init.module_name, "reports");
}

#[test]
fn test_search_is_case_insensitive_over_docstrings() {
    let (_dir, db) = build_fixture_index();
    let hits = db.search("MONTHLY REPORT", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].symbol, "run_report");
    assert_eq!(hits[0].repo, "meridian_aux");
}

#[test]
fn test_aux_closure_from_main() {
    let (_dir, db) = build_fixture_index();
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
    assert_eq!(result.edges.len(), 1);
    assert_eq!(result.edges[0].import, "util");
}

#[test]
fn test_package_initializer_closure_is_transitive() {
    let (_dir, db) = build_fixture_index();
    let result = ClosureResolver::new(db)
        .closure(&[RepoFile::new("meridian_aux", "reports/__init__.py")], 10)
        .unwrap();

    assert_eq!(
        result.files,
        vec![
            RepoFile::new("meridian_aux", "reports/__init__.py"),
            RepoFile::new("meridian_aux", "reports/weekly.py"),
            RepoFile::new("meridian_aux", "util.py"),
        ]
    );
}

#[test]
fn test_relative_parent_import_reaches_sibling_package_module() {
    let (_dir, db) = build_fixture_index();
    let result = ClosureResolver::new(db)
        .closure(&[RepoFile::new("meridian", "pkg/sub/mod.py")], 10)
        .unwrap();

    assert!(result
        .edges
        .iter()
        .any(|e| e.import == ".." && e.to == RepoFile::new("meridian", "pkg/shared.py")));
    assert!(result.files.contains(&RepoFile::new("meridian", "pkg/shared.py")));
    assert!(result.files.iter().all(|f| f.repo == "meridian"));
}

#[test]
fn test_navigation_then_evidence() {
    let (dir, db) = build_fixture_index();
    let navigation = navigate(&db, "Fix the monthly report row formatting", 5).unwrap();
    let entry = navigation.entry_files();
    assert!(entry.contains(&RepoFile::new("meridian_aux", "main.py")));

    let closure = ClosureResolver::new(db).closure(&entry, 10).unwrap();
    let repos: BTreeMap<String, PathBuf> = fixture_repositories()
        .into_iter()
        .map(|r| (r.name, r.root))
        .collect();
    let packet = evidence::retrieve(&repos, &closure.files, &dir.path().join("snippets"), 60_000).unwrap();

    assert_eq!(packet.artifacts.len(), closure.files.len());
    let expected: usize = closure
        .files
        .iter()
        .map(|f| {
            fs::read_to_string(repos[&f.repo].join(&f.path))
                .unwrap()
                .chars()
                .count()
        })
        .sum();
    assert_eq!(packet.chars_used, expected);
}

#[cfg(unix)]
mod workflow {
    use super::*;
    use patchpilot::config::{Config, RepositoryConfig};
    use patchpilot::controller::{Capabilities, Outcome};
    use patchpilot::oracle::{ChangeOracle, ChangeProposal, OracleError};
    use patchpilot::patch::GitApply;
    use patchpilot::runner::SystemRunner;
    use patchpilot::session::ScriptedSession;
    use std::process::Command;

    struct FixedOracle(&'static str);

    impl ChangeOracle for FixedOracle {
        fn propose(&self, _context: &str) -> Result<ChangeProposal, OracleError> {
            patchpilot::oracle::parse_proposal(self.0)
        }
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_run_applies_patch_and_passes_tests() {
        if !git_available() {
            return;
        }

        let dir = tempdir().unwrap();
        let aux = dir.path().join("meridian_aux");
        fs::create_dir_all(&aux).unwrap();
        fs::write(aux.join("main.py"), "import util\n\ndef run_report():\n    return util.value()\n").unwrap();
        fs::write(aux.join("util.py"), "def value():\n    return 1\n").unwrap();

        let mut config = Config::default();
        config.index.path = dir.path().join("index.sqlite");
        config.repositories = vec![RepositoryConfig {
            name: "meridian_aux".to_string(),
            root: aux.clone(),
        }];
        config.runner.test_command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "grep -q 'return 2' util.py".to_string(),
        ];

        let codegen = FixedOracle(
            r#"{"patch": "--- a/util.py\n+++ b/util.py\n@@ -1,2 +1,2 @@\n def value():\n-    return 1\n+    return 2\n", "tests_added": ["value returns 2"], "notes": "bump"}"#,
        );
        let debugger = FixedOracle("{}");
        let runner = SystemRunner::default();
        let mut session = ScriptedSession::new(["y"]);

        let report = patchpilot::workflow::Workflow::new(&config)
            .run(
                "run_report",
                &dir.path().join("task"),
                &mut Capabilities {
                    codegen: &codegen,
                    debugger: &debugger,
                    session: &mut session,
                    runner: &runner,
                    applier: &GitApply,
                },
            )
            .unwrap();

        assert_eq!(report.outcome, Outcome::Done);
        assert_eq!(report.patches_applied, 1);
        assert_eq!(
            fs::read_to_string(aux.join("util.py")).unwrap(),
            "def value():\n    return 2\n"
        );
        assert_eq!(
            fs::read_to_string(report.deliverable_dir.join("test_plan.md")).unwrap(),
            "value returns 2"
        );
    }
}

fn write_graph(root: &Path, imports: &[Vec<usize>]) {
    for (i, targets) in imports.iter().enumerate() {
        let body: String = targets.iter().map(|t| format!("import m{}\n", t)).collect();
        fs::write(root.join(format!("m{}.py", i)), body).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_closure_never_exceeds_bound(
        imports in prop::collection::vec(prop::collection::vec(0usize..8, 0..4), 1..8),
        seed_count in 1usize..4,
        max_files in 0usize..10,
    ) {
        let n = imports.len();
        let imports: Vec<Vec<usize>> = imports
            .into_iter()
            .map(|targets| targets.into_iter().map(|t| t % n).collect())
            .collect();

        let dir = tempdir().unwrap();
        let root = dir.path().join("repo");
        fs::create_dir_all(&root).unwrap();
        write_graph(&root, &imports);

        let db = IndexDatabase::new(dir.path().join("index.sqlite")).unwrap();
        Indexer::new().build(&db, &[Repository::new("repo", &root)]).unwrap();

        let seeds: Vec<RepoFile> = (0..seed_count.min(n))
            .map(|i| RepoFile::new("repo", format!("m{}.py", i)))
            .collect();
        let result = ClosureResolver::new(db).closure(&seeds, max_files).unwrap();

        prop_assert!(result.files.len() <= max_files);
        let unique: HashSet<&RepoFile> = result.files.iter().collect();
        prop_assert_eq!(unique.len(), result.files.len());
        for edge in &result.edges {
            prop_assert!(unique.contains(&edge.from));
        }
    }

    #[test]
    fn prop_evidence_never_exceeds_budget(
        sizes in prop::collection::vec(0usize..200, 1..10),
        max_chars in 0usize..600,
    ) {
        let dir = tempdir().unwrap();
        let root = dir.path().join("repo");
        fs::create_dir_all(&root).unwrap();

        let mut files = Vec::new();
        for (i, size) in sizes.iter().enumerate() {
            let path = format!("f{}.py", i);
            fs::write(root.join(&path), "é".repeat(*size)).unwrap();
            files.push(RepoFile::new("repo", path));
        }

        let mut repos = BTreeMap::new();
        repos.insert("repo".to_string(), root.clone());
        let packet = evidence::retrieve(&repos, &files, &dir.path().join("out"), max_chars).unwrap();

        prop_assert!(packet.chars_used <= max_chars);
        let taken = packet.artifacts.len();
        prop_assert_eq!(packet.chars_used, sizes[..taken].iter().sum::<usize>());
        if taken < sizes.len() {
            prop_assert!(packet.chars_used + sizes[taken] > max_chars);
        }
    }
}
