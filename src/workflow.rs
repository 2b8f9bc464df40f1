//! End-to-end run: index, navigate, close over imports, gather evidence and
//! hand the result to the iteration controller.
//!
//! Layout under the task directory:
//!
//! ```text
//! 07_deliverable/
//!   evidence/00_navigation.json
//!   evidence/context.md
//!   evidence/snippets/NN_repo_path
//!   patch.diff, snippet.py, ... summary.md
//! ```

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Config;
use crate::controller::{Capabilities, IterationController, Outcome};
use crate::errors::{PilotError, Result};
use crate::evidence::{self, Budgets};
use crate::index::db::IndexDatabase;
use crate::index::RepoFile;
use crate::indexer::BuildReport;
use crate::query::{navigate, ClosureResolver};

pub const DELIVERABLE_DIR: &str = "07_deliverable";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: Outcome,
    pub debug_iterations: usize,
    pub patches_applied: usize,
    pub entrypoints: Vec<RepoFile>,
    pub files: Vec<RepoFile>,
    pub chars_used: usize,
    pub index: BuildReport,
    pub deliverable_dir: PathBuf,
}

pub struct Workflow<'a> {
    config: &'a Config,
    progress: Option<ProgressBar>,
}

impl<'a> Workflow<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config, progress: None }
    }

    /// Show index build progress on `progress`
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn run(&self, description: &str, task_dir: &Path, caps: &mut Capabilities<'_>) -> Result<RunReport> {
        let config = self.config;
        if config.repositories.is_empty() {
            return Err(PilotError::Config("no repositories configured".to_string()));
        }
        let target = config.target_repository()?;
        let workflow = &config.workflow;

        // Index
        let db = IndexDatabase::new(&config.index.path)?;
        let mut indexer = config.indexer();
        if let Some(bar) = &self.progress {
            indexer = indexer.with_progress(bar.clone());
        }
        let build = indexer.build(&db, &config.repositories())?;

        let deliverable = task_dir.join(DELIVERABLE_DIR);
        let evidence_dir = deliverable.join("evidence");
        fs::create_dir_all(&evidence_dir)?;

        // Navigate
        let navigation = navigate(&db, description, workflow.navigation_limit)?;
        fs::write(
            evidence_dir.join("00_navigation.json"),
            serde_json::to_string_pretty(&navigation)?,
        )?;
        let entrypoints = navigation.entry_files();
        info!("Navigator picked {} entry files: {}", entrypoints.len(), navigation.reason);

        // Closure and evidence
        let closure = ClosureResolver::new(db).closure(&entrypoints, workflow.max_files)?;
        let packet = evidence::retrieve(
            &config.repository_map(),
            &closure.files,
            &evidence_dir.join("snippets"),
            workflow.max_chars,
        )?;
        let summary = evidence::write_context_summary(
            &evidence_dir.join("context.md"),
            &entrypoints,
            &closure,
            &packet,
            Budgets {
                max_files: workflow.max_files,
                max_chars: workflow.max_chars,
            },
        )?;
        let context = evidence::render_oracle_context(&summary, &packet)?;

        // Propose, apply, evaluate, debug
        let controller = IterationController::new(config.controller_settings()?, &target.root, &deliverable);
        let report = controller.run(&context, caps)?;

        Ok(RunReport {
            outcome: report.outcome,
            debug_iterations: report.debug_iterations,
            patches_applied: report.patches_applied,
            entrypoints,
            files: closure.files,
            chars_used: packet.chars_used,
            index: build,
            deliverable_dir: deliverable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::controller::StopReason;
    use crate::oracle::{ChangeOracle, ChangeProposal, OracleError};
    use crate::patch::ApplyMechanism;
    use crate::runner::{CommandSpec, ProcessOutput, ProcessRunner};
    use crate::session::ScriptedSession;
    use tempfile::tempdir;

    struct Unavailable;

    impl ChangeOracle for Unavailable {
        fn propose(&self, _context: &str) -> std::result::Result<ChangeProposal, OracleError> {
            Err(OracleError::Unavailable("OPENAI_API_KEY is not set".to_string()))
        }
    }

    struct NeverRun;

    impl ProcessRunner for NeverRun {
        fn run(&self, command: &CommandSpec, _cwd: &Path) -> Result<ProcessOutput> {
            panic!("unexpected process: {command}");
        }
    }

    struct NeverApply;

    impl ApplyMechanism for NeverApply {
        fn apply(&self, _diff: &str, _root: &Path) -> Result<()> {
            panic!("unexpected apply");
        }
    }

    #[test]
    fn test_run_without_oracle_writes_evidence() {
        let dir = tempdir().unwrap();
        let aux = dir.path().join("meridian_aux");
        let core = dir.path().join("meridian");
        fs::create_dir_all(&aux).unwrap();
        fs::create_dir_all(&core).unwrap();
        fs::write(aux.join("main.py"), "import util\n\ndef run_report():\n    return util.x()\n").unwrap();
        fs::write(aux.join("util.py"), "def x():\n    return 1\n").unwrap();
        fs::write(core.join("shared.py"), "def helper():\n    return 2\n").unwrap();

        let mut config = Config::default();
        config.index.path = dir.path().join("index.sqlite");
        config.repositories = vec![
            RepositoryConfig {
                name: "meridian".to_string(),
                root: core,
            },
            RepositoryConfig {
                name: "meridian_aux".to_string(),
                root: aux,
            },
        ];

        let task_dir = dir.path().join("task");
        let mut session = ScriptedSession::default();
        let report = Workflow::new(&config)
            .run(
                "run_report",
                &task_dir,
                &mut Capabilities {
                    codegen: &Unavailable,
                    debugger: &Unavailable,
                    session: &mut session,
                    runner: &NeverRun,
                    applier: &NeverApply,
                },
            )
            .unwrap();

        assert_eq!(report.outcome, Outcome::Stopped(StopReason::Unresolved));
        assert_eq!(report.entrypoints, vec![RepoFile::new("meridian_aux", "main.py")]);
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.index.files_indexed, 3);

        let evidence = task_dir.join(DELIVERABLE_DIR).join("evidence");
        assert!(evidence.join("00_navigation.json").exists());
        assert!(evidence.join("snippets/01_meridian_aux_util.py").exists());
        let context = fs::read_to_string(evidence.join("context.md")).unwrap();
        assert!(context.contains("- meridian_aux/main.py -> meridian_aux/util.py (util)"));
        assert!(task_dir.join(DELIVERABLE_DIR).join("summary.md").exists());
    }

    #[test]
    fn test_run_requires_repositories() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let mut session = ScriptedSession::default();
        let err = Workflow::new(&config)
            .run(
                "anything",
                dir.path(),
                &mut Capabilities {
                    codegen: &Unavailable,
                    debugger: &Unavailable,
                    session: &mut session,
                    runner: &NeverRun,
                    applier: &NeverApply,
                },
            )
            .unwrap_err();
        assert!(matches!(err, PilotError::Config(_)));
    }
}
