// Configuration management for patchpilot

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::ControllerSettings;
use crate::errors::{PilotError, Result};
use crate::index::Repository;
use crate::indexer::{Indexer, ParseFailurePolicy};
use crate::oracle::client::DEFAULT_ENDPOINT;
use crate::runner::CommandSpec;

pub const CONFIG_FILE_NAME: &str = ".patchpilot.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub repositories: Vec<RepositoryConfig>,
    pub workflow: WorkflowConfig,
    pub runner: RunnerConfig,
    pub oracle: OracleConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub path: PathBuf,
    pub extension: String,
    pub exclude: Vec<String>,
    pub parse_failure: ParseFailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub target_repository: String,
    pub max_files: usize,
    pub max_chars: usize,
    pub max_debug_iterations: usize,
    pub max_failure_chars: usize,
    pub max_debug_patch_lines: usize,
    pub navigation_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub python: String,
    pub test_command: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub codegen_prompt: Option<PathBuf>,
    pub debug_prompt: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".patchpilot/index.sqlite"),
            extension: "py".to_string(),
            exclude: vec![
                ".git".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
                "node_modules".to_string(),
            ],
            parse_failure: ParseFailurePolicy::Skip,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            target_repository: "meridian_aux".to_string(),
            max_files: 25,
            max_chars: 60_000,
            max_debug_iterations: 3,
            max_failure_chars: 20_000,
            max_debug_patch_lines: 400,
            navigation_limit: 5,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            test_command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "pytest".to_string(),
                "-q".to_string(),
            ],
            timeout_secs: 600,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 4096,
            codegen_prompt: None,
            debug_prompt: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file; relative paths are taken from the file's directory
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| PilotError::Config(format!("{}: {}", path.display(), e)))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from project directory
    /// Looks for .patchpilot.toml in the project root
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Result<Self> {
        let config_path = project_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            tracing::info!("No {} found, using default configuration", CONFIG_FILE_NAME);
            return Ok(Self::default());
        }

        let config = Self::from_file(&config_path)?;
        tracing::info!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.index.path.is_relative() {
            self.index.path = base.join(&self.index.path);
        }
        for repo in &mut self.repositories {
            if repo.root.is_relative() {
                repo.root = base.join(&repo.root);
            }
        }
        for prompt in [&mut self.oracle.codegen_prompt, &mut self.oracle.debug_prompt]
            .into_iter()
            .flatten()
        {
            if prompt.is_relative() {
                *prompt = base.join(&*prompt);
            }
        }
    }

    pub fn repositories(&self) -> Vec<Repository> {
        self.repositories
            .iter()
            .map(|r| Repository::new(r.name.clone(), r.root.clone()))
            .collect()
    }

    /// Repository name to root
    pub fn repository_map(&self) -> BTreeMap<String, PathBuf> {
        self.repositories
            .iter()
            .map(|r| (r.name.clone(), r.root.clone()))
            .collect()
    }

    /// The repository patches are applied to and tests run in
    pub fn target_repository(&self) -> Result<Repository> {
        self.repositories
            .iter()
            .find(|r| r.name == self.workflow.target_repository)
            .map(|r| Repository::new(r.name.clone(), r.root.clone()))
            .ok_or_else(|| {
                PilotError::Config(format!(
                    "target repository '{}' is not configured",
                    self.workflow.target_repository
                ))
            })
    }

    pub fn indexer(&self) -> Indexer {
        Indexer::new()
            .with_extension(self.index.extension.clone())
            .with_exclude(self.index.exclude.clone())
            .with_policy(self.index.parse_failure)
    }

    pub fn controller_settings(&self) -> Result<ControllerSettings> {
        Ok(ControllerSettings {
            target_name: self.workflow.target_repository.clone(),
            max_iterations: self.workflow.max_debug_iterations,
            max_failure_chars: self.workflow.max_failure_chars,
            max_debug_patch_lines: self.workflow.max_debug_patch_lines,
            python: self.runner.python.clone(),
            test_command: CommandSpec::from_argv(&self.runner.test_command)?,
        })
    }

    pub fn runner_timeout(&self) -> Duration {
        Duration::from_secs(self.runner.timeout_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PilotError::Config(msg));

        // Repositories
        let mut names = HashSet::new();
        for repo in &self.repositories {
            if repo.name.trim().is_empty() {
                return invalid("Repository name cannot be empty".to_string());
            }
            if !names.insert(repo.name.as_str()) {
                return invalid(format!("Duplicate repository name: {}", repo.name));
            }
        }
        if !self.repositories.is_empty() && !names.contains(self.workflow.target_repository.as_str()) {
            return invalid(format!(
                "Target repository '{}' is not among the configured repositories",
                self.workflow.target_repository
            ));
        }

        // Index
        if self.index.extension.trim_start_matches('.').is_empty() {
            return invalid("Index extension cannot be empty".to_string());
        }

        // Budgets
        if self.workflow.max_files == 0 {
            return invalid("max_files must be greater than 0".to_string());
        }
        if self.workflow.max_chars == 0 {
            return invalid("max_chars must be greater than 0".to_string());
        }
        if self.workflow.max_failure_chars == 0 {
            return invalid("max_failure_chars must be greater than 0".to_string());
        }
        if self.workflow.max_debug_patch_lines == 0 {
            return invalid("max_debug_patch_lines must be greater than 0".to_string());
        }
        if self.workflow.navigation_limit == 0 {
            return invalid("navigation_limit must be greater than 0".to_string());
        }

        // Runner
        if self.runner.timeout_secs == 0 {
            return invalid("Runner timeout must be greater than 0".to_string());
        }
        if self.runner.test_command.is_empty() {
            return invalid("Test command cannot be empty".to_string());
        }
        if self.runner.python.trim().is_empty() {
            return invalid("Python interpreter cannot be empty".to_string());
        }

        // Logging
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return invalid(format!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return invalid(format!("Invalid log format: {}", self.logging.format));
        }

        Ok(())
    }
}

/// Load configuration: an explicit file if given, otherwise the project directory's
pub fn load_config(explicit: Option<&Path>, project_dir: &Path) -> Result<Config> {
    match explicit {
        Some(path) => Config::from_file(path),
        None => Config::from_project_dir(project_dir),
    }
}
