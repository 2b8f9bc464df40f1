use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "patchpilot")]
#[command(version)]
#[command(about = "Index Python repositories and drive a bounded patch/test/debug loop", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory holding .patchpilot.toml
    #[arg(short, long, global = true, default_value = ".")]
    project: String,

    /// Explicit configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index over every configured repository
    Index {
        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Search symbols by name, path or docstring
    Search {
        /// Text to look for (case-insensitive)
        query: String,

        /// Maximum number of hits
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Fall back to individual words like the run workflow does
        #[arg(short, long)]
        navigate: bool,

        /// Output format: json, text
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the bounded import closure of one or more files
    Closure {
        /// Seed files as <repo>/<path>
        #[arg(required = true)]
        seeds: Vec<String>,

        /// File bound (defaults to workflow.max_files)
        #[arg(short, long)]
        max_files: Option<usize>,

        /// Output format: json, text
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate a unified diff against a repository and optionally apply it
    Patch {
        /// Diff file
        diff: String,

        /// Repository to apply to (defaults to workflow.target_repository)
        #[arg(short, long)]
        repository: Option<String>,

        /// Only validate paths, do not apply
        #[arg(long)]
        check: bool,

        /// Apply without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Show index statistics
    Stats {
        /// Per-repository and per-kind breakdown
        #[arg(long)]
        detailed: bool,
    },

    /// Run the whole workflow for a task description
    Run {
        /// Free-text task description
        description: String,

        /// Directory receiving evidence and deliverables
        #[arg(short, long, default_value = ".patchpilot/task")]
        task_dir: String,
    },
}

fn init_logging(debug: bool, verbose: bool, configured: Option<&patchpilot::config::LoggingConfig>) {
    let level = if debug {
        Level::DEBUG
    } else if verbose {
        Level::INFO
    } else {
        configured
            .and_then(|l| l.level.parse::<Level>().ok())
            .unwrap_or(Level::WARN)
    };

    let builder = tracing_subscriber::fmt().with_target(false);
    let compact = configured.map_or(false, |l| l.format == "compact");

    match (std::env::var("RUST_LOG").is_ok(), compact) {
        (true, true) => builder.with_env_filter(EnvFilter::from_default_env()).compact().init(),
        (true, false) => builder.with_env_filter(EnvFilter::from_default_env()).init(),
        (false, true) => builder.with_max_level(level).compact().init(),
        (false, false) => builder.with_max_level(level).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config when it loads; errors surface in the command itself.
    let logging = cli::load(&cli.project, cli.config.as_deref()).ok().map(|c| c.logging);
    init_logging(cli.debug, cli.verbose, logging.as_ref());

    info!("patchpilot v{} starting...", env!("CARGO_PKG_VERSION"));

    let project = cli.project;
    let config = cli.config;

    match cli.command {
        Commands::Index { quiet } => {
            info!("Indexing repositories for project: {}", project);
            cli::index::index_repositories(project, config, quiet).await?;
        }

        Commands::Search {
            query,
            limit,
            navigate,
            format,
        } => {
            cli::search::search_index(query, limit, navigate, project, config, format).await?;
        }

        Commands::Closure {
            seeds,
            max_files,
            format,
        } => {
            cli::closure::show_closure(seeds, max_files, project, config, format).await?;
        }

        Commands::Patch {
            diff,
            repository,
            check,
            yes,
        } => {
            cli::patch::patch_repository(diff, repository, check, yes, project, config).await?;
        }

        Commands::Stats { detailed } => {
            cli::stats::show_stats(project, config, detailed).await?;
        }

        Commands::Run { description, task_dir } => {
            info!("Running task: {}", description);
            cli::run::run_task(description, task_dir, project, config).await?;
        }
    }

    Ok(())
}
