use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use issue_scheduler_lib::commands::{self, EXIT_ERROR};
use issue_scheduler_lib::config::{merge_config, ConfigManager, SchedulerConfig};
use issue_scheduler_lib::{ClaimToken, IssueId, Scheduler};
use std::io::Write;
use std::path::PathBuf;

/// Issue Scheduler - dependency-aware scheduling of parallel work items
#[derive(Parser, Debug)]
#[command(name = "issue-scheduler")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project root directory
    #[arg(long, global = true, env = "SCHEDULER_PROJECT_ROOT", default_value = ".")]
    project_root: PathBuf,

    /// Dependency graph file (default: .scheduler/dependency-graph.yml)
    #[arg(long, global = true, env = "SCHEDULER_GRAPH")]
    graph: Option<PathBuf>,

    /// Progress file (default: .scheduler/progress.json)
    #[arg(long, global = true, env = "SCHEDULER_PROGRESS")]
    progress: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether an issue can start (exit 0 ready, 1 blocked)
    Check {
        #[arg(long)]
        issue: String,
        /// Print issue details and conflicts
        #[arg(short, long)]
        verbose: bool,
    },
    /// Atomically claim an issue (exit 0 claimed, 1 blocked)
    Claim {
        #[arg(long)]
        issue: String,
    },
    /// Mark a claimed issue complete
    Complete {
        #[arg(long)]
        issue: String,
        /// Token returned by `claim`
        #[arg(long, env = "SCHEDULER_CLAIM_TOKEN")]
        token: String,
        /// Reference to the produced result, e.g. a PR URL
        #[arg(long, alias = "pr-url")]
        result_ref: Option<String>,
    },
    /// List issues that can start now
    Ready {
        #[arg(long)]
        batch: Option<String>,
    },
    /// List pending issues that cannot start, with reasons
    Blocked,
    /// Show conflicts between an issue and in-progress work
    Conflicts {
        #[arg(long)]
        issue: String,
    },
    /// Order a group of conflicting issues
    Resolve {
        #[arg(long, default_value = "queue")]
        strategy: String,
        #[arg(required = true)]
        issues: Vec<String>,
    },
    /// Show overall and per-batch progress
    Progress,
    /// Validate the dependency graph
    Validate,
    /// Print the topological execution order
    Order,
    /// Create .scheduler/ and initialize the progress file
    Init,
}

fn main() {
    let cli = Cli::parse();

    env_logger::init();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let code = match run(cli, &mut out) {
        Ok(code) => code,
        Err(e) => {
            let _ = out.flush();
            eprintln!("ERROR: {:#}", e);
            EXIT_ERROR
        }
    };

    let _ = out.flush();
    std::process::exit(code);
}

fn load_config(cli: &Cli) -> Result<SchedulerConfig> {
    let settings = ConfigManager::new(&cli.project_root)
        .read()
        .map_err(anyhow::Error::msg)
        .context("Failed to load scheduler config")?;

    Ok(merge_config(
        &cli.project_root,
        &settings,
        cli.graph.as_deref(),
        cli.progress.as_deref(),
    ))
}

fn run(cli: Cli, out: &mut dyn Write) -> Result<i32> {
    let config = load_config(&cli)?;
    log::debug!(
        "[Main] Graph {:?}, progress {:?}",
        config.graph_path,
        config.progress_path
    );

    let json = cli.json;
    let open = || Scheduler::open(&config);

    match cli.command {
        Command::Validate => commands::validate(&config, json, out),
        Command::Init => commands::init(&config, json, out),
        Command::Check { issue, verbose } => {
            commands::check(&open()?, &IssueId::from(issue), verbose, json, out)
        }
        Command::Claim { issue } => commands::claim(&open()?, &IssueId::from(issue), json, out),
        Command::Complete {
            issue,
            token,
            result_ref,
        } => commands::complete(
            &open()?,
            &IssueId::from(issue),
            &ClaimToken::from(token.as_str()),
            result_ref.as_deref(),
            json,
            out,
        ),
        Command::Ready { batch } => commands::ready(&open()?, batch.as_deref(), json, out),
        Command::Blocked => commands::blocked(&open()?, json, out),
        Command::Conflicts { issue } => {
            commands::conflicts(&open()?, &IssueId::from(issue), json, out)
        }
        Command::Resolve { strategy, issues } => {
            let issues: Vec<IssueId> = issues.into_iter().map(IssueId::from).collect();
            commands::resolve(&open()?, &strategy, &issues, json, out)
        }
        Command::Progress => commands::progress(&open()?, json, out),
        Command::Order => commands::order(&open()?, json, out),
    }
}
