//! Mend CLI - unattended merge-conflict resolution
//!
//! Usage:
//!   mend resolve              Resolve the current merge's conflicts
//!   mend triage               Run verification and dispatch failures
//!   mend init                 Write default config to .mend/config.toml

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mend_agent::{AgentRuntime, HttpRuntime};
use mend_core::{EffortTier, MendConfig};
use mend_git::{GitCommand, GitExecutor, MergeRefs, SnapshotCollector};
use mend_orchestrator::{ApprovalGate, Orchestrator, ProcessVerifyRunner, RunReport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_RUNTIME_URL: &str = "http://127.0.0.1:7700";

#[derive(Parser)]
#[command(name = "mend")]
#[command(author, version, about = "Unattended merge-conflict resolution")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Agent runtime service URL (or MEND_RUNTIME_URL)
    #[arg(long)]
    runtime_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every conflict of the merge in progress, then triage CI
    Resolve {
        /// Repository path (defaults to auto-detection from cwd)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Our side of the merge
        #[arg(long, default_value = "HEAD")]
        ours: String,

        /// Their side of the merge
        #[arg(long, default_value = "MERGE_HEAD")]
        theirs: String,

        /// Conflicts processed concurrently within one group
        #[arg(long)]
        concurrency: Option<usize>,

        /// Resolution attempts per conflict
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Disable the planner+executor strategy for complex conflicts
        #[arg(long)]
        no_dual_agent: bool,

        /// Pin every session to a fixed effort tier
        #[arg(long)]
        effort: Option<EffortTier>,

        /// Verification command run once conflicts are clear
        #[arg(long)]
        verify: Option<String>,
    },

    /// Run the verification command and dispatch failures without
    /// resolving anything first
    Triage {
        /// Repository path (defaults to auto-detection from cwd)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Verification command override
        #[arg(long)]
        verify: Option<String>,
    },

    /// Write default configuration to .mend/config.toml
    Init {
        /// Repository path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let runtime_url = cli
        .runtime_url
        .or_else(|| std::env::var("MEND_RUNTIME_URL").ok())
        .unwrap_or_else(|| DEFAULT_RUNTIME_URL.to_string());

    match cli.command {
        Commands::Resolve {
            repo,
            ours,
            theirs,
            concurrency,
            max_attempts,
            no_dual_agent,
            effort,
            verify,
        } => {
            let repo_root = resolve_repo(repo).await?;
            let mut config = MendConfig::load_or_default(&repo_root)?;

            if let Some(concurrency) = concurrency {
                config.scheduler.concurrency = concurrency;
            }
            if let Some(max_attempts) = max_attempts {
                config.scheduler.max_attempts = max_attempts;
            }
            if no_dual_agent {
                config.strategy.dual_agent = false;
            }
            if effort.is_some() {
                config.strategy.pinned_effort = effort;
            }
            if verify.is_some() {
                config.verify.command = verify;
            }

            let refs = MergeRefs { ours, theirs };
            let report = run_orchestrator(config, &repo_root, refs, &runtime_url).await?;

            print_report(&report);
            if !report.success() {
                std::process::exit(1);
            }
        }

        Commands::Triage { repo, verify } => {
            let repo_root = resolve_repo(repo).await?;
            let mut config = MendConfig::load_or_default(&repo_root)?;
            if verify.is_some() {
                config.verify.command = verify;
            }

            // An empty merge still runs verification and dispatches any
            // failures to specialist sessions
            let refs = MergeRefs::default();
            let report = run_orchestrator(config, &repo_root, refs, &runtime_url).await?;

            print_report(&report);
            if !report.success() {
                std::process::exit(1);
            }
        }

        Commands::Init { path } => {
            MendConfig::write_default(&path)?;
            info!("Wrote default config to {}", path.join(".mend/config.toml").display());
        }
    }

    Ok(())
}

async fn resolve_repo(repo: Option<PathBuf>) -> Result<PathBuf> {
    match repo {
        Some(path) => Ok(path),
        None => {
            let git = GitCommand::detect()
                .await
                .context("Not inside a git repository; pass --repo")?;
            Ok(git.repo_root().clone())
        }
    }
}

async fn run_orchestrator(
    config: MendConfig,
    repo_root: &PathBuf,
    refs: MergeRefs,
    runtime_url: &str,
) -> Result<RunReport> {
    // The gate gets its own client instance: policy turns must not route
    // back through the approval hook they implement
    let policy_runtime: Arc<dyn AgentRuntime> = Arc::new(HttpRuntime::from_env(runtime_url)?);
    let gate = Arc::new(ApprovalGate::new(policy_runtime, config.models.worker));

    let runtime = Arc::new(HttpRuntime::from_env(runtime_url)?.with_approval_handler(gate.clone()));

    let collector = SnapshotCollector::new(GitCommand::new(repo_root));
    let runner = ProcessVerifyRunner::new(repo_root);

    let orchestrator = Orchestrator::new(config, runtime, gate, collector, runner);
    Ok(orchestrator.run(refs).await?)
}

fn print_report(report: &RunReport) {
    println!();
    for outcome in &report.batch.outcomes {
        let mark = if outcome.success { "ok " } else { "FAIL" };
        println!("  [{}] {} - {}", mark, outcome.path, outcome.summary);
    }

    println!(
        "\n{} resolved, {} unresolved with edits, {} unresolved without edits{}",
        report.batch.resolved,
        report.batch.unresolved_with_edits,
        report.batch.unresolved_without_edits,
        if report.batch.halted { " (batch halted)" } else { "" }
    );

    if let Some(triage) = &report.triage {
        if triage.verification_passed {
            println!("verification passed");
        } else if triage.broadcast {
            println!(
                "verification failed; log broadcast to {} resolved sessions",
                triage.matched
            );
        } else {
            println!(
                "verification failed; {} failures ({} to owning sessions, {} to specialists)",
                triage.failures, triage.matched, triage.specialists
            );
        }
    }

    println!(
        "tokens: {} in / {} out",
        report.usage.input_tokens, report.usage.output_tokens
    );
}
