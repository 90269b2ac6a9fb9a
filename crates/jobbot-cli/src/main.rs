use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobbot_storage::TrackerStore;
use jobbot_sync::{
    build_scheduler, dedup_tracker, report_recent_runs, JobBotConfig, Pipeline, RunMode, RunOptions,
    RunSummary,
};
use tracing::info;

mod telemetry;

#[derive(Debug, Parser)]
#[command(name = "jobbot")]
#[command(about = "Job search, cover letter and application tracker")]
struct Cli {
    /// Workspace root holding sources.yaml, rules/, fixtures/ and reports/.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Search, filter, write cover letters and apply (default).
    Run,
    /// Scrape, merge and filter without applying.
    Search,
    /// Write cover letters and apply to queued listings.
    Apply {
        /// Requeue failed entries before applying.
        #[arg(long)]
        retry_failed: bool,
    },
    /// Write cover letters for queued listings without applying.
    CoverLetters,
    /// Collapse duplicate rows in the tracker.
    Dedup,
    /// Summarize recent runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
    /// Run the full pipeline on a cron schedule until Ctrl-C.
    Schedule {
        /// Six-field cron expression in JOBBOT_SCHEDULE_TZ; overrides JOBBOT_SCHEDULE_CRON.
        #[arg(long)]
        cron: Option<String>,
    },
}

fn load_config(workspace: Option<PathBuf>) -> Result<JobBotConfig> {
    let config = match workspace {
        None => JobBotConfig::from_env(),
        Some(root) => {
            let root = root.display().to_string();
            JobBotConfig::from_lookup(|key| match key {
                "JOBBOT_WORKSPACE" => Some(root.clone()),
                _ => std::env::var(key).ok(),
            })
        }
    };
    config.context("reading configuration")
}

fn print_summary(summary: &RunSummary) {
    println!(
        "run complete: run_id={} found={} new={} filtered={} applied={} failed={} tracker={}",
        summary.run_id,
        summary.found,
        summary.new_entries,
        summary.filtered,
        summary.applied,
        summary.failed,
        summary.tracker_path
    );
    if let Some(dir) = &summary.reports_dir {
        println!("report: {dir}");
    }
}

async fn run_once(config: JobBotConfig, options: RunOptions) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let summary = pipeline.run_cycle(options).await?;
    print_summary(&summary);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init()?;

    let cli = Cli::parse();
    let config = load_config(cli.workspace)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_once(config, RunOptions::new(RunMode::Full)).await?,
        Commands::Search => run_once(config, RunOptions::new(RunMode::Search)).await?,
        Commands::Apply { retry_failed } => {
            run_once(
                config,
                RunOptions {
                    mode: RunMode::Apply,
                    retry_failed,
                },
            )
            .await?
        }
        Commands::CoverLetters => run_once(config, RunOptions::new(RunMode::CoverLetters)).await?,
        Commands::Dedup => {
            let tracker = TrackerStore::new(config.tracker_path.clone());
            let removed = dedup_tracker(&tracker).await?;
            println!("dedup complete: removed={removed} tracker={}", tracker.path().display());
        }
        Commands::Report { runs } => {
            println!("{}", report_recent_runs(&config.reports_dir(), runs)?);
        }
        Commands::Schedule { cron } => {
            let mut config = config;
            if let Some(cron) = cron {
                config.schedule_cron = cron;
            }
            let cron = config.schedule_cron.clone();
            let tz = config.schedule_tz;
            let pipeline = Arc::new(Pipeline::from_config(config).await?);
            let mut sched = build_scheduler(pipeline).await?;
            sched.start().await.context("starting scheduler")?;
            info!(%cron, %tz, "scheduler running; press Ctrl-C to stop");

            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
            info!("scheduler stopped");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn apply_accepts_retry_flag() {
        let cli = Cli::try_parse_from(["jobbot", "apply", "--retry-failed"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Apply { retry_failed: true })));
    }

    #[test]
    fn no_subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["jobbot", "--workspace", "/srv/jobbot"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.workspace, Some(PathBuf::from("/srv/jobbot")));
    }

    #[test]
    fn workspace_flag_overrides_environment() {
        let config = load_config(Some(PathBuf::from("/srv/jobbot"))).unwrap();
        assert_eq!(config.reports_dir(), PathBuf::from("/srv/jobbot/reports"));
    }
}
