//! Job application pipeline: merge scraped listings into the tracker, filter
//! them, write cover letters, apply, and report.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub mod config;
pub mod filter;
pub mod merge;
pub mod pipeline;
pub mod report;
pub mod tracker;

pub use config::{
    JobBotConfig, SessionKind, SourceConfig, SourceRegistry, DEFAULT_SCHEDULE_CRON, DEFAULT_SCHEDULE_TZ,
};
pub use filter::{ExclusionReason, FilterDecision, FilterRules};
pub use merge::{dedupe_entries, merge_new_listings, MergeEngine, MergeOutcome};
pub use pipeline::{dedup_tracker, open_session, ListingLine, Pipeline, RunMode, RunOptions, RunSummary};
pub use report::{report_recent_runs, write_run_report};
pub use tracker::{Stage, TransitionError};

pub const CRATE_NAME: &str = "jobbot-sync";

/// Registers a full run on the pipeline's cron expression, read in the
/// configured zone. The caller starts and shuts down the returned scheduler.
pub async fn build_scheduler(pipeline: Arc<Pipeline>) -> Result<JobScheduler> {
    let cron = pipeline.config().schedule_cron.clone();
    let tz = pipeline.config().schedule_tz;
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let job = Job::new_async_tz(cron.as_str(), tz, move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            info!("scheduled run triggered");
            match pipeline.run_cycle(RunOptions::new(RunMode::Full)).await {
                Ok(summary) => info!(run_id = %summary.run_id, applied = summary.applied, "scheduled run finished"),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron} ({tz})"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}
