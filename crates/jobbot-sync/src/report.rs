use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobbot_core::ApplicationStatus;
use jobbot_notify::Notification;
use jobbot_storage::write_atomic;
use tracing::warn;

use crate::pipeline::RunSummary;

pub const SUMMARY_SUBJECT: &str = "Weekly Job Listings from Job Bot";
pub const FAILURE_SUBJECT: &str = "Job Bot Failure";

/// Writes `<reports_root>/<run_id>/run_summary.json` and `brief.md`.
pub async fn write_run_report(reports_root: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let run_dir = reports_root.join(summary.run_id.to_string());

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    write_atomic(&run_dir.join("run_summary.json"), &json)
        .await
        .context("writing run_summary.json")?;
    write_atomic(&run_dir.join("brief.md"), render_brief(summary).as_bytes())
        .await
        .context("writing brief.md")?;

    Ok(run_dir)
}

pub fn render_brief(summary: &RunSummary) -> String {
    let mut source_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for line in &summary.listings {
        *source_counts.entry(line.source.as_str()).or_default() += 1;
    }

    let mut out = format!(
        "# Job Bot Run Brief\n\n- Run ID: `{}`\n- Mode: {:?}\n- Started: {}\n- Finished: {}\n\n## Counts\n\
         - Found: {}\n- New: {}\n- Filtered: {}\n- Duplicates: {}\n- Malformed: {}\n\
         - Cover letters: {}\n- Applied: {}\n- Failed: {}\n",
        summary.run_id,
        summary.mode,
        summary.started_at,
        summary.finished_at,
        summary.found,
        summary.new_entries,
        summary.filtered,
        summary.duplicates,
        summary.malformed,
        summary.letters_generated,
        summary.applied,
        summary.failed,
    );

    if !source_counts.is_empty() {
        out.push_str("\n## Eligible by Source\n");
        for (source, count) in &source_counts {
            out.push_str(&format!("- {source}: {count}\n"));
        }
    }
    if !summary.listings.is_empty() {
        out.push_str("\n## Listings\n");
        for line in &summary.listings {
            out.push_str(&format!(
                "- [{}]({}) at {} ({})\n",
                line.title, line.link, line.company, line.status
            ));
        }
    }
    if !summary.source_errors.is_empty() {
        out.push_str("\n## Source Errors\n");
        for err in &summary.source_errors {
            out.push_str(&format!("- {err}\n"));
        }
    }
    out
}

pub fn summary_notification(summary: &RunSummary) -> Notification {
    let mut body = format!(
        "Found {} jobs (applied to {}):\n",
        summary.listings.len(),
        summary.applied
    );
    for line in &summary.listings {
        let marker = if line.status == ApplicationStatus::Applied {
            " [Applied]"
        } else {
            ""
        };
        body.push_str(&format!("- {} ({}): {}{marker}\n", line.title, line.source, line.link));
    }
    body.push_str(&format!(
        "\nScraped {}, new {}, filtered {}, applied {}, failed {}.",
        summary.found, summary.new_entries, summary.filtered, summary.applied, summary.failed
    ));
    Notification::new(SUMMARY_SUBJECT, body)
}

pub fn failure_notification(err: &anyhow::Error, at: DateTime<Utc>) -> Notification {
    Notification::new(
        FAILURE_SUBJECT,
        format!("Job bot run aborted at {}: {err:#}", at.to_rfc3339()),
    )
}

/// Markdown digest of the most recent `runs` reports under `reports_root`.
pub fn report_recent_runs(reports_root: &Path, runs: usize) -> Result<String> {
    let mut summaries = Vec::new();
    let dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false));

    for dir in dirs {
        let path = dir.path().join("run_summary.json");
        let parsed = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))
            .and_then(|text| {
                serde_json::from_str::<RunSummary>(&text)
                    .with_context(|| format!("parsing {}", path.display()))
            });
        match parsed {
            Ok(summary) => summaries.push((dir.path(), summary)),
            Err(err) => warn!(error = %format!("{err:#}"), "skipping unreadable run report"),
        }
    }
    summaries.sort_by(|a, b| b.1.started_at.cmp(&a.1.started_at));

    let mut lines = vec!["# Job Bot Recent Runs".to_string(), String::new()];
    if summaries.is_empty() {
        lines.push("No runs recorded yet.".to_string());
    }
    for (dir, summary) in summaries.into_iter().take(runs.max(1)) {
        lines.push(format!("## Run `{}`", summary.run_id));
        lines.push(format!("- started: {}", summary.started_at.to_rfc3339()));
        lines.push(format!("- mode: {:?}", summary.mode));
        lines.push(format!(
            "- found {}, new {}, filtered {}, applied {}, failed {}",
            summary.found, summary.new_entries, summary.filtered, summary.applied, summary.failed
        ));
        let brief = dir.join("brief.md");
        if brief.exists() {
            lines.push(format!("- brief: `{}`", brief.display()));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}
