use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobbot_adapters::{
    parser_for_source, scrape_listings, BrowserSession, FixtureSession, HttpSession, SearchTarget,
};
use jobbot_core::{ApplicationStatus, Listing, TrackerEntry};
use jobbot_letters::{generator_from_config, CoverLetterGenerator, LetterRequest};
use jobbot_notify::{default_delivery_policy, deliver_with_retry, Notifier};
use jobbot_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher, LetterStore, TrackerStore};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{JobBotConfig, SessionKind, SourceRegistry};
use crate::filter::{FilterDecision, FilterRules};
use crate::merge::{dedupe_entries, MergeEngine};
use crate::report::{failure_notification, summary_notification, write_run_report};
use crate::tracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Search, letters and apply.
    Full,
    /// Scrape, merge and filter only.
    Search,
    /// Letters and apply for entries already queued.
    Apply,
    /// Letters for queued entries, no submission.
    CoverLetters,
}

impl RunMode {
    fn searches(self) -> bool {
        matches!(self, Self::Full | Self::Search)
    }

    fn writes_letters(self) -> bool {
        !matches!(self, Self::Search)
    }

    fn submits(self) -> bool {
        matches!(self, Self::Full | Self::Apply)
    }

    fn notifies(self) -> bool {
        !matches!(self, Self::CoverLetters)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Move failed entries back to `to_apply` before the letter/apply stage.
    pub retry_failed: bool,
}

impl RunOptions {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            retry_failed: false,
        }
    }
}

/// One eligible listing as reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingLine {
    pub title: String,
    pub company: String,
    pub source: String,
    pub link: String,
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub found: usize,
    pub malformed: usize,
    pub duplicates: usize,
    pub new_entries: usize,
    pub filtered: usize,
    pub eligible: usize,
    pub requeued: usize,
    pub letters_generated: usize,
    pub applied: usize,
    pub failed: usize,
    #[serde(default)]
    pub source_errors: Vec<String>,
    #[serde(default)]
    pub listings: Vec<ListingLine>,
    pub tracker_path: String,
    #[serde(default)]
    pub reports_dir: Option<String>,
}

impl RunSummary {
    fn start(mode: RunMode, tracker_path: String) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            mode,
            started_at: now,
            finished_at: now,
            found: 0,
            malformed: 0,
            duplicates: 0,
            new_entries: 0,
            filtered: 0,
            eligible: 0,
            requeued: 0,
            letters_generated: 0,
            applied: 0,
            failed: 0,
            source_errors: Vec::new(),
            listings: Vec::new(),
            tracker_path,
            reports_dir: None,
        }
    }
}

struct PreparedLetter {
    text: String,
    generated: bool,
}

pub struct Pipeline {
    config: JobBotConfig,
    registry: SourceRegistry,
    rules: FilterRules,
    tracker: TrackerStore,
    letters: LetterStore,
    generator: Box<dyn CoverLetterGenerator>,
    notifiers: Vec<Box<dyn Notifier>>,
    alert_notifiers: Vec<Box<dyn Notifier>>,
    delivery_policy: BackoffPolicy,
}

impl Pipeline {
    pub fn new(
        config: JobBotConfig,
        registry: SourceRegistry,
        rules: FilterRules,
        generator: Box<dyn CoverLetterGenerator>,
    ) -> Self {
        let tracker = TrackerStore::new(config.tracker_path.clone());
        let letters = LetterStore::new(config.cover_letter_dir.clone());
        Self {
            config,
            registry,
            rules,
            tracker,
            letters,
            generator,
            notifiers: Vec::new(),
            alert_notifiers: Vec::new(),
            delivery_policy: default_delivery_policy(),
        }
    }

    /// Loads `sources.yaml` and `rules/filters.yaml` and wires the configured
    /// generator and notification channels.
    pub async fn from_config(config: JobBotConfig) -> Result<Self> {
        let registry = SourceRegistry::load(&config.sources_path()).await?;
        let rules = FilterRules::load(&config.filters_path()).await?;
        let generator =
            generator_from_config(&config.letters).context("configuring cover letter generator")?;
        let notifiers = config
            .notify
            .summary_notifiers()
            .context("configuring notifications")?;
        let alerts = config
            .notify
            .alert_notifiers()
            .context("configuring failure alerts")?;
        info!(
            generator = generator.name(),
            sources = registry.enabled().count(),
            notifiers = notifiers.len(),
            "pipeline configured"
        );
        Ok(Self::new(config, registry, rules, generator).with_notifiers(notifiers, alerts))
    }

    pub fn with_notifiers(
        mut self,
        notifiers: Vec<Box<dyn Notifier>>,
        alert_notifiers: Vec<Box<dyn Notifier>>,
    ) -> Self {
        self.notifiers = notifiers;
        self.alert_notifiers = alert_notifiers;
        self
    }

    pub fn with_delivery_policy(mut self, policy: BackoffPolicy) -> Self {
        self.delivery_policy = policy;
        self
    }

    pub fn config(&self) -> &JobBotConfig {
        &self.config
    }

    pub fn tracker(&self) -> &TrackerStore {
        &self.tracker
    }

    pub fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
        open_session(&self.config)
    }

    /// Opens a session, runs once and closes the session. Aborted runs raise
    /// the failure alert before the error is returned.
    pub async fn run_cycle(&self, options: RunOptions) -> Result<RunSummary> {
        let result: Result<RunSummary> = async {
            let mut session = self.open_session()?;
            let outcome = self.run(session.as_mut(), options).await;
            let closed = session.close().await;
            if let Err(err) = closed {
                warn!(session = session.name(), error = %err, "closing session failed");
            }
            outcome
        }
        .await;

        if let Err(err) = &result {
            self.send_failure_alert(err).await;
        }
        result
    }

    pub async fn run(&self, session: &mut dyn BrowserSession, options: RunOptions) -> Result<RunSummary> {
        let mut summary = RunSummary::start(options.mode, self.tracker.path().display().to_string());
        let span = info_span!("pipeline_run", run_id = %summary.run_id, mode = ?options.mode);

        async move {
            let mut entries = self.tracker.load().await;
            info!(entries = entries.len(), session = session.name(), "tracker loaded");
            let mut touched = HashSet::new();

            if options.mode.searches() {
                self.search_stage(session, &mut entries, &mut touched, &mut summary).await;
            }
            if options.retry_failed {
                summary.requeued = tracker::requeue_failed(&mut entries);
                info!(requeued = summary.requeued, "failed entries requeued");
            }
            if options.mode.writes_letters() {
                self.apply_stage(session, &mut entries, options.mode.submits(), &mut touched, &mut summary)
                    .await;
            }

            self.tracker
                .save(&entries)
                .await
                .context("writing tracker; previous file left in place")?;

            summary.listings = entries
                .iter()
                .filter(|e| touched.contains(&e.link) && e.status != ApplicationStatus::Skipped)
                .map(|e| ListingLine {
                    title: e.position.clone(),
                    company: e.company.clone(),
                    source: e.source_id().to_string(),
                    link: e.link.clone(),
                    status: e.status.clone(),
                })
                .collect();
            summary.finished_at = Utc::now();

            match write_run_report(&self.config.reports_dir(), &summary).await {
                Ok(dir) => summary.reports_dir = Some(dir.display().to_string()),
                Err(err) => warn!(error = %format!("{err:#}"), "run report not written"),
            }

            if options.mode.notifies() {
                self.notify_summary(&summary).await;
            }

            info!(
                found = summary.found,
                new = summary.new_entries,
                filtered = summary.filtered,
                applied = summary.applied,
                failed = summary.failed,
                "run complete"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    async fn search_stage(
        &self,
        session: &mut dyn BrowserSession,
        entries: &mut Vec<TrackerEntry>,
        touched: &mut HashSet<String>,
        summary: &mut RunSummary,
    ) {
        let mut engine = MergeEngine::from_entries(entries);

        for source in self.registry.enabled() {
            let Some(parser) = parser_for_source(&source.source_id) else {
                warn!(source_id = %source.source_id, "no parser registered; source skipped");
                summary
                    .source_errors
                    .push(format!("{}: no parser registered", source.source_id));
                continue;
            };

            for url in &source.search_urls {
                let target = SearchTarget {
                    source_id: source.source_id.clone(),
                    url: url.clone(),
                };
                let raws = match scrape_listings(session, parser.as_ref(), &target).await {
                    Ok(raws) => raws,
                    Err(err) => {
                        warn!(source_id = %source.source_id, url = %url, error = %err, "search failed");
                        summary.source_errors.push(format!("{}: {err}", source.source_id));
                        continue;
                    }
                };

                let discovered_at = Utc::now();
                summary.found += raws.len();
                let mut listings = Vec::with_capacity(raws.len());
                for raw in raws {
                    match Listing::from_raw(raw, discovered_at) {
                        Ok(listing) => listings.push(listing),
                        Err(err) => {
                            debug!(error = %err, "malformed listing dropped");
                            summary.malformed += 1;
                        }
                    }
                }

                let outcome = engine.merge(listings);
                summary.duplicates += outcome.duplicates;
                for listing in outcome.new_listings {
                    let decision = self.rules.evaluate(&listing.title, &listing.company);
                    match &decision {
                        FilterDecision::Eligible => {
                            summary.eligible += 1;
                            touched.insert(listing.url.clone());
                        }
                        FilterDecision::Excluded(reason) => {
                            debug!(title = %listing.title, company = %listing.company, %reason, "listing filtered");
                            summary.filtered += 1;
                        }
                    }
                    entries.push(tracker::admit_listing(&listing, &decision));
                    summary.new_entries += 1;
                }
            }
            info!(source_id = %source.source_id, found = summary.found, "source searched");
        }
    }

    async fn apply_stage(
        &self,
        session: &mut dyn BrowserSession,
        entries: &mut [TrackerEntry],
        submit: bool,
        touched: &mut HashSet<String>,
        summary: &mut RunSummary,
    ) {
        if submit && !session.supports_apply() {
            info!(session = session.name(), "session cannot submit applications; entries stay queued");
            return;
        }

        let mut attempts = 0usize;
        for entry in entries.iter_mut() {
            if entry.status != ApplicationStatus::ToApply {
                continue;
            }
            if submit {
                if summary.applied >= self.config.target_applications {
                    info!(target = self.config.target_applications, "application target reached");
                    break;
                }
                if !self.registry.apply_enabled(entry.source_id()) {
                    continue;
                }
                if attempts > 0 && !self.config.apply_delay.is_zero() {
                    tokio::time::sleep(self.config.apply_delay).await;
                }
                attempts += 1;
            } else if entry.has_cover_letter() {
                continue;
            }

            touched.insert(entry.link.clone());
            let letter = match self.prepare_letter(entry).await {
                Ok(letter) => letter,
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn!(link = %entry.link, error = %reason, "cover letter unavailable");
                    self.fail(entry, &reason, summary);
                    continue;
                }
            };
            if letter.generated {
                summary.letters_generated += 1;
            }
            if !submit {
                continue;
            }

            match session.submit_application(entry, &letter.text).await {
                Ok(outcome) => match tracker::record_outcome(entry, &outcome, Utc::now()) {
                    Ok(ApplicationStatus::Applied) => {
                        info!(company = %entry.company, position = %entry.position, "applied");
                        summary.applied += 1;
                    }
                    Ok(_) => summary.failed += 1,
                    Err(err) => warn!(link = %entry.link, error = %err, "status not updated"),
                },
                Err(err) => {
                    warn!(link = %entry.link, error = %err, "application failed");
                    self.fail(entry, &err.to_string(), summary);
                }
            }
        }
    }

    fn fail(&self, entry: &mut TrackerEntry, reason: &str, summary: &mut RunSummary) {
        match tracker::mark_failed(entry, reason) {
            Ok(()) => summary.failed += 1,
            Err(err) => warn!(error = %err, "status not updated"),
        }
    }

    /// Reuses a previously written letter when it is still readable, otherwise
    /// generates, stores and records a new one.
    async fn prepare_letter(&self, entry: &mut TrackerEntry) -> Result<PreparedLetter> {
        if let Some(path) = entry.cover_letter_path.as_deref().filter(|p| !p.trim().is_empty()) {
            match fs::read_to_string(path).await {
                Ok(text) if !text.trim().is_empty() => {
                    return Ok(PreparedLetter {
                        text,
                        generated: false,
                    })
                }
                _ => debug!(path, "recorded cover letter unreadable; regenerating"),
            }
        }

        let request = LetterRequest {
            company: entry.company.clone(),
            position: entry.position.clone(),
        };
        let text = self
            .generator
            .generate(&request)
            .await
            .with_context(|| format!("{} generator failed", self.generator.name()))?;
        let path = self
            .letters
            .store(&entry.company, &entry.position, &text)
            .await
            .context("saving cover letter")?;
        tracker::record_cover_letter(entry, &path)?;
        Ok(PreparedLetter {
            text,
            generated: true,
        })
    }

    async fn notify_summary(&self, summary: &RunSummary) {
        if self.notifiers.is_empty() {
            debug!("no notification channels configured");
            return;
        }
        if summary.listings.is_empty() {
            info!("no eligible listings; notification skipped");
            return;
        }
        let report = deliver_with_retry(&self.notifiers, &summary_notification(summary), &self.delivery_policy).await;
        if !report.all_delivered() {
            warn!(failed = report.failed.len(), "run summary not delivered on every channel");
        }
    }

    async fn send_failure_alert(&self, err: &anyhow::Error) {
        error!(error = %format!("{err:#}"), "run aborted");
        if self.alert_notifiers.is_empty() {
            return;
        }
        let notification = failure_notification(err, Utc::now());
        deliver_with_retry(&self.alert_notifiers, &notification, &self.delivery_policy).await;
    }

    pub async fn dedup_tracker(&self) -> Result<usize> {
        dedup_tracker(&self.tracker).await
    }
}

/// Collapses duplicate tracker rows left by older runs or hand edits. An
/// unreadable tracker is an error here rather than an empty collection.
pub async fn dedup_tracker(tracker: &TrackerStore) -> Result<usize> {
    let entries = tracker
        .try_load()
        .await
        .context("reading tracker for dedup")?;
    let (kept, removed) = dedupe_entries(entries);
    if removed > 0 {
        tracker.save(&kept).await.context("writing deduplicated tracker")?;
    }
    info!(removed, kept = kept.len(), "tracker deduplicated");
    Ok(removed)
}

pub fn open_session(config: &JobBotConfig) -> Result<Box<dyn BrowserSession>> {
    match config.session {
        SessionKind::Fixture => Ok(Box::new(FixtureSession::new(config.fixtures_dir.clone()))),
        SessionKind::Http => {
            let fetcher = HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(config.http_timeout_secs),
                user_agent: Some(config.user_agent.clone()),
                ..Default::default()
            })
            .context("building http client")?;
            Ok(Box::new(HttpSession::new(fetcher)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_select_stages() {
        assert!(RunMode::Full.searches() && RunMode::Full.submits());
        assert!(RunMode::Search.searches() && !RunMode::Search.writes_letters());
        assert!(!RunMode::Apply.searches() && RunMode::Apply.submits());
        assert!(RunMode::CoverLetters.writes_letters() && !RunMode::CoverLetters.submits());
        assert!(!RunMode::CoverLetters.notifies());
    }
}
