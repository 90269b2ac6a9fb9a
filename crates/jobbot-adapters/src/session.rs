use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use jobbot_core::{normalize_listing_url, TrackerEntry};
use jobbot_storage::HttpFetcher;
use scraper::{Html, Selector};
use tokio::fs;
use tracing::{info, warn};
use url::Url;

use crate::{AdapterError, ApplyOutcome, BrowserSession, FetchedPage, SearchTarget};

/// Submission recorded by a [`FixtureSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub link: String,
    pub cover_letter: String,
}

/// Replays captured pages from `<root>/<source_id>/`:
/// `search.html` for searches and `apply/<slug>.html` for application forms.
#[derive(Debug)]
pub struct FixtureSession {
    root: PathBuf,
    submissions: Vec<Submission>,
}

impl FixtureSession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            submissions: Vec::new(),
        }
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    fn search_path(&self, source_id: &str) -> PathBuf {
        self.root.join(source_id).join("search.html")
    }

    fn apply_path(&self, source_id: &str, link: &str) -> PathBuf {
        self.root
            .join(source_id)
            .join("apply")
            .join(format!("{}.html", apply_fixture_slug(link)))
    }
}

async fn read_fixture(path: &Path) -> Result<String, AdapterError> {
    fs::read_to_string(path)
        .await
        .map_err(|source| AdapterError::Fixture {
            path: path.to_path_buf(),
            source,
        })
}

/// File stem under which an application form for `link` is captured: the last
/// path segment of the normalized link. Boards that address listings by query
/// (`viewjob?jk=<id>`) get the `jk` value appended, so each listing keeps its
/// own form.
pub fn apply_fixture_slug(link: &str) -> String {
    let normalized = normalize_listing_url(link);
    let without_query = normalized.split('?').next().unwrap_or_default();
    let segment = without_query
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("listing");
    let job_key = Url::parse(&normalized).ok().and_then(|url| {
        url.query_pairs()
            .find(|(key, value)| key == "jk" && !value.trim().is_empty())
            .map(|(_, value)| value.trim().to_string())
    });
    let slug = match job_key {
        Some(key) => format!("{segment}-{key}"),
        None => segment.to_string(),
    };
    slug.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Checks a captured application form. Both a cover-letter field and a submit
/// control must be present for the submission to count.
fn inspect_application_form(html: &str) -> Result<ApplyOutcome, AdapterError> {
    let document = Html::parse_document(html);
    let parse = |css: &str| {
        Selector::parse(css).map_err(|e| AdapterError::Selector {
            selector: css.to_string(),
            reason: e.to_string(),
        })
    };
    let letter_field = parse("textarea")?;
    let submit = parse("button[type='submit'], [aria-label='Submit application']")?;

    if document.select(&letter_field).next().is_none() {
        return Ok(ApplyOutcome::Incomplete {
            reason: "cover letter field not found on application form".to_string(),
        });
    }
    if document.select(&submit).next().is_none() {
        return Ok(ApplyOutcome::Incomplete {
            reason: "submit control not found on application form".to_string(),
        });
    }
    Ok(ApplyOutcome::Submitted)
}

#[async_trait]
impl BrowserSession for FixtureSession {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn supports_apply(&self) -> bool {
        true
    }

    async fn open_search(&mut self, target: &SearchTarget) -> Result<FetchedPage, AdapterError> {
        let path = self.search_path(&target.source_id);
        let body = read_fixture(&path).await?;
        info!(source_id = %target.source_id, path = %path.display(), "replayed search page");
        Ok(FetchedPage {
            source_id: target.source_id.clone(),
            url: target.url.clone(),
            body,
            fetched_at: Utc::now(),
        })
    }

    async fn submit_application(
        &mut self,
        entry: &TrackerEntry,
        cover_letter: &str,
    ) -> Result<ApplyOutcome, AdapterError> {
        let path = self.apply_path(entry.source_id(), &entry.link);
        let html = read_fixture(&path).await.map_err(|err| {
            AdapterError::Apply(format!("no application form for {}: {err}", entry.link))
        })?;

        let outcome = inspect_application_form(&html)?;
        match &outcome {
            ApplyOutcome::Submitted => self.submissions.push(Submission {
                link: entry.link.clone(),
                cover_letter: cover_letter.to_string(),
            }),
            ApplyOutcome::Incomplete { reason } => {
                warn!(link = %entry.link, reason = %reason, "application form incomplete")
            }
        }
        Ok(outcome)
    }
}

/// Fetches public search pages over HTTP. Applying needs a logged-in browser
/// and is not supported.
#[derive(Debug)]
pub struct HttpSession {
    fetcher: HttpFetcher,
}

impl HttpSession {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    fn name(&self) -> &'static str {
        "http"
    }

    fn supports_apply(&self) -> bool {
        false
    }

    async fn open_search(&mut self, target: &SearchTarget) -> Result<FetchedPage, AdapterError> {
        let resp = self.fetcher.fetch_text(&target.source_id, &target.url).await?;
        Ok(FetchedPage {
            source_id: target.source_id.clone(),
            url: resp.final_url,
            body: resp.body,
            fetched_at: Utc::now(),
        })
    }

    async fn submit_application(
        &mut self,
        _entry: &TrackerEntry,
        _cover_letter: &str,
    ) -> Result<ApplyOutcome, AdapterError> {
        Err(AdapterError::Unsupported("application submission"))
    }
}
