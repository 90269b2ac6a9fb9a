//! Browser session contracts and job-board listing parsers.
//!
//! A [`BrowserSession`] is owned by the caller and passed by `&mut` into every
//! operation that touches a job board. Parsers are pure: page markup in, raw
//! listings out.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobbot_core::{RawListing, TrackerEntry};
use jobbot_storage::FetchError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod parsers;
mod session;

pub use parsers::{
    indeed_parser, linkedin_parser, parser_for_source, wellfound_parser, ListingParser,
};
pub use session::{apply_fixture_slug, FixtureSession, HttpSession, Submission};

pub const CRATE_NAME: &str = "jobbot-adapters";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTarget {
    pub source_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub source_id: String,
    pub url: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// Result of driving an application form to the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The submission was confirmed by the board.
    Submitted,
    /// The form was opened but could not be completed.
    Incomplete { reason: String },
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
    #[error("fixture {} unavailable", path.display())]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("application failed: {0}")]
    Apply(String),
    #[error("session does not support {0}")]
    Unsupported(&'static str),
}

#[async_trait]
pub trait BrowserSession: Send {
    fn name(&self) -> &'static str;

    /// Whether `submit_application` can actually submit.
    fn supports_apply(&self) -> bool;

    async fn open_search(&mut self, target: &SearchTarget) -> Result<FetchedPage, AdapterError>;

    async fn submit_application(
        &mut self,
        entry: &TrackerEntry,
        cover_letter: &str,
    ) -> Result<ApplyOutcome, AdapterError>;

    async fn close(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Fetch one search page and parse it with the source's parser.
pub async fn scrape_listings(
    session: &mut dyn BrowserSession,
    parser: &dyn ListingParser,
    target: &SearchTarget,
) -> Result<Vec<RawListing>, AdapterError> {
    let page = session.open_search(target).await?;
    parser.parse_listing(&page)
}
