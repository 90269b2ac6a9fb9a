//! Core domain model for JobBot: scraped listings and persisted tracker entries.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const CRATE_NAME: &str = "jobbot-core";

/// Query parameters that only carry click-tracking state.
const TRACKING_PARAMS: &[&str] = &[
    "trk", "trkinfo", "refid", "trackingid", "ebp", "from", "vjs", "tk", "gclid", "fbclid",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("malformed listing from {source_id}: missing {field}")]
    Malformed {
        source_id: String,
        field: &'static str,
    },
}

/// Parsed handoff contract from source parsers into the merge pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub source_id: String,
    pub native_id: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
}

/// Normalized, immutable job posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub url: String,
    pub source: String,
    pub discovered_at: DateTime<Utc>,
}

impl Listing {
    /// Builds a listing with a stable id. Records without a title or url are rejected.
    pub fn from_raw(raw: RawListing, discovered_at: DateTime<Utc>) -> Result<Self, RecordError> {
        let RawListing {
            source_id,
            native_id,
            title,
            company,
            location,
            url,
        } = raw;

        let Some(title) = non_empty(title) else {
            return Err(RecordError::Malformed {
                source_id,
                field: "title",
            });
        };
        let Some(url) = non_empty(url) else {
            return Err(RecordError::Malformed {
                source_id,
                field: "url",
            });
        };

        let id = non_empty(native_id).unwrap_or_else(|| normalize_listing_url(&url));

        Ok(Self {
            id,
            title,
            company: non_empty(company).unwrap_or_default(),
            location: non_empty(location),
            url,
            source: source_id,
            discovered_at,
        })
    }

    pub fn identity_keys(&self) -> Vec<String> {
        identity_keys(&self.source, Some(&self.id), &self.url)
    }
}

/// Canonical form of a posting URL: scheme, host, path and non-tracking query
/// parameters sorted by key. Unparseable input is returned trimmed.
pub fn normalize_listing_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    let mut kept = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect::<Vec<_>>();
    kept.sort();

    let mut out = format!(
        "{}://{}",
        parsed.scheme().to_ascii_lowercase(),
        parsed.host_str().unwrap_or_default().to_ascii_lowercase()
    );
    if let Some(port) = parsed.port() {
        out.push_str(&format!(":{port}"));
    }
    out.push_str(parsed.path().trim_end_matches('/'));
    if !kept.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        out.push('?');
        out.push_str(&query);
    }
    out
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Lookup keys under which a listing or entry is considered already known.
/// Native ids are only unique within their source, so the id key carries it.
pub fn identity_keys(source_id: &str, id: Option<&str>, url: &str) -> Vec<String> {
    let mut keys = Vec::with_capacity(2);
    if let Some(id) = id.map(str::trim).filter(|id| !id.is_empty()) {
        keys.push(format!("id:{}:{id}", source_id.trim().to_ascii_lowercase()));
    }
    let url = url.trim();
    if !url.is_empty() {
        keys.push(format!("url:{}", normalize_listing_url(url)));
    }
    keys
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Persisted application status. `ToApply` is the stored form of an eligible listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApplicationStatus {
    ToApply,
    Applied,
    Skipped,
    Failed,
    /// Any other label, usually typed in by hand ("Interviewing", "Rejected").
    /// Kept verbatim and never acted on.
    Other(String),
}

impl ApplicationStatus {
    pub fn label(&self) -> &str {
        match self {
            Self::ToApply => "To Apply",
            Self::Applied => "Applied",
            Self::Skipped => "Skipped",
            Self::Failed => "Failed",
            Self::Other(label) => label,
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ApplicationStatus {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s
            .trim()
            .to_ascii_lowercase()
            .replace([' ', '-'], "_");
        Ok(match key.as_str() {
            "to_apply" | "toapply" | "eligible" => Self::ToApply,
            "applied" => Self::Applied,
            "skipped" => Self::Skipped,
            "failed" => Self::Failed,
            _ => Self::Other(s.trim().to_string()),
        })
    }
}

impl From<String> for ApplicationStatus {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

impl From<ApplicationStatus> for String {
    fn from(value: ApplicationStatus) -> Self {
        match value {
            ApplicationStatus::Other(label) => label,
            known => known.label().to_string(),
        }
    }
}

/// One row of the tracker. The first seven columns are the spreadsheet schema;
/// the trailing columns are optional and default to empty on older files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerEntry {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Company")]
    pub company: String,
    #[serde(rename = "Position")]
    pub position: String,
    #[serde(rename = "Status")]
    pub status: ApplicationStatus,
    #[serde(rename = "Link")]
    pub link: String,
    #[serde(rename = "Notes", default)]
    pub notes: String,
    #[serde(rename = "Cover_Letter_Path", default)]
    pub cover_letter_path: Option<String>,
    #[serde(rename = "Source", default)]
    pub source: Option<String>,
    #[serde(rename = "Location", default)]
    pub location: Option<String>,
    #[serde(rename = "Listing_Id", default)]
    pub listing_id: Option<String>,
    #[serde(rename = "Applied_At", default)]
    pub applied_at: Option<DateTime<Utc>>,
}

impl TrackerEntry {
    pub fn from_listing(listing: &Listing, status: ApplicationStatus, notes: impl Into<String>) -> Self {
        Self {
            date: listing.discovered_at.date_naive(),
            company: listing.company.clone(),
            position: listing.title.clone(),
            status,
            link: listing.url.clone(),
            notes: notes.into(),
            cover_letter_path: None,
            source: Some(listing.source.clone()),
            location: listing.location.clone(),
            listing_id: Some(listing.id.clone()),
            applied_at: None,
        }
    }

    pub fn identity_keys(&self) -> Vec<String> {
        identity_keys(self.source_id(), self.listing_id.as_deref(), &self.link)
    }

    pub fn has_cover_letter(&self) -> bool {
        self.cover_letter_path
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty())
    }

    pub fn source_id(&self) -> &str {
        self.source.as_deref().unwrap_or_default()
    }
}
