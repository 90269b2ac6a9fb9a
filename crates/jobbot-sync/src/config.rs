use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use jobbot_letters::{LetterBackend, LetterConfig};
use jobbot_notify::NotifyConfig;
use serde::Deserialize;
use tokio::fs;

pub const DEFAULT_SCHEDULE_CRON: &str = "0 0 9 * * Mon";
pub const DEFAULT_SCHEDULE_TZ: Tz = Tz::America__Los_Angeles;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionKind {
    /// Replays captured pages from `fixtures/`.
    #[default]
    Fixture,
    /// Fetches live search pages; cannot apply.
    Http,
}

impl FromStr for SessionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "fixture" | "fixtures" => Ok(Self::Fixture),
            "http" => Ok(Self::Http),
            other => bail!("unknown session '{other}' (expected fixture or http)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobBotConfig {
    pub workspace_root: PathBuf,
    pub tracker_path: PathBuf,
    pub cover_letter_dir: PathBuf,
    pub fixtures_dir: PathBuf,
    pub target_applications: usize,
    pub session: SessionKind,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub apply_delay: Duration,
    pub schedule_cron: String,
    /// Zone the cron expression is read in.
    pub schedule_tz: Tz,
    pub letters: LetterConfig,
    pub notify: NotifyConfig,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_blank(lookup(key)) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid {key}='{raw}': {e}")),
        None => Ok(default),
    }
}

fn resolve(root: &Path, value: Option<String>, default: &str) -> PathBuf {
    let path = PathBuf::from(non_blank(value).unwrap_or_else(|| default.to_string()));
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

impl JobBotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Relative paths resolve
    /// against the workspace root.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let workspace_root = PathBuf::from(non_blank(lookup("JOBBOT_WORKSPACE")).unwrap_or_else(|| ".".into()));
        let tracker_path = resolve(&workspace_root, lookup("JOBBOT_TRACKER_PATH"), "Job_Tracker.csv");
        let cover_letter_dir = resolve(&workspace_root, lookup("JOBBOT_COVER_LETTER_DIR"), "Cover_Letters");
        let fixtures_dir = workspace_root.join("fixtures");

        let target_applications = parse_var(&lookup, "JOBBOT_TARGET_APPLICATIONS", 5usize)?;
        let session = parse_var(&lookup, "JOBBOT_SESSION", SessionKind::Fixture)?;
        let http_timeout_secs = parse_var(&lookup, "JOBBOT_HTTP_TIMEOUT_SECS", 20u64)?;
        let apply_delay_ms = parse_var(&lookup, "JOBBOT_APPLY_DELAY_MS", 3000u64)?;
        let schedule_tz = parse_var(&lookup, "JOBBOT_SCHEDULE_TZ", DEFAULT_SCHEDULE_TZ)?;
        let backend = parse_var(&lookup, "LETTER_BACKEND", LetterBackend::Template)
            .context("reading cover letter settings")?;

        let defaults = LetterConfig::default();
        let letters = LetterConfig {
            backend,
            applicant_name: non_blank(lookup("JOBBOT_APPLICANT_NAME")).unwrap_or(defaults.applicant_name),
            skills: non_blank(lookup("JOBBOT_USER_SKILLS")).unwrap_or(defaults.skills),
            api_key: non_blank(lookup("LETTER_API_KEY")),
            base_url: non_blank(lookup("LETTER_API_BASE_URL")).unwrap_or(defaults.base_url),
            model: non_blank(lookup("LETTER_MODEL")).unwrap_or(defaults.model),
            timeout: defaults.timeout,
        };

        let notify = NotifyConfig {
            postmark_token: non_blank(lookup("POSTMARK_SERVER_TOKEN")),
            email_from: non_blank(lookup("EMAIL_FROM")),
            email_to: non_blank(lookup("EMAIL_TO")),
            admin_email: non_blank(lookup("ADMIN_EMAIL")),
            slack_webhook_url: non_blank(lookup("SLACK_WEBHOOK_URL")),
            ..NotifyConfig::default()
        };

        Ok(Self {
            workspace_root,
            tracker_path,
            cover_letter_dir,
            fixtures_dir,
            target_applications,
            session,
            user_agent: non_blank(lookup("JOBBOT_USER_AGENT")).unwrap_or_else(|| "jobbot/0.1".to_string()),
            http_timeout_secs,
            apply_delay: Duration::from_millis(apply_delay_ms),
            schedule_cron: non_blank(lookup("JOBBOT_SCHEDULE_CRON"))
                .unwrap_or_else(|| DEFAULT_SCHEDULE_CRON.to_string()),
            schedule_tz,
            letters,
            notify,
        })
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }

    pub fn filters_path(&self) -> PathBuf {
        self.workspace_root.join("rules").join("filters.yaml")
    }

    pub fn sources_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub search_urls: Vec<String>,
    /// Only easy-style apply sources are submitted.
    #[serde(default)]
    pub apply_enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SourceRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    pub fn apply_enabled(&self, source_id: &str) -> bool {
        self.get(source_id).is_some_and(|s| s.enabled && s.apply_enabled)
    }
}
