//! Outbound notifications: run summaries to the applicant and failure alerts
//! to the operator. Delivery problems are logged and reported back; they never
//! abort a run.

use std::time::Duration;

use async_trait::async_trait;
use jobbot_storage::{classify_reqwest_error, classify_status, retry_with_backoff, BackoffPolicy, RetryDisposition};
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "jobbot-notify";

const POSTMARK_URL: &str = "https://api.postmarkapp.com/email";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("delivery failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{channel} rejected message ({status}): {body}")]
    Rejected {
        channel: &'static str,
        status: u16,
        body: String,
    },
}

impl NotifyError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            NotifyError::Client(_) => RetryDisposition::NonRetryable,
            NotifyError::Transport(err) => classify_reqwest_error(err),
            NotifyError::Rejected { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkEmail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text_body: &'a str,
}

/// Sends plain-text email through the Postmark HTTP API.
#[derive(Clone)]
pub struct EmailNotifier {
    http: reqwest::Client,
    server_token: String,
    from: String,
    to: String,
}

impl std::fmt::Debug for EmailNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailNotifier")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl EmailNotifier {
    pub fn new(
        server_token: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotifyError::Client)?;
        Ok(Self {
            http,
            server_token: server_token.into(),
            from: from.into(),
            to: to.into(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = PostmarkEmail {
            from: &self.from,
            to: &self.to,
            subject: &notification.subject,
            text_body: &notification.body,
        };
        let response = self
            .http
            .post(POSTMARK_URL)
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", &self.server_token)
            .json(&payload)
            .send()
            .await?;
        check_response(self.channel(), response).await
    }
}

/// Posts `{"text": ...}` to a Slack incoming webhook.
#[derive(Clone)]
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl std::fmt::Debug for SlackNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackNotifier").finish_non_exhaustive()
    }
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotifyError::Client)?;
        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn channel(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let text = format!("*{}*\n{}", notification.subject, notification.body);
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;
        check_response(self.channel(), response).await
    }
}

async fn check_response(channel: &'static str, response: reqwest::Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Rejected {
        channel,
        status: status.as_u16(),
        body,
    })
}

/// Channel credentials. A channel with missing settings is left out.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub postmark_token: Option<String>,
    pub email_from: Option<String>,
    pub email_to: Option<String>,
    pub admin_email: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            postmark_token: None,
            email_from: None,
            email_to: None,
            admin_email: None,
            slack_webhook_url: None,
            timeout: Duration::from_secs(15),
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl NotifyConfig {
    /// Channels for the per-run summary.
    pub fn summary_notifiers(&self) -> Result<Vec<Box<dyn Notifier>>, NotifyError> {
        let mut out: Vec<Box<dyn Notifier>> = Vec::new();
        if let Some(email) = self.email_to(present(&self.email_to))? {
            out.push(Box::new(email));
        }
        if let Some(url) = present(&self.slack_webhook_url) {
            out.push(Box::new(SlackNotifier::new(url, self.timeout)?));
        }
        Ok(out)
    }

    /// Channels for operator alerts. Email goes to the admin address.
    pub fn alert_notifiers(&self) -> Result<Vec<Box<dyn Notifier>>, NotifyError> {
        let mut out: Vec<Box<dyn Notifier>> = Vec::new();
        if let Some(email) = self.email_to(present(&self.admin_email))? {
            out.push(Box::new(email));
        }
        if let Some(url) = present(&self.slack_webhook_url) {
            out.push(Box::new(SlackNotifier::new(url, self.timeout)?));
        }
        Ok(out)
    }

    fn email_to(&self, to: Option<&str>) -> Result<Option<EmailNotifier>, NotifyError> {
        match (present(&self.postmark_token), present(&self.email_from), to) {
            (Some(token), Some(from), Some(to)) => {
                Ok(Some(EmailNotifier::new(token, from, to, self.timeout)?))
            }
            _ => Ok(None),
        }
    }
}

/// What happened to one notification across all channels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sends to every channel, retrying transient failures per `policy`.
pub async fn deliver_with_retry(
    notifiers: &[Box<dyn Notifier>],
    notification: &Notification,
    policy: &BackoffPolicy,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for notifier in notifiers {
        let channel = notifier.channel();
        let result = retry_with_backoff(
            policy,
            channel,
            |_| notifier.send(notification),
            NotifyError::disposition,
        )
        .await;
        match result {
            Ok(()) => {
                info!(channel, subject = %notification.subject, "notification delivered");
                report.delivered.push(channel);
            }
            Err(err) => {
                warn!(channel, error = %err, "notification not delivered");
                report.failed.push((channel, err.to_string()));
            }
        }
    }
    report
}

/// Three attempts five seconds apart.
pub fn default_delivery_policy() -> BackoffPolicy {
    BackoffPolicy::fixed(3, Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyNotifier {
        calls: Arc<AtomicUsize>,
        failures_before_success: usize,
        status: u16,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        fn channel(&self) -> &'static str {
            "flaky"
        }

        async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(NotifyError::Rejected {
                    channel: "flaky",
                    status: self.status,
                    body: "nope".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn flaky(failures: usize, status: u16) -> (Arc<AtomicUsize>, Vec<Box<dyn Notifier>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = FlakyNotifier {
            calls: calls.clone(),
            failures_before_success: failures,
            status,
        };
        (calls, vec![Box::new(notifier)])
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy::fixed(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn transient_failure_is_retried_until_delivered() {
        let (calls, notifiers) = flaky(2, 503);
        let report = deliver_with_retry(&notifiers, &Notification::new("s", "b"), &fast_policy()).await;
        assert!(report.all_delivered());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_are_reported_not_raised() {
        let (calls, notifiers) = flaky(10, 500);
        let report = deliver_with_retry(&notifiers, &Notification::new("s", "b"), &fast_policy()).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "flaky");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (calls, notifiers) = flaky(10, 401);
        let report = deliver_with_retry(&notifiers, &Notification::new("s", "b"), &fast_policy()).await;
        assert!(!report.all_delivered());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channels_need_complete_settings() {
        let config = NotifyConfig {
            postmark_token: Some("token".into()),
            email_from: Some("bot@example.test".into()),
            email_to: Some("  ".into()),
            admin_email: Some("ops@example.test".into()),
            slack_webhook_url: None,
            timeout: Duration::from_secs(5),
        };
        assert!(config.summary_notifiers().unwrap().is_empty());

        let alerts = config.alert_notifiers().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].channel(), "email");

        let with_slack = NotifyConfig {
            slack_webhook_url: Some("https://hooks.slack.test/T/B/X".into()),
            ..config
        };
        let channels: Vec<_> = with_slack
            .summary_notifiers()
            .unwrap()
            .iter()
            .map(|n| n.channel())
            .collect();
        assert_eq!(channels, vec!["slack"]);
    }

    #[test]
    fn default_policy_is_three_attempts_five_seconds_apart() {
        let policy = default_delivery_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
    }
}
