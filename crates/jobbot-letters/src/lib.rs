//! Cover-letter generation behind a single capability trait.
//!
//! Two implementations exist: [`TemplateGenerator`] renders a local template and
//! [`RemoteGenerator`] calls an OpenAI-compatible chat-completions endpoint. The
//! backend is picked once from configuration by [`generator_from_config`].

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "jobbot-letters";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error)]
pub enum LetterError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("generator returned an empty letter")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LetterRequest {
    pub company: String,
    pub position: String,
}

#[async_trait]
pub trait CoverLetterGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &LetterRequest) -> Result<String, LetterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LetterBackend {
    #[default]
    Template,
    Remote,
}

impl FromStr for LetterBackend {
    type Err = LetterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "template" => Ok(Self::Template),
            "remote" | "openai" | "api" => Ok(Self::Remote),
            other => Err(LetterError::Config(format!(
                "unknown letter backend '{other}' (expected template or remote)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LetterConfig {
    pub backend: LetterBackend,
    pub applicant_name: String,
    pub skills: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for LetterConfig {
    fn default() -> Self {
        Self {
            backend: LetterBackend::Template,
            applicant_name: "Your Name".to_string(),
            skills: "Python, JavaScript, Data Analysis".to_string(),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub fn generator_from_config(config: &LetterConfig) -> Result<Box<dyn CoverLetterGenerator>, LetterError> {
    match config.backend {
        LetterBackend::Template => Ok(Box::new(TemplateGenerator::new(
            config.applicant_name.clone(),
            config.skills.clone(),
        ))),
        LetterBackend::Remote => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| LetterError::Config("LETTER_API_KEY not set".into()))?;
            Ok(Box::new(RemoteGenerator::new(
                api_key,
                config.base_url.clone(),
                config.model.clone(),
                config.skills.clone(),
                config.timeout,
            )?))
        }
    }
}

/// Strips characters outside ASCII, which form fields and file names choke on.
pub fn ascii_only(input: &str) -> String {
    input.chars().filter(char::is_ascii).collect::<String>().trim().to_string()
}

#[derive(Debug, Clone)]
pub struct TemplateGenerator {
    applicant_name: String,
    skills: String,
}

impl TemplateGenerator {
    pub fn new(applicant_name: impl Into<String>, skills: impl Into<String>) -> Self {
        Self {
            applicant_name: applicant_name.into(),
            skills: skills.into(),
        }
    }

    pub fn render(&self, request: &LetterRequest) -> String {
        let position = ascii_only(&request.position);
        let company = ascii_only(&request.company);
        let at_company = if company.is_empty() {
            String::new()
        } else {
            format!(" at {company}")
        };
        format!(
            "Dear Hiring Manager,\n\n\
             I am excited to apply for the {position} position{at_company}. With my expertise in {skills}, \
             I am confident in my ability to contribute to your team. My experience includes developing \
             scalable applications, collaborating in agile environments, and solving complex technical challenges.\n\n\
             I am particularly drawn to this role because of its focus on innovative solutions. I look forward \
             to bringing my skills and passion to your organization.\n\n\
             Thank you for considering my application.\n\n\
             Sincerely,\n{name}",
            skills = self.skills,
            name = self.applicant_name,
        )
    }
}

#[async_trait]
impl CoverLetterGenerator for TemplateGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn generate(&self, request: &LetterRequest) -> Result<String, LetterError> {
        Ok(self.render(request))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Clone)]
pub struct RemoteGenerator {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    skills: String,
}

impl std::fmt::Debug for RemoteGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl RemoteGenerator {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        skills: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LetterError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LetterError::Config(format!("building http client: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            skills: skills.into(),
        })
    }

    fn prompt(&self, request: &LetterRequest) -> String {
        format!(
            "Generate a professional cover letter for a {} position at {}. Highlight my skills in {}. \
             Keep it concise, under 200 words, and address it to 'Hiring Manager'.",
            ascii_only(&request.position),
            ascii_only(&request.company),
            self.skills
        )
    }
}

/// Pulls the letter text out of a chat-completions (or legacy completions) body.
fn extract_letter(body: &str) -> Result<String, LetterError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| LetterError::Parse(e.to_string()))?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.map(|m| m.content).or(choice.text))
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(LetterError::Empty);
    }
    Ok(text.to_string())
}

#[async_trait]
impl CoverLetterGenerator for RemoteGenerator {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn generate(&self, request: &LetterRequest) -> Result<String, LetterError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: "You write concise, professional cover letters.".into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: self.prompt(request),
                },
            ],
            max_tokens: 300,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "cover letter request failed");
                LetterError::Network(e.to_string())
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LetterError::Network(e.to_string()))?;
        if !status.is_success() {
            warn!(status = %status, "cover letter api error");
            return Err(LetterError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let letter = extract_letter(&text)?;
        debug!(company = %request.company, chars = letter.len(), "remote cover letter generated");
        Ok(letter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LetterRequest {
        LetterRequest {
            company: "Acme Corp".into(),
            position: "Python Developer \u{1F680}".into(),
        }
    }

    #[tokio::test]
    async fn template_mentions_position_company_skills_and_name() {
        let generator = TemplateGenerator::new("Ada Lovelace", "Rust, SQL");
        let letter = generator.generate(&request()).await.unwrap();
        assert!(letter.starts_with("Dear Hiring Manager,"));
        assert!(letter.contains("Python Developer position at Acme Corp"));
        assert!(letter.contains("expertise in Rust, SQL"));
        assert!(letter.ends_with("Sincerely,\nAda Lovelace"));
        assert!(letter.is_ascii());
    }

    #[test]
    fn backend_parsing() {
        assert_eq!("".parse::<LetterBackend>().unwrap(), LetterBackend::Template);
        assert_eq!("Remote".parse::<LetterBackend>().unwrap(), LetterBackend::Remote);
        assert!("carrier-pigeon".parse::<LetterBackend>().is_err());
    }

    #[test]
    fn remote_backend_requires_api_key() {
        let config = LetterConfig {
            backend: LetterBackend::Remote,
            ..LetterConfig::default()
        };
        let err = generator_from_config(&config).err().expect("missing key is rejected");
        assert!(matches!(err, LetterError::Config(_)));

        let ok = generator_from_config(&LetterConfig {
            api_key: Some("sk-test".into()),
            ..config
        })
        .unwrap();
        assert_eq!(ok.name(), "remote");
    }

    #[test]
    fn extract_letter_reads_chat_and_legacy_shapes() {
        let chat = r#"{"choices":[{"message":{"role":"assistant","content":"  Dear Hiring Manager  "}}]}"#;
        assert_eq!(extract_letter(chat).unwrap(), "Dear Hiring Manager");

        let legacy = r#"{"choices":[{"text":"Hello"}]}"#;
        assert_eq!(extract_letter(legacy).unwrap(), "Hello");

        assert!(matches!(extract_letter(r#"{"choices":[]}"#), Err(LetterError::Empty)));
        assert!(matches!(extract_letter("not json"), Err(LetterError::Parse(_))));
    }
}
