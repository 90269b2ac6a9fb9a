use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
struct FilterRulesFile {
    #[allow(dead_code)]
    #[serde(default)]
    version: u32,
    #[serde(default)]
    include_keywords: Vec<String>,
    #[serde(default)]
    exclude_keywords: Vec<String>,
    #[serde(default)]
    excluded_companies: Vec<String>,
}

/// Case-insensitive substring rules over title and company. Terms are stored
/// lowercased; blank terms are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRules {
    include_keywords: Vec<String>,
    exclude_keywords: Vec<String>,
    excluded_companies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    ExcludedCompany(String),
    ExcludedKeyword(String),
    NoIncludeMatch,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExcludedCompany(term) => write!(f, "excluded company '{term}'"),
            Self::ExcludedKeyword(term) => write!(f, "excluded keyword '{term}' in title"),
            Self::NoIncludeMatch => f.write_str("title matches no include keyword"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Eligible,
    Excluded(ExclusionReason),
}

impl FilterDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

fn normalize_terms<I, S>(terms: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    terms
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn first_match<'a>(haystack: &str, terms: &'a [String]) -> Option<&'a String> {
    terms.iter().find(|term| haystack.contains(term.as_str()))
}

impl FilterRules {
    pub fn new<I, S>(include_keywords: I, exclude_keywords: I, excluded_companies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            include_keywords: normalize_terms(include_keywords),
            exclude_keywords: normalize_terms(exclude_keywords),
            excluded_companies: normalize_terms(excluded_companies),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: FilterRulesFile = serde_yaml::from_str(text).context("parsing filter rules")?;
        Ok(Self::new(
            file.include_keywords,
            file.exclude_keywords,
            file.excluded_companies,
        ))
    }

    /// Reads `rules/filters.yaml`. A missing file means no restrictions.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "filter rules not found; every listing is eligible");
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn include_keywords(&self) -> &[String] {
        &self.include_keywords
    }

    pub fn exclude_keywords(&self) -> &[String] {
        &self.exclude_keywords
    }

    pub fn excluded_companies(&self) -> &[String] {
        &self.excluded_companies
    }

    /// Exclusion dominates inclusion: company rules first, then title
    /// exclusions, then the include requirement.
    pub fn evaluate(&self, title: &str, company: &str) -> FilterDecision {
        let title = title.to_lowercase();
        let company = company.to_lowercase();

        if let Some(term) = first_match(&company, &self.excluded_companies) {
            return FilterDecision::Excluded(ExclusionReason::ExcludedCompany(term.clone()));
        }
        if let Some(term) = first_match(&title, &self.exclude_keywords) {
            return FilterDecision::Excluded(ExclusionReason::ExcludedKeyword(term.clone()));
        }
        if !self.include_keywords.is_empty() && first_match(&title, &self.include_keywords).is_none() {
            return FilterDecision::Excluded(ExclusionReason::NoIncludeMatch);
        }
        FilterDecision::Eligible
    }
}
