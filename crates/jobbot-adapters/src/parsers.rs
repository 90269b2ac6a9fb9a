use std::collections::HashSet;

use jobbot_core::RawListing;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::{AdapterError, FetchedPage};

pub trait ListingParser: Send + Sync {
    fn source_id(&self) -> &'static str;

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<RawListing>, AdapterError>;
}

/// Selector layout of a board that renders one posting per card.
#[derive(Debug, Clone, Copy)]
struct CardLayout {
    card: &'static str,
    title: &'static [&'static str],
    company: &'static [&'static str],
    location: &'static [&'static str],
    link: &'static str,
    card_id_attrs: &'static [&'static str],
    link_id_attr: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
struct CardParser {
    source_id: &'static str,
    base_url: &'static str,
    layout: CardLayout,
}

#[derive(Debug, Clone, Copy)]
struct WellfoundParser {
    base_url: &'static str,
}

pub fn linkedin_parser() -> impl ListingParser {
    CardParser {
        source_id: "linkedin",
        base_url: "https://www.linkedin.com",
        layout: CardLayout {
            card: "li.jobs-search-results__list-item",
            title: &["span.sr-only", "span.screen-reader-text", "h3.base-search-card__title"],
            company: &["a.hidden-nested-link", "h4.base-search-card__subtitle"],
            location: &["span.job-search-card__location"],
            link: "a[href]",
            card_id_attrs: &["data-job-id", "data-occludable-job-id"],
            link_id_attr: None,
        },
    }
}

pub fn indeed_parser() -> impl ListingParser {
    CardParser {
        source_id: "indeed",
        base_url: "https://www.indeed.com",
        layout: CardLayout {
            card: "div.job_seen_beacon",
            title: &["h2.jobTitle span[title]", "h2.jobTitle"],
            company: &["[data-testid='company-name']", "span.companyName"],
            location: &["[data-testid='text-location']", "div.companyLocation"],
            link: "a.jcs-JobTitle[href]",
            card_id_attrs: &[],
            link_id_attr: Some("data-jk"),
        },
    }
}

pub fn wellfound_parser() -> impl ListingParser {
    WellfoundParser {
        base_url: "https://wellfound.com",
    }
}

pub fn parser_for_source(source_id: &str) -> Option<Box<dyn ListingParser>> {
    match source_id {
        "linkedin" => Some(Box::new(linkedin_parser())),
        "indeed" => Some(Box::new(indeed_parser())),
        "wellfound" => Some(Box::new(wellfound_parser())),
        _ => None,
    }
}

impl ListingParser for CardParser {
    fn source_id(&self) -> &'static str {
        self.source_id
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<RawListing>, AdapterError> {
        let document = Html::parse_document(&page.body);
        let card_sel = selector(self.layout.card)?;
        let link_sel = selector(self.layout.link)?;

        let mut seen_urls = HashSet::new();
        let mut out = Vec::new();
        for card in document.select(&card_sel) {
            let link = card.select(&link_sel).next();
            let url = link
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| resolve_link(self.base_url, href));

            let native_id = self
                .layout
                .card_id_attrs
                .iter()
                .find_map(|attr| card.value().attr(attr))
                .or_else(|| {
                    self.layout
                        .link_id_attr
                        .and_then(|attr| link.and_then(|a| a.value().attr(attr)))
                })
                .and_then(|v| text_or_none(v.to_string()));

            if let Some(url) = &url {
                if !seen_urls.insert(url.clone()) {
                    continue;
                }
            }

            out.push(RawListing {
                source_id: self.source_id.to_string(),
                native_id,
                title: first_text(card, self.layout.title)?,
                company: first_text(card, self.layout.company)?,
                location: first_text(card, self.layout.location)?,
                url,
            });
        }

        debug!(source_id = self.source_id, listings = out.len(), "parsed listing page");
        Ok(out)
    }
}

impl ListingParser for WellfoundParser {
    fn source_id(&self) -> &'static str {
        "wellfound"
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<RawListing>, AdapterError> {
        let document = Html::parse_document(&page.body);
        let card_sel = selector("div[data-test='StartupResult']")?;
        let job_sel = selector("a[href*='/jobs/']")?;

        let mut seen_urls = HashSet::new();
        let mut out = Vec::new();
        for card in document.select(&card_sel) {
            let company = first_text(card, &["h2", "a[href*='/company/']"])?;
            let location = first_text(card, &["span[data-test='JobLocation']"])?;
            for job in card.select(&job_sel) {
                let Some(url) = job
                    .value()
                    .attr("href")
                    .and_then(|href| resolve_link(self.base_url, href))
                else {
                    continue;
                };
                if !seen_urls.insert(url.clone()) {
                    continue;
                }
                out.push(RawListing {
                    source_id: "wellfound".to_string(),
                    native_id: None,
                    title: text_or_none(job.text().collect::<String>()),
                    company: company.clone(),
                    location: location.clone(),
                    url: Some(url),
                });
            }
        }

        debug!(source_id = "wellfound", listings = out.len(), "parsed listing page");
        Ok(out)
    }
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Selector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn first_text(scope: ElementRef<'_>, selectors: &[&str]) -> Result<Option<String>, AdapterError> {
    for css in selectors {
        let sel = selector(css)?;
        if let Some(text) = scope
            .select(&sel)
            .next()
            .and_then(|n| text_or_none(n.text().collect::<String>()))
        {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

fn resolve_link(base_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let base = Url::parse(base_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}
