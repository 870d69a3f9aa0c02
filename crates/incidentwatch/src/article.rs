//! Article text extraction.
//!
//! News pages wrap the article body in site-specific markup. Each known site
//! gets a list of container selectors tried in order plus a selector for the
//! text-bearing elements inside the container.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::error::Result;
use crate::http::{HttpClient, ACCEPT_HTML};

/// How to find the article body on a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SiteRule {
    /// Host suffix this rule applies to.
    host: &'static str,
    /// Container selectors, first match wins.
    containers: &'static [&'static str],
    /// Elements whose text makes up the article.
    text: &'static str,
}

const SITE_RULES: &[SiteRule] = &[
    SiteRule {
        host: "mdr.de",
        containers: &[".content article", "main article", ".mdr-page__content"],
        text: "p, h1, h2, h3",
    },
    SiteRule {
        host: "taz.de",
        containers: &["article.article"],
        text: "p:not(.article__meta), h1, h2",
    },
];

const FALLBACK_RULE: SiteRule = SiteRule {
    host: "",
    containers: &["article", "main"],
    text: "p, h1, h2, h3",
};

fn rule_for(url: &str) -> &'static SiteRule {
    let host = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default();

    SITE_RULES
        .iter()
        .find(|rule| host == rule.host || host.ends_with(&format!(".{}", rule.host)))
        .unwrap_or(&FALLBACK_RULE)
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            warn!(selector = css, error = %e, "Invalid CSS selector");
            None
        }
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract the readable article text from a page.
///
/// Returns `None` when no article container is found or it holds no text.
#[must_use]
pub fn extract_article_text(html: &str, url: &str) -> Option<String> {
    let rule = rule_for(url);
    let document = Html::parse_document(html);

    let container = rule
        .containers
        .iter()
        .filter_map(|css| selector(css))
        .find_map(|sel| document.select(&sel).next())?;

    let text_selector = selector(rule.text)?;
    let text = container
        .select(&text_selector)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Download a page and extract its article text.
///
/// # Errors
///
/// Returns an error if the page cannot be downloaded. A page without
/// recognizable article content yields `Ok(None)`.
pub async fn fetch_article_text(http: &HttpClient, url: &str) -> Result<Option<String>> {
    let html = http.get_text(url, ACCEPT_HTML).await?;
    let text = extract_article_text(&html, url);
    match &text {
        Some(t) => debug!(url, chars = t.chars().count(), "Extracted article text"),
        None => debug!(url, "Could not find article content"),
    }
    Ok(text)
}
