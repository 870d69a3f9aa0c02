//! Feed polling.
//!
//! Downloads RSS/Atom feeds and turns their items into [`FeedEntry`] values.

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::http::{HttpClient, ACCEPT_FEED};

/// A configured news feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    /// Display name, used as the source name of extracted incidents.
    pub name: String,
    /// Feed URL.
    pub url: String,
    /// Keywords that make an entry worth reading.
    pub keywords: Vec<String>,
}

/// A single item from a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEntry {
    /// Headline.
    pub title: String,
    /// Link to the full article.
    pub link: String,
    /// Teaser text, empty when the feed has none.
    pub description: String,
}

/// Parse a feed document.
///
/// Items without a link are dropped since there is no article to read.
///
/// # Errors
///
/// Returns [`Error::FeedParse`] if the document is not a recognizable feed.
pub fn parse_feed(feed_name: &str, body: &[u8]) -> Result<Vec<FeedEntry>> {
    let feed = feed_rs::parser::parse(body).map_err(|e| Error::FeedParse {
        feed: feed_name.to_string(),
        message: e.to_string(),
    })?;

    let entries = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry.links.first()?.href.trim().to_string();
            if link.is_empty() {
                return None;
            }
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();
            Some(FeedEntry {
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                link,
                description,
            })
        })
        .collect();

    Ok(entries)
}

/// Download and parse a feed.
///
/// # Errors
///
/// Returns an error if the download fails or the body is not a feed.
pub async fn fetch_feed(http: &HttpClient, source: &FeedSource) -> Result<Vec<FeedEntry>> {
    let body = http.get_text(&source.url, ACCEPT_FEED).await?;
    let entries = parse_feed(&source.name, body.as_bytes())?;
    debug!(feed = %source.name, entries = entries.len(), "Parsed feed");
    Ok(entries)
}

/// Outcome of probing a feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedProbe {
    /// Feed name.
    pub name: String,
    /// Feed URL.
    pub url: String,
    /// HTTP status, if the server answered.
    pub status: Option<u16>,
    /// Redirect target for 301/302 responses.
    pub redirect: Option<String>,
    /// Transport error, if the request failed.
    pub error: Option<String>,
}

impl FeedProbe {
    /// Check whether the feed answered with a success status.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.is_some_and(|s| (200..300).contains(&s))
    }
}

/// Check a feed URL without following redirects.
pub async fn probe_feed(http: &HttpClient, source: &FeedSource) -> FeedProbe {
    let (status, redirect, error) = match http.probe(&source.url, ACCEPT_FEED).await {
        Ok(probe) => (Some(probe.status), probe.location, None),
        Err(e) => (None, None, Some(e.to_string())),
    };
    FeedProbe {
        name: source.name.clone(),
        url: source.url.clone(),
        status,
        redirect,
        error,
    }
}
