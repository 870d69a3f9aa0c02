//! Keyword gate for feed entries.
//!
//! Only entries whose title or teaser mentions one of the configured
//! keywords are worth downloading and sending to the language model.

use tracing::trace;

use crate::feed::FeedEntry;

/// Result of checking an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relevance {
    /// The entry mentions a keyword.
    Matched {
        /// The first keyword found.
        keyword: String,
    },
    /// No keyword found.
    Skipped,
}

impl Relevance {
    /// Check whether the entry matched.
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

/// Case-insensitive substring filter.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    /// Create a filter from keywords. Blank keywords are ignored.
    #[must_use]
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// The normalized keywords.
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Check an entry's title and description.
    #[must_use]
    pub fn check(&self, entry: &FeedEntry) -> Relevance {
        let title = entry.title.to_lowercase();
        let description = entry.description.to_lowercase();

        match self
            .keywords
            .iter()
            .find(|k| title.contains(k.as_str()) || description.contains(k.as_str()))
        {
            Some(keyword) => {
                trace!(keyword = %keyword, title = %entry.title, "Entry matched");
                Relevance::Matched {
                    keyword: keyword.clone(),
                }
            }
            None => Relevance::Skipped,
        }
    }
}
