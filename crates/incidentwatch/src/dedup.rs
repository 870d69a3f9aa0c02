//! Duplicate detection for extracted incidents.
//!
//! Cheap checks run first: a shared source URL is always a duplicate, and a
//! candidate on a day with no recorded incidents never is. Only the remaining
//! cases are put to the [`IncidentMatcher`].

use tracing::{debug, info};

use crate::error::Result;
use crate::extract::IncidentMatcher;
use crate::incident::Incident;

/// Why a candidate was judged a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not recorded yet.
    New,
    /// A recorded incident already cites one of the candidate's sources.
    SharedSource,
    /// The matcher judged it the same event as a same-day incident.
    SameEvent {
        /// Number of sources added to recorded incidents.
        merged_sources: usize,
    },
}

impl Verdict {
    /// Check whether the candidate should be dropped.
    #[must_use]
    pub fn is_duplicate(self) -> bool {
        !matches!(self, Self::New)
    }

    /// Sources this verdict added to recorded incidents.
    #[must_use]
    pub fn merged_sources(self) -> usize {
        match self {
            Self::SameEvent { merged_sources } => merged_sources,
            Self::New | Self::SharedSource => 0,
        }
    }
}

/// Compares candidates against recorded incidents.
pub struct Deduplicator<'a> {
    matcher: &'a dyn IncidentMatcher,
}

impl std::fmt::Debug for Deduplicator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator").finish_non_exhaustive()
    }
}

impl<'a> Deduplicator<'a> {
    /// Create a deduplicator backed by the given matcher.
    #[must_use]
    pub fn new(matcher: &'a dyn IncidentMatcher) -> Self {
        Self { matcher }
    }

    /// Judge a candidate against recorded incidents.
    ///
    /// When the matcher confirms a same-day match, the candidate's new
    /// sources are merged into every same-day incident.
    ///
    /// # Errors
    ///
    /// Returns an error if the matcher fails.
    pub async fn check(&self, candidate: &Incident, existing: &mut [Incident]) -> Result<Verdict> {
        if existing.iter().any(|e| e.shares_source_with(candidate)) {
            debug!(date = %candidate.date, "Candidate shares a source with a recorded incident");
            return Ok(Verdict::SharedSource);
        }

        let same_day: Vec<usize> = existing
            .iter()
            .enumerate()
            .filter(|(_, e)| e.date == candidate.date)
            .map(|(i, _)| i)
            .collect();
        if same_day.is_empty() {
            return Ok(Verdict::New);
        }

        let refs: Vec<&Incident> = same_day.iter().map(|&i| &existing[i]).collect();
        if !self.matcher.same_incident(candidate, &refs).await? {
            return Ok(Verdict::New);
        }

        let merged_sources = same_day
            .iter()
            .map(|&i| existing[i].merge_sources(candidate))
            .sum();
        info!(
            date = %candidate.date,
            location = %candidate.location,
            merged_sources,
            "Candidate matches a recorded incident"
        );
        Ok(Verdict::SameEvent { merged_sources })
    }
}
