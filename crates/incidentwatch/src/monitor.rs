//! The monitoring pipeline.
//!
//! A run polls every configured feed, reads the articles whose headline or
//! teaser matches a keyword, asks the language model for a structured
//! incident, drops duplicates and hands the result to review. `watch`
//! repeats runs on a fixed interval until shut down.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::article::fetch_article_text;
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::error::{Error, Result};
use crate::extract::{IncidentExtractor, IncidentMatcher, OpenAiClient};
use crate::feed::{fetch_feed, FeedEntry, FeedSource};
use crate::http::HttpClient;
use crate::incident::{Incident, IncidentDatabase};
use crate::relevance::{KeywordFilter, Relevance};
use crate::review::{Change, GitHubPublisher, ReviewPublisher};
use crate::storage::{Outcome, Storage};

/// What to do with new incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Open a pull request.
    Publish,
    /// Write the incidents file in place.
    Write,
    /// Only report; nothing is written or published.
    DryRun,
}

/// Options for a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Report only. Takes precedence over `write`.
    pub dry_run: bool,
    /// Write the incidents file locally instead of opening a pull request.
    pub write: bool,
    /// Process articles even if the ledger has seen them.
    pub force: bool,
    /// Incidents file to use instead of the configured one.
    pub data_path: Option<PathBuf>,
}

impl RunOptions {
    /// The effective mode.
    #[must_use]
    pub fn mode(&self) -> RunMode {
        if self.dry_run {
            RunMode::DryRun
        } else if self.write {
            RunMode::Write
        } else {
            RunMode::Publish
        }
    }
}

/// Counters and results of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Feed entries looked at.
    pub articles_checked: usize,
    /// Entries that matched a keyword.
    pub keyword_matches: usize,
    /// Matching entries skipped because they were already processed.
    pub skipped_seen: usize,
    /// Number of new incidents.
    pub new_incidents: usize,
    /// Sources merged into incidents that were already recorded.
    pub sources_added: usize,
    /// The new incidents.
    pub incidents: Vec<Incident>,
    /// URL of the opened pull request.
    pub pull_request: Option<String>,
    /// File the incidents were written to.
    pub written_to: Option<PathBuf>,
    /// Feeds that could not be fetched or parsed.
    pub feed_errors: usize,
    /// Articles whose processing failed.
    pub article_errors: usize,
    /// Ledger entries removed by pruning.
    pub pruned: usize,
}

struct Processed {
    url: String,
    feed: String,
    title: String,
    outcome: Outcome,
    merged_sources: usize,
}

/// Runs the pipeline against configured feeds.
pub struct Monitor {
    config: Config,
    http: HttpClient,
    extractor: Arc<dyn IncidentExtractor>,
    matcher: Arc<dyn IncidentMatcher>,
    publisher: Option<Arc<dyn ReviewPublisher>>,
    storage: Option<Storage>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("feeds", &self.config.feeds.len())
            .field("publisher", &self.publisher.is_some())
            .field("storage", &self.storage.as_ref().map(Storage::path))
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Create a monitor from its parts, without publisher or ledger.
    #[must_use]
    pub fn new(
        config: Config,
        http: HttpClient,
        extractor: Arc<dyn IncidentExtractor>,
        matcher: Arc<dyn IncidentMatcher>,
    ) -> Self {
        Self {
            config,
            http,
            extractor,
            matcher,
            publisher: None,
            storage: None,
        }
    }

    /// Build the production monitor: OpenAI client, GitHub publisher when
    /// credentials are configured, and the on-disk ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or the ledger cannot be
    /// opened.
    pub fn from_config(config: Config) -> Result<Self> {
        let http = HttpClient::new(&config.monitor)?;
        let llm = Arc::new(OpenAiClient::new(
            http.clone(),
            &config.llm,
            config.require_llm_key()?,
        ));
        let storage = Storage::open(config.database_path())?;

        let publisher = match config.require_review() {
            Ok((repository, token)) => Some(Arc::new(GitHubPublisher::new(
                http.clone(),
                &config.review,
                repository,
                token,
                config.monitor.incidents_path.to_string_lossy().into_owned(),
            )) as Arc<dyn ReviewPublisher>),
            Err(e) => {
                debug!(error = %e, "Pull requests unavailable");
                None
            }
        };

        let mut monitor = Self::new(config, http, llm.clone(), llm).with_storage(storage);
        monitor.publisher = publisher;
        Ok(monitor)
    }

    /// Attach a review publisher.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn ReviewPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Attach a seen-article ledger.
    #[must_use]
    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Perform one pass over all feeds.
    ///
    /// Feed and article failures are logged and counted. The run itself
    /// fails only when the incidents file cannot be read or written or the
    /// pull request cannot be opened.
    ///
    /// # Errors
    ///
    /// Returns an error if publishing is requested without credentials, the
    /// incidents file is unusable, or publishing fails.
    pub async fn run_once(&self, options: &RunOptions) -> Result<RunSummary> {
        let mode = options.mode();
        let publisher = match (mode, &self.publisher) {
            (RunMode::Publish, None) => {
                self.config.require_review()?;
                return Err(Error::internal("no review publisher configured"));
            }
            (_, publisher) => publisher.clone(),
        };

        let data_path = options
            .data_path
            .clone()
            .unwrap_or_else(|| self.config.monitor.incidents_path.clone());
        let mut db = IncidentDatabase::load(&data_path)?;
        info!(
            incidents = db.len(),
            path = %data_path.display(),
            mode = ?mode,
            "Starting monitor run"
        );

        let recorded = db.incidents.len();
        let sources_before = source_count(&db.incidents);
        let dedup = Deduplicator::new(self.matcher.as_ref());
        let mut summary = RunSummary::default();
        let mut processed: Vec<Processed> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        for source in self.config.feed_sources() {
            let entries = match fetch_feed(&self.http, &source).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(feed = %source.name, error = %e, "Skipping feed");
                    summary.feed_errors += 1;
                    continue;
                }
            };
            info!(feed = %source.name, entries = entries.len(), "Fetched feed");

            let filter = KeywordFilter::new(&source.keywords);
            for entry in entries {
                summary.articles_checked += 1;
                let Relevance::Matched { keyword } = filter.check(&entry) else {
                    continue;
                };
                summary.keyword_matches += 1;

                if !visited.insert(entry.link.clone())
                    || (!options.force && self.is_seen(&entry.link))
                {
                    debug!(url = %entry.link, "Already processed");
                    summary.skipped_seen += 1;
                    continue;
                }

                info!(
                    feed = %source.name,
                    keyword = %keyword,
                    title = %entry.title,
                    url = %entry.link,
                    "Potential incident"
                );
                let (outcome, merged_sources) = match self
                    .process_entry(&source, &entry, &dedup, &mut db.incidents)
                    .await
                {
                    Ok(handled) => handled,
                    Err(e) => {
                        warn!(url = %entry.link, error = %e, "Failed to process article");
                        summary.article_errors += 1;
                        (Outcome::Failed, 0)
                    }
                };
                debug!(url = %entry.link, outcome = %outcome, merged_sources, "Processed article");
                processed.push(Processed {
                    url: entry.link,
                    feed: source.name.clone(),
                    title: entry.title,
                    outcome,
                    merged_sources,
                });
            }
        }

        let new_incidents = db.incidents.split_off(recorded);
        summary.new_incidents = new_incidents.len();
        summary.sources_added = source_count(&db.incidents).saturating_sub(sources_before);
        summary.incidents.clone_from(&new_incidents);

        let delivered = self
            .deliver(mode, publisher.as_deref(), db, new_incidents, &data_path, &mut summary)
            .await;

        if mode != RunMode::DryRun {
            if delivered.is_err() {
                // Undelivered additions must be found again next run.
                for entry in &mut processed {
                    if entry.outcome == Outcome::Accepted || entry.merged_sources > 0 {
                        entry.outcome = Outcome::Failed;
                    }
                }
            }
            self.record_all(&processed);
            summary.pruned = self.prune();
        }
        delivered?;

        info!(
            articles_checked = summary.articles_checked,
            keyword_matches = summary.keyword_matches,
            skipped_seen = summary.skipped_seen,
            new_incidents = summary.new_incidents,
            sources_added = summary.sources_added,
            feed_errors = summary.feed_errors,
            "Monitor run complete"
        );
        Ok(summary)
    }

    /// Run immediately, then once per `interval`, until `shutdown` resolves.
    ///
    /// A failed run is logged and the loop continues. Returns the number of
    /// runs started.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures that no later run can recover
    /// from, such as missing credentials.
    pub async fn watch<F>(&self, options: &RunOptions, interval: Duration, shutdown: F) -> Result<u64>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = interval.as_secs(), "Watching feeds");
        let mut runs = 0;
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(runs, "Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    runs += 1;
                    match self.run_once(options).await {
                        Ok(summary) => {
                            if let Some(url) = &summary.pull_request {
                                info!(url = %url, "Run opened a pull request");
                            }
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => error!(error = %e, "Monitor run failed"),
                    }
                }
            }
        }
        Ok(runs)
    }

    /// Read, extract and deduplicate one article.
    ///
    /// Returns the ledger outcome and the number of sources merged into
    /// incidents already on the list.
    async fn process_entry(
        &self,
        source: &FeedSource,
        entry: &FeedEntry,
        dedup: &Deduplicator<'_>,
        incidents: &mut Vec<Incident>,
    ) -> Result<(Outcome, usize)> {
        let Some(text) = fetch_article_text(&self.http, &entry.link).await? else {
            return Ok((Outcome::NoText, 0));
        };

        let Some(incident) = self
            .extractor
            .extract(&text, &entry.link, &source.name)
            .await?
        else {
            return Ok((Outcome::NoIncident, 0));
        };

        let verdict = dedup.check(&incident, incidents).await?;
        if verdict.is_duplicate() {
            return Ok((Outcome::Duplicate, verdict.merged_sources()));
        }

        info!(
            date = %incident.date,
            location = %incident.location,
            incident_type = %incident.incident_type,
            "New verified incident found"
        );
        incidents.push(incident);
        Ok((Outcome::Accepted, 0))
    }

    async fn deliver(
        &self,
        mode: RunMode,
        publisher: Option<&dyn ReviewPublisher>,
        mut db: IncidentDatabase,
        new_incidents: Vec<Incident>,
        data_path: &std::path::Path,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let change = Change {
            added: new_incidents.len(),
            sources_added: summary.sources_added,
        };
        if change.is_empty() {
            info!("No new incidents to add");
            return Ok(());
        }

        let (count, sources_added) = (change.added, change.sources_added);
        db.append(new_incidents);
        if sources_added > 0 {
            db.touch();
        }

        match (mode, publisher) {
            (RunMode::DryRun, _) => {
                info!(count, sources_added, "Dry run, incidents not saved");
            }
            (RunMode::Write, _) => {
                db.save(data_path)?;
                info!(count, sources_added, path = %data_path.display(), "Wrote incidents file");
                summary.written_to = Some(data_path.to_path_buf());
            }
            (RunMode::Publish, Some(publisher)) => {
                let pull = publisher.publish(&db, change).await?;
                summary.pull_request = Some(pull.html_url);
            }
            (RunMode::Publish, None) => {
                return Err(Error::internal("no review publisher configured"));
            }
        }
        Ok(())
    }

    fn is_seen(&self, url: &str) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };
        storage.is_seen(url).unwrap_or_else(|e| {
            warn!(url, error = %e, "Ledger lookup failed");
            false
        })
    }

    fn record_all(&self, processed: &[Processed]) {
        let Some(storage) = &self.storage else {
            return;
        };
        for entry in processed {
            if let Err(e) = storage.record(&entry.url, &entry.feed, &entry.title, entry.outcome) {
                warn!(url = %entry.url, error = %e, "Failed to record article");
            }
        }
    }

    fn prune(&self) -> usize {
        let (Some(storage), Some(max_age)) = (&self.storage, self.config.max_age()) else {
            return 0;
        };
        storage.prune_older_than(max_age).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to prune ledger");
            0
        })
    }
}

fn source_count(incidents: &[Incident]) -> usize {
    incidents.iter().map(|i| i.sources.len()).sum()
}
