//! Seen-article ledger.
//!
//! A `SQLite` record of every article URL the monitor has processed and what
//! came of it. Runs consult it so the same article is not downloaded and sent
//! to the language model every few hours.

pub mod migrations;
pub mod schema;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// What happened to a processed article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// No article text could be extracted.
    NoText,
    /// The model found no qualifying incident.
    NoIncident,
    /// The incident was already recorded.
    Duplicate,
    /// A new incident was accepted.
    Accepted,
    /// Processing failed and should be retried.
    Failed,
}

impl Outcome {
    /// All outcomes, in display order.
    pub const ALL: [Self; 5] = [
        Self::Accepted,
        Self::Duplicate,
        Self::NoIncident,
        Self::NoText,
        Self::Failed,
    ];

    /// The stored string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoText => "no_text",
            Self::NoIncident => "no_incident",
            Self::Duplicate => "duplicate",
            Self::Accepted => "accepted",
            Self::Failed => "failed",
        }
    }

    /// Whether an article with this outcome is done for good.
    #[must_use]
    pub fn is_final(self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| Error::internal(format!("unknown outcome: {s}")))
    }
}

/// A row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleRecord {
    /// Row ID.
    pub id: i64,
    /// Article URL.
    pub url: String,
    /// Feed the article came from.
    pub feed: String,
    /// Headline at the time of processing.
    pub title: String,
    /// What happened to it.
    pub outcome: Outcome,
    /// When it was last processed.
    pub checked_at: DateTime<Utc>,
}

/// Ledger statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    /// Number of articles recorded.
    pub total_articles: i64,
    /// Article count per outcome.
    pub by_outcome: BTreeMap<Outcome, i64>,
    /// Oldest processing time.
    pub oldest: Option<DateTime<Utc>>,
    /// Newest processing time.
    pub newest: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Hash a URL for the unique index.
#[must_use]
pub fn url_hash(url: &str) -> String {
    blake3::hash(url.trim().as_bytes()).to_hex().to_string()
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The ledger database.
#[derive(Debug)]
pub struct Storage {
    path: PathBuf,
    conn: Connection,
}

impl Storage {
    /// Open or create the ledger at the given path.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        debug!(path = %path.display(), "Opened article ledger");
        Ok(Self { path, conn })
    }

    /// Open the ledger only if the file already exists.
    ///
    /// Nothing is created on disk, so inspection commands can report a
    /// missing ledger instead of leaving an empty one behind.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be opened or migrated.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Ok(None);
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Some(Self { path, conn }))
    }

    /// Create an in-memory ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether an article was already processed to a final outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn is_seen(&self, url: &str) -> Result<bool> {
        let outcome: Option<String> = self
            .conn
            .query_row(
                "SELECT outcome FROM articles WHERE url_hash = ?1",
                [url_hash(url)],
                |row| row.get(0),
            )
            .optional()?;

        Ok(outcome
            .and_then(|o| o.parse::<Outcome>().ok())
            .is_some_and(Outcome::is_final))
    }

    /// Record the outcome for an article, replacing any earlier entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn record(&self, url: &str, feed: &str, title: &str, outcome: Outcome) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO articles (url, url_hash, feed, title, outcome, checked_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(url_hash) DO UPDATE SET
                feed = excluded.feed,
                title = excluded.title,
                outcome = excluded.outcome,
                checked_at = excluded.checked_at
            ",
            params![
                url.trim(),
                url_hash(url),
                feed,
                title,
                outcome.as_str(),
                timestamp(Utc::now()),
            ],
        )?;
        debug!(url, %outcome, "Recorded article");
        Ok(())
    }

    /// The most recently processed articles.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent(&self, limit: usize) -> Result<Vec<ArticleRecord>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, url, feed, title, outcome, checked_at
            FROM articles ORDER BY checked_at DESC, id DESC LIMIT ?1
            ",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map([limit], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows.into_iter().flatten().collect())
    }

    /// Number of recorded articles.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?)
    }

    /// Forget articles processed longer ago than `max_age`.
    ///
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn prune_older_than(&self, max_age: std::time::Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| Error::internal(format!("max age out of range: {e}")))?;
        let cutoff = timestamp(Utc::now() - max_age);

        let affected = self
            .conn
            .execute("DELETE FROM articles WHERE checked_at < ?1", [cutoff])?;

        if affected > 0 {
            info!(pruned = affected, "Pruned old ledger entries");
        }
        Ok(affected)
    }

    /// Ledger statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn stats(&self) -> Result<LedgerStats> {
        let mut by_outcome = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT outcome, COUNT(*) FROM articles GROUP BY outcome")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (outcome, count) = row?;
            match outcome.parse::<Outcome>() {
                Ok(outcome) => {
                    by_outcome.insert(outcome, count);
                }
                Err(_) => warn!(outcome = %outcome, "Unknown outcome in ledger"),
            }
        }

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(checked_at), MAX(checked_at) FROM articles",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.path.as_os_str() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(LedgerStats {
            total_articles: self.count()?,
            by_outcome,
            oldest: oldest.as_deref().and_then(parse_timestamp),
            newest: newest.as_deref().and_then(parse_timestamp),
            db_size_bytes,
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Option<ArticleRecord>> {
        let outcome: String = row.get(4)?;
        let checked_at: String = row.get(5)?;

        let Ok(outcome) = outcome.parse::<Outcome>() else {
            warn!(outcome = %outcome, "Skipping ledger row with unknown outcome");
            return Ok(None);
        };

        Ok(Some(ArticleRecord {
            id: row.get(0)?,
            url: row.get(1)?,
            feed: row.get(2)?,
            title: row.get(3)?,
            outcome,
            checked_at: parse_timestamp(&checked_at).unwrap_or_else(Utc::now),
        }))
    }
}
