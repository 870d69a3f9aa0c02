//! `SQLite` schema for the seen-article ledger.

/// Processed articles, one row per URL.
pub const CREATE_ARTICLES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    url_hash TEXT NOT NULL UNIQUE,
    feed TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    outcome TEXT NOT NULL,
    checked_at TEXT NOT NULL
)
";

/// Index on `checked_at` for listing and pruning.
pub const CREATE_CHECKED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_articles_checked_at ON articles(checked_at DESC)
";

/// Index on `outcome` for statistics.
pub const CREATE_OUTCOME_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_articles_outcome ON articles(outcome)
";

/// Key-value metadata, holds the schema version.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_ARTICLES_TABLE,
    CREATE_CHECKED_AT_INDEX,
    CREATE_OUTCOME_INDEX,
    CREATE_METADATA_TABLE,
];
