//! Error types for incidentwatch.
//!
//! This module defines all error types used throughout the incidentwatch crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for incidentwatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the ledger database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    /// A credential needed for the requested operation is absent or malformed.
    #[error("missing credential {name}: {hint}")]
    MissingCredential {
        /// Name of the credential (environment variable).
        name: &'static str,
        /// How to provide it.
        hint: String,
    },

    // === Network Errors ===
    /// An HTTP request could not be completed.
    #[error("request to {url} failed: {message}")]
    Http {
        /// The requested URL.
        url: String,
        /// Description of what went wrong.
        message: String,
    },

    /// An HTTP request returned an unexpected status.
    #[error("request to {url} returned status {status}")]
    HttpStatus {
        /// The requested URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    // === Pipeline Errors ===
    /// A feed could not be parsed.
    #[error("failed to parse feed '{feed}': {message}")]
    FeedParse {
        /// Name of the feed.
        feed: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The language model reply could not be turned into an incident.
    #[error("failed to extract incident from {url}: {message}")]
    Extraction {
        /// The article URL.
        url: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The language model API returned an unusable response.
    #[error("language model error: {0}")]
    Llm(String),

    /// A step of the review pull request flow failed.
    #[error("review step '{step}' failed{}: {message}", status_suffix(.status))]
    Review {
        /// Which step of the flow failed.
        step: &'static str,
        /// HTTP status, when the host answered.
        status: Option<u16>,
        /// Description of what went wrong.
        message: String,
    },

    /// An incident record is malformed.
    #[error("invalid incident: {message}")]
    InvalidIncident {
        /// Description of the problem.
        message: String,
    },

    // === I/O Errors ===
    /// Failed to read or write the incidents file.
    #[error("failed to access incidents file {path}: {source}")]
    IncidentsFile {
        /// Path to the incidents file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

/// A specialized Result type for incidentwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a new language model error.
    #[must_use]
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create an HTTP transport error for the given URL.
    #[must_use]
    pub fn http(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an extraction error for the given article.
    #[must_use]
    pub fn extraction(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a review flow error.
    #[must_use]
    pub fn review(step: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Review {
            step,
            status,
            message: message.into(),
        }
    }

    /// Create an invalid incident error.
    #[must_use]
    pub fn invalid_incident(message: impl Into<String>) -> Self {
        Self::InvalidIncident {
            message: message.into(),
        }
    }

    /// Check if this error should abort a run rather than skip one item.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad(_)
                | Self::ConfigValidation { .. }
                | Self::MissingCredential { .. }
                | Self::DatabaseOpen { .. }
                | Self::DatabaseMigration { .. }
                | Self::IncidentsFile { .. }
        )
    }
}
