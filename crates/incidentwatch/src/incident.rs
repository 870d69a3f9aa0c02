//! Core incident types for incidentwatch.
//!
//! This module defines the records kept in `incidents.json`: the incident
//! itself, the news sources that document it, and the database document
//! wrapping the list.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// The kind of attack an incident describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    /// Physical violence against a person.
    PhysicalAttack,
    /// Insults, threats or other verbal abuse.
    VerbalAttack,
    /// Vandalism or arson against property.
    PropertyDamage,
    /// Anything else, including values this version does not know.
    #[default]
    #[serde(other)]
    Other,
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::PhysicalAttack => "physical_attack",
            Self::VerbalAttack => "verbal_attack",
            Self::PropertyDamage => "property_damage",
            Self::Other => "other",
        })
    }
}

/// Verification state of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Confirmed by police or other authorities.
    Verified,
    /// Not (yet) confirmed by an official source.
    #[default]
    #[serde(other)]
    Unverified,
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Verified => "verified",
            Self::Unverified => "unverified",
        })
    }
}

/// A news or official source documenting an incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Link to the article or report.
    pub url: String,
    /// Human-readable publisher name.
    #[serde(default)]
    pub name: String,
}

impl Source {
    /// Create a new source.
    #[must_use]
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
        }
    }
}

/// A documented occurrence of retaliatory violence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Day the incident happened.
    pub date: NaiveDate,

    /// Precise location in the city.
    pub location: String,

    /// Short factual description, naming the verifying source.
    pub description: String,

    /// Sources documenting this incident.
    #[serde(default)]
    pub sources: Vec<Source>,

    /// Kind of attack.
    #[serde(rename = "type", default)]
    pub incident_type: IncidentType,

    /// Verification state.
    #[serde(default)]
    pub status: IncidentStatus,

    /// Fields this version does not model, kept for round-tripping.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Incident {
    /// Check that the incident carries everything a reviewer needs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIncident`] if the location or description is
    /// blank or no source is attached.
    pub fn validate(&self) -> Result<()> {
        if self.location.trim().is_empty() {
            return Err(Error::invalid_incident("location is empty"));
        }
        if self.description.trim().is_empty() {
            return Err(Error::invalid_incident("description is empty"));
        }
        if self.sources.is_empty() {
            return Err(Error::invalid_incident("no sources attached"));
        }
        if let Some(source) = self.sources.iter().find(|s| s.url.trim().is_empty()) {
            return Err(Error::invalid_incident(format!(
                "source '{}' has no url",
                source.name
            )));
        }
        Ok(())
    }

    /// The set of source URLs.
    #[must_use]
    pub fn source_urls(&self) -> BTreeSet<&str> {
        self.sources.iter().map(|s| s.url.as_str()).collect()
    }

    /// Check whether any source URL is shared with another incident.
    #[must_use]
    pub fn shares_source_with(&self, other: &Incident) -> bool {
        let ours = self.source_urls();
        other.sources.iter().any(|s| ours.contains(s.url.as_str()))
    }

    /// Attach the given source unless a source with the same URL exists.
    pub fn ensure_source(&mut self, url: &str, name: &str) {
        if !self.sources.iter().any(|s| s.url == url) {
            self.sources.push(Source::new(url, name));
        }
    }

    /// Add the other incident's sources, skipping URLs already present.
    ///
    /// Returns the number of sources added.
    pub fn merge_sources(&mut self, other: &Incident) -> usize {
        let mut added = 0;
        for source in &other.sources {
            if !self.sources.iter().any(|s| s.url == source.url) {
                self.sources.push(source.clone());
                added += 1;
            }
        }
        added
    }
}

/// The `incidents.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentDatabase {
    /// All recorded incidents.
    #[serde(default)]
    pub incidents: Vec<Incident>,

    /// When incidents were last added.
    #[serde(rename = "lastUpdated", default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    /// Fields this version does not model, kept for round-tripping.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IncidentDatabase {
    /// Load the database from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::IncidentsFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse the database from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid database document.
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Render the database as pretty JSON with a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// Write the database to a JSON file.
    ///
    /// The content goes to a sibling temporary file first and is renamed
    /// into place, so readers never see a half-written document.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| Error::IncidentsFile {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    /// Append new incidents and stamp `lastUpdated`.
    ///
    /// Does nothing when `incidents` is empty.
    pub fn append(&mut self, incidents: Vec<Incident>) {
        if incidents.is_empty() {
            return;
        }
        self.incidents.extend(incidents);
        self.touch();
    }

    /// Stamp `lastUpdated` with the current time.
    pub fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }

    /// Number of recorded incidents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    /// Check whether no incidents are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    /// Validate every incident, returning the index and error of each failure.
    #[must_use]
    pub fn invalid_entries(&self) -> Vec<(usize, Error)> {
        self.incidents
            .iter()
            .enumerate()
            .filter_map(|(i, incident)| incident.validate().err().map(|e| (i, e)))
            .collect()
    }
}
