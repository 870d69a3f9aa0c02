//! `incidentwatch` - news monitor for right-wing and racist incidents
//!
//! Polls regional news feeds, filters entries by keyword, asks a language
//! model whether an article reports a verified incident, drops duplicates of
//! what the incident database already records and hands new incidents to a
//! human review step as a pull request.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod article;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod feed;
pub mod http;
pub mod incident;
pub mod logging;
pub mod monitor;
pub mod relevance;
pub mod review;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use incident::{Incident, IncidentDatabase};
pub use logging::init_logging;
pub use monitor::{Monitor, RunOptions, RunSummary};
pub use storage::{LedgerStats, Outcome, Storage};
