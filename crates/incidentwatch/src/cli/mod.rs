//! Command-line interface for the `incidentwatch` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, ExtractCommand, IncidentsCommand, RunArgs, RunCommand, StatusCommand,
    WatchCommand,
};

/// incidentwatch - track right-wing incidents reported in the news
///
/// Polls news feeds, extracts verified incidents with a language model and
/// opens a pull request with the new entries for human review.
#[derive(Debug, Parser)]
#[command(name = "incidentwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check all feeds once
    Run(RunCommand),

    /// Check feeds on a fixed interval until interrupted
    Watch(WatchCommand),

    /// Extract an incident from a single article
    Extract(ExtractCommand),

    /// Probe every configured feed
    CheckFeeds,

    /// Inspect the incident database
    #[command(subcommand)]
    Incidents(IncidentsCommand),

    /// Show incident and ledger status
    Status(StatusCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
