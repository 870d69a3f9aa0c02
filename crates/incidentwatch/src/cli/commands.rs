//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::monitor::RunOptions;

/// Flags shared by `run` and `watch`.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Report new incidents without writing or publishing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Write the incidents file locally instead of opening a pull request
    #[arg(long)]
    pub write: bool,

    /// Re-process articles that were already handled
    #[arg(long)]
    pub force: bool,

    /// Incidents file to read and write
    #[arg(long, value_name = "PATH")]
    pub data: Option<PathBuf>,
}

impl RunArgs {
    /// Convert to monitor options.
    #[must_use]
    pub fn options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            write: self.write,
            force: self.force,
            data_path: self.data.clone(),
        }
    }
}

/// `run` arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Run flags
    #[command(flatten)]
    pub run: RunArgs,

    /// Print the run summary as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// `watch` arguments.
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Hours between runs (defaults to the configured interval)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub interval_hours: Option<u32>,

    /// Run flags
    #[command(flatten)]
    pub run: RunArgs,
}

/// `extract` arguments.
#[derive(Debug, Args)]
pub struct ExtractCommand {
    /// Article URL
    pub url: String,

    /// Source name attached to the incident
    #[arg(short, long, default_value = "Manual")]
    pub source: String,

    /// Only print the article text, skip the language model
    #[arg(long)]
    pub text_only: bool,
}

/// `status` arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Incident database commands.
#[derive(Debug, Subcommand)]
pub enum IncidentsCommand {
    /// List recorded incidents
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Check every recorded incident
    Validate {
        /// Incidents file to check
        #[arg(long, value_name = "PATH")]
        data: Option<PathBuf>,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration with secrets redacted
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
