//! `incidentwatch` - CLI for the incident news monitor
//!
//! Runs the monitor once or on a schedule and offers a few inspection
//! commands for feeds, the incident database and configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{bail, Context};
use clap::Parser;

use incidentwatch::article::fetch_article_text;
use incidentwatch::cli::{
    Cli, Command, ConfigCommand, ExtractCommand, IncidentsCommand, RunCommand, WatchCommand,
};
use incidentwatch::extract::{IncidentExtractor, OpenAiClient};
use incidentwatch::feed::probe_feed;
use incidentwatch::http::HttpClient;
use incidentwatch::{init_logging, Config, IncidentDatabase, Monitor, RunSummary, Storage};

/// Characters of article text shown by `extract`.
const PREVIEW_CHARS: usize = 500;

/// Ledger entries listed by `status`.
const RECENT_ARTICLES: usize = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    // `config validate` reports problems instead of failing on them.
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        let path = file
            .clone()
            .or_else(|| cli.config.clone())
            .unwrap_or_else(Config::default_config_path);
        return handle_config_validate(path);
    }

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Run(cmd) => handle_run(config, &cmd).await,
        Command::Watch(cmd) => handle_watch(config, &cmd).await,
        Command::Extract(cmd) => handle_extract(&config, &cmd).await,
        Command::CheckFeeds => handle_check_feeds(&config).await,
        Command::Incidents(cmd) => handle_incidents(&config, cmd),
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

async fn handle_run(config: Config, cmd: &RunCommand) -> anyhow::Result<()> {
    let monitor = Monitor::from_config(config)?;
    let summary = monitor.run_once(&cmd.run.options()).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

async fn handle_watch(config: Config, cmd: &WatchCommand) -> anyhow::Result<()> {
    let interval = cmd.interval_hours.map_or_else(
        || config.interval(),
        |hours| std::time::Duration::from_secs(u64::from(hours) * 60 * 60),
    );
    let monitor = Monitor::from_config(config)?;
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    let runs = monitor.watch(&cmd.run.options(), interval, shutdown).await?;
    println!("Stopped after {runs} run(s).");
    Ok(())
}

async fn handle_extract(config: &Config, cmd: &ExtractCommand) -> anyhow::Result<()> {
    let http = HttpClient::new(&config.monitor)?;
    let Some(text) = fetch_article_text(&http, &cmd.url).await? else {
        bail!("no article text found at {}", cmd.url);
    };

    let preview: String = text.chars().take(PREVIEW_CHARS).collect();
    println!("Article text ({} chars):", text.chars().count());
    println!("{preview}");
    if cmd.text_only {
        return Ok(());
    }

    let llm = OpenAiClient::new(http, &config.llm, config.require_llm_key()?);
    println!();
    println!("Asking {} for an incident...", llm.model());
    match llm.extract(&text, &cmd.url, &cmd.source).await? {
        Some(incident) => println!("{}", serde_json::to_string_pretty(&incident)?),
        None => println!("No verified incident in this article."),
    }
    Ok(())
}

async fn handle_check_feeds(config: &Config) -> anyhow::Result<()> {
    let http = HttpClient::new(&config.monitor)?;
    let mut failed = 0;

    for source in config.feed_sources() {
        let probe = probe_feed(&http, &source).await;
        let state = match (&probe.status, &probe.redirect, &probe.error) {
            (_, _, Some(error)) => format!("error: {error}"),
            (Some(status), Some(location), _) => format!("{status} -> {location}"),
            (Some(status), None, _) => status.to_string(),
            (None, _, None) => "no response".to_string(),
        };
        if !probe.is_ok() {
            failed += 1;
        }
        println!("{:<28} {state}", probe.name);
        println!("{:<28} {}", "", probe.url);
    }

    if failed > 0 {
        println!();
        println!("{failed} feed(s) did not answer with a success status.");
    }
    Ok(())
}

fn handle_incidents(config: &Config, cmd: IncidentsCommand) -> anyhow::Result<()> {
    match cmd {
        IncidentsCommand::List { json } => {
            let db = IncidentDatabase::load(&config.monitor.incidents_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&db.incidents)?);
            } else {
                for incident in &db.incidents {
                    println!(
                        "{}  {:<16} {}",
                        incident.date, incident.incident_type, incident.location
                    );
                }
                println!();
                println!("{} incident(s)", db.len());
            }
        }
        IncidentsCommand::Validate { data } => {
            let path = data.unwrap_or_else(|| config.monitor.incidents_path.clone());
            let db = IncidentDatabase::load(&path)?;
            let invalid = db.invalid_entries();
            if invalid.is_empty() {
                println!("{}: {} incident(s), all valid.", path.display(), db.len());
            } else {
                for (index, error) in &invalid {
                    println!("#{index}: {error}");
                }
                bail!("{} of {} incident(s) are invalid", invalid.len(), db.len());
            }
        }
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let db = IncidentDatabase::load(&config.monitor.incidents_path)?;
    let storage = Storage::open_existing(config.database_path())?;
    let stats = storage.as_ref().map(Storage::stats).transpose()?;
    let recent = match &storage {
        Some(storage) => storage.recent(RECENT_ARTICLES)?,
        None => Vec::new(),
    };

    if json {
        let status = serde_json::json!({
            "incidents": db.len(),
            "last_updated": db.last_updated,
            "incidents_path": config.monitor.incidents_path,
            "database_path": config.database_path(),
            "ledger": stats,
            "recent_articles": recent,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("incidentwatch status");
        println!("--------------------");
        println!("Incidents:      {}", db.len());
        println!(
            "Last updated:   {}",
            db.last_updated
                .map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
        );
        println!("Incidents file: {}", config.monitor.incidents_path.display());
        println!();
        println!("Ledger:         {}", config.database_path().display());
        let Some(stats) = stats else {
            println!("No ledger yet, nothing has been processed.");
            return Ok(());
        };
        println!("Articles seen:  {}", stats.total_articles);
        for (outcome, count) in &stats.by_outcome {
            println!("  {:<13} {count}", format!("{outcome}:"));
        }
        if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
            println!("Range:          {} to {}", oldest.to_rfc3339(), newest.to_rfc3339());
        }
        println!("Size:           {} bytes", stats.db_size_bytes);
        if !recent.is_empty() {
            println!();
            println!("Recent articles:");
            for article in &recent {
                println!(
                    "  {}  {:<12} {}",
                    article.checked_at.format("%Y-%m-%d %H:%M"),
                    article.outcome.as_str(),
                    article.url
                );
            }
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let shown = config.redacted();
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Monitor]");
                println!("  Interval (hours):   {}", shown.monitor.interval_hours);
                println!("  Request timeout:    {}s", shown.monitor.request_timeout_secs);
                println!("  Incidents file:     {}", shown.monitor.incidents_path.display());
                println!("  Keywords:           {}", shown.monitor.keywords.join(", "));
                println!();
                println!("[Feeds]");
                for feed in &shown.feeds {
                    println!("  {:<26} {}", feed.name, feed.url);
                }
                println!();
                println!("[LLM]");
                println!("  API base:           {}", shown.llm.api_base);
                println!("  Model:              {}", shown.llm.model);
                println!("  API key:            {}", secret_state(shown.llm.api_key.as_deref()));
                println!();
                println!("[Review]");
                println!(
                    "  Repository:         {}",
                    shown.review.repository.as_deref().unwrap_or("(not set)")
                );
                println!("  Base branch:        {}", shown.review.base_branch);
                println!("  Token:              {}", secret_state(shown.review.token.as_deref()));
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", shown.database_path().display());
                println!("  Max age (days):     {}", shown.storage.max_age_days);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            return handle_config_validate(path);
        }
    }
    Ok(())
}

fn handle_config_validate(path: std::path::PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());
    if !path.exists() {
        println!("File not found, built-in defaults apply.");
    }
    match Config::load_from(Some(path)) {
        Ok(config) => {
            println!("Configuration is valid ({} feeds).", config.feeds.len());
            if let Err(e) = config.require_llm_key() {
                println!("Note: {e}");
            }
            if let Err(e) = config.require_review() {
                println!("Note: {e}");
            }
            Ok(())
        }
        Err(e) => bail!("configuration error: {e}"),
    }
}

fn secret_state(value: Option<&str>) -> &'static str {
    if value.is_some() {
        "(set)"
    } else {
        "(not set)"
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Articles checked:  {}", summary.articles_checked);
    println!("Keyword matches:   {}", summary.keyword_matches);
    println!("Already processed: {}", summary.skipped_seen);
    println!("Feed errors:       {}", summary.feed_errors);
    println!("Article errors:    {}", summary.article_errors);
    println!("New incidents:     {}", summary.new_incidents);
    if summary.sources_added > 0 {
        println!("Sources added:     {}", summary.sources_added);
    }

    for incident in &summary.incidents {
        println!(
            "  {}  {:<16} {}",
            incident.date, incident.incident_type, incident.location
        );
    }
    if let Some(url) = &summary.pull_request {
        println!("Pull request:      {url}");
    }
    if let Some(path) = &summary.written_to {
        println!("Written to:        {}", path.display());
    }
}
