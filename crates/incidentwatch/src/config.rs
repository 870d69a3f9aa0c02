//! Configuration management for incidentwatch.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feed::FeedSource;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "incidentwatch";

/// Default ledger database file name.
const DATABASE_FILE_NAME: &str = "seen.db";

/// Placeholder shown instead of secrets.
const REDACTED: &str = "[REDACTED]";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `INCIDENTWATCH_`, sections split on `__`)
/// 2. `OPENAI_API_KEY`, `GITHUB_TOKEN` and `GITHUB_REPOSITORY`
/// 3. TOML config file at `~/.config/incidentwatch/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Polling configuration.
    pub monitor: MonitorConfig,
    /// Feeds to poll.
    pub feeds: Vec<FeedConfig>,
    /// Language model configuration.
    pub llm: LlmConfig,
    /// Pull request configuration.
    pub review: ReviewConfig,
    /// Seen-article ledger configuration.
    pub storage: StorageConfig,
}

/// Polling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Hours between runs in watch mode.
    pub interval_hours: u32,
    /// Timeout for a single HTTP request in seconds.
    pub request_timeout_secs: u64,
    /// Retries for transient HTTP failures.
    pub max_retries: u32,
    /// User agent sent to news sites.
    pub user_agent: String,
    /// Accept-Language header sent to news sites.
    pub accept_language: String,
    /// Path of the incidents file inside the repository checkout.
    pub incidents_path: PathBuf,
    /// Keywords applied to every feed without its own list.
    pub keywords: Vec<String>,
}

/// A feed entry in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Display name, also used as the source name of extracted incidents.
    pub name: String,
    /// Feed URL.
    pub url: String,
    /// Keywords overriding the global list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
}

/// Language model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,
    /// Chat model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// API key. Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
}

/// Pull request configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Base URL of the git host REST API.
    pub api_base: String,
    /// Repository in `owner/name` form. Falls back to `GITHUB_REPOSITORY`.
    pub repository: Option<String>,
    /// Access token. Falls back to `GITHUB_TOKEN`.
    pub token: Option<String>,
    /// Branch the pull request targets.
    pub base_branch: String,
    /// Prefix of generated branch names.
    pub branch_prefix: String,
}

/// Seen-article ledger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/incidentwatch/seen.db`
    pub database_path: Option<PathBuf>,
    /// Days to remember processed articles.
    /// Set to 0 for unlimited.
    pub max_age_days: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_hours: 6,
            request_timeout_secs: 30,
            max_retries: 2,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"
                .to_string(),
            accept_language: "de,en-US;q=0.7,en;q=0.3".to_string(),
            incidents_path: PathBuf::from("data/incidents.json"),
            keywords: default_keywords(),
        }
    }
}

impl MonitorConfig {
    /// Get the HTTP request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4-turbo-preview".to_string(),
            temperature: 0.0,
            api_key: None,
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            repository: None,
            token: None,
            base_branch: "main".to_string(),
            branch_prefix: "update-incidents".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_age_days: 90,
        }
    }
}

/// Default keywords matched against feed titles and descriptions.
fn default_keywords() -> Vec<String> {
    [
        "magdeburg",
        "rassistisch",
        "fremdenfeindlich",
        "ausländerfeindlich",
        "hassverbrechen",
        "übergriff",
        "angriff migranten",
        "rassismus",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Default feeds.
fn default_feeds() -> Vec<FeedConfig> {
    [
        (
            "MDR Sachsen-Anhalt",
            "https://www.mdr.de/nachrichten/index-rss.xml",
        ),
        ("taz", "https://taz.de/!p4608;rss/"),
        ("sz", "https://rss.sueddeutsche.de/alles"),
        (
            "Mobile Opferberatung",
            "https://www.mobile-opferberatung.de/monitoring/chronik-2024",
        ),
        (
            "Landesportal Sachsen-Anhalt - Pressemitteilungen der Polizei",
            "https://www.sachsen-anhalt.de/bs/pressemitteilungen/rss-feeds?tx_tsarssinclude_rss%5Baction%5D=feed&tx_tsarssinclude_rss%5Bcontroller%5D=Rss&tx_tsarssinclude_rss%5Buid%5D=75&type=9988&cHash=6052a14b7487702c9e9ca69eac34418a",
        ),
    ]
    .into_iter()
    .map(|(name, url)| FeedConfig {
        name: name.to_string(),
        url: url.to_string(),
        keywords: None,
    })
    .collect()
}

impl Config {
    /// Configuration with defaults, including the default feed list.
    #[must_use]
    pub fn with_default_feeds() -> Self {
        Self {
            feeds: default_feeds(),
            ..Self::default()
        }
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::with_default_feeds()))
            .merge(Toml::file(&config_file))
            .merge(
                Env::raw()
                    .only(&["OPENAI_API_KEY", "GITHUB_TOKEN", "GITHUB_REPOSITORY"])
                    .map(|key| {
                        if key.as_str().eq_ignore_ascii_case("OPENAI_API_KEY") {
                            "llm.api_key".into()
                        } else if key.as_str().eq_ignore_ascii_case("GITHUB_TOKEN") {
                            "review.token".into()
                        } else {
                            "review.repository".into()
                        }
                    }),
            )
            .merge(Env::prefixed("INCIDENTWATCH_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.interval_hours == 0 {
            return Err(invalid("interval_hours must be greater than 0"));
        }

        if self.monitor.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs must be greater than 0"));
        }

        if self.feeds.is_empty() {
            return Err(invalid("at least one feed must be configured"));
        }

        for feed in &self.feeds {
            match url::Url::parse(&feed.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                _ => {
                    return Err(invalid(format!(
                        "feed '{}' has an invalid url: {}",
                        feed.name, feed.url
                    )))
                }
            }
            if feed.keywords.as_ref().is_some_and(Vec::is_empty) {
                return Err(invalid(format!("feed '{}' has an empty keyword list", feed.name)));
            }
        }

        if self.monitor.keywords.is_empty() {
            return Err(invalid("keywords must not be empty"));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid(format!(
                "temperature ({}) must be between 0 and 2",
                self.llm.temperature
            )));
        }

        if let Some(repo) = &self.review.repository {
            if !is_owner_slash_name(repo) {
                return Err(invalid(format!(
                    "repository must be in owner/name form: {repo}"
                )));
            }
        }

        Ok(())
    }

    /// Get the configured API key, checking its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredential`] if no key is set or it does not
    /// look like an OpenAI key.
    pub fn require_llm_key(&self) -> Result<&str> {
        match self.llm.api_key.as_deref() {
            None | Some("") => Err(Error::MissingCredential {
                name: "OPENAI_API_KEY",
                hint: "environment variable not set".to_string(),
            }),
            Some(key) if !key.starts_with("sk-") => Err(Error::MissingCredential {
                name: "OPENAI_API_KEY",
                hint: "invalid key format, expected an 'sk-' prefix".to_string(),
            }),
            Some(key) => Ok(key),
        }
    }

    /// Get the repository and token needed to open pull requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredential`] if either is unset.
    pub fn require_review(&self) -> Result<(&str, &str)> {
        let repo = self
            .review
            .repository
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::MissingCredential {
                name: "GITHUB_REPOSITORY",
                hint: "set review.repository or GITHUB_REPOSITORY (owner/name)".to_string(),
            })?;
        let token = self
            .review
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::MissingCredential {
                name: "GITHUB_TOKEN",
                hint: "set review.token or GITHUB_TOKEN".to_string(),
            })?;
        Ok((repo, token))
    }

    /// Resolve the feed list with effective keywords.
    #[must_use]
    pub fn feed_sources(&self) -> Vec<FeedSource> {
        self.feeds
            .iter()
            .map(|feed| FeedSource {
                name: feed.name.clone(),
                url: feed.url.clone(),
                keywords: feed
                    .keywords
                    .clone()
                    .unwrap_or_else(|| self.monitor.keywords.clone()),
            })
            .collect()
    }

    /// A copy with secrets replaced, suitable for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.llm.api_key.is_some() {
            copy.llm.api_key = Some(REDACTED.to_string());
        }
        if copy.review.token.is_some() {
            copy.review.token = Some(REDACTED.to_string());
        }
        copy
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the max age of ledger entries as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        if self.storage.max_age_days == 0 {
            None
        } else {
            Some(Duration::from_secs(
                u64::from(self.storage.max_age_days) * 24 * 60 * 60,
            ))
        }
    }

    /// Get the watch interval as a Duration.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.monitor.interval_hours) * 60 * 60)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

fn is_owner_slash_name(repo: &str) -> bool {
    let mut parts = repo.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::with_default_feeds();

        assert_eq!(config.feeds.len(), 5);
        assert_eq!(config.monitor.interval_hours, 6);
        assert_eq!(config.llm.model, "gpt-4-turbo-preview");
        assert_eq!(config.review.base_branch, "main");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bare_default_has_no_feeds() {
        let config = Config::default();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("at least one feed"));
    }

    #[test]
    fn test_default_monitor_config() {
        let monitor = MonitorConfig::default();

        assert_eq!(monitor.request_timeout_secs, 30);
        assert_eq!(monitor.incidents_path, PathBuf::from("data/incidents.json"));
        assert!(monitor.keywords.contains(&"magdeburg".to_string()));
        assert!(monitor.keywords.contains(&"angriff migranten".to_string()));
    }

    #[test]
    fn test_default_storage_config() {
        let storage = StorageConfig::default();

        assert!(storage.database_path.is_none());
        assert_eq!(storage.max_age_days, 90);
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = Config::with_default_feeds();
        config.monitor.interval_hours = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("interval_hours"));
    }

    #[test]
    fn test_validate_bad_feed_url() {
        let mut config = Config::with_default_feeds();
        config.feeds[0].url = "ftp://example.com/feed".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("invalid url"));
    }

    #[test]
    fn test_validate_empty_feed_keywords() {
        let mut config = Config::with_default_feeds();
        config.feeds[1].keywords = Some(Vec::new());

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_temperature() {
        let mut config = Config::with_default_feeds();
        config.llm.temperature = 3.5;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("temperature"));
    }

    #[test]
    fn test_validate_repository_format() {
        let mut config = Config::with_default_feeds();
        config.review.repository = Some("just-a-name".to_string());
        assert!(config.validate().is_err());

        config.review.repository = Some("Packebusch/willkommen-in-magdeburg".to_string());
        assert!(config.validate().is_ok());

        config.review.repository = Some("a/b/c".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_llm_key() {
        let mut config = Config::with_default_feeds();
        config.llm.api_key = None;
        assert!(matches!(
            config.require_llm_key(),
            Err(Error::MissingCredential { .. })
        ));

        config.llm.api_key = Some("not-a-key".to_string());
        let err = config.require_llm_key().unwrap_err().to_string();
        assert!(err.contains("sk-"));

        config.llm.api_key = Some("sk-test".to_string());
        assert_eq!(config.require_llm_key().unwrap(), "sk-test");
    }

    #[test]
    fn test_require_review() {
        let mut config = Config::with_default_feeds();
        config.review.repository = None;
        config.review.token = Some("t".to_string());
        assert!(config.require_review().is_err());

        config.review.repository = Some("o/r".to_string());
        config.review.token = None;
        assert!(config.require_review().is_err());

        config.review.token = Some("t".to_string());
        assert_eq!(config.require_review().unwrap(), ("o/r", "t"));
    }

    #[test]
    fn test_feed_sources_keyword_override() {
        let mut config = Config::with_default_feeds();
        config.feeds[0].keywords = Some(vec!["polizei".to_string()]);

        let sources = config.feed_sources();
        assert_eq!(sources[0].keywords, vec!["polizei".to_string()]);
        assert_eq!(sources[1].keywords, config.monitor.keywords);
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = Config::with_default_feeds();
        config.llm.api_key = Some("sk-secret".to_string());
        config.review.token = Some("ghp_secret".to_string());

        let shown = serde_json::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("sk-secret"));
        assert!(!shown.contains("ghp_secret"));
        assert!(shown.contains(REDACTED));
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("seen.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_max_age_none_when_zero() {
        let mut config = Config::default();
        config.storage.max_age_days = 0;

        assert!(config.max_age().is_none());
    }

    #[test]
    fn test_max_age_some_when_set() {
        let config = Config::default();
        assert_eq!(
            config.max_age(),
            Some(Duration::from_secs(90 * 24 * 60 * 60))
        );
    }

    #[test]
    fn test_interval() {
        let config = Config::default();
        assert_eq!(config.interval(), Duration::from_secs(6 * 60 * 60));
        assert_eq!(config.monitor.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("incidentwatch"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        // Secrets may come from the environment; everything else is default.
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        let expected = Config::with_default_feeds();

        assert_eq!(config.feeds, expected.feeds);
        assert_eq!(config.monitor, expected.monitor);
        assert_eq!(config.storage, expected.storage);
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[monitor]
interval_hours = 12

[[feeds]]
name = "Volksstimme"
url = "https://www.volksstimme.de/rss"
keywords = ["magdeburg"]

[llm]
model = "gpt-4o"
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.monitor.interval_hours, 12);
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.feeds[0].name, "Volksstimme");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.api_base, "https://api.openai.com/v1");
    }

    #[test]
    fn test_load_invalid_toml_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[monitor]\ninterval_hours = 0\n").unwrap();

        assert!(Config::load_from(Some(path)).is_err());
    }
}
