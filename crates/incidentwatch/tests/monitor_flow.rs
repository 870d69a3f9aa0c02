//! End-to-end monitor run against mocked feeds, articles, chat API and GitHub.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::json;

use incidentwatch::config::{FeedConfig, LlmConfig, ReviewConfig};
use incidentwatch::extract::OpenAiClient;
use incidentwatch::http::HttpClient;
use incidentwatch::review::GitHubPublisher;
use incidentwatch::{Config, IncidentDatabase, Monitor, Outcome, RunOptions, Storage};

const EXISTING: &str = r#"{
  "incidents": [
    {
      "date": "2024-12-23",
      "location": "Alter Markt",
      "description": "Zwei Frauen wurden beschimpft, die Polizei ermittelt.",
      "sources": [{ "url": "https://www.mdr.de/alt.html", "name": "MDR" }],
      "type": "verbal_attack",
      "status": "verified"
    }
  ],
  "lastUpdated": "2024-12-24T08:00:00Z"
}"#;

const INCIDENT_REPLY: &str = r#"{
  "date": "2024-12-23",
  "location": "Hasselbachplatz",
  "description": "Ein Mann wurde geschlagen und beleidigt, bestaetigt von der Polizei.",
  "sources": [],
  "type": "physical_attack",
  "status": "verified"
}"#;

struct Harness {
    server: ServerGuard,
    dir: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Self {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("incidents.json"), EXISTING).unwrap();
        Self { server, dir }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server.url())
    }

    fn config(&self) -> Config {
        let mut config = Config {
            feeds: vec![FeedConfig {
                name: "Volksstimme".to_string(),
                url: self.url("/feed.xml"),
                keywords: Some(vec!["Magdeburg".to_string()]),
            }],
            llm: LlmConfig {
                api_base: self.server.url(),
                ..LlmConfig::default()
            },
            review: ReviewConfig {
                api_base: self.server.url(),
                ..ReviewConfig::default()
            },
            ..Config::default()
        };
        config.monitor.incidents_path = self.dir.path().join("incidents.json");
        config.storage.database_path = Some(self.dir.path().join("seen.db"));
        config
    }

    fn monitor(&self) -> Monitor {
        let config = self.config();
        let http = HttpClient::with_settings("incidentwatch-test", "de", Duration::from_secs(5), 0)
            .unwrap();
        let llm = Arc::new(OpenAiClient::new(http.clone(), &config.llm, "sk-test"));
        let publisher = Arc::new(GitHubPublisher::new(
            http.clone(),
            &config.review,
            "wim/tracker",
            "ghp_test",
            "data/incidents.json",
        ));
        let storage = Storage::open(config.database_path()).unwrap();
        Monitor::new(config, http, llm.clone(), llm)
            .with_publisher(publisher)
            .with_storage(storage)
    }

    async fn serve_feed(&mut self) -> Mock {
        let body = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Volksstimme</title>
<item><title>Angriff in Magdeburg</title><link>{a}</link><description>Polizei ermittelt</description></item>
<item><title>Stadtrat Magdeburg tagt</title><link>{b}</link><description>Haushalt beschlossen</description></item>
<item><title>Wetter in Halle</title><link>{c}</link><description>Sonnig</description></item>
</channel></rss>"#,
            a = self.url("/artikel-a.html"),
            b = self.url("/artikel-b.html"),
            c = self.url("/artikel-c.html"),
        );
        self.server
            .mock("GET", "/feed.xml")
            .with_status(200)
            .with_header("content-type", "application/rss+xml")
            .with_body(body)
            .create_async()
            .await
    }

    async fn serve_article(&mut self, path: &str, text: &str) -> Mock {
        self.server
            .mock("GET", path)
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(format!(
                "<html><body><nav>Menu</nav><article><h1>Magdeburg</h1><p>{text}</p></article></body></html>"
            ))
            .create_async()
            .await
    }

    async fn chat(&mut self, body_marker: &str, reply: &str) -> Mock {
        self.server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::Regex(body_marker.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "choices": [{ "message": { "content": reply } }] }).to_string())
            .create_async()
            .await
    }

    async fn github(&mut self) -> Vec<Mock> {
        let base = self
            .server
            .mock("GET", "/repos/wim/tracker/git/ref/heads/main")
            .with_status(200)
            .with_body(r#"{"object":{"sha":"abc123"}}"#)
            .create_async()
            .await;
        let branch = self
            .server
            .mock("POST", "/repos/wim/tracker/git/refs")
            .match_body(Matcher::PartialJson(json!({ "sha": "abc123" })))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;
        let file = self
            .server
            .mock("GET", "/repos/wim/tracker/contents/data/incidents.json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"sha":"filesha"}"#)
            .create_async()
            .await;
        let put = self
            .server
            .mock("PUT", "/repos/wim/tracker/contents/data/incidents.json")
            .match_body(Matcher::PartialJson(json!({
                "message": "Add 1 new incidents",
                "sha": "filesha",
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let pull = self
            .server
            .mock("POST", "/repos/wim/tracker/pulls")
            .match_body(Matcher::PartialJson(json!({
                "title": "Add 1 new incidents",
                "base": "main",
            })))
            .with_status(201)
            .with_body(r#"{"number":7,"html_url":"https://github.com/wim/tracker/pull/7"}"#)
            .create_async()
            .await;
        vec![base, branch, file, put, pull]
    }
}

#[tokio::test]
async fn test_run_opens_pull_request_and_remembers_articles() {
    let mut h = Harness::new().await;
    let _feed = h.serve_feed().await;
    let _a = h
        .serve_article("/artikel-a.html", "MARKER_A Ein Mann wurde am Hasselbachplatz angegriffen.")
        .await;
    let _b = h
        .serve_article("/artikel-b.html", "MARKER_B Der Stadtrat hat den Haushalt beschlossen.")
        .await;
    let extract_a = h.chat("MARKER_A", INCIDENT_REPLY).await;
    let extract_b = h.chat("MARKER_B", "null").await;
    let compare = h.chat("Compare these incidents", "false").await;
    let github = h.github().await;

    let monitor = h.monitor();
    let summary = monitor.run_once(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.articles_checked, 3);
    assert_eq!(summary.keyword_matches, 2);
    assert_eq!(summary.skipped_seen, 0);
    assert_eq!(summary.feed_errors, 0);
    assert_eq!(summary.new_incidents, 1);
    assert_eq!(
        summary.pull_request.as_deref(),
        Some("https://github.com/wim/tracker/pull/7")
    );
    let incident = &summary.incidents[0];
    assert_eq!(incident.location, "Hasselbachplatz");
    assert_eq!(incident.sources.len(), 1);
    assert_eq!(incident.sources[0].url, h.url("/artikel-a.html"));
    assert_eq!(incident.sources[0].name, "Volksstimme");

    for mock in &github {
        mock.assert_async().await;
    }
    compare.assert_async().await;

    // Publishing leaves the local file untouched.
    let local = IncidentDatabase::load(h.dir.path().join("incidents.json")).unwrap();
    assert_eq!(local.len(), 1);

    // A second run finds both matching articles in the ledger.
    let again = monitor
        .run_once(&RunOptions {
            dry_run: true,
            ..RunOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(again.skipped_seen, 2);
    assert_eq!(again.new_incidents, 0);
    extract_a.assert_async().await;
    extract_b.assert_async().await;

    let stats = Storage::open(h.dir.path().join("seen.db"))
        .unwrap()
        .stats()
        .unwrap();
    assert_eq!(stats.total_articles, 2);
    assert_eq!(stats.by_outcome.get(&Outcome::Accepted), Some(&1));
    assert_eq!(stats.by_outcome.get(&Outcome::NoIncident), Some(&1));
}

#[tokio::test]
async fn test_write_mode_updates_local_file() {
    let mut h = Harness::new().await;
    let _feed = h.serve_feed().await;
    let _a = h
        .serve_article("/artikel-a.html", "MARKER_A Ein Mann wurde am Hasselbachplatz angegriffen.")
        .await;
    let _b = h.serve_article("/artikel-b.html", "MARKER_B Nichts passiert.").await;
    let _extract_a = h.chat("MARKER_A", INCIDENT_REPLY).await;
    let _extract_b = h.chat("MARKER_B", "null").await;
    let _compare = h.chat("Compare these incidents", "false").await;
    let pulls = h
        .server
        .mock("POST", "/repos/wim/tracker/pulls")
        .expect(0)
        .create_async()
        .await;

    let summary = h
        .monitor()
        .run_once(&RunOptions {
            write: true,
            ..RunOptions::default()
        })
        .await
        .unwrap();

    assert_eq!(summary.new_incidents, 1);
    assert!(summary.pull_request.is_none());
    assert_eq!(
        summary.written_to.as_deref(),
        Some(h.dir.path().join("incidents.json").as_path())
    );
    pulls.assert_async().await;

    let local = IncidentDatabase::load(h.dir.path().join("incidents.json")).unwrap();
    assert_eq!(local.len(), 2);
    assert_eq!(local.incidents[1].location, "Hasselbachplatz");
    let previous: DateTime<Utc> = "2024-12-24T08:00:00Z".parse().unwrap();
    assert!(local.last_updated.unwrap() > previous);
}

#[tokio::test]
async fn test_same_event_adds_source_instead_of_incident() {
    let mut h = Harness::new().await;
    let _feed = h.serve_feed().await;
    let _a = h
        .serve_article("/artikel-a.html", "MARKER_A Ein Mann wurde am Hasselbachplatz angegriffen.")
        .await;
    let _b = h.serve_article("/artikel-b.html", "MARKER_B Nichts passiert.").await;
    let _extract_a = h.chat("MARKER_A", INCIDENT_REPLY).await;
    let _extract_b = h.chat("MARKER_B", "null").await;
    let compare = h.chat("Compare these incidents", "true").await;

    let summary = h
        .monitor()
        .run_once(&RunOptions {
            write: true,
            ..RunOptions::default()
        })
        .await
        .unwrap();

    assert_eq!(summary.new_incidents, 0);
    assert_eq!(summary.sources_added, 1);
    assert_eq!(
        summary.written_to.as_deref(),
        Some(h.dir.path().join("incidents.json").as_path())
    );
    compare.assert_async().await;

    let local = IncidentDatabase::load(h.dir.path().join("incidents.json")).unwrap();
    assert_eq!(local.len(), 1);
    let urls: Vec<&str> = local.incidents[0]
        .sources
        .iter()
        .map(|s| s.url.as_str())
        .collect();
    assert_eq!(urls, vec!["https://www.mdr.de/alt.html", h.url("/artikel-a.html").as_str()]);
}

#[tokio::test]
async fn test_rate_limited_feed_is_retried() {
    let mut h = Harness::new().await;
    let limited = h
        .server
        .mock("GET", "/feed.xml")
        .with_status(429)
        .with_header("retry-after", "0")
        .expect(1)
        .create_async()
        .await;
    let feed = h.serve_feed().await;
    let _a = h.serve_article("/artikel-a.html", "MARKER_A Nichts.").await;
    let _b = h.serve_article("/artikel-b.html", "MARKER_B Nichts.").await;
    let _extract = h.chat("MARKER_", "null").await;

    let config = h.config();
    let http = HttpClient::with_settings("incidentwatch-test", "de", Duration::from_secs(5), 1)
        .unwrap()
        .with_initial_backoff(Duration::from_millis(1));
    let llm = Arc::new(OpenAiClient::new(http.clone(), &config.llm, "sk-test"));
    let monitor = Monitor::new(config, http, llm.clone(), llm);

    let summary = monitor
        .run_once(&RunOptions {
            dry_run: true,
            ..RunOptions::default()
        })
        .await
        .unwrap();

    assert_eq!(summary.feed_errors, 0);
    assert_eq!(summary.keyword_matches, 2);
    limited.assert_async().await;
    feed.assert_async().await;
}
