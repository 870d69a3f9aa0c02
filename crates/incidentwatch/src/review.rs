//! Pull request publishing.
//!
//! New incidents and sources are never committed directly. The updated
//! `incidents.json` goes onto a fresh branch and a pull request is opened for
//! a human to verify.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::ReviewConfig;
use crate::error::{Error, Result};
use crate::http::{error_body, HttpClient};
use crate::incident::IncidentDatabase;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

/// Body of every generated pull request.
pub const PULL_REQUEST_BODY: &str = "Automatically detected new incidents from news sources.";

/// An opened pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Pull request number.
    pub number: u64,
    /// Web URL of the pull request.
    pub html_url: String,
    /// Branch holding the change.
    #[serde(default)]
    pub branch: String,
}

/// What a run changed in the incident database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Change {
    /// Incidents appended.
    pub added: usize,
    /// Sources merged into incidents that were already recorded.
    pub sources_added: usize,
}

impl Change {
    /// Check whether there is nothing to deliver.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.sources_added == 0
    }

    /// Title and commit message for the change.
    #[must_use]
    pub fn title(&self) -> String {
        match (self.added, self.sources_added) {
            (added, 0) => format!("Add {added} new incidents"),
            (0, sources) => format!("Add {sources} sources to existing incidents"),
            (added, sources) => format!("Add {added} new incidents and {sources} sources"),
        }
    }
}

/// Publishes an updated incident database for review.
#[async_trait]
pub trait ReviewPublisher: Send + Sync {
    /// Push the database to a new branch and open a pull request.
    async fn publish(&self, db: &IncidentDatabase, change: Change) -> Result<PullRequest>;
}

/// Body of a contents API update. `sha` is required when the file exists.
fn file_update(branch: &str, content: &str, sha: Option<&str>, message: &str) -> serde_json::Value {
    let mut body = json!({
        "message": message,
        "content": STANDARD.encode(content.as_bytes()),
        "branch": branch,
    });
    if let Some(sha) = sha {
        body["sha"] = json!(sha);
    }
    body
}

#[derive(Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Deserialize)]
struct ContentFile {
    sha: String,
}

/// [`ReviewPublisher`] backed by the GitHub REST API.
#[derive(Clone)]
pub struct GitHubPublisher {
    http: HttpClient,
    api_base: String,
    repository: String,
    token: String,
    base_branch: String,
    branch_prefix: String,
    incidents_path: String,
}

impl std::fmt::Debug for GitHubPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubPublisher")
            .field("api_base", &self.api_base)
            .field("repository", &self.repository)
            .field("base_branch", &self.base_branch)
            .field("incidents_path", &self.incidents_path)
            .finish_non_exhaustive()
    }
}

impl GitHubPublisher {
    /// Create a publisher for `repository` (`owner/name`).
    ///
    /// `incidents_path` is the file's path inside the repository.
    #[must_use]
    pub fn new(
        http: HttpClient,
        config: &ReviewConfig,
        repository: impl Into<String>,
        token: impl Into<String>,
        incidents_path: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            repository: repository.into(),
            token: token.into(),
            base_branch: config.base_branch.clone(),
            branch_prefix: config.branch_prefix.clone(),
            incidents_path: incidents_path.into().trim_start_matches("./").to_string(),
        }
    }

    /// A new branch name for the current time.
    #[must_use]
    pub fn branch_name(&self) -> String {
        format!("{}-{}", self.branch_prefix, Utc::now().format("%Y%m%d-%H%M%S"))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_base, self.repository, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, GITHUB_ACCEPT)
    }

    async fn call(
        &self,
        step: &'static str,
        request: RequestBuilder,
        url: &str,
        expected: &[StatusCode],
    ) -> Result<Response> {
        let response = self
            .http
            .send(self.authorized(request), url)
            .await
            .map_err(|e| Error::review(step, None, e.to_string()))?;

        let status = response.status();
        if expected.contains(&status) {
            debug!(step, %status, "Review step succeeded");
            return Ok(response);
        }
        let body = error_body(response).await;
        Err(Error::review(step, Some(status.as_u16()), body))
    }

    async fn base_sha(&self) -> Result<String> {
        const STEP: &str = "get_base_ref";
        let url = self.url(&format!("git/ref/heads/{}", self.base_branch));
        let response = self
            .call(STEP, self.http.client().get(&url), &url, &[StatusCode::OK])
            .await?;
        let git_ref: GitRef = response
            .json()
            .await
            .map_err(|e| Error::review(STEP, None, e.to_string()))?;
        Ok(git_ref.object.sha)
    }

    async fn create_branch(&self, branch: &str, sha: &str) -> Result<()> {
        let url = self.url("git/refs");
        let request = self.http.client().post(&url).json(&json!({
            "ref": format!("refs/heads/{branch}"),
            "sha": sha,
        }));
        self.call("create_branch", request, &url, &[StatusCode::CREATED])
            .await?;
        Ok(())
    }

    async fn existing_file_sha(&self, branch: &str) -> Result<Option<String>> {
        const STEP: &str = "get_file";
        let url = self.url(&format!("contents/{}", self.incidents_path));
        let request = self.http.client().get(&url).query(&[("ref", branch)]);
        let response = self
            .call(STEP, request, &url, &[StatusCode::OK, StatusCode::NOT_FOUND])
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let file: ContentFile = response
            .json()
            .await
            .map_err(|e| Error::review(STEP, None, e.to_string()))?;
        Ok(Some(file.sha))
    }

    async fn put_file(&self, body: &serde_json::Value) -> Result<()> {
        let url = self.url(&format!("contents/{}", self.incidents_path));
        let request = self.http.client().put(&url).json(body);
        self.call(
            "update_file",
            request,
            &url,
            &[StatusCode::OK, StatusCode::CREATED],
        )
        .await?;
        Ok(())
    }

    async fn open_pull_request(&self, branch: &str, title: &str) -> Result<PullRequest> {
        const STEP: &str = "open_pull_request";
        let url = self.url("pulls");
        let request = self.http.client().post(&url).json(&json!({
            "title": title,
            "body": PULL_REQUEST_BODY,
            "head": branch,
            "base": self.base_branch,
        }));
        let response = self
            .call(STEP, request, &url, &[StatusCode::CREATED])
            .await?;
        let mut pull: PullRequest = response
            .json()
            .await
            .map_err(|e| Error::review(STEP, None, e.to_string()))?;
        pull.branch = branch.to_string();
        Ok(pull)
    }
}

#[async_trait]
impl ReviewPublisher for GitHubPublisher {
    async fn publish(&self, db: &IncidentDatabase, change: Change) -> Result<PullRequest> {
        let content = db.to_json()?;
        let title = change.title();
        let branch = self.branch_name();

        let base = self.base_sha().await?;
        self.create_branch(&branch, &base).await?;
        let sha = self.existing_file_sha(&branch).await?;
        self.put_file(&file_update(&branch, &content, sha.as_deref(), &title))
            .await?;
        let pull = self.open_pull_request(&branch, &title).await?;

        info!(
            repository = %self.repository,
            number = pull.number,
            url = %pull.html_url,
            "Opened pull request"
        );
        Ok(pull)
    }
}
