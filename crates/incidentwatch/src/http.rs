//! Shared HTTP client.
//!
//! Wraps `reqwest` with the timeouts, browser-like headers and retry policy
//! used for news sites, the language model API and the git host.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, LOCATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::error::{Error, Result};

/// Accept header for HTML pages.
pub const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Accept header for feeds.
pub const ACCEPT_FEED: &str = "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8";

/// Longest wait honored from a `Retry-After` header.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Longest delay between two attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// HTTP client with retry support.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    no_redirect: Client,
    max_retries: u32,
    initial_backoff: Duration,
}

/// Result of probing a URL without following redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// HTTP status code.
    pub status: u16,
    /// Redirect target for 301/302 responses.
    pub location: Option<String>,
}

impl HttpClient {
    /// Build a client from the monitor configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        Self::with_settings(
            &config.user_agent,
            &config.accept_language,
            config.request_timeout(),
            config.max_retries,
        )
    }

    /// Build a client from explicit settings.
    ///
    /// # Errors
    ///
    /// Returns an error if a header value is invalid or the TLS backend
    /// cannot be initialized.
    pub fn with_settings(
        user_agent: &str,
        accept_language: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| Error::internal(format!("invalid user agent: {e}")))?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(accept_language)
                .map_err(|e| Error::internal(format!("invalid accept-language: {e}")))?,
        );

        let build = |policy: reqwest::redirect::Policy| {
            Client::builder()
                .timeout(timeout)
                .default_headers(headers.clone())
                .redirect(policy)
                .build()
                .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))
        };

        Ok(Self {
            client: build(reqwest::redirect::Policy::default())?,
            no_redirect: build(reqwest::redirect::Policy::none())?,
            max_retries,
            initial_backoff: Duration::from_millis(500),
        })
    }

    /// Override the first retry delay.
    #[must_use]
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// The underlying client, for building API requests.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET a URL and decode the body as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the status is not a success.
    pub async fn get_text(&self, url: &str, accept: &str) -> Result<String> {
        let request = self.client.get(url).header(reqwest::header::ACCEPT, accept);
        let response = self.send(request, url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::http(url, e.to_string()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// GET a URL without following redirects and report where it points.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn probe(&self, url: &str, accept: &str) -> Result<Probe> {
        let response = self
            .no_redirect
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| Error::http(url, e.to_string()))?;

        let status = response.status();
        let location = if matches!(
            status,
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND
        ) {
            response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        } else {
            None
        };

        Ok(Probe {
            status: status.as_u16(),
            location,
        })
    }

    /// Send a request, retrying transport failures, 5xx and 429 responses.
    ///
    /// A 429 with `Retry-After` waits at least that long before the next
    /// attempt. Any other response is returned as-is so callers can
    /// interpret client errors themselves. Once retries run out the last
    /// retryable response is returned too.
    ///
    /// # Errors
    ///
    /// Returns an error when the last attempt failed in transport or the
    /// request cannot be cloned for a retry.
    pub async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        let rate_limit_wait = Mutex::new(None::<Duration>);
        let pending = &rate_limit_wait;

        let action = move || {
            let wait = pending.lock().ok().and_then(|mut wait| wait.take());
            let current = request.try_clone();
            async move {
                if let Some(wait) = wait {
                    debug!(url, wait_ms = wait.as_millis(), "Honoring Retry-After");
                    sleep(wait).await;
                }
                let current = current.ok_or(Attempt::Unclonable)?;
                match current.send().await {
                    Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                        if let (Some(wait), Ok(mut slot)) = (retry_after(&response), pending.lock()) {
                            *slot = Some(wait);
                        }
                        Err(Attempt::Status(response))
                    }
                    Ok(response) if response.status().is_server_error() => {
                        Err(Attempt::Status(response))
                    }
                    Ok(response) => Ok(response),
                    Err(e) => Err(Attempt::Transport(e)),
                }
            }
        };

        let condition = |attempt: &Attempt| match attempt {
            Attempt::Status(response) => {
                warn!(url, status = %response.status(), "Retryable response");
                true
            }
            Attempt::Transport(e) if e.is_timeout() || e.is_connect() => {
                warn!(url, error = %e, "Transient request failure");
                true
            }
            Attempt::Transport(_) | Attempt::Unclonable => false,
        };

        match RetryIf::spawn(self.backoff(), action, condition).await {
            Ok(response) | Err(Attempt::Status(response)) => Ok(response),
            Err(Attempt::Transport(e)) => Err(Error::http(url, e.to_string())),
            Err(Attempt::Unclonable) => Err(Error::internal("request body cannot be retried")),
        }
    }

    /// Delays between attempts: doubling from the initial backoff, capped
    /// and jittered, one per allowed retry.
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        let initial_ms = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        ExponentialBackoff::from_millis(2)
            .factor((initial_ms / 2).max(1))
            .max_delay(MAX_BACKOFF)
            .map(jitter)
            .take(self.max_retries as usize)
    }
}

/// A failed attempt that may be retried.
enum Attempt {
    /// 429 or 5xx response.
    Status(Response),
    Transport(reqwest::Error),
    /// The request body is a stream and cannot be sent twice.
    Unclonable,
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| std::cmp::min(Duration::from_secs(secs), MAX_RETRY_AFTER))
}

/// Read a response body for error messages, truncated.
pub(crate) async fn error_body(response: Response) -> String {
    let text = response.text().await.unwrap_or_default();
    text.chars().take(500).collect()
}

#[cfg(test)]
pub(crate) fn test_client() -> HttpClient {
    HttpClient::with_settings("incidentwatch-test", "de", Duration::from_secs(5), 0)
        .expect("failed to build test client")
}
