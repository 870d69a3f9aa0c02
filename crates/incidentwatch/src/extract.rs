//! Language model extraction.
//!
//! Turns article text into a structured [`Incident`] and decides whether two
//! reports describe the same event. The model sits behind two traits so the
//! monitor and the deduplicator can be exercised without network access.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::http::{error_body, HttpClient};
use crate::incident::{Incident, IncidentType};

const SYSTEM_PROMPT: &str = "Du bist ein sehr kritischer Fact-Checker. \
Gib nur Vorfälle zurück, die zu 100% verifiziert und relevant sind.";

const EXTRACTION_TEMPLATE: &str = r#"Prüfe den folgenden Artikel streng darauf, ob er einen rassistisch motivierten Vorfall in Magdeburg beschreibt.

Ein Vorfall zählt nur, wenn ALLE Bedingungen erfüllt sind:
1. Er fand nachweislich in Magdeburg statt.
2. Er war eindeutig ein rassistisch oder fremdenfeindlich motivierter Übergriff.
3. Er ereignete sich nach dem 20. Dezember 2024.
4. Er ist von offiziellen Stellen (Polizei, Behörden) oder mehreren unabhängigen Zeugen bestätigt.
5. Die rassistische oder fremdenfeindliche Motivation ist klar erkennbar (etwa durch Äußerungen oder Umstände).

Antworte ausschließlich mit null, wenn:
- auch nur eine Bedingung nicht eindeutig erfüllt ist
- der Artikel nur allgemein über Rassismus berichtet
- der Artikel frühere Vorfälle behandelt
- Zweifel an der rassistischen Motivation bestehen
- der Vorfall nicht in Magdeburg stattfand
- der Vorfall nicht ausreichend belegt ist

Sind alle Bedingungen erfüllt, antworte mit genau einem JSON-Objekt mit den Feldern:
- date (YYYY-MM-DD)
- location (genauer Ort in Magdeburg)
- description (knappe sachliche Beschreibung inklusive der bestätigenden Stelle)
- sources (Array aus Objekten mit url und name)
- type (physical_attack, verbal_attack, property_damage oder other)
- status (verified, wenn Polizei oder Behörden den Vorfall bestätigen, sonst unverified)

Artikel:
{article}"#;

const COMPARISON_TEMPLATE: &str = r#"Compare these incidents and decide whether they are the same event reported differently.
Consider location, type of attack and description details.
Answer only "true" if they are the same incident, or "false" if they are different.

Incident 1:
Location: {location}
Description: {description}
Type: {type}

Compare with each:
{existing}"#;

/// Turns article text into an incident.
#[async_trait]
pub trait IncidentExtractor: Send + Sync {
    /// Extract an incident from an article.
    ///
    /// Returns `Ok(None)` when the article does not describe a qualifying
    /// incident.
    async fn extract(
        &self,
        article_text: &str,
        url: &str,
        source_name: &str,
    ) -> Result<Option<Incident>>;
}

/// Decides whether a candidate repeats an already recorded incident.
#[async_trait]
pub trait IncidentMatcher: Send + Sync {
    /// Check whether `candidate` is the same event as any of `same_day`.
    async fn same_incident(&self, candidate: &Incident, same_day: &[&Incident]) -> Result<bool>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct IncidentSummary<'a> {
    location: &'a str,
    description: &'a str,
    #[serde(rename = "type")]
    incident_type: IncidentType,
}

impl<'a> From<&'a Incident> for IncidentSummary<'a> {
    fn from(incident: &'a Incident) -> Self {
        Self {
            location: &incident.location,
            description: &incident.description,
            incident_type: incident.incident_type,
        }
    }
}

/// Client for an OpenAI-compatible chat completions API.
#[derive(Clone)]
pub struct OpenAiClient {
    http: HttpClient,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    /// Create a client.
    #[must_use]
    pub fn new(http: HttpClient, config: &LlmConfig, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key: api_key.into(),
        }
    }

    /// The model requests are sent to.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: Vec<ChatMessage<'_>>) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };
        let request = self
            .http
            .client()
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&body);

        let response = self.http.send(request, &self.endpoint).await?;
        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(Error::llm(format!("API returned {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::llm(format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::llm("response contained no message"))?;

        trace!(model = %self.model, reply = %content, "Model reply");
        Ok(content)
    }
}

#[async_trait]
impl IncidentExtractor for OpenAiClient {
    async fn extract(
        &self,
        article_text: &str,
        url: &str,
        source_name: &str,
    ) -> Result<Option<Incident>> {
        let prompt = extraction_prompt(article_text);
        let reply = self
            .complete(vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ])
            .await?;

        parse_extraction(&reply, url, source_name)
    }
}

#[async_trait]
impl IncidentMatcher for OpenAiClient {
    async fn same_incident(&self, candidate: &Incident, same_day: &[&Incident]) -> Result<bool> {
        let prompt = comparison_prompt(candidate, same_day)?;
        let reply = self
            .complete(vec![ChatMessage {
                role: "user",
                content: &prompt,
            }])
            .await?;

        let same = parse_comparison(&reply);
        debug!(date = %candidate.date, same, "Compared with same-day incidents");
        Ok(same)
    }
}

/// Build the extraction prompt for an article.
#[must_use]
pub fn extraction_prompt(article_text: &str) -> String {
    EXTRACTION_TEMPLATE.replace("{article}", article_text)
}

/// Build the comparison prompt for a candidate and its same-day incidents.
///
/// # Errors
///
/// Returns an error if the incidents cannot be serialized.
pub fn comparison_prompt(candidate: &Incident, same_day: &[&Incident]) -> Result<String> {
    let existing: Vec<IncidentSummary<'_>> = same_day.iter().map(|i| (*i).into()).collect();
    let existing = serde_json::to_string_pretty(&existing)?;

    Ok(COMPARISON_TEMPLATE
        .replace("{location}", &candidate.location)
        .replace("{description}", &candidate.description)
        .replace("{type}", &candidate.incident_type.to_string())
        .replace("{existing}", &existing))
}

static CODE_FENCE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

/// Markdown code fence around a reply, compiled on first use.
fn code_fence() -> Result<&'static Regex> {
    CODE_FENCE
        .get_or_init(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$"))
        .as_ref()
        .map_err(|e| Error::internal(format!("invalid fence pattern: {e}")))
}

fn strip_code_fence(reply: &str) -> Result<&str> {
    Ok(code_fence()?
        .captures(reply)
        .and_then(|c| c.get(1))
        .map_or(reply, |m| m.as_str()))
}

/// Interpret an extraction reply.
///
/// `null` means the article holds no qualifying incident. Otherwise the first
/// JSON object in the reply is parsed, the article is attached as a source
/// and the result is validated.
///
/// # Errors
///
/// Returns [`Error::Extraction`] if the reply is neither `null` nor a valid
/// incident.
pub fn parse_extraction(reply: &str, url: &str, source_name: &str) -> Result<Option<Incident>> {
    let body = strip_code_fence(reply.trim())?.trim();
    if body.eq_ignore_ascii_case("null") {
        return Ok(None);
    }

    let start = body
        .find('{')
        .ok_or_else(|| Error::extraction(url, "reply contains no JSON object"))?;

    let mut incident = serde_json::Deserializer::from_str(&body[start..])
        .into_iter::<Incident>()
        .next()
        .ok_or_else(|| Error::extraction(url, "reply contains no JSON object"))?
        .map_err(|e| Error::extraction(url, e.to_string()))?;

    incident.ensure_source(url, source_name);
    incident
        .validate()
        .map_err(|e| Error::extraction(url, e.to_string()))?;

    Ok(Some(incident))
}

/// Interpret a comparison reply. Only a literal `true` counts.
#[must_use]
pub fn parse_comparison(reply: &str) -> bool {
    reply.trim().eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_client;
    use crate::incident::tests::sample_incident;
    use crate::incident::IncidentStatus;

    const URL: &str = "https://www.mdr.de/nachrichten/a-100.html";

    const REPLY: &str = r#"{
        "date": "2024-12-23",
        "location": "Hasselbachplatz",
        "description": "Ein Mann wurde rassistisch beleidigt und geschlagen, bestätigt von der Polizei.",
        "sources": [],
        "type": "physical_attack",
        "status": "verified"
    }"#;

    fn config(api_base: String) -> LlmConfig {
        LlmConfig {
            api_base,
            ..LlmConfig::default()
        }
    }

    fn completion(content: &str) -> String {
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
        .to_string()
    }

    #[test]
    fn test_parse_null_reply() {
        assert!(parse_extraction("null", URL, "MDR").unwrap().is_none());
        assert!(parse_extraction("  NULL\n", URL, "MDR").unwrap().is_none());
        assert!(parse_extraction("```\nnull\n```", URL, "MDR")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_parse_incident_adds_source() {
        let incident = parse_extraction(REPLY, URL, "MDR Sachsen-Anhalt")
            .unwrap()
            .unwrap();

        assert_eq!(incident.date.to_string(), "2024-12-23");
        assert_eq!(incident.incident_type, IncidentType::PhysicalAttack);
        assert_eq!(incident.status, IncidentStatus::Verified);
        assert_eq!(incident.sources.len(), 1);
        assert_eq!(incident.sources[0].url, URL);
        assert_eq!(incident.sources[0].name, "MDR Sachsen-Anhalt");
    }

    #[test]
    fn test_parse_keeps_existing_source_once() {
        let reply = REPLY.replace(
            r#""sources": []"#,
            &format!(r#""sources": [{{"url": "{URL}", "name": "MDR"}}]"#),
        );
        let incident = parse_extraction(&reply, URL, "MDR Sachsen-Anhalt")
            .unwrap()
            .unwrap();

        assert_eq!(incident.sources.len(), 1);
        assert_eq!(incident.sources[0].name, "MDR");
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = format!("```json\n{REPLY}\n```");
        let incident = parse_extraction(&reply, URL, "MDR").unwrap();
        assert!(incident.is_some());
    }

    #[test]
    fn test_code_fence_compiled_once() {
        let first = code_fence().unwrap();
        let second = code_fence().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(strip_code_fence("```\nnull\n```").unwrap(), "null");
        assert_eq!(strip_code_fence("null").unwrap(), "null");
    }

    #[test]
    fn test_parse_reply_with_surrounding_text() {
        let reply = format!("Hier ist der Vorfall:\n{REPLY}\nEnde.");
        let incident = parse_extraction(&reply, URL, "MDR").unwrap().unwrap();
        assert_eq!(incident.location, "Hasselbachplatz");
    }

    #[test]
    fn test_parse_unknown_type_falls_back_to_other() {
        let reply = REPLY.replace("physical_attack", "arson");
        let incident = parse_extraction(&reply, URL, "MDR").unwrap().unwrap();
        assert_eq!(incident.incident_type, IncidentType::Other);
    }

    #[test]
    fn test_parse_garbage_is_extraction_error() {
        let err = parse_extraction("Ich bin mir nicht sicher.", URL, "MDR").unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
        assert!(err.to_string().contains(URL));
    }

    #[test]
    fn test_parse_invalid_incident_rejected() {
        let reply = REPLY.replace("Hasselbachplatz", " ");
        let err = parse_extraction(&reply, URL, "MDR").unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }

    #[test]
    fn test_parse_bad_date_rejected() {
        let reply = REPLY.replace("2024-12-23", "23.12.2024");
        assert!(parse_extraction(&reply, URL, "MDR").is_err());
    }

    #[test]
    fn test_parse_comparison() {
        assert!(parse_comparison("true"));
        assert!(parse_comparison(" True\n"));
        assert!(!parse_comparison("false"));
        assert!(!parse_comparison("true, probably"));
        assert!(!parse_comparison(""));
    }

    #[test]
    fn test_extraction_prompt_contains_article() {
        let prompt = extraction_prompt("Polizei meldet Angriff");
        assert!(prompt.contains("Polizei meldet Angriff"));
        assert!(prompt.contains("20. Dezember 2024"));
        assert!(prompt.contains("physical_attack"));
    }

    #[test]
    fn test_comparison_prompt_lists_incidents() {
        let candidate = sample_incident("2024-12-23", "https://taz.de/!1/");
        let mut other = sample_incident("2024-12-23", "https://www.mdr.de/2.html");
        other.location = "Alter Markt".to_string();

        let prompt = comparison_prompt(&candidate, &[&other]).unwrap();
        assert!(prompt.contains("Location: Hasselbachplatz"));
        assert!(prompt.contains("Type: physical_attack"));
        assert!(prompt.contains("\"location\": \"Alter Markt\""));
        assert!(!prompt.contains("https://"));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = OpenAiClient::new(test_client(), &config("http://localhost/v1/".to_string()), "sk-secret");
        let debug = format!("{client:?}");
        assert!(debug.contains("http://localhost/v1/chat/completions"));
        assert!(!debug.contains("sk-secret"));
    }

    #[tokio::test]
    async fn test_extract_calls_chat_api() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4-turbo-preview",
                "temperature": 0.0
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion(REPLY))
            .create_async()
            .await;

        let client = OpenAiClient::new(test_client(), &config(server.url()), "sk-test");
        let incident = client.extract("Artikeltext", URL, "MDR").await.unwrap();

        assert!(incident.is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_extract_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Incorrect API key"}}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(test_client(), &config(server.url()), "sk-bad");
        let err = client.extract("Artikeltext", URL, "MDR").await.unwrap_err();

        assert!(matches!(err, Error::Llm(_)));
        assert!(err.to_string().contains("Incorrect API key"));
    }

    #[tokio::test]
    async fn test_extract_empty_choices() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(test_client(), &config(server.url()), "sk-test");
        assert!(matches!(
            client.extract("x", URL, "MDR").await,
            Err(Error::Llm(_))
        ));
    }

    #[tokio::test]
    async fn test_same_incident() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion("true"))
            .create_async()
            .await;

        let client = OpenAiClient::new(test_client(), &config(format!("{}/", server.url())), "sk-test");
        let candidate = sample_incident("2024-12-23", "https://taz.de/!1/");
        let existing = sample_incident("2024-12-23", "https://www.mdr.de/2.html");

        assert!(client.same_incident(&candidate, &[&existing]).await.unwrap());
    }
}
