//! [`LlmSummarizer`] – a [`Summarizer`] backed by an OpenAI-compatible model.
//!
//! Talks to any server exposing `/v1/chat/completions`, such as
//! [Ollama](https://ollama.com) (`http://localhost:11434`).  Fact and theme
//! extraction request a JSON list via a `schemars` schema in
//! `response_format`; replies that ignore the schema are split into lines.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_memory::{Collaborator, SummarizerSlot};
//! use strata_runtime::LlmSummarizer;
//!
//! let summarizer = LlmSummarizer::new("http://localhost:11434", "llama3");
//! let slot: SummarizerSlot = Collaborator::Configured(Arc::new(summarizer));
//! ```

use std::collections::BTreeSet;

use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use strata_memory::{CollaboratorError, Summarizer};
use strata_types::{ChunkSummary, Role, Turn};
use thiserror::Error;
use tracing::debug;

/// System prompt sent with every request.
pub const SYSTEM_PROMPT: &str = "\
You compress conversation history for a long-running assistant.
- Be factual and brief. Never invent details that are not in the input.
- Prefer concrete nouns, names, numbers and decisions over pleasantries.
- Write in the third person (\"the user asked...\").";

const SUMMARIZE_PROMPT: &str = "Summarise the following conversation excerpt in at most three sentences.";
const MERGE_PROMPT: &str =
    "Merge these summaries of consecutive conversation segments into one summary of at most four sentences.";
const FACTS_PROMPT: &str = "List durable facts about the user stated in this excerpt (preferences, identity, \
     commitments). Return at most five short items.";
const THEMES_PROMPT: &str = "List the recurring topics across these segment summaries as at most five \
     one- or two-word themes.";

/// Failure talking to the model server.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response from the model server could not be parsed.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl From<ProviderError> for CollaboratorError {
    fn from(e: ProviderError) -> Self {
        match &e {
            ProviderError::Http(err) if err.is_connect() => CollaboratorError::Unavailable(e.to_string()),
            _ => CollaboratorError::Failed(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Structured reply shape for list-valued requests.
#[derive(Debug, Deserialize, JsonSchema)]
struct ItemList {
    items: Vec<String>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: serde_json::Value,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmSummarizer
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an OpenAI-compatible chat-completions endpoint.
pub struct LlmSummarizer {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LlmSummarizer {
    /// Create a summarizer pointing at `base_url` (e.g.
    /// `"http://localhost:11434"`) and using `model` (e.g. `"llama3"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send a bearer token with every request.  Empty keys are ignored.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` and return the assistant's reply text.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Http`] if the request fails, or
    /// [`ProviderError::BadResponse`] if the reply has no choices.
    pub async fn complete(&self, messages: &[ChatMessage], list_reply: bool) -> Result<String, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response_format = list_reply.then(|| ResponseFormat {
            kind: "json_schema",
            json_schema: serde_json::to_value(schema_for!(ItemList)).unwrap_or(serde_json::Value::Null),
        });
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            response_format,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: ChatResponse = request.send().await?.error_for_status()?.json().await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| ProviderError::BadResponse("empty choices array".into()))
    }

    async fn ask(&self, instruction: &str, input: String) -> Result<String, ProviderError> {
        let messages = [
            ChatMessage::new(Role::System, SYSTEM_PROMPT),
            ChatMessage::new(Role::User, format!("{instruction}\n\n{input}")),
        ];
        self.complete(&messages, false).await
    }

    async fn ask_list(&self, instruction: &str, input: String) -> Result<BTreeSet<String>, ProviderError> {
        let messages = [
            ChatMessage::new(Role::System, SYSTEM_PROMPT),
            ChatMessage::new(Role::User, format!("{instruction}\n\n{input}")),
        ];
        let reply = self.complete(&messages, true).await?;
        Ok(parse_list(&reply))
    }
}

fn render_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a list reply: `{"items": [...]}`, a bare JSON array, or one item per
/// line with bullets and numbering stripped.
pub(crate) fn parse_list(reply: &str) -> BTreeSet<String> {
    let cleaned = |s: &str| s.trim().to_string();
    if let Ok(list) = serde_json::from_str::<ItemList>(reply) {
        return list.items.iter().map(|s| cleaned(s)).filter(|s| !s.is_empty()).collect();
    }
    if let Ok(items) = serde_json::from_str::<Vec<String>>(reply) {
        return items.iter().map(|s| cleaned(s)).filter(|s| !s.is_empty()).collect();
    }
    debug!("List reply was not JSON; splitting lines");
    reply
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')'])
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, CollaboratorError> {
        if turns.is_empty() {
            return Ok(String::new());
        }
        Ok(self.ask(SUMMARIZE_PROMPT, render_turns(turns)).await?)
    }

    async fn merge_summaries(&self, summaries: &[String]) -> Result<String, CollaboratorError> {
        let parts: Vec<String> = summaries
            .iter()
            .filter(|s| !s.trim().is_empty())
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s.trim()))
            .collect();
        if parts.is_empty() {
            return Ok(String::new());
        }
        Ok(self.ask(MERGE_PROMPT, parts.join("\n")).await?)
    }

    async fn extract_facts(&self, turns: &[Turn]) -> Result<BTreeSet<String>, CollaboratorError> {
        if turns.is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(self.ask_list(FACTS_PROMPT, render_turns(turns)).await?)
    }

    async fn extract_themes(&self, chunks: &[ChunkSummary]) -> Result<BTreeSet<String>, CollaboratorError> {
        let summaries: Vec<String> = chunks
            .iter()
            .filter(|c| !c.summary.trim().is_empty())
            .map(|c| format!("[turns {}] {}", c.turn_range, c.summary.trim()))
            .collect();
        if summaries.is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(self.ask_list(THEMES_PROMPT, summaries.join("\n")).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        }))
    }

    #[test]
    fn chat_message_serializes_lowercase_role() {
        let json = serde_json::to_string(&ChatMessage::new(Role::System, "hi")).unwrap();
        assert!(json.contains("\"system\""));
    }

    #[test]
    fn item_list_schema_names_items() {
        let schema = serde_json::to_value(schema_for!(ItemList)).unwrap().to_string();
        assert!(schema.contains("items"));
    }

    #[test]
    fn parse_list_accepts_json_and_bullets() {
        let from_json = parse_list(r#"{"items": ["bread", " rust ", ""]}"#);
        assert_eq!(from_json, BTreeSet::from(["bread".to_string(), "rust".to_string()]));

        let from_array = parse_list(r#"["a", "b"]"#);
        assert_eq!(from_array.len(), 2);

        let from_lines = parse_list("- likes tea\n2. lives in Oslo\n\n• owns a cat");
        assert!(from_lines.contains("likes tea"));
        assert!(from_lines.contains("lives in Oslo"));
        assert!(from_lines.contains("owns a cat"));
    }

    #[tokio::test]
    async fn summarize_posts_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({ "model": "llama3", "stream": false })))
            .respond_with(reply("  The user asked about bread.  "))
            .expect(1)
            .mount(&server)
            .await;

        let s = LlmSummarizer::new(server.uri(), "llama3");
        let out = s.summarize(&[Turn::new(Role::User, "how do I bake bread?")]).await.unwrap();
        assert_eq!(out, "The user asked about bread.");
    }

    #[tokio::test]
    async fn facts_request_a_json_schema_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "response_format": { "type": "json_schema" } })))
            .respond_with(reply(r#"{"items": ["prefers rye"]}"#))
            .mount(&server)
            .await;

        let s = LlmSummarizer::new(server.uri(), "llama3");
        let facts = s.extract_facts(&[Turn::new(Role::User, "I prefer rye")]).await.unwrap();
        assert_eq!(facts, BTreeSet::from(["prefers rye".to_string()]));
    }

    #[tokio::test]
    async fn api_key_is_sent_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(header("authorization", "Bearer sk-test"))
            .respond_with(reply("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let s = LlmSummarizer::new(server.uri(), "gpt-4o").with_api_key("sk-test");
        assert_eq!(s.merge_summaries(&["a".into(), "b".into()]).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn server_error_maps_to_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let s = LlmSummarizer::new(server.uri(), "llama3");
        let err = s.summarize(&[Turn::new(Role::User, "x")]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Failed(_)));
    }

    #[tokio::test]
    async fn empty_choices_is_bad_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let s = LlmSummarizer::new(server.uri(), "llama3");
        let err = s.complete(&[ChatMessage::new(Role::User, "x")], false).await.unwrap_err();
        assert!(matches!(err, ProviderError::BadResponse(_)));
    }

    #[tokio::test]
    async fn empty_inputs_skip_the_network() {
        let s = LlmSummarizer::new("http://127.0.0.1:9", "llama3");
        assert_eq!(s.summarize(&[]).await.unwrap(), "");
        assert_eq!(s.merge_summaries(&["  ".into()]).await.unwrap(), "");
        assert!(s.extract_themes(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let s = LlmSummarizer::new("http://127.0.0.1:9", "llama3");
        let err = s.summarize(&[Turn::new(Role::User, "x")]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(_)));
    }
}
