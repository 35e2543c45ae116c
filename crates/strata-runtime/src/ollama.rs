//! Ollama helpers: the [`OllamaEmbedder`] and model discovery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_memory::{CollaboratorError, Embedder};

use crate::llm_summarizer::ProviderError;

/// A single model entry returned by Ollama's `/api/tags` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Ping the Ollama server and return the list of locally available models.
pub async fn fetch_models(base_url: &str) -> Result<Vec<OllamaModel>, ProviderError> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let tags: TagsResponse = reqwest::get(&url).await?.error_for_status()?.json().await?;
    Ok(tags.models)
}

/// Returns `true` if the Ollama server is reachable.
pub async fn is_running(base_url: &str) -> bool {
    fetch_models(base_url).await.is_ok()
}

/// [`Embedder`] backed by Ollama's `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed `text`, rejecting an empty vector.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };
        let response: EmbeddingResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if response.embedding.is_empty() {
            return Err(ProviderError::BadResponse(format!(
                "model {} returned an empty embedding",
                self.model
            )));
        }
        Ok(response.embedding)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        Ok(self.embed_text(text).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn embed_posts_model_and_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_json(serde_json::json!({ "model": "nomic-embed-text", "prompt": "hello" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embedding": [0.1, 0.2] })))
            .expect(1)
            .mount(&server)
            .await;

        let e = OllamaEmbedder::new(format!("{}/", server.uri()), "nomic-embed-text");
        assert_eq!(e.embed("hello").await.unwrap(), vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn empty_embedding_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embedding": [] })))
            .mount(&server)
            .await;

        let e = OllamaEmbedder::new(server.uri(), "nomic-embed-text");
        assert!(matches!(e.embed("x").await, Err(CollaboratorError::Failed(_))));
    }

    #[tokio::test]
    async fn fetch_models_lists_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{ "name": "llama3" }, { "name": "nomic-embed-text" }]
            })))
            .mount(&server)
            .await;

        let models = fetch_models(&server.uri()).await.unwrap();
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["llama3", "nomic-embed-text"]);
        assert!(is_running(&server.uri()).await);
    }

    #[tokio::test]
    async fn offline_server_is_not_running() {
        assert!(!is_running("http://127.0.0.1:9").await);
    }
}
