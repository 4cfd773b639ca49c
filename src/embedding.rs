//! Embedding client abstraction and the Ollama implementation.
//!
//! Enrichment turns each stored product into a short descriptive text and
//! asks an embedding service for its vector. The service is reached through
//! the [`EmbeddingClient`] trait; [`OllamaClient`] speaks the Ollama HTTP API:
//!
//! | Call | Request | Response |
//! |------|---------|----------|
//! | [`OllamaClient::verify`] | `GET {url}/api/tags` | `{"models": [{"name": ...}]}` |
//! | [`EmbeddingClient::embed`] | `POST {url}/api/embeddings` `{model, prompt}` | `{"embedding": [f32]}` |
//!
//! Each request carries the configured timeout. There is no retry; the
//! caller counts a failed product and moves on.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EmbeddingConfig;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding service returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("embedding service returned an empty vector")]
    Empty,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

pub struct OllamaClient {
    client: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    /// Check the service answers and whether the model is installed.
    ///
    /// A missing model is only a warning: Ollama may still pull it lazily.
    pub async fn verify(&self) -> Result<bool, EmbeddingError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await?;
        let response = check_status(response).await?;
        let tags: TagsResponse = response.json().await?;

        let available = tags.models.iter().any(|m| m.name == self.model);
        if available {
            info!(model = %self.model, "Embedding model available");
        } else {
            let names: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
            warn!(model = %self.model, available = ?names, "Embedding model not listed by service");
        }
        Ok(available)
    }
}

#[async_trait]
impl EmbeddingClient for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.url))
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;
        let response = check_status(response).await?;
        let parsed: EmbeddingResponse = response.json().await?;
        if parsed.embedding.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        Ok(parsed.embedding)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EmbeddingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EmbeddingError::Api {
        status: status.as_u16(),
        body,
    })
}

/// Descriptive text embedded for a stored product document.
///
/// Name, brand, category and size followed by the product family, with
/// `N/A` placeholders dropped and whitespace collapsed.
pub fn product_text(document: &Value) -> String {
    let field = |key: &str| document.get(key).and_then(Value::as_str).unwrap_or("");
    let raw = format!(
        "{} {} {} {} televisor",
        field("name"),
        field("brand"),
        field("category"),
        field("size")
    );
    raw.replace("N/A", "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
