//! Embedding provider adapter. `Embedder::embed_batch` is the primary
//! entry point — §4.8 requires entity descriptions to be embedded in a
//! single batch call per chunk, never one request per entity.

mod tfidf;

pub use tfidf::TfIdfEmbedder;

use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::error::{EngramError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Batched embedding call; implementations must issue exactly one
    /// outbound request regardless of `texts.len()`.
    async fn embed_batch(&self, texts: &[&str], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(&[text], cancel).await?;
        batch.pop().ok_or_else(|| EngramError::Dependency("embedding provider returned no vectors".into()))
    }

    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[&str], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        cancel.check()?;

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({ "input": texts, "model": self.model }))
            .send()
            .await
            .map_err(|e| EngramError::Transient(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let retryable = status.as_u16() == 429 || status.is_server_error();
            let body = response.text().await.unwrap_or_default();
            let message = format!("embedding provider error {status}: {body}");
            return Err(if retryable {
                EngramError::Transient(message)
            } else {
                EngramError::Permanent(message)
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngramError::Permanent(format!("malformed embedding response: {e}")))?;

        let items = body["data"]
            .as_array()
            .ok_or_else(|| EngramError::Permanent("embedding response missing data array".into()))?;

        let embeddings = items
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .map(|arr| arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
                    .unwrap_or_default()
            })
            .collect();

        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
