use std::time::Duration;

use serde::Deserialize;
use tom_core::GraphSettings;

use crate::errors::{GraphError, GraphResult};

/// Text embedding seam used by ingestion and semantic search.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order.
    async fn embed_batch(&self, inputs: &[String]) -> GraphResult<Vec<Vec<f32>>>;

    async fn embed(&self, input: &str) -> GraphResult<Vec<f32>> {
        self.embed_batch(&[input.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::Embedding("embedder returned no vector".to_string()))
    }
}

/// Ollama-style `/api/embed` client.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    batch_size: usize,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(settings: &GraphSettings) -> GraphResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.embedding_timeout_seconds))
            .build()?;
        Ok(Self {
            base_url: settings.embedding_url.trim_end_matches('/').to_string(),
            model: settings.embedding_model.clone(),
            batch_size: settings.embedding_batch.max(1),
            client,
        })
    }

    async fn embed_chunk(&self, inputs: &[String]) -> GraphResult<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let body = EmbedRequest {
            model: self.model.clone(),
            input: inputs.to_vec(),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GraphError::Embedding(format!(
                "embedding request failed: {status} {text}"
            )));
        }

        let payload: EmbedResponse = response.json().await?;
        payload.into_vectors()
    }
}

#[async_trait::async_trait]
impl Embedder for EmbeddingClient {
    async fn embed_batch(&self, inputs: &[String]) -> GraphResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(self.batch_size) {
            let embedded = self.embed_chunk(chunk).await?;
            if embedded.len() != chunk.len() {
                return Err(GraphError::Embedding(format!(
                    "expected {} vectors, got {}",
                    chunk.len(),
                    embedded.len()
                )));
            }
            vectors.extend(embedded);
        }
        tracing::debug!(count = vectors.len(), model = %self.model, "embedded batch");
        Ok(vectors)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    embeddings: Option<Vec<Vec<f32>>>,
    embedding: Option<Vec<f32>>,
}

impl EmbedResponse {
    fn into_vectors(self) -> GraphResult<Vec<Vec<f32>>> {
        if let Some(embeddings) = self.embeddings {
            return Ok(embeddings);
        }
        if let Some(embedding) = self.embedding {
            return Ok(vec![embedding]);
        }
        Err(GraphError::Embedding(
            "embedding response missing vectors".to_string(),
        ))
    }
}
