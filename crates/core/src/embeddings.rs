use crate::error::RagError;
use crate::models::IndexedEmbedding;
use crate::openai::{send_with_retries, OpenAiConfig};
use crate::traits::Embedder;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Dimensionality of `text-embedding-3-small`, and of every collection this system creates.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Offline embedder: hashed character trigrams, L2-normalised.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>, RagError> {
        Ok(texts
            .iter()
            .enumerate()
            .map(|(index, text)| IndexedEmbedding {
                index,
                vector: self.embed_text(text),
            })
            .collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError> {
        Ok(self.embed_text(text))
    }
}

/// [`Embedder`] backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiConfig,
    endpoint: Url,
    model: String,
    dimensions: usize,
    /// Sent to the API only when overriding the model's native size.
    request_dimensions: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Result<Self, RagError> {
        Ok(Self {
            client: config.client()?,
            endpoint: config.endpoint("embeddings")?,
            config,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            request_dimensions: None,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self.request_dimensions = Some(dimensions);
        self
    }

    async fn request(&self, input: &[String]) -> Result<Vec<IndexedEmbedding>, RagError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input,
            dimensions: self.request_dimensions,
        };

        let response = send_with_retries("openai embeddings", self.config.max_retries, self.config.timeout, || {
            self.client
                .post(self.endpoint.clone())
                .bearer_auth(&self.config.api_key)
                .json(&body)
        })
        .await
        .map_err(RagError::Embedding)?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| RagError::Embedding(format!("malformed embeddings response: {error}")))?;

        debug!(inputs = input.len(), vectors = parsed.data.len(), model = %self.model, "embedded texts");

        Ok(parsed
            .data
            .into_iter()
            .map(|item| IndexedEmbedding {
                index: item.index,
                vector: item.embedding,
            })
            .collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let embeddings = self.request(&[text.to_string()]).await?;
        let mut aligned = align_embeddings(1, self.dimensions, embeddings)?;
        aligned
            .pop()
            .ok_or_else(|| RagError::Embedding("no vector returned for query".to_string()))
    }
}

/// Pairs vectors with their inputs by the returned index. Fails on a missing,
/// duplicated or out-of-range index, a wrong dimensionality or a non-finite value.
pub fn align_embeddings(
    expected: usize,
    dimensions: usize,
    embeddings: Vec<IndexedEmbedding>,
) -> Result<Vec<Vec<f32>>, RagError> {
    if embeddings.len() != expected {
        return Err(RagError::Embedding(format!(
            "embedding count {} doesn't match input count {expected}",
            embeddings.len()
        )));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for embedding in embeddings {
        let slot = slots.get_mut(embedding.index).ok_or_else(|| {
            RagError::Embedding(format!(
                "embedding index {} out of range for {expected} inputs",
                embedding.index
            ))
        })?;
        if slot.is_some() {
            return Err(RagError::Embedding(format!(
                "embedding index {} returned twice",
                embedding.index
            )));
        }
        if embedding.vector.len() != dimensions {
            return Err(RagError::Embedding(format!(
                "embedding dimension {} != {dimensions} at index {}",
                embedding.vector.len(),
                embedding.index
            )));
        }
        if embedding.vector.iter().any(|value| !value.is_finite()) {
            return Err(RagError::Embedding(format!(
                "embedding at index {} contains non-finite values",
                embedding.index
            )));
        }
        *slot = Some(embedding.vector);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| RagError::Embedding(format!("missing embedding for input {index}")))
        })
        .collect()
}
