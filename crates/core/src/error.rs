use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("document load failed: {0}")]
    Load(String),

    #[error("document has no chunkable text: {0}")]
    EmptyDocument(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("invalid response from {backend}: {details}")]
    Index { backend: String, details: String },

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

impl RagError {
    pub fn index(backend: impl Into<String>, details: impl std::fmt::Display) -> Self {
        Self::Index {
            backend: backend.into(),
            details: details.to_string(),
        }
    }

    /// Stable machine-readable code surfaced to callers next to the generic message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Load(_) => "load_error",
            Self::EmptyDocument(_) => "empty_document",
            Self::Embedding(_) => "embedding_error",
            Self::Index { .. } => "index_error",
            Self::Generation(_) => "generation_error",
            Self::Configuration(_) | Self::InvalidChunkConfig(_) => "configuration_error",
        }
    }

    /// Caller-facing text. Details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(details) => details.clone(),
            Self::Load(_) => "Could not extract text from the uploaded document".to_string(),
            Self::EmptyDocument(_) => "The uploaded document contains no readable text".to_string(),
            Self::Embedding(_) => "Embedding service failed to process the request".to_string(),
            Self::Index { .. } => "Vector store failed to process the request".to_string(),
            Self::Generation(_) => "Answer generation failed".to_string(),
            Self::Configuration(_) | Self::InvalidChunkConfig(_) => {
                "Service is misconfigured".to_string()
            }
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
