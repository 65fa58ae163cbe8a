use crate::error::RagError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOP_K: usize = 3;
pub const MAX_TOP_K: usize = 10;
pub const MAX_QUESTION_CHARS: usize = 1_000;

/// Identity of one uploaded file. Only ever materialised as the parent key of its chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub file_name: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub file_name: String,
    pub page: Option<u32>,
    pub chunk_index: u64,
    pub text: String,
    pub uploaded_at: DateTime<Utc>,
    pub checksum: String,
}

impl DocumentChunk {
    pub fn payload(&self) -> ChunkPayload {
        ChunkPayload {
            text: self.text.clone(),
            document_id: self.document_id.clone(),
            file_name: self.file_name.clone(),
            page: self.page,
            chunk_index: self.chunk_index,
            uploaded_at: Some(self.uploaded_at),
            checksum: Some(self.checksum.clone()),
        }
    }
}

/// Everything retrieval needs, stored next to the vector so no secondary lookup is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ChunkPayload {
    pub text: String,
    pub document_id: String,
    pub file_name: String,
    pub page: Option<u32>,
    pub chunk_index: u64,
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A hit as ranked by the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// One vector returned by an embedder, tagged with the position of the input it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEmbedding {
    pub index: usize,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub chunk_id: String,
    pub score: f32,
    pub text: String,
    pub document_id: String,
    pub file_name: String,
    pub page: Option<u32>,
    pub chunk_index: u64,
}

impl From<ScoredPoint> for SearchResult {
    fn from(point: ScoredPoint) -> Self {
        Self {
            chunk_id: point.id,
            score: point.score,
            text: point.payload.text,
            document_id: point.payload.document_id,
            file_name: point.payload.file_name,
            page: point.payload.page,
            chunk_index: point.payload.chunk_index,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub file_name: String,
    pub page: Option<u32>,
    pub score: f32,
}

impl From<&SearchResult> for Source {
    fn from(result: &SearchResult) -> Self {
        Self {
            file_name: result.file_name.clone(),
            page: result.page,
            score: result.score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReceipt {
    pub success: bool,
    pub document_id: String,
    pub chunks_count: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub question: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.question.trim().is_empty() {
            return Err(RagError::Validation("question must not be empty".to_string()));
        }
        if self.question.chars().count() > MAX_QUESTION_CHARS {
            return Err(RagError::Validation(format!(
                "question is too long, the limit is {MAX_QUESTION_CHARS} characters"
            )));
        }
        validate_top_k(self.top_k)
    }
}

pub fn validate_top_k(top_k: usize) -> Result<(), RagError> {
    if !(1..=MAX_TOP_K).contains(&top_k) {
        return Err(RagError::Validation(format!(
            "topK must be between 1 and {MAX_TOP_K}, got {top_k}"
        )));
    }
    Ok(())
}

/// A chat prompt: fixed instruction plus the user turn carrying context and question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RagAnswer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamFailure {
    pub code: String,
    pub message: String,
}

impl From<&RagError> for StreamFailure {
    fn from(error: &RagError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.public_message(),
        }
    }
}

/// Events of an incrementally generated answer, in emission order:
/// `Sources`, zero or more `Token`s, then `Done`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum StreamEvent {
    Sources(Vec<Source>),
    Token(String),
    /// Complete answer produced without calling the generator (nothing retrieved).
    Answer(String),
    Error(StreamFailure),
    #[serde(skip_serializing)]
    Done,
}

pub const STREAM_DONE_SENTINEL: &str = "[DONE]";

impl StreamEvent {
    /// Wire payload for one `data:` line.
    pub fn data(&self) -> String {
        match self {
            Self::Done => STREAM_DONE_SENTINEL.to_string(),
            event => serde_json::to_string(event).unwrap_or_else(|_| {
                r#"{"type":"error","content":{"code":"stream_encoding","message":"failed to encode event"}}"#
                    .to_string()
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
        }
    }
}
