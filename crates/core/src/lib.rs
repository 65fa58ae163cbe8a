pub mod chunking;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod openai;
pub mod orchestrator;
pub mod retrieval;
pub mod stores;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use chunking::{build_chunks, Chunker, ChunkingConfig, TextSegment};
pub use context::{assemble_context, sources};
pub use embeddings::{
    align_embeddings, CharacterNgramEmbedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL,
};
pub use error::{RagError, Result};
pub use extractor::{looks_like_pdf, LopdfExtractor, PageText, PdfExtractor};
pub use generation::{OpenAiChatGenerator, DEFAULT_CHAT_MODEL};
pub use ingest::{
    digest_bytes, discover_pdf_files, IngestedPdf, IngestionPipeline, IngestionReport, SkippedPdf,
};
pub use models::{
    ChunkPayload, DocumentChunk, DocumentFingerprint, IndexedEmbedding, IndexedPoint,
    IngestionOptions, IngestionReceipt, Prompt, QueryRequest, RagAnswer, ScoredPoint,
    SearchResult, Source, StreamEvent, StreamFailure, DEFAULT_TOP_K, MAX_QUESTION_CHARS,
    MAX_TOP_K, STREAM_DONE_SENTINEL,
};
pub use openai::{OpenAiConfig, DEFAULT_OPENAI_BASE_URL};
pub use orchestrator::{
    build_prompt, AnswerStream, RagComponents, RagEngine, RagOptions, NO_RELEVANT_INFORMATION,
};
pub use retrieval::RetrievalPipeline;
pub use stores::{InMemoryVectorIndex, QdrantStore};
pub use traits::{Embedder, Generator, TokenStream, VectorIndex};
