//! In-process collaborators for exercising the pipelines without network access.

use crate::embeddings::CharacterNgramEmbedder;
use crate::extractor::{PageText, PdfExtractor};
use crate::models::{ChunkPayload, IndexedEmbedding, IndexedPoint, Prompt, ScoredPoint};
use crate::traits::{Embedder, Generator, TokenStream, VectorIndex};
use crate::RagError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn scored(id: &str, score: f32, text: &str) -> ScoredPoint {
    ScoredPoint {
        id: id.to_string(),
        score,
        payload: ChunkPayload {
            text: text.to_string(),
            document_id: "doc-1".to_string(),
            file_name: format!("{id}.pdf"),
            page: Some(1),
            chunk_index: 0,
            uploaded_at: None,
            checksum: None,
        },
    }
}

pub(crate) struct FakeExtractor {
    pages: Vec<PageText>,
}

impl FakeExtractor {
    pub(crate) fn with_pages(pages: &[(u32, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(number, text)| PageText {
                    number: Some(*number),
                    text: text.to_string(),
                })
                .collect(),
        }
    }
}

impl PdfExtractor for FakeExtractor {
    fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<PageText>, RagError> {
        Ok(self.pages.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmbedderMode {
    Healthy,
    Failing,
    /// Returns the batch in reverse order, indices intact.
    Reversed,
    /// Silently drops the last vector of a batch.
    Short,
}

pub(crate) struct FakeEmbedder {
    inner: CharacterNgramEmbedder,
    mode: EmbedderMode,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    fn with_mode(dimensions: usize, mode: EmbedderMode) -> Self {
        Self {
            inner: CharacterNgramEmbedder { dimensions },
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn new(dimensions: usize) -> Self {
        Self::with_mode(dimensions, EmbedderMode::Healthy)
    }

    pub(crate) fn failing(dimensions: usize) -> Self {
        Self::with_mode(dimensions, EmbedderMode::Failing)
    }

    pub(crate) fn reversed(dimensions: usize) -> Self {
        Self::with_mode(dimensions, EmbedderMode::Reversed)
    }

    pub(crate) fn short(dimensions: usize) -> Self {
        Self::with_mode(dimensions, EmbedderMode::Short)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut embeddings = match self.mode {
            EmbedderMode::Failing => {
                return Err(RagError::Embedding("provider unavailable".to_string()))
            }
            _ => self.inner.embed_batch(texts).await?,
        };
        match self.mode {
            EmbedderMode::Reversed => embeddings.reverse(),
            EmbedderMode::Short => {
                embeddings.pop();
            }
            _ => {}
        }
        Ok(embeddings)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.mode == EmbedderMode::Failing {
            return Err(RagError::Embedding("provider unavailable".to_string()));
        }
        self.inner.embed_query(text).await
    }
}

/// Records writes and answers searches with canned hits.
#[derive(Default)]
pub(crate) struct FakeIndex {
    hits: Vec<ScoredPoint>,
    fail_upsert: bool,
    upserts: Mutex<Vec<Vec<IndexedPoint>>>,
    searches: AtomicUsize,
    last_limit: Mutex<Option<usize>>,
}

impl FakeIndex {
    pub(crate) fn with_hits(hits: Vec<ScoredPoint>) -> Self {
        Self {
            hits,
            ..Self::default()
        }
    }

    pub(crate) fn rejecting_writes() -> Self {
        Self {
            fail_upsert: true,
            ..Self::default()
        }
    }

    pub(crate) fn upsert_calls(&self) -> usize {
        self.upserts.lock().map(|calls| calls.len()).unwrap_or_default()
    }

    pub(crate) fn upserted(&self) -> Vec<IndexedPoint> {
        self.upserts
            .lock()
            .map(|calls| calls.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn search_calls(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub(crate) fn last_limit(&self) -> Option<usize> {
        self.last_limit.lock().ok().and_then(|limit| *limit)
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn ensure_collection(&self, _dimensions: usize) -> Result<(), RagError> {
        Ok(())
    }

    async fn upsert(&self, points: Vec<IndexedPoint>) -> Result<(), RagError> {
        if self.fail_upsert {
            return Err(RagError::index("fake", "write rejected"));
        }
        if let Ok(mut calls) = self.upserts.lock() {
            calls.push(points);
        }
        Ok(())
    }

    async fn search(&self, _vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, RagError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_limit.lock() {
            *last = Some(limit);
        }
        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}

/// Sets its flag when dropped, so tests can observe upstream release.
pub(crate) struct DropFlag(pub(crate) Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

enum GeneratorMode {
    Scripted,
    /// Streams the tokens, then a failure.
    BreaksAfterTokens,
    /// Never finishes; drops `DropFlag` when the stream is released.
    Endless(Arc<AtomicBool>),
}

/// Answers with a fixed token sequence; `complete` returns the tokens joined.
pub(crate) struct FakeGenerator {
    tokens: Vec<String>,
    mode: GeneratorMode,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    last_prompt: Mutex<Option<Prompt>>,
}

impl FakeGenerator {
    fn with_mode(tokens: &[&str], mode: GeneratorMode) -> Self {
        Self {
            tokens: tokens.iter().map(|token| token.to_string()).collect(),
            mode,
            complete_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub(crate) fn scripted(tokens: &[&str]) -> Self {
        Self::with_mode(tokens, GeneratorMode::Scripted)
    }

    pub(crate) fn breaking_after(tokens: &[&str]) -> Self {
        Self::with_mode(tokens, GeneratorMode::BreaksAfterTokens)
    }

    pub(crate) fn endless(released: Arc<AtomicBool>) -> Self {
        Self::with_mode(&[], GeneratorMode::Endless(released))
    }

    pub(crate) fn calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst) + self.stream_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_prompt(&self) -> Option<Prompt> {
        self.last_prompt.lock().ok().and_then(|prompt| prompt.clone())
    }

    fn remember(&self, prompt: &Prompt) {
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = Some(prompt.clone());
        }
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn complete(&self, prompt: &Prompt) -> Result<String, RagError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.remember(prompt);
        match self.mode {
            GeneratorMode::Scripted => Ok(self.tokens.concat()),
            _ => Err(RagError::Generation("model unavailable".to_string())),
        }
    }

    async fn stream(&self, prompt: &Prompt) -> Result<TokenStream, RagError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.remember(prompt);
        let tokens = stream::iter(self.tokens.clone().into_iter().map(Ok));
        match &self.mode {
            GeneratorMode::Scripted => Ok(tokens.boxed()),
            GeneratorMode::BreaksAfterTokens => Ok(tokens
                .chain(stream::once(async {
                    Err(RagError::Generation("connection reset".to_string()))
                }))
                .boxed()),
            GeneratorMode::Endless(released) => {
                let guard = DropFlag(Arc::clone(released));
                Ok(stream::unfold(guard, |guard| async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Some((Ok("tick".to_string()), guard))
                })
                .boxed())
            }
        }
    }
}
